//! Driver protocol error types.

use audivis_core::DeviceId;
use thiserror::Error;

use crate::channel::ControlCode;
use crate::protocol::ERROR_NO_MORE_ITEMS;

/// Error raised while talking to the virtual USB hub driver.
#[derive(Debug, Error)]
pub enum VusbError {
    #[error("Virtual USB hub unavailable: {0}")]
    Registry(String),

    #[error("Control request {code} failed with OS error {os_error}")]
    Control { code: ControlCode, os_error: u32 },

    #[error("Control request {code} issued on an invalid hub handle")]
    InvalidHandle { code: ControlCode },

    #[error("Failed to create event {name}: OS error {os_error}")]
    Event { name: String, os_error: u32 },

    #[error("Device descriptor is {actual} bytes, at least {minimum} required")]
    DescriptorTooShort { actual: usize, minimum: usize },

    #[error("Driver reported {reported} free packet slots, only {requested} were requested")]
    SlotOverflow { reported: u32, requested: u32 },

    #[error("Device {0} is closed")]
    DeviceClosed(DeviceId),

    #[error(transparent)]
    Validation(#[from] audivis_core::Error),
}

impl VusbError {
    /// The OS error code attached to a failed control request, if any.
    #[must_use]
    pub fn os_error(&self) -> Option<u32> {
        match self {
            Self::Control { os_error, .. } | Self::Event { os_error, .. } => Some(*os_error),
            _ => None,
        }
    }

    /// Whether the driver reported that it has nothing queued for us.
    #[must_use]
    pub fn is_no_more_items(&self) -> bool {
        matches!(self, Self::Control { os_error: ERROR_NO_MORE_ITEMS, .. })
    }
}

/// Result type for driver operations.
pub type VusbResult<T> = Result<T, VusbError>;
