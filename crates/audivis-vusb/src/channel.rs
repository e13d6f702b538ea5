//! The control channel seam between the device protocol and the OS.
//!
//! Every operation on the hub and its devices is a synchronous control
//! request on one shared driver handle. [`ControlChannel`] abstracts that
//! handle so the protocol can run against the Win32 driver or against the
//! recording channel used in tests.

use std::fmt;

use crate::error::VusbResult;

/// Driver-defined I/O control code.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ControlCode(u32);

impl ControlCode {
    pub const CREATE_DEVICE: Self = Self(0x002a_e804);
    pub const CONFIGURE_ENDPOINTS: Self = Self(0x002a_a808);
    pub const CONFIGURE_ENDPOINT_TYPES: Self = Self(0x002a_a81c);
    pub const PLUG_STATE: Self = Self(0x002a_ac04);
    pub const QUERY_MEDIA: Self = Self(0x002a_f014);
    pub const SUBMIT_AUDIO: Self = Self(0x002a_b018);

    /// Raw code passed to the OS.
    #[must_use]
    pub const fn get(self) -> u32 {
        self.0
    }

    fn name(self) -> Option<&'static str> {
        let name = match self {
            Self::CREATE_DEVICE => "create-device",
            Self::CONFIGURE_ENDPOINTS => "configure-endpoints",
            Self::CONFIGURE_ENDPOINT_TYPES => "configure-endpoint-types",
            Self::PLUG_STATE => "plug-state",
            Self::QUERY_MEDIA => "query-media",
            Self::SUBMIT_AUDIO => "submit-audio",
            _ => return None,
        };
        Some(name)
    }
}

impl fmt::Display for ControlCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.name() {
            Some(name) => write!(f, "{name} (0x{:06x})", self.0),
            None => write!(f, "0x{:06x}", self.0),
        }
    }
}

/// A synchronous request/response channel to the hub driver.
///
/// Implementations must be safe to share between threads: concurrent
/// requests are serialized internally and each one completes before the
/// call returns.
pub trait ControlChannel: Send + Sync {
    /// Named notification object owned by a device. Dropping it releases
    /// the OS object.
    type Event: Send;

    /// Send `input` to the driver. Any output is discarded.
    ///
    /// # Errors
    /// Returns [`VusbError::Control`] with the OS error when the driver
    /// rejects the request, or [`VusbError::InvalidHandle`] when the
    /// channel has been closed.
    ///
    /// [`VusbError::Control`]: crate::VusbError::Control
    /// [`VusbError::InvalidHandle`]: crate::VusbError::InvalidHandle
    fn request(&self, code: ControlCode, input: &[u8]) -> VusbResult<()>;

    /// Send `buf` to the driver and let it write its reply into the same
    /// buffer. Returns the number of bytes the driver reported.
    ///
    /// # Errors
    /// Same as [`ControlChannel::request`].
    fn request_inout(&self, code: ControlCode, buf: &mut [u8]) -> VusbResult<usize>;

    /// Create an auto-reset notification event, initially unsignaled.
    /// `None` creates an anonymous event.
    ///
    /// # Errors
    /// Returns [`VusbError::Event`] when the OS refuses to create it.
    ///
    /// [`VusbError::Event`]: crate::VusbError::Event
    fn create_event(&self, name: Option<&str>) -> VusbResult<Self::Event>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_control_codes() {
        assert_eq!(ControlCode::CREATE_DEVICE.get(), 0x2ae804);
        assert_eq!(ControlCode::CONFIGURE_ENDPOINTS.get(), 0x2aa808);
        assert_eq!(ControlCode::CONFIGURE_ENDPOINT_TYPES.get(), 0x2aa81c);
        assert_eq!(ControlCode::PLUG_STATE.get(), 0x2aac04);
        assert_eq!(ControlCode::QUERY_MEDIA.get(), 0x2af014);
        assert_eq!(ControlCode::SUBMIT_AUDIO.get(), 0x2ab018);
    }

    #[test]
    fn test_display_names_known_codes() {
        assert_eq!(ControlCode::PLUG_STATE.to_string(), "plug-state (0x2aac04)");
        assert_eq!(ControlCode(0x1234).to_string(), "0x001234");
    }
}
