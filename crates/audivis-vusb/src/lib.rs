//! Audivis VUSB - control protocol for the virtual USB hub driver.
//!
//! The hub driver exposes virtual USB devices to the host OS. This crate
//! creates and attaches to such devices, configures their endpoints, plugs
//! them in and out, and streams PCM frames into the microphone's IN
//! endpoint with driver-side backpressure.
//!
//! All requests go through a [`ControlChannel`]. On Windows that is an
//! overlapped handle to the driver; elsewhere [`Hub::open`] reports the
//! driver as unavailable.

pub mod channel;
pub mod descriptor;
pub mod device;
pub mod error;
pub mod hub;
#[cfg(any(test, feature = "test-util"))]
pub mod mock;
pub mod naming;
pub mod protocol;
#[cfg(not(windows))]
pub mod unsupported;
#[cfg(windows)]
pub mod win32;

pub use channel::{ControlChannel, ControlCode};
pub use descriptor::default_microphone_descriptor;
pub use device::VirtualDevice;
pub use error::{VusbError, VusbResult};
pub use hub::{Hub, Provenance};

/// Channel type used on this platform.
#[cfg(windows)]
pub type PlatformChannel = win32::Win32ControlChannel;
/// Channel type used on this platform.
#[cfg(not(windows))]
pub type PlatformChannel = unsupported::UnsupportedChannel;

impl Hub<PlatformChannel> {
    /// Open the platform's virtual USB hub.
    ///
    /// # Errors
    /// Returns [`VusbError::Registry`] when the driver is not installed or
    /// cannot be opened.
    pub fn open() -> VusbResult<Self> {
        PlatformChannel::open().map(Self::with_channel)
    }
}
