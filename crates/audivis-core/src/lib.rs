//! Audivis Core - Domain model for the virtual USB microphone.
//!
//! This crate holds the OS-independent pieces shared by the driver protocol
//! crate and the daemon: PCM frames and their accumulator, endpoint and
//! device identifiers, the device state machine, submission outcomes and
//! lifecycle notifications.

pub mod endpoint;
pub mod error;
pub mod frame;
pub mod pump;
pub mod state;
pub mod status;
pub mod submission;

pub use endpoint::{DeviceId, Direction, EndpointAddress, EndpointType};
pub use error::{Error, Result};
pub use frame::{AudioFrame, FRAME_BYTES, FrameAccumulator};
pub use pump::{DrainReport, FrameSink, FramePump, PumpStats};
pub use state::{DeviceState, Transition};
pub use status::{DeviceStatus, StatusObserver};
pub use submission::{BackpressureReason, Submission};
