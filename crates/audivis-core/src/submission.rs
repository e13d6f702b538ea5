//! Outcome of handing one frame to the driver.

use std::fmt;

/// Result of a single audio submission.
///
/// Backpressure is an expected, frequent outcome and is kept apart from
/// errors: the caller retries the same frame after a short delay.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Submission {
    /// The frame was enqueued by the driver.
    Accepted,
    /// The frame was not delivered; retry later.
    Backpressure(BackpressureReason),
}

impl Submission {
    /// `true` when the frame was accepted.
    #[must_use]
    pub fn is_accepted(self) -> bool {
        matches!(self, Self::Accepted)
    }
}

/// Why the driver could not take a frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackpressureReason {
    /// The media query reported that the driver queue has no free entries.
    QueueFull,
    /// The media query reported fewer packet slots than one frame needs.
    InsufficientSlots { available: u32 },
}

impl fmt::Display for BackpressureReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::QueueFull => f.write_str("driver queue full"),
            Self::InsufficientSlots { available } => {
                write!(f, "only {available} packet slots available")
            }
        }
    }
}
