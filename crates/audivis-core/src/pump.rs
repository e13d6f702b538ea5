//! Frame pump: moves accumulated PCM bytes into a frame sink.
//!
//! The pump offers the frame at the head of its queue to the sink and only
//! advances once the sink accepted it. The first backpressure result ends
//! the drain; the caller waits and drains again.

use tracing::trace;

use crate::frame::{AudioFrame, FrameAccumulator};
use crate::submission::{BackpressureReason, Submission};

/// Anything that accepts fixed-size PCM frames with backpressure.
#[cfg_attr(test, mockall::automock(type Error = String;))]
pub trait FrameSink {
    type Error;

    /// Offer one frame.
    ///
    /// # Errors
    /// Returns the sink's error for hard failures. Backpressure is reported
    /// as [`Submission::Backpressure`], not as an error.
    fn submit_frame(&mut self, frame: &AudioFrame) -> Result<Submission, Self::Error>;
}

/// Counters kept across drains.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PumpStats {
    /// Frames accepted by the sink
    pub frames_submitted: u64,
    /// Drains that ended on backpressure
    pub backpressure_events: u64,
}

/// Result of one [`FramePump::drain`] call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DrainReport {
    /// Frames accepted during this drain
    pub submitted: usize,
    /// Set when the drain stopped because the sink pushed back
    pub backpressure: Option<BackpressureReason>,
}

/// Accumulator plus submission bookkeeping.
#[derive(Debug, Default)]
pub struct FramePump {
    acc: FrameAccumulator,
    stats: PumpStats,
}

impl FramePump {
    /// Create an empty pump.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue producer bytes.
    pub fn push(&mut self, bytes: &[u8]) {
        self.acc.push(bytes);
    }

    /// Bytes waiting to be submitted, including a partial frame.
    #[must_use]
    pub fn pending_bytes(&self) -> usize {
        self.acc.pending_bytes()
    }

    /// Complete frames waiting to be submitted.
    #[must_use]
    pub fn pending_frames(&self) -> usize {
        self.acc.pending_frames()
    }

    /// Counters since construction.
    #[must_use]
    pub fn stats(&self) -> PumpStats {
        self.stats
    }

    /// Submit queued frames until the queue runs dry or the sink pushes back.
    ///
    /// # Errors
    /// Propagates the first hard error from the sink. The frame that failed
    /// stays queued.
    pub fn drain<S: FrameSink>(&mut self, sink: &mut S) -> Result<DrainReport, S::Error> {
        let mut submitted = 0;

        while let Some(frame) = self.acc.peek_frame() {
            match sink.submit_frame(&frame)? {
                Submission::Accepted => {
                    self.acc.consume_frame();
                    self.stats.frames_submitted += 1;
                    submitted += 1;
                }
                Submission::Backpressure(reason) => {
                    trace!(%reason, submitted, pending = self.acc.pending_frames(), "Sink pushed back");
                    self.stats.backpressure_events += 1;
                    return Ok(DrainReport { submitted, backpressure: Some(reason) });
                }
            }
        }

        Ok(DrainReport { submitted, backpressure: None })
    }
}
