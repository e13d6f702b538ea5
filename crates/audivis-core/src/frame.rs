//! Fixed-size PCM audio frames and the byte accumulator that produces them.
//!
//! The virtual microphone consumes 10 ms of 48 kHz mono signed 16-bit PCM per
//! submission, which is exactly [`FRAME_BYTES`] bytes. Producers hand over
//! arbitrarily sized chunks; [`FrameAccumulator`] slices them into frames
//! without skipping or reordering bytes.

use std::collections::VecDeque;
use std::fmt;

use crate::error::{Error, Result};

/// Size of one PCM frame in bytes.
pub const FRAME_BYTES: usize = 960;

/// Sample rate advertised by the virtual microphone.
pub const SAMPLE_RATE_HZ: u32 = 48_000;

/// Number of interleaved channels per frame.
pub const CHANNELS: u16 = 1;

/// Bytes per sample (signed 16-bit little-endian).
pub const BYTES_PER_SAMPLE: u16 = 2;

/// Playback duration of one frame in milliseconds.
pub const FRAME_DURATION_MS: u64 =
    (FRAME_BYTES as u64 * 1000) / (SAMPLE_RATE_HZ as u64 * CHANNELS as u64 * BYTES_PER_SAMPLE as u64);

/// Exactly [`FRAME_BYTES`] bytes of PCM payload.
#[derive(Clone, PartialEq, Eq)]
pub struct AudioFrame([u8; FRAME_BYTES]);

impl AudioFrame {
    /// A frame of digital silence.
    #[must_use]
    pub fn silence() -> Self {
        Self([0; FRAME_BYTES])
    }

    /// Build a frame from a slice.
    ///
    /// # Errors
    /// Returns [`Error::InvalidFrameLength`] unless `bytes` is exactly
    /// [`FRAME_BYTES`] long.
    pub fn from_slice(bytes: &[u8]) -> Result<Self> {
        let array: [u8; FRAME_BYTES] = bytes.try_into().map_err(|_| Error::InvalidFrameLength {
            expected: FRAME_BYTES,
            actual: bytes.len(),
        })?;
        Ok(Self(array))
    }

    /// Raw PCM bytes.
    #[must_use]
    pub fn as_bytes(&self) -> &[u8; FRAME_BYTES] {
        &self.0
    }
}

impl TryFrom<&[u8]> for AudioFrame {
    type Error = Error;

    fn try_from(bytes: &[u8]) -> Result<Self> {
        Self::from_slice(bytes)
    }
}

impl From<[u8; FRAME_BYTES]> for AudioFrame {
    fn from(bytes: [u8; FRAME_BYTES]) -> Self {
        Self(bytes)
    }
}

impl AsRef<[u8]> for AudioFrame {
    fn as_ref(&self) -> &[u8] {
        &self.0
    }
}

impl fmt::Debug for AudioFrame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AudioFrame")
            .field("len", &FRAME_BYTES)
            .field("silent", &self.0.iter().all(|&b| b == 0))
            .finish()
    }
}

/// FIFO of producer bytes, drained one frame at a time.
///
/// A frame stays at the head of the queue until [`consume_frame`] is called,
/// so a frame rejected by the driver is offered again on the next attempt.
///
/// [`consume_frame`]: FrameAccumulator::consume_frame
#[derive(Debug, Default)]
pub struct FrameAccumulator {
    buf: VecDeque<u8>,
}

impl FrameAccumulator {
    /// Create an empty accumulator.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Append producer bytes.
    pub fn push(&mut self, bytes: &[u8]) {
        self.buf.extend(bytes);
    }

    /// Number of buffered bytes, including a trailing partial frame.
    #[must_use]
    pub fn pending_bytes(&self) -> usize {
        self.buf.len()
    }

    /// Number of complete frames available.
    #[must_use]
    pub fn pending_frames(&self) -> usize {
        self.buf.len() / FRAME_BYTES
    }

    /// Copy the frame at the head of the queue without removing it.
    #[must_use]
    pub fn peek_frame(&self) -> Option<AudioFrame> {
        if self.buf.len() < FRAME_BYTES {
            return None;
        }
        let mut bytes = [0u8; FRAME_BYTES];
        for (dst, src) in bytes.iter_mut().zip(self.buf.iter()) {
            *dst = *src;
        }
        Some(AudioFrame(bytes))
    }

    /// Drop the frame at the head of the queue. Returns `false` when no
    /// complete frame is buffered.
    pub fn consume_frame(&mut self) -> bool {
        if self.buf.len() < FRAME_BYTES {
            return false;
        }
        self.buf.drain(..FRAME_BYTES);
        true
    }

    /// Discard everything, including a partial frame.
    pub fn clear(&mut self) {
        self.buf.clear();
    }
}
