//! Splits synthesized audio into playback-sized chunks.

use std::slice::Chunks;

use crate::tts::AudioPayload;

/// Seconds of audio per chunk unless configured otherwise.
pub const DEFAULT_CHUNK_DURATION: f32 = 0.5;

/// Number of samples in one chunk: `floor(sample_rate * duration)`, at least 1.
pub fn chunk_size(sample_rate: u32, duration_secs: f32) -> usize {
    let size = (f64::from(sample_rate) * f64::from(duration_secs)).floor();
    // NaN and negative values saturate to 0 in the cast
    (size as usize).max(1)
}

/// Splits payloads into chunks of a fixed duration.
///
/// Every chunk holds exactly `chunk_size` samples except the last, which
/// takes whatever remains. A payload shorter than one chunk becomes a single
/// chunk, and an empty payload produces none.
#[derive(Debug, Clone, Copy)]
pub struct Chunker {
    duration_secs: f32,
}

impl Chunker {
    pub fn new(duration_secs: f32) -> Self {
        Self { duration_secs }
    }

    /// Samples per chunk at `sample_rate`.
    pub fn chunk_size(&self, sample_rate: u32) -> usize {
        chunk_size(sample_rate, self.duration_secs)
    }

    /// Lazily walk `payload` chunk by chunk, in sample order.
    pub fn split<'a>(&self, payload: &'a AudioPayload) -> Chunks<'a, f32> {
        payload.samples.chunks(self.chunk_size(payload.sample_rate))
    }
}

impl Default for Chunker {
    fn default() -> Self {
        Self::new(DEFAULT_CHUNK_DURATION)
    }
}
