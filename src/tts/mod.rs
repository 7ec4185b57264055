//! Text-to-speech capability shared by every client connection.
//!
//! The server only depends on the [`Synthesizer`] trait. The bundled backend
//! is Kokoro running through sherpa-rs.

mod kokoro;
#[cfg(test)]
pub mod testing;

pub use kokoro::KokoroSynthesizer;

use thiserror::Error;
use tracing::{debug, info};

/// Samples produced by one synthesis call, plus the rate they play back at.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct AudioPayload {
    pub samples: Vec<f32>,
    pub sample_rate: u32,
}

impl AudioPayload {
    pub fn new(samples: Vec<f32>, sample_rate: u32) -> Self {
        Self { samples, sample_rate }
    }

    /// Playback length in seconds.
    pub fn duration_secs(&self) -> f32 {
        if self.sample_rate == 0 {
            return 0.0;
        }
        self.samples.len() as f32 / self.sample_rate as f32
    }
}

/// Failure reported by a synthesis backend.
#[derive(Debug, Error)]
pub enum SynthesisError {
    #[error("invalid input text: {0}")]
    InvalidInput(String),

    #[error("TTS generation failed: {0}")]
    Engine(String),
}

/// Converts text into audio using a fixed reference voice.
///
/// One instance is constructed at startup and shared by all connections, so
/// `synthesize` may be called from several threads at once. Backends that
/// cannot run concurrently must serialize internally.
pub trait Synthesizer: Send + Sync {
    /// Synthesize `text` into a complete payload.
    ///
    /// # Errors
    /// Returns an error if the backend rejects the text or inference fails.
    fn synthesize(&self, text: &str) -> Result<AudioPayload, SynthesisError>;

    /// Run one throwaway synthesis so the first client does not pay for
    /// lazy initialization inside the engine.
    fn warm_up(&self, text: &str) -> Result<(), SynthesisError> {
        info!("Warming up the synthesizer...");
        let payload = self.synthesize(text)?;
        debug!("Warm-up produced {} samples at {} Hz", payload.samples.len(), payload.sample_rate);
        info!("Warm-up completed");
        Ok(())
    }
}
