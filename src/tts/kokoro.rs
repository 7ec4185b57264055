//! Kokoro speech synthesis backend.

use anyhow::Result;
use parking_lot::Mutex;
use sherpa_rs::OnnxConfig;
use sherpa_rs::tts::{CommonTtsConfig, KokoroTts, KokoroTtsConfig};
use tracing::{debug, info};

use super::{AudioPayload, SynthesisError, Synthesizer};
use crate::config::ServerConfig;

/// Kokoro uses a fixed 24 kHz output rate.
const KOKORO_SAMPLE_RATE: u32 = 24000;

/// Kokoro TTS engine bound to one voice.
///
/// The underlying engine needs exclusive access per call, so concurrent
/// requests queue on the inner mutex.
pub struct KokoroSynthesizer {
    tts: Mutex<KokoroTts>, // Kokoro TTS engine
    sample_rate: u32,      // Output sample rate
    speaker_id: i32,       // Speaker/voice identifier
    speed: f32,            // Speech speed multiplier
}

impl KokoroSynthesizer {
    /// Load the Kokoro model described by `config`.
    ///
    /// # Errors
    /// Returns an error if the configured thread count does not fit the
    /// engine's settings.
    pub fn new(config: &ServerConfig) -> Result<Self> {
        let provider = config.effective_provider();
        let profile = config.voice_profile();

        info!("Initializing Kokoro TTS synthesizer with {} provider", provider);
        info!("TTS voice: {} (speaker ID: {}, {})", config.voice, config.speaker_id, profile.language);

        let tts_config = KokoroTtsConfig {
            model: config.tts_model_path().to_string_lossy().to_string(),
            voices: config.tts_voices_path().to_string_lossy().to_string(),
            tokens: config.tts_tokens_path().to_string_lossy().to_string(),
            data_dir: config.tts_data_dir().to_string_lossy().to_string(),
            dict_dir: config.tts_dict_dir().to_string_lossy().to_string(),
            lexicon: profile.lexicon(&config.kokoro_dir()),
            lang: profile.espeak_lang.to_string(),
            length_scale: 1.0 / config.speed,
            onnx_config: OnnxConfig {
                provider: provider.as_sherpa_provider().to_string(),
                num_threads: i32::try_from(config.threads)?,
                debug: config.verbose,
            },
            common_config: CommonTtsConfig { max_num_sentences: 1, ..Default::default() },
        };

        let tts = KokoroTts::new(tts_config);

        Ok(Self { tts: Mutex::new(tts), sample_rate: KOKORO_SAMPLE_RATE, speaker_id: config.speaker_id, speed: config.speed })
    }

    /// Get the sample rate of the synthesized audio.
    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }
}

impl Synthesizer for KokoroSynthesizer {
    fn synthesize(&self, text: &str) -> Result<AudioPayload, SynthesisError> {
        if text.trim().is_empty() {
            return Ok(AudioPayload::new(Vec::new(), self.sample_rate));
        }

        // The engine takes a C string
        if text.contains('\0') {
            return Err(SynthesisError::InvalidInput("text contains a NUL byte".to_string()));
        }

        debug!("Synthesizing: \"{}\"", text);

        let audio = self
            .tts
            .lock()
            .create(text, self.speaker_id, self.speed)
            .map_err(|e| SynthesisError::Engine(e.to_string()))?;

        info!("🎵 Generated speech ({} samples)", audio.samples.len());
        Ok(AudioPayload::new(audio.samples, self.sample_rate))
    }
}
