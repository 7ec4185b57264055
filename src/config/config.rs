//! Server configuration and CLI argument parsing.

use std::path::PathBuf;

use anyhow::Result;
use clap::{Parser, ValueEnum};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use super::voices::VoiceProfile;
use crate::protocol::DEFAULT_CHUNK_DURATION;
use crate::server::{AdmissionPolicy, StreamSettings};

/// Hardware acceleration provider for ONNX models.
/// Auto-detected based on platform if not specified.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Provider {
    /// CPU inference (default fallback, always available)
    #[default]
    Cpu,
    /// NVIDIA CUDA acceleration (Linux only, requires CUDA toolkit)
    Cuda,
    /// Apple CoreML acceleration (macOS only, uses Neural Engine)
    #[value(name = "coreml")]
    CoreMl,
}

impl std::fmt::Display for Provider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_sherpa_provider())
    }
}

impl Provider {
    /// Provider string compatible with sherpa-rs.
    pub fn as_sherpa_provider(&self) -> &'static str {
        match self {
            Provider::Cpu => "cpu",
            Provider::Cuda => "cuda",
            Provider::CoreMl => "coreml",
        }
    }
}

/// Streaming TTS server configuration.
#[derive(Parser, Debug, Clone, Serialize, Deserialize)]
#[command(name = "tts-socket-server")]
#[command(author, version, about = "Stream synthesized speech to TCP clients", long_about = None)]
pub struct ServerConfig {
    /// Interface to listen on
    #[arg(long, env = "TTS_HOST", default_value = "0.0.0.0")]
    pub host: String,

    /// Port to listen on
    #[arg(long, short = 'p', env = "TTS_PORT", default_value = "9998")]
    pub port: u16,

    /// Seconds of audio carried by each streamed chunk
    #[arg(long, default_value_t = DEFAULT_CHUNK_DURATION)]
    pub chunk_duration: f32,

    /// Bytes read from the socket per request. Longer requests are truncated
    #[arg(long, default_value = "1024")]
    pub read_buffer: usize,

    /// Maximum simultaneous connections (0 = unlimited)
    #[arg(long, default_value = "0")]
    pub max_connections: usize,

    /// Directory containing the TTS model files
    #[arg(long, short = 'd', env = "MODEL_DIR", default_value_os_t = default_model_dir())]
    pub model_dir: PathBuf,

    /// Kokoro voice name used for every request (e.g., af_bella, bf_emma)
    #[arg(long, default_value = "af_bella")]
    pub voice: String,

    /// Kokoro speaker ID matching the voice (af_bella=2, bf_emma=21)
    #[arg(long, default_value = "2")]
    pub speaker_id: i32,

    /// Speech speed multiplier
    #[arg(long, default_value = "1.0")]
    pub speed: f32,

    /// Hardware acceleration provider (auto-detected if not specified)
    #[arg(long, value_enum)]
    pub provider: Option<Provider>,

    /// Inference threads (0 = auto-detect based on CPU cores)
    #[arg(long, default_value = "0")]
    pub threads: usize,

    /// Text synthesized once at startup before accepting clients
    #[arg(long, default_value = "Warm-up text for the model.")]
    pub warm_up_text: String,

    /// Start accepting clients without a warm-up synthesis
    #[arg(long)]
    pub skip_warm_up: bool,

    /// Enable verbose logging
    #[arg(long, short = 'v')]
    pub verbose: bool,
}

impl ServerConfig {
    /// Parse configuration from command line arguments.
    pub fn from_args() -> Self {
        let mut config = Self::parse();
        config.normalize_thread_count();
        config
    }

    /// Pick a thread count when none was given.
    ///
    /// GPU providers parallelize internally, so extra CPU threads only add
    /// contention there.
    fn normalize_thread_count(&mut self) {
        if self.threads != 0 {
            return;
        }
        self.threads = match self.effective_provider() {
            Provider::Cuda => 1,
            _ => (num_cpus::get() / 2).max(1),
        };
    }

    /// Get the effective acceleration provider.
    pub fn effective_provider(&self) -> Provider {
        self.provider.unwrap_or_else(detect_provider)
    }

    /// Address string handed to the listener.
    pub fn listen_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    pub fn stream_settings(&self) -> StreamSettings {
        StreamSettings { chunk_duration: self.chunk_duration, read_buffer: self.read_buffer }
    }

    pub fn admission_policy(&self) -> AdmissionPolicy {
        AdmissionPolicy::from_limit(self.max_connections)
    }

    pub fn voice_profile(&self) -> VoiceProfile {
        VoiceProfile::for_voice(&self.voice)
    }

    /// Directory of the Kokoro multi-lang v1.0 model.
    pub fn kokoro_dir(&self) -> PathBuf {
        self.model_dir.join("tts").join("kokoro-multi-lang-v1_0")
    }

    pub fn tts_model_path(&self) -> PathBuf {
        self.kokoro_dir().join("model.onnx")
    }

    pub fn tts_voices_path(&self) -> PathBuf {
        self.kokoro_dir().join("voices.bin")
    }

    pub fn tts_tokens_path(&self) -> PathBuf {
        self.kokoro_dir().join("tokens.txt")
    }

    /// espeak-ng data used for non-lexicon languages.
    pub fn tts_data_dir(&self) -> PathBuf {
        self.kokoro_dir().join("espeak-ng-data")
    }

    /// Dictionary directory used for Chinese segmentation.
    pub fn tts_dict_dir(&self) -> PathBuf {
        self.kokoro_dir().join("dict")
    }

    /// Validate the configuration.
    ///
    /// Numeric settings are checked before the model files so that a bad
    /// flag is reported even when models are missing.
    pub fn validate(&self) -> Result<()> {
        if self.chunk_duration.is_nan() || self.chunk_duration <= 0.0 {
            anyhow::bail!("Chunk duration must be positive, got {}", self.chunk_duration);
        }

        if self.read_buffer == 0 {
            anyhow::bail!("Read buffer must be at least one byte");
        }

        if self.speed.is_nan() || self.speed <= 0.0 {
            anyhow::bail!("TTS speed must be positive");
        }

        if self.speaker_id < 0 {
            anyhow::bail!("Speaker ID must not be negative");
        }

        if !self.model_dir.exists() {
            anyhow::bail!("Model directory does not exist: {}", self.model_dir.display());
        }

        for path in [self.tts_model_path(), self.tts_voices_path(), self.tts_tokens_path()] {
            if !path.exists() {
                anyhow::bail!("Required model file not found: {}", path.display());
            }
        }

        Ok(())
    }

    /// Log the current configuration.
    pub fn log_config(&self) {
        info!("Configuration:");
        info!("  Listen address: {}", self.listen_addr());
        info!("  Chunk duration: {}s", self.chunk_duration);
        info!("  Read buffer: {} bytes", self.read_buffer);
        match self.max_connections {
            0 => info!("  Max connections: unlimited"),
            n => info!("  Max connections: {}", n),
        }
        info!("  Model directory: {}", self.model_dir.display());
        info!("  TTS voice: {} (speaker ID: {})", self.voice, self.speaker_id);
        info!("  TTS speed: {}", self.speed);
        info!("  Provider: {} ({} threads)", self.effective_provider(), self.threads);

        if let Ok(json) = serde_json::to_string(self) {
            debug!("Resolved configuration: {}", json);
        }
    }
}

/// Get the default model directory (~/.tts-socket-server/models).
fn default_model_dir() -> PathBuf {
    match dirs::home_dir() {
        Some(home_dir) => home_dir.join(".tts-socket-server").join("models"),
        None => PathBuf::from("models"),
    }
}

/// Auto-detect the best hardware acceleration provider.
fn detect_provider() -> Provider {
    #[cfg(target_os = "macos")]
    {
        Provider::CoreMl
    }

    #[cfg(target_os = "linux")]
    {
        if has_nvidia_gpu() { Provider::Cuda } else { Provider::Cpu }
    }

    #[cfg(not(any(target_os = "macos", target_os = "linux")))]
    {
        Provider::Cpu
    }
}

/// Check for NVIDIA device nodes, including Jetson (Tegra) boards.
#[cfg(target_os = "linux")]
fn has_nvidia_gpu() -> bool {
    use std::path::Path;

    ["/dev/nvidia0", "/dev/nvidiactl", "/dev/nvhost-ctrl-gpu", "/etc/nv_tegra_release"].iter().any(|path| Path::new(path).exists())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(args: &[&str]) -> ServerConfig {
        let mut argv = vec!["tts-socket-server"];
        argv.extend_from_slice(args);
        ServerConfig::try_parse_from(argv).unwrap()
    }

    #[test]
    fn test_defaults() {
        let config = ServerConfig::try_parse_from(["tts-socket-server", "--host", "0.0.0.0", "--port", "9998"]).unwrap();
        assert_eq!(config.listen_addr(), "0.0.0.0:9998");
        assert_eq!(config.chunk_duration, 0.5);
        assert_eq!(config.read_buffer, 1024);
        assert_eq!(config.admission_policy(), AdmissionPolicy::Unbounded);
        assert_eq!(config.warm_up_text, "Warm-up text for the model.");
        assert!(!config.skip_warm_up);
    }

    #[test]
    fn test_overrides() {
        let config = parse(&["--host", "127.0.0.1", "-p", "7000", "--chunk-duration", "0.25", "--max-connections", "8", "--provider", "coreml"]);
        assert_eq!(config.listen_addr(), "127.0.0.1:7000");
        assert_eq!(config.stream_settings().chunk_duration, 0.25);
        assert_eq!(config.admission_policy(), AdmissionPolicy::Limited(8));
        assert_eq!(config.effective_provider(), Provider::CoreMl);
    }

    #[test]
    fn test_thread_count_is_normalized() {
        let mut config = parse(&["--provider", "cuda"]);
        config.normalize_thread_count();
        assert_eq!(config.threads, 1);

        let mut config = parse(&["--provider", "cpu", "--threads", "3"]);
        config.normalize_thread_count();
        assert_eq!(config.threads, 3);
    }

    #[test]
    fn test_validate_rejects_bad_numbers_before_files() {
        let config = parse(&["--chunk-duration", "0", "-d", "/nonexistent"]);
        assert!(config.validate().unwrap_err().to_string().contains("Chunk duration"));

        let config = parse(&["--read-buffer", "0", "-d", "/nonexistent"]);
        assert!(config.validate().unwrap_err().to_string().contains("Read buffer"));

        let config = parse(&["--speed", "0", "-d", "/nonexistent"]);
        assert!(config.validate().unwrap_err().to_string().contains("speed"));
    }

    #[test]
    fn test_validate_missing_model_dir() {
        let config = parse(&["-d", "/nonexistent/tts-models"]);
        assert!(config.validate().unwrap_err().to_string().contains("Model directory"));
    }

    #[test]
    fn test_model_paths() {
        let config = parse(&["-d", "/models"]);
        assert_eq!(config.tts_model_path(), PathBuf::from("/models/tts/kokoro-multi-lang-v1_0/model.onnx"));
        assert_eq!(config.tts_tokens_path(), PathBuf::from("/models/tts/kokoro-multi-lang-v1_0/tokens.txt"));
    }
}
