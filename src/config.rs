//! # Configuration Management
//!
//! This module handles loading and managing application configuration from multiple sources:
//! - TOML configuration files (config.toml)
//! - Environment variables (with APP_ prefix)
//! - Default values (built into the code)
//!
//! ## Key Rust Concepts Used:
//! - **Serde**: Serialization/deserialization between Rust structs and data formats
//! - **derive macros**: Generate Debug, Clone, Serialize, Deserialize implementations
//! - **Nested structs**: One struct per concern keeps each section small
//!
//! ## Configuration Priority (highest to lowest):
//! 1. Environment variables (`APP_SERVER__PORT`, `APP_VAD__ENERGY_THRESHOLD`, ...)
//! 2. Configuration file (config.toml)
//! 3. Default values (defined in the Default impls)
//!
//! Sections are separated by a double underscore so that field names may keep
//! their own single underscores.

use crate::audio::{AudioFormat, SegmenterConfig};
use crate::conversation::turn::TurnConfig;
use anyhow::{anyhow, Result};
use serde::{Deserialize, Serialize};
use std::env;

/// Main application configuration that contains all settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    pub server: ServerConfig,
    pub audio: AudioConfig,
    pub vad: SegmenterConfig,
    pub turn: TurnConfig,
    pub playback: PlaybackConfig,
    pub transcription: TranscriptionConfig,
    pub synthesis: SynthesisConfig,
    pub performance: PerformanceConfig,
}

/// Server-specific configuration settings.
///
/// ## Common values:
/// - `host = "127.0.0.1"`: Only accept connections from localhost (development)
/// - `host = "0.0.0.0"`: Accept connections from any IP address (production)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,

    /// Seconds between websocket protocol pings
    pub heartbeat_interval_secs: u64,

    /// Seconds without any client traffic before a connection is dropped
    pub client_timeout_secs: u64,
}

/// Wire audio format. Always mono PCM16 little-endian.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AudioConfig {
    pub sample_rate: u32,
    pub frame_duration_ms: u32,
}

impl AudioConfig {
    pub fn format(&self) -> AudioFormat {
        AudioFormat::new(self.sample_rate, self.frame_duration_ms)
    }
}

/// How assistant audio is streamed back.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlaybackConfig {
    /// Bytes per outbound binary frame
    pub chunk_size: usize,

    /// Delay between frames, emulating real-time playback
    pub pacing_ms: u64,
}

/// Speech-to-text backend selection.
///
/// ## Engines:
/// - `placeholder`: returns `placeholder_text` for every utterance
/// - `http`: OpenAI-compatible `/audio/transcriptions` endpoint
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TranscriptionConfig {
    pub engine: String,
    pub api_url: String,
    pub api_key: Option<String>,
    pub model: String,
    pub language: Option<String>,
    pub timeout_ms: u64,
    pub placeholder_text: String,
}

impl Default for TranscriptionConfig {
    fn default() -> Self {
        Self {
            engine: "placeholder".to_string(),
            api_url: "https://api.openai.com/v1".to_string(),
            api_key: None,
            model: "whisper-1".to_string(),
            language: Some("en".to_string()),
            timeout_ms: 30_000,
            placeholder_text: "hello".to_string(),
        }
    }
}

/// Text-to-speech backend selection.
///
/// ## Engines:
/// - `tone`: 440 Hz beep sized to the reply, after `tone_latency_ms`
/// - `http`: OpenAI-compatible `/audio/speech` endpoint (WAV output)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SynthesisConfig {
    pub engine: String,
    pub api_url: String,
    pub api_key: Option<String>,
    pub model: String,
    pub voice: String,
    pub timeout_ms: u64,
    pub tone_latency_ms: u64,
}

impl Default for SynthesisConfig {
    fn default() -> Self {
        Self {
            engine: "tone".to_string(),
            api_url: "https://api.openai.com/v1".to_string(),
            api_key: None,
            model: "tts-1".to_string(),
            voice: "alloy".to_string(),
            timeout_ms: 30_000,
            tone_latency_ms: 300,
        }
    }
}

/// Performance tuning configuration.
///
/// ## Tuning guidelines:
/// - Higher concurrent sessions: more callers, more blocking-pool pressure
/// - Larger inbound queue: absorbs bursts, but delays backpressure to the client
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PerformanceConfig {
    pub max_concurrent_sessions: usize,

    /// Inbound messages buffered per connection before the socket stops reading
    pub inbound_queue_capacity: usize,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            server: ServerConfig {
                host: "127.0.0.1".to_string(),
                port: 8000,
                heartbeat_interval_secs: 30,
                client_timeout_secs: 60,
            },
            audio: AudioConfig {
                sample_rate: 16000,
                frame_duration_ms: 30,
            },
            vad: SegmenterConfig::default(),
            turn: TurnConfig::default(),
            playback: PlaybackConfig {
                chunk_size: 4096,
                pacing_ms: 10,
            },
            transcription: TranscriptionConfig::default(),
            synthesis: SynthesisConfig::default(),
            performance: PerformanceConfig {
                max_concurrent_sessions: 10,
                inbound_queue_capacity: 64,
            },
        }
    }
}

impl AppConfig {
    /// Load configuration from multiple sources in priority order.
    ///
    /// ## Configuration Loading Process:
    /// 1. Start with built-in defaults
    /// 2. Override with values from config.toml (if it exists)
    /// 3. Override with environment variables prefixed with APP_
    /// 4. Handle deployment-platform HOST/PORT and API key variables
    ///
    /// ## Environment Variable Examples:
    /// - `APP_SERVER__PORT=3000`: Override server port
    /// - `APP_VAD__SILENCE_FRAMES_THRESHOLD=25`: Longer end-of-speech pause
    /// - `APP_SYNTHESIS__ENGINE=http`: Use a remote TTS backend
    /// - `TRANSCRIPTION_API_KEY=...`: Key for the http transcription engine
    pub fn load() -> Result<Self> {
        let mut settings = config::Config::builder()
            .add_source(config::Config::try_from(&AppConfig::default())?)
            .add_source(config::File::with_name("config").required(false))
            .add_source(
                config::Environment::with_prefix("APP")
                    .prefix_separator("_")
                    .separator("__")
                    .try_parsing(true),
            );

        if let Ok(host) = env::var("HOST") {
            settings = settings.set_override("server.host", host)?;
        }

        if let Ok(port) = env::var("PORT") {
            settings = settings.set_override("server.port", port)?;
        }

        if let Ok(key) = env::var("TRANSCRIPTION_API_KEY") {
            settings = settings.set_override("transcription.api_key", key)?;
        }

        if let Ok(key) = env::var("SYNTHESIS_API_KEY") {
            settings = settings.set_override("synthesis.api_key", key)?;
        }

        let config = settings.build()?.try_deserialize()?;
        Ok(config)
    }

    /// Validate that the configuration values make sense.
    ///
    /// Catching bad values here gives one clear startup error instead of a
    /// segmenter that never fires or a queue that never holds anything.
    pub fn validate(&self) -> Result<()> {
        if self.server.port == 0 {
            return Err(anyhow!("Server port cannot be 0"));
        }

        if self.server.heartbeat_interval_secs == 0 {
            return Err(anyhow!("Heartbeat interval must be greater than 0"));
        }

        if self.server.client_timeout_secs <= self.server.heartbeat_interval_secs {
            return Err(anyhow!("Client timeout must be longer than the heartbeat interval"));
        }

        if self.audio.sample_rate == 0 || self.audio.frame_duration_ms == 0 {
            return Err(anyhow!("Audio sample rate and frame duration must be greater than 0"));
        }

        if self.audio.format().frame_bytes() == 0 {
            return Err(anyhow!("Audio frame must contain at least one sample"));
        }

        if self.vad.speech_frames_threshold == 0 || self.vad.silence_frames_threshold == 0 {
            return Err(anyhow!("VAD frame thresholds must be greater than 0"));
        }

        if self.vad.energy_threshold < 0.0 || self.vad.noise_floor_multiplier <= 0.0 {
            return Err(anyhow!("VAD energy threshold must be >= 0 and noise multiplier > 0"));
        }

        if self.vad.max_utterance_frames == 0 {
            return Err(anyhow!("VAD max_utterance_frames must be greater than 0"));
        }

        if self.vad.min_history > self.vad.history_capacity {
            return Err(anyhow!(
                "VAD min_history ({}) cannot exceed history_capacity ({})",
                self.vad.min_history,
                self.vad.history_capacity
            ));
        }

        if self.turn.pending_capacity == 0 {
            return Err(anyhow!("Pending audio capacity must be greater than 0"));
        }

        if self.playback.chunk_size == 0 {
            return Err(anyhow!("Playback chunk size must be greater than 0"));
        }

        if self.transcription.timeout_ms == 0 || self.synthesis.timeout_ms == 0 {
            return Err(anyhow!("Service timeouts must be greater than 0"));
        }

        if !matches!(self.transcription.engine.as_str(), "placeholder" | "http") {
            return Err(anyhow!("Unknown transcription engine '{}'", self.transcription.engine));
        }

        if !matches!(self.synthesis.engine.as_str(), "tone" | "http") {
            return Err(anyhow!("Unknown synthesis engine '{}'", self.synthesis.engine));
        }

        if self.performance.max_concurrent_sessions == 0 {
            return Err(anyhow!("Max concurrent sessions must be greater than 0"));
        }

        if self.performance.inbound_queue_capacity == 0 {
            return Err(anyhow!("Inbound queue capacity must be greater than 0"));
        }

        Ok(())
    }

    /// Configuration safe to show over HTTP (API keys replaced).
    pub fn redacted(&self) -> AppConfig {
        let mut copy = self.clone();
        if copy.transcription.api_key.is_some() {
            copy.transcription.api_key = Some("***".to_string());
        }
        if copy.synthesis.api_key.is_some() {
            copy.synthesis.api_key = Some("***".to_string());
        }
        copy
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = AppConfig::default();
        assert_eq!(config.server.host, "127.0.0.1");
        assert_eq!(config.server.port, 8000);
        assert_eq!(config.audio.format().frame_bytes(), 960);
        assert_eq!(config.playback.chunk_size, 4096);
        assert_eq!(config.turn.pending_capacity, 50);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_config_validation() {
        let mut config = AppConfig::default();
        config.server.port = 0;
        assert!(config.validate().is_err());

        let mut config = AppConfig::default();
        config.vad.min_history = 60;
        assert!(config.validate().is_err());

        let mut config = AppConfig::default();
        config.vad.max_utterance_frames = 0;
        assert!(config.validate().is_err());

        let mut config = AppConfig::default();
        config.playback.chunk_size = 0;
        assert!(config.validate().is_err());

        let mut config = AppConfig::default();
        config.transcription.engine = "carrier-pigeon".to_string();
        assert!(config.validate().is_err());

        let mut config = AppConfig::default();
        config.server.client_timeout_secs = 10;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_defaults_survive_config_roundtrip() {
        // The loader seeds the config crate from the defaults; make sure they deserialize back.
        let source = config::Config::try_from(&AppConfig::default()).unwrap();
        let built = config::Config::builder().add_source(source).build().unwrap();
        let config: AppConfig = built.try_deserialize().unwrap();
        assert_eq!(config.vad.silence_frames_threshold, 20);
        assert_eq!(config.vad.max_utterance_frames, 1000);
        assert!(config.vad.adapt_during_speech);
        assert_eq!(config.synthesis.engine, "tone");
        assert_eq!(config.transcription.language.as_deref(), Some("en"));
    }

    #[test]
    fn test_redacted_hides_keys() {
        let mut config = AppConfig::default();
        config.synthesis.api_key = Some("sk-secret".to_string());
        let shown = config.redacted();
        assert_eq!(shown.synthesis.api_key.as_deref(), Some("***"));
        assert_eq!(shown.transcription.api_key, None);
    }
}
