//! # Conversation Services
//!
//! The three collaborators a conversation calls out to:
//! - **TranscriptionService**: finished utterance audio → text
//! - **SynthesisService**: reply text → PCM16 audio
//! - **ResponsePolicy**: user text → reply text
//!
//! Transcription and synthesis are blocking and potentially slow; the
//! conversation loop runs them on tokio's blocking pool with a timeout. One
//! instance of each is built at startup and shared by every connection, so
//! implementations must be safe for concurrent use (`Send + Sync`).

pub mod policy;
pub mod synthesis;
pub mod transcription;

use crate::config::AppConfig;
use crate::error::ServiceResult;
use anyhow::{bail, Result};
use std::fmt;
use std::sync::Arc;
use tracing::{info, warn};

pub use policy::RuleBasedPolicy;
pub use synthesis::{HttpSynthesizer, ToneSynthesizer};
pub use transcription::{HttpTranscriber, PlaceholderTranscriber};

/// Converts a finished utterance (mono PCM16 LE) into text.
pub trait TranscriptionService: Send + Sync {
    /// Short name used in logs and health output.
    fn name(&self) -> &str;

    /// Inputs shorter than this many bytes are too short to transcribe.
    fn min_input_bytes(&self) -> usize;

    /// Backend hook. Only called with inputs of at least `min_input_bytes`.
    fn transcribe_utterance(&self, pcm: &[u8]) -> ServiceResult<String>;

    /// Transcribe `pcm`. Too-short input yields an empty string, not an error.
    fn transcribe(&self, pcm: &[u8]) -> ServiceResult<String> {
        if pcm.len() < self.min_input_bytes() {
            return Ok(String::new());
        }
        self.transcribe_utterance(pcm)
    }
}

/// Converts reply text into mono PCM16 LE audio at the wire sample rate.
pub trait SynthesisService: Send + Sync {
    fn name(&self) -> &str;

    /// Backend hook. Only called with non-blank text.
    fn render(&self, text: &str) -> ServiceResult<Vec<u8>>;

    /// Synthesize `text`.
    ///
    /// Blank text yields no audio. Backend failures are logged and also yield
    /// no audio; callers must treat an empty result as "nothing to play".
    fn synthesize(&self, text: &str) -> Vec<u8> {
        if text.trim().is_empty() {
            return Vec::new();
        }

        match self.render(text) {
            Ok(audio) => audio,
            Err(err) => {
                warn!(engine = self.name(), error = %err, "Synthesis failed, returning no audio");
                Vec::new()
            }
        }
    }
}

/// Maps user text to reply text. Total: always returns a non-empty reply.
pub trait ResponsePolicy: Send + Sync {
    fn respond(&self, user_text: &str) -> String;
}

/// The collaborators injected into every conversation.
#[derive(Clone)]
pub struct ConversationServices {
    pub transcription: Arc<dyn TranscriptionService>,
    pub synthesis: Arc<dyn SynthesisService>,
    pub policy: Arc<dyn ResponsePolicy>,
}

impl ConversationServices {
    pub fn new(
        transcription: Arc<dyn TranscriptionService>,
        synthesis: Arc<dyn SynthesisService>,
        policy: Arc<dyn ResponsePolicy>,
    ) -> Self {
        Self {
            transcription,
            synthesis,
            policy,
        }
    }
}

impl fmt::Debug for ConversationServices {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConversationServices")
            .field("transcription", &self.transcription.name())
            .field("synthesis", &self.synthesis.name())
            .finish()
    }
}

/// Build the configured adapters.
pub fn build_services(config: &AppConfig) -> Result<ConversationServices> {
    let min_input_bytes = config.audio.format().bytes_per_second();

    let transcription: Arc<dyn TranscriptionService> = match config.transcription.engine.as_str() {
        "placeholder" => Arc::new(PlaceholderTranscriber::new(
            config.transcription.placeholder_text.clone(),
            min_input_bytes,
        )),
        "http" => Arc::new(HttpTranscriber::from_config(
            &config.transcription,
            config.audio.sample_rate,
        )?),
        other => bail!("Unknown transcription engine '{}'", other),
    };

    let synthesis: Arc<dyn SynthesisService> = match config.synthesis.engine.as_str() {
        "tone" => Arc::new(ToneSynthesizer::new(
            config.audio.sample_rate,
            config.synthesis.tone_latency_ms,
        )),
        "http" => Arc::new(HttpSynthesizer::from_config(
            &config.synthesis,
            config.audio.sample_rate,
        )?),
        other => bail!("Unknown synthesis engine '{}'", other),
    };

    info!(
        transcription = transcription.name(),
        synthesis = synthesis.name(),
        "Conversation services ready"
    );

    Ok(ConversationServices::new(
        transcription,
        synthesis,
        Arc::new(RuleBasedPolicy::new()),
    ))
}
