//! Transcription adapters.

use crate::audio::processor::decode_pcm16;
use crate::config::TranscriptionConfig;
use crate::error::{ServiceError, ServiceResult};
use crate::services::TranscriptionService;
use anyhow::{anyhow, Result};
use reqwest::StatusCode;
use reqwest::blocking::{multipart, Client};
use serde::Deserialize;
use std::io::Cursor;
use std::sync::OnceLock;
use std::time::{Duration, Instant};
use tracing::debug;

/// Returns a fixed phrase for every long-enough utterance.
///
/// Lets the whole voice loop run without a speech recognizer.
#[derive(Debug, Clone)]
pub struct PlaceholderTranscriber {
    text: String,
    min_input_bytes: usize,
}

impl PlaceholderTranscriber {
    pub fn new(text: impl Into<String>, min_input_bytes: usize) -> Self {
        Self {
            text: text.into(),
            min_input_bytes,
        }
    }
}

impl TranscriptionService for PlaceholderTranscriber {
    fn name(&self) -> &str {
        "placeholder"
    }

    fn min_input_bytes(&self) -> usize {
        self.min_input_bytes
    }

    fn transcribe_utterance(&self, _pcm: &[u8]) -> ServiceResult<String> {
        Ok(self.text.clone())
    }
}

#[derive(Debug, Deserialize)]
struct TranscriptionResponse {
    text: String,
}

/// OpenAI-compatible `/audio/transcriptions` client.
///
/// The utterance is wrapped in a WAV container and uploaded as multipart form
/// data. The blocking HTTP client is built on first use, which always happens on
/// a blocking worker thread.
pub struct HttpTranscriber {
    endpoint: String,
    api_key: String,
    model: String,
    language: Option<String>,
    sample_rate: u32,
    request_timeout: Duration,
    client: OnceLock<Client>,
}

impl HttpTranscriber {
    pub fn from_config(config: &TranscriptionConfig, sample_rate: u32) -> Result<Self> {
        let api_key = config
            .api_key
            .clone()
            .filter(|key| !key.trim().is_empty())
            .ok_or_else(|| anyhow!("transcription.api_key is required for the http engine"))?;

        Ok(Self {
            endpoint: format!("{}/audio/transcriptions", config.api_url.trim_end_matches('/')),
            api_key,
            model: config.model.clone(),
            language: config.language.clone(),
            sample_rate,
            request_timeout: Duration::from_millis(config.timeout_ms),
            client: OnceLock::new(),
        })
    }

    fn client(&self) -> ServiceResult<&Client> {
        if let Some(client) = self.client.get() {
            return Ok(client);
        }
        let client = Client::builder().timeout(self.request_timeout).build()?;
        Ok(self.client.get_or_init(|| client))
    }
}

impl TranscriptionService for HttpTranscriber {
    fn name(&self) -> &str {
        "http"
    }

    fn min_input_bytes(&self) -> usize {
        self.sample_rate as usize * 2
    }

    fn transcribe_utterance(&self, pcm: &[u8]) -> ServiceResult<String> {
        let started = Instant::now();
        let wav = pcm16_to_wav(pcm, self.sample_rate)?;

        let file = multipart::Part::bytes(wav)
            .file_name("utterance.wav")
            .mime_str("audio/wav")?;
        let mut form = multipart::Form::new()
            .part("file", file)
            .text("model", self.model.clone());
        if let Some(language) = &self.language {
            form = form.text("language", language.clone());
        }

        let response = self
            .client()?
            .post(&self.endpoint)
            .bearer_auth(&self.api_key)
            .multipart(form)
            .send()?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().unwrap_or_default();
            let detail = format!("status {}: {}", status, body);
            return Err(match status {
                StatusCode::SERVICE_UNAVAILABLE | StatusCode::TOO_MANY_REQUESTS => {
                    ServiceError::Unavailable(detail)
                }
                _ => ServiceError::Http(detail),
            });
        }

        let parsed: TranscriptionResponse = response.json()?;
        let text = parsed.text.trim().to_string();

        debug!(
            bytes = pcm.len(),
            chars = text.len(),
            elapsed_ms = started.elapsed().as_millis() as u64,
            "Transcription complete"
        );
        Ok(text)
    }
}

/// Wrap mono PCM16 LE bytes in a WAV container.
pub fn pcm16_to_wav(pcm: &[u8], sample_rate: u32) -> ServiceResult<Vec<u8>> {
    let header = wav::Header::new(wav::WAV_FORMAT_PCM, 1, sample_rate, 16);
    let track = wav::BitDepth::Sixteen(decode_pcm16(pcm));

    let mut out = Cursor::new(Vec::new());
    wav::write(header, &track, &mut out)?;
    Ok(out.into_inner())
}
