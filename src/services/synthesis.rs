//! Synthesis adapters.
//!
//! Both adapters return mono PCM16 LE at the conversation sample rate, ready to
//! be chunked onto the websocket.

use crate::audio::processor::{downmix_to_mono, encode_pcm16, float_to_pcm, resample_linear};
use crate::config::SynthesisConfig;
use crate::error::{ServiceError, ServiceResult};
use crate::services::SynthesisService;
use anyhow::{anyhow, Result};
use reqwest::StatusCode;
use reqwest::blocking::Client;
use serde::Serialize;
use std::io::Cursor;
use std::sync::OnceLock;
use std::time::Duration;
use tracing::debug;

/// Seconds of tone per character of reply text.
const SECONDS_PER_CHAR: f32 = 0.05;
const MAX_TONE_SECS: f32 = 3.0;
const FADE_SECS: f32 = 0.05;
const TONE_HZ: f32 = 440.0;
const TONE_VOLUME: f32 = 0.3;

/// Stand-in synthesizer that answers with a 440 Hz beep sized to the text.
///
/// Useful for exercising playback and turn-taking without a TTS backend.
#[derive(Debug, Clone)]
pub struct ToneSynthesizer {
    sample_rate: u32,
    latency: Duration,
}

impl ToneSynthesizer {
    pub fn new(sample_rate: u32, latency_ms: u64) -> Self {
        Self {
            sample_rate,
            latency: Duration::from_millis(latency_ms),
        }
    }

    /// Number of samples the beep for `text` will contain.
    pub fn tone_samples(&self, text: &str) -> usize {
        let secs = (text.chars().count() as f32 * SECONDS_PER_CHAR).min(MAX_TONE_SECS);
        (self.sample_rate as f32 * secs) as usize
    }

    fn tone(&self, text: &str) -> Vec<i16> {
        let total = self.tone_samples(text);
        let fade = ((self.sample_rate as f32 * FADE_SECS) as usize).min(total / 2);
        let rate = self.sample_rate as f32;

        (0..total)
            .map(|i| {
                let t = i as f32 / rate;
                let envelope = if fade > 0 && i < fade {
                    i as f32 / fade as f32
                } else if fade > 0 && i >= total - fade {
                    (total - 1 - i) as f32 / fade as f32
                } else {
                    1.0
                };
                let value = (2.0 * std::f32::consts::PI * TONE_HZ * t).sin() * envelope;
                (value * 32767.0 * TONE_VOLUME) as i16
            })
            .collect()
    }
}

impl SynthesisService for ToneSynthesizer {
    fn name(&self) -> &str {
        "tone"
    }

    fn render(&self, text: &str) -> ServiceResult<Vec<u8>> {
        if !self.latency.is_zero() {
            std::thread::sleep(self.latency);
        }
        let samples = self.tone(text);
        debug!(samples = samples.len(), "Generated placeholder tone");
        Ok(encode_pcm16(&samples))
    }
}

#[derive(Debug, Serialize)]
struct SpeechRequest<'a> {
    model: &'a str,
    input: &'a str,
    voice: &'a str,
    response_format: &'a str,
}

/// OpenAI-compatible `/audio/speech` client.
///
/// Requests WAV output and converts whatever rate and channel layout comes
/// back into the conversation's mono PCM16 format.
pub struct HttpSynthesizer {
    endpoint: String,
    api_key: String,
    model: String,
    voice: String,
    sample_rate: u32,
    request_timeout: Duration,
    client: OnceLock<Client>,
}

impl HttpSynthesizer {
    pub fn from_config(config: &SynthesisConfig, sample_rate: u32) -> Result<Self> {
        let api_key = config
            .api_key
            .clone()
            .filter(|key| !key.trim().is_empty())
            .ok_or_else(|| anyhow!("synthesis.api_key is required for the http engine"))?;

        Ok(Self {
            endpoint: format!("{}/audio/speech", config.api_url.trim_end_matches('/')),
            api_key,
            model: config.model.clone(),
            voice: config.voice.clone(),
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

impl SynthesisService for HttpSynthesizer {
    fn name(&self) -> &str {
        "http"
    }

    fn render(&self, text: &str) -> ServiceResult<Vec<u8>> {
        let request = SpeechRequest {
            model: &self.model,
            input: text,
            voice: &self.voice,
            response_format: "wav",
        };

        let response = self
            .client()?
            .post(&self.endpoint)
            .bearer_auth(&self.api_key)
            .json(&request)
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

        let body = response.bytes()?;
        wav_to_pcm16(&body, self.sample_rate)
    }
}

/// Decode a WAV file into mono PCM16 LE bytes at `target_rate`.
pub fn wav_to_pcm16(wav_bytes: &[u8], target_rate: u32) -> ServiceResult<Vec<u8>> {
    let (header, track) = wav::read(&mut Cursor::new(wav_bytes))?;

    let samples: Vec<i16> = match track {
        wav::BitDepth::Eight(data) => data.into_iter().map(|s| ((s as i16) - 128) << 8).collect(),
        wav::BitDepth::Sixteen(data) => data,
        wav::BitDepth::TwentyFour(data) => data.into_iter().map(|s| (s >> 8) as i16).collect(),
        wav::BitDepth::ThirtyTwoFloat(data) => float_to_pcm(&data),
        wav::BitDepth::Empty => {
            return Err(ServiceError::Decode("WAV payload has no samples".to_string()))
        }
    };

    let mono = downmix_to_mono(&samples, header.channel_count);
    let resampled = resample_linear(&mono, header.sampling_rate, target_rate);
    Ok(encode_pcm16(&resampled))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tone_length_tracks_text() {
        let tts = ToneSynthesizer::new(16000, 0);
        // 10 chars * 50 ms = 0.5 s
        assert_eq!(tts.synthesize("0123456789").len(), 8000 * 2);
        // Capped at 3 s
        let long = "x".repeat(500);
        assert_eq!(tts.synthesize(&long).len(), 48000 * 2);
        assert!(tts.synthesize("").is_empty());
    }

    #[test]
    fn test_tone_fades_and_volume() {
        let tts = ToneSynthesizer::new(16000, 0);
        let samples = tts.tone("a reasonably long reply");
        assert_eq!(samples[0], 0);
        assert_eq!(*samples.last().unwrap(), 0);

        let peak = samples.iter().map(|s| s.unsigned_abs()).max().unwrap();
        assert!(peak <= (32767.0 * TONE_VOLUME) as u16 + 1);
        assert!(peak > 9000);
    }

    #[test]
    fn test_wav_decoding_normalises_format() {
        // Stereo 32 kHz, 0.1 s
        let frames = 3200;
        let mut interleaved = Vec::with_capacity(frames * 2);
        for i in 0..frames {
            let v = ((i % 100) as i16) * 100;
            interleaved.push(v);
            interleaved.push(v);
        }
        let header = wav::Header::new(wav::WAV_FORMAT_PCM, 2, 32000, 16);
        let mut file = Cursor::new(Vec::new());
        wav::write(header, &wav::BitDepth::Sixteen(interleaved), &mut file).unwrap();

        let pcm = wav_to_pcm16(&file.into_inner(), 16000).unwrap();
        assert_eq!(pcm.len(), 1600 * 2);
    }

    #[test]
    fn test_garbage_is_a_decode_error() {
        assert!(wav_to_pcm16(b"definitely not a wav file", 16000).is_err());
    }

    #[test]
    fn test_http_engine_requires_key() {
        let config = SynthesisConfig {
            engine: "http".to_string(),
            api_key: Some("  ".to_string()),
            ..SynthesisConfig::default()
        };
        assert!(HttpSynthesizer::from_config(&config, 16000).is_err());
    }
}
