//! # Utterance Segmenter
//!
//! Turns an unbounded PCM16 byte stream into discrete utterances using an
//! adaptive energy-based voice activity detector.
//!
//! ## Per-frame algorithm:
//! 1. **Energy**: RMS of the frame, samples normalised to [-1, 1]
//! 2. **Threshold**: `max(energy_threshold, median(history) * noise_floor_multiplier)`
//!    once the history holds `min_history` entries, the static threshold before that
//! 3. **Pre-roll**: every frame enters a small ring so speech onsets are not clipped
//! 4. **Speech**: after `speech_frames_threshold` consecutive loud frames the pre-roll
//!    is flushed into the utterance and every following frame is appended
//! 5. **Silence**: `silence_frames_threshold` consecutive quiet frames while speaking
//!    close the utterance and reset the detector
//! 6. **Cap**: an utterance reaching `max_utterance_frames` is closed regardless
//!
//! Chunks arrive in arbitrary sizes. Bytes that do not fill a whole frame are kept
//! and completed by the next call.

use crate::audio::buffer::{EnergyHistory, FrameRing};
use crate::audio::processor::{decode_pcm16, rms_energy, AudioFormat};
use serde::{Deserialize, Serialize};
use tracing::{debug, trace, warn};

/// Voice activity tuning.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SegmenterConfig {
    /// Static RMS threshold; the adaptive threshold never drops below it
    pub energy_threshold: f32,

    /// Consecutive loud frames required to start an utterance
    pub speech_frames_threshold: u32,

    /// Consecutive quiet frames required to end an utterance (20 x 30 ms = 600 ms)
    pub silence_frames_threshold: u32,

    /// Frames kept ahead of a speech onset
    pub pre_roll_frames: usize,

    /// Frame energies kept for the noise floor estimate
    pub history_capacity: usize,

    /// Minimum history length before the noise floor is trusted
    pub min_history: usize,

    /// Noise floor multiplier for the adaptive threshold
    pub noise_floor_multiplier: f32,

    /// Record energies while speaking too. When off, the threshold is frozen
    /// for the length of an utterance.
    pub adapt_during_speech: bool,

    /// Longest utterance before it is closed without trailing silence (1000 x 30 ms = 30 s)
    pub max_utterance_frames: usize,
}

impl Default for SegmenterConfig {
    fn default() -> Self {
        Self {
            energy_threshold: 0.03,
            speech_frames_threshold: 2,
            silence_frames_threshold: 20,
            pre_roll_frames: 5,
            history_capacity: 50,
            min_history: 10,
            noise_floor_multiplier: 1.5,
            adapt_during_speech: true,
            max_utterance_frames: 1000,
        }
    }
}

/// A completed utterance, owned by the caller once emitted.
#[derive(Debug, Clone, PartialEq)]
pub struct Utterance {
    audio: Vec<u8>,
    frames: usize,
    format: AudioFormat,
}

impl Utterance {
    pub fn new(audio: Vec<u8>, frames: usize, format: AudioFormat) -> Self {
        Self { audio, frames, format }
    }

    pub fn frames(&self) -> usize {
        self.frames
    }

    pub fn len(&self) -> usize {
        self.audio.len()
    }

    pub fn duration_secs(&self) -> f64 {
        self.format.duration_secs(self.audio.len())
    }

    pub fn into_bytes(self) -> Vec<u8> {
        self.audio
    }
}

/// Point-in-time view of the detector, for logs and debugging.
#[derive(Debug, Clone, Serialize)]
pub struct SegmenterStats {
    pub is_speaking: bool,
    pub speech_frames: u32,
    pub silence_frames: u32,
    pub partial_frame_bytes: usize,
    pub utterance_bytes: usize,
    pub pre_roll_frames: usize,
    pub threshold: f32,
    pub noise_floor: Option<f32>,
    pub frames_processed: u64,
    pub utterances_emitted: u64,
}

/// Per-connection voice activity segmenter.
pub struct Segmenter {
    format: AudioFormat,
    config: SegmenterConfig,
    frame_bytes: usize,

    /// Bytes waiting for the rest of their frame
    partial: Vec<u8>,
    history: EnergyHistory,
    pre_roll: FrameRing,

    utterance: Vec<u8>,
    utterance_frames: usize,

    speaking: bool,
    speech_frames: u32,
    silence_frames: u32,

    last_threshold: f32,
    frames_processed: u64,
    utterances_emitted: u64,
}

impl Segmenter {
    pub fn new(format: AudioFormat, config: SegmenterConfig) -> Self {
        Self {
            frame_bytes: format.frame_bytes(),
            partial: Vec::new(),
            history: EnergyHistory::new(config.history_capacity),
            pre_roll: FrameRing::new(config.pre_roll_frames),
            utterance: Vec::new(),
            utterance_frames: 0,
            speaking: false,
            speech_frames: 0,
            silence_frames: 0,
            last_threshold: config.energy_threshold,
            frames_processed: 0,
            utterances_emitted: 0,
            format,
            config,
        }
    }

    pub fn is_speaking(&self) -> bool {
        self.speaking
    }

    /// Consume a chunk of PCM16 bytes and return every utterance it completed,
    /// oldest first.
    pub fn feed(&mut self, chunk: &[u8]) -> Vec<Utterance> {
        let mut completed = Vec::new();
        if chunk.is_empty() || self.frame_bytes == 0 {
            return completed;
        }

        self.partial.extend_from_slice(chunk);

        let whole = (self.partial.len() / self.frame_bytes) * self.frame_bytes;
        if whole == 0 {
            return completed;
        }

        let remainder = self.partial.split_off(whole);
        let ready = std::mem::replace(&mut self.partial, remainder);

        for frame in ready.chunks_exact(self.frame_bytes) {
            if let Some(utterance) = self.process_frame(frame) {
                completed.push(utterance);
            }
        }

        completed
    }

    /// Close the in-progress utterance without waiting for trailing silence.
    ///
    /// Returns `None` when no speech was in progress. Counters and pre-roll are
    /// reset either way; partial-frame bytes stay buffered.
    pub fn flush(&mut self) -> Option<Utterance> {
        if self.speaking && !self.utterance.is_empty() {
            return Some(self.finish_utterance());
        }

        self.speaking = false;
        self.speech_frames = 0;
        self.silence_frames = 0;
        self.utterance.clear();
        self.utterance_frames = 0;
        self.pre_roll.clear();
        None
    }

    /// Reset to the state of a freshly constructed segmenter.
    pub fn clear(&mut self) {
        self.partial.clear();
        self.history.clear();
        self.pre_roll.clear();
        self.utterance.clear();
        self.utterance_frames = 0;
        self.speaking = false;
        self.speech_frames = 0;
        self.silence_frames = 0;
        self.last_threshold = self.config.energy_threshold;
        debug!("Segmenter cleared");
    }

    pub fn stats(&self) -> SegmenterStats {
        SegmenterStats {
            is_speaking: self.speaking,
            speech_frames: self.speech_frames,
            silence_frames: self.silence_frames,
            partial_frame_bytes: self.partial.len(),
            utterance_bytes: self.utterance.len(),
            pre_roll_frames: self.pre_roll.len(),
            threshold: self.last_threshold,
            noise_floor: self.noise_floor(),
            frames_processed: self.frames_processed,
            utterances_emitted: self.utterances_emitted,
        }
    }

    fn noise_floor(&self) -> Option<f32> {
        if self.history.len() >= self.config.min_history.max(1) {
            self.history.median()
        } else {
            None
        }
    }

    fn current_threshold(&self) -> f32 {
        match self.noise_floor() {
            Some(floor) => self
                .config
                .energy_threshold
                .max(floor * self.config.noise_floor_multiplier),
            None => self.config.energy_threshold,
        }
    }

    fn process_frame(&mut self, frame: &[u8]) -> Option<Utterance> {
        self.frames_processed += 1;

        let energy = rms_energy(&decode_pcm16(frame));
        if self.config.adapt_during_speech || !self.speaking {
            self.history.push(energy);
        }

        let threshold = self.current_threshold();
        self.last_threshold = threshold;

        self.pre_roll.push(frame.to_vec());

        // Set when this frame opened the utterance through the pre-roll flush.
        let mut carried_by_pre_roll = false;

        if energy > threshold {
            self.speech_frames += 1;
            self.silence_frames = 0;

            if !self.speaking && self.speech_frames >= self.config.speech_frames_threshold {
                self.speaking = true;
                let flushed = self.pre_roll.drain_into(&mut self.utterance);
                self.utterance_frames += flushed;
                carried_by_pre_roll = flushed > 0;
                debug!(energy, threshold, pre_roll_frames = flushed, "Speech started");
            }
        } else {
            self.silence_frames += 1;
            if !self.speaking {
                self.speech_frames = 0;
            }
        }

        trace!(energy, threshold, speaking = self.speaking, "Frame classified");

        if self.speaking && !carried_by_pre_roll {
            self.utterance.extend_from_slice(frame);
            self.utterance_frames += 1;
        }

        if self.speaking && self.silence_frames >= self.config.silence_frames_threshold {
            return Some(self.finish_utterance());
        }

        if self.speaking && self.utterance_frames >= self.config.max_utterance_frames {
            warn!(
                frames = self.utterance_frames,
                threshold, "Utterance reached its length cap, closing it"
            );
            return Some(self.finish_utterance());
        }

        None
    }

    fn finish_utterance(&mut self) -> Utterance {
        let audio = std::mem::take(&mut self.utterance);
        let frames = std::mem::replace(&mut self.utterance_frames, 0);

        self.speaking = false;
        self.speech_frames = 0;
        self.silence_frames = 0;
        self.pre_roll.clear();
        self.utterances_emitted += 1;

        let utterance = Utterance::new(audio, frames, self.format);
        debug!(
            bytes = utterance.len(),
            frames,
            duration_secs = utterance.duration_secs(),
            "Speech ended, utterance complete"
        );
        utterance
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::audio::processor::encode_pcm16;

    const FRAME: usize = 960;

    /// Sine frames at 440 Hz with the given peak amplitude (0.0..=1.0).
    pub(crate) fn tone_frames(frames: usize, amplitude: f32) -> Vec<u8> {
        let samples: Vec<i16> = (0..frames * 480)
            .map(|i| {
                let t = i as f32 / 16000.0;
                ((2.0 * std::f32::consts::PI * 440.0 * t).sin() * amplitude * 32767.0) as i16
            })
            .collect();
        encode_pcm16(&samples)
    }

    pub(crate) fn silence_frames(frames: usize) -> Vec<u8> {
        vec![0u8; frames * FRAME]
    }

    fn segmenter() -> Segmenter {
        Segmenter::new(AudioFormat::default(), SegmenterConfig::default())
    }

    #[test]
    fn test_undersized_chunks_are_reassembled() {
        let mut seg = segmenter();
        let audio = silence_frames(1);

        assert!(seg.feed(&audio[..500]).is_empty());
        assert_eq!(seg.stats().frames_processed, 0);
        assert_eq!(seg.stats().partial_frame_bytes, 500);

        assert!(seg.feed(&audio[500..]).is_empty());
        assert_eq!(seg.stats().frames_processed, 1);
        assert_eq!(seg.stats().partial_frame_bytes, 0);
    }

    #[test]
    fn test_empty_chunk_is_noop() {
        let mut seg = segmenter();
        assert!(seg.feed(&[]).is_empty());
        assert_eq!(seg.stats().frames_processed, 0);
    }

    #[test]
    fn test_silence_never_emits() {
        let mut seg = segmenter();
        assert!(seg.feed(&silence_frames(50)).is_empty());
        assert!(!seg.is_speaking());
    }

    #[test]
    fn test_single_utterance_byte_exact() {
        let mut seg = segmenter();
        let mut stream = silence_frames(10);
        stream.extend(tone_frames(8, 0.5));
        stream.extend(silence_frames(20));

        let utterances = seg.feed(&stream);
        assert_eq!(utterances.len(), 1);

        // 3 quiet pre-roll frames + 8 speech frames + 20 trailing silence frames
        let utterance = &utterances[0];
        assert_eq!(utterance.frames(), 3 + 8 + 20);
        assert_eq!(utterance.len(), (3 + 8 + 20) * FRAME);
        assert!(!seg.is_speaking());
    }

    #[test]
    fn test_single_loud_frame_does_not_start_speech() {
        let mut seg = segmenter();
        let mut stream = silence_frames(5);
        stream.extend(tone_frames(1, 0.5));
        stream.extend(silence_frames(30));

        assert!(seg.feed(&stream).is_empty());
        assert!(!seg.is_speaking());
    }

    #[test]
    fn test_multiple_utterances_in_one_feed() {
        let mut seg = segmenter();
        let mut stream = Vec::new();
        for _ in 0..3 {
            stream.extend(silence_frames(5));
            stream.extend(tone_frames(6, 0.5));
            stream.extend(silence_frames(20));
        }

        let utterances = seg.feed(&stream);
        assert_eq!(utterances.len(), 3);
        assert_eq!(seg.stats().utterances_emitted, 3);
    }

    #[test]
    fn test_sustained_tone_after_quiet_lead_in() {
        let mut seg = segmenter();
        let mut stream = silence_frames(30);
        stream.extend(tone_frames(40, 0.5));
        stream.extend(silence_frames(34));

        // The tone stays loud until it fills half the history, then counts as silence.
        let utterances = seg.feed(&stream);
        assert_eq!(utterances.len(), 1);
        assert_eq!(utterances[0].frames(), 5 + 38 + 5);
        assert!(utterances[0].duration_secs() >= 1.0);
        assert!(!seg.is_speaking());
    }

    #[test]
    fn test_steady_noise_after_quiet_start_ends_the_utterance() {
        let mut seg = segmenter();
        let mut stream = tone_frames(20, 0.005);
        stream.extend(tone_frames(1000, 0.1));

        let utterances = seg.feed(&stream);
        assert_eq!(utterances.len(), 1);

        let stats = seg.stats();
        assert!(!stats.is_speaking);
        assert_eq!(stats.utterance_bytes, 0);
        assert!(stats.threshold > 0.03);
    }

    #[test]
    fn test_frozen_threshold_is_bounded_by_length_cap() {
        let config = SegmenterConfig {
            adapt_during_speech: false,
            max_utterance_frames: 100,
            ..SegmenterConfig::default()
        };
        let mut seg = Segmenter::new(AudioFormat::default(), config);
        let mut stream = tone_frames(20, 0.005);
        stream.extend(tone_frames(300, 0.1));

        let utterances = seg.feed(&stream);
        assert_eq!(utterances.len(), 3);
        assert!(utterances.iter().all(|u| u.frames() == 100));
        assert!(seg.stats().utterance_bytes <= 100 * FRAME);
    }

    #[test]
    fn test_utterance_split_across_chunks() {
        let mut seg = segmenter();
        let mut stream = silence_frames(12);
        stream.extend(tone_frames(10, 0.5));
        stream.extend(silence_frames(20));

        let mut emitted = Vec::new();
        for chunk in stream.chunks(700) {
            emitted.extend(seg.feed(chunk));
        }
        assert_eq!(emitted.len(), 1);
        assert_eq!(emitted[0].len(), (3 + 10 + 20) * FRAME);
    }

    #[test]
    fn test_flush_returns_in_progress_speech() {
        let mut seg = segmenter();
        let mut stream = silence_frames(5);
        stream.extend(tone_frames(5, 0.5));
        assert!(seg.feed(&stream).is_empty());
        assert!(seg.is_speaking());

        // The ring keeps filling after onset
        assert_eq!(seg.stats().pre_roll_frames, 3);

        let utterance = seg.flush().expect("speech in progress");
        assert_eq!(utterance.frames(), 3 + 5);
        assert_eq!(seg.stats().pre_roll_frames, 0);
        assert!(!seg.is_speaking());
        assert!(seg.flush().is_none());
    }

    #[test]
    fn test_clear_resets_everything() {
        let mut seg = segmenter();
        let mut stream = silence_frames(12);
        stream.extend(tone_frames(5, 0.5));
        stream.extend_from_slice(&[0u8; 100]);
        seg.feed(&stream);
        assert!(seg.is_speaking());

        seg.clear();
        let stats = seg.stats();
        assert!(!stats.is_speaking);
        assert_eq!(stats.speech_frames, 0);
        assert_eq!(stats.silence_frames, 0);
        assert_eq!(stats.partial_frame_bytes, 0);
        assert_eq!(stats.utterance_bytes, 0);
        assert_eq!(stats.noise_floor, None);
    }

    #[test]
    fn test_tone_from_cold_start_becomes_its_own_floor() {
        let mut seg = segmenter();
        let mut stream = tone_frames(40, 0.5);
        stream.extend(silence_frames(34));

        // From the tenth frame the tone itself is the noise floor.
        let utterances = seg.feed(&stream);
        assert_eq!(utterances.len(), 1);
        assert_eq!(utterances[0].frames(), 29);
    }

    #[test]
    fn test_frozen_threshold_keeps_sustained_tone() {
        let config = SegmenterConfig {
            adapt_during_speech: false,
            ..SegmenterConfig::default()
        };
        let mut seg = Segmenter::new(AudioFormat::default(), config);
        let mut stream = tone_frames(40, 0.5);
        stream.extend(silence_frames(34));

        let utterances = seg.feed(&stream);
        assert_eq!(utterances.len(), 1);
        assert_eq!(utterances[0].frames(), 40 + 20);
    }

    #[test]
    fn test_noise_floor_raises_threshold() {
        let mut seg = segmenter();
        // Steady hum just under the static threshold
        seg.feed(&tone_frames(20, 0.03));
        let stats = seg.stats();
        let floor = stats.noise_floor.expect("enough history");
        assert!(stats.threshold > 0.03);
        assert!((stats.threshold - floor * 1.5).abs() < 1e-4);
    }
}
