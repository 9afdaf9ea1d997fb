//! # PCM Audio Helpers
//!
//! Format arithmetic and sample conversions shared by the segmenter and the
//! synthesis adapters. All audio crossing the websocket is mono, 16-bit,
//! little-endian PCM at a fixed sample rate (16 kHz by default).
//!
//! ## Key Functions:
//! - **Frame arithmetic**: how many bytes make one analysis frame
//! - **Decoding/encoding**: raw bytes <-> `i16` samples
//! - **Energy**: normalised RMS used for voice activity decisions
//! - **Normalisation**: downmix and resample foreign audio to the wire format

use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use serde::{Deserialize, Serialize};
use std::io::Cursor;

/// Shape of the PCM stream flowing through a conversation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct AudioFormat {
    /// Samples per second (16000 for the wire format)
    pub sample_rate: u32,

    /// Duration of one analysis frame in milliseconds
    pub frame_duration_ms: u32,
}

impl Default for AudioFormat {
    fn default() -> Self {
        Self {
            sample_rate: 16000,
            frame_duration_ms: 30,
        }
    }
}

impl AudioFormat {
    pub fn new(sample_rate: u32, frame_duration_ms: u32) -> Self {
        Self {
            sample_rate,
            frame_duration_ms,
        }
    }

    /// Samples in one frame: `frame_duration_ms * sample_rate / 1000`.
    pub fn samples_per_frame(&self) -> usize {
        (self.frame_duration_ms as usize * self.sample_rate as usize) / 1000
    }

    /// Bytes in one frame (two bytes per PCM16 sample).
    ///
    /// ## Example:
    /// 30 ms at 16 kHz = 480 samples = 960 bytes
    pub fn frame_bytes(&self) -> usize {
        self.samples_per_frame() * 2
    }

    pub fn bytes_per_second(&self) -> usize {
        self.sample_rate as usize * 2
    }

    pub fn duration_secs(&self, byte_len: usize) -> f64 {
        if self.sample_rate == 0 {
            return 0.0;
        }
        byte_len as f64 / self.bytes_per_second() as f64
    }
}

/// Decode little-endian PCM16 bytes into samples.
///
/// A trailing odd byte cannot form a sample and is ignored.
pub fn decode_pcm16(data: &[u8]) -> Vec<i16> {
    let mut cursor = Cursor::new(data);
    let mut samples = Vec::with_capacity(data.len() / 2);

    while let Ok(sample) = cursor.read_i16::<LittleEndian>() {
        samples.push(sample);
    }

    samples
}

/// Encode samples as little-endian PCM16 bytes.
pub fn encode_pcm16(samples: &[i16]) -> Vec<u8> {
    let mut bytes = Vec::with_capacity(samples.len() * 2);
    for &sample in samples {
        // Writing into a Vec cannot fail.
        let _ = bytes.write_i16::<LittleEndian>(sample);
    }
    bytes
}

pub fn float_to_pcm(samples: &[f32]) -> Vec<i16> {
    samples
        .iter()
        .map(|&sample| {
            let scaled = sample * 32768.0;
            scaled.clamp(-32768.0, 32767.0) as i16
        })
        .collect()
}

/// Root-mean-square energy of a frame, samples normalised to [-1, 1].
///
/// Returns 0.0 for an empty slice.
pub fn rms_energy(samples: &[i16]) -> f32 {
    if samples.is_empty() {
        return 0.0;
    }

    let sum_squares: f64 = samples
        .iter()
        .map(|&s| {
            let v = s as f64 / 32768.0;
            v * v
        })
        .sum();

    (sum_squares / samples.len() as f64).sqrt() as f32
}

/// Average interleaved channels down to one.
pub fn downmix_to_mono(samples: &[i16], channels: u16) -> Vec<i16> {
    if channels <= 1 {
        return samples.to_vec();
    }

    samples
        .chunks_exact(channels as usize)
        .map(|frame| {
            let sum: i32 = frame.iter().map(|&s| s as i32).sum();
            (sum / channels as i32) as i16
        })
        .collect()
}

/// Linear-interpolation resampler.
///
/// Good enough for speech playback; not intended for music.
pub fn resample_linear(samples: &[i16], from_rate: u32, to_rate: u32) -> Vec<i16> {
    if from_rate == to_rate || samples.is_empty() || from_rate == 0 || to_rate == 0 {
        return samples.to_vec();
    }

    let ratio = to_rate as f64 / from_rate as f64;
    let out_len = (samples.len() as f64 * ratio) as usize;
    let last = samples.len() - 1;

    (0..out_len)
        .map(|i| {
            let pos = i as f64 / ratio;
            let idx = (pos.floor() as usize).min(last);
            let next = (idx + 1).min(last);
            let frac = pos - idx as f64;
            let a = samples[idx] as f64;
            let b = samples[next] as f64;
            (a + (b - a) * frac).round().clamp(-32768.0, 32767.0) as i16
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_frame_arithmetic() {
        let format = AudioFormat::default();
        assert_eq!(format.samples_per_frame(), 480);
        assert_eq!(format.frame_bytes(), 960);
        assert_eq!(format.bytes_per_second(), 32000);
        assert!((format.duration_secs(16000) - 0.5).abs() < f64::EPSILON);
    }

    #[test]
    fn test_pcm_roundtrip_through_bytes() {
        let samples = vec![0i16, 1, -1, 16384, -16384, i16::MAX, i16::MIN];
        let bytes = encode_pcm16(&samples);
        assert_eq!(bytes.len(), samples.len() * 2);
        assert_eq!(decode_pcm16(&bytes), samples);
    }

    #[test]
    fn test_decode_ignores_trailing_byte() {
        let bytes = [0x01, 0x00, 0xff];
        assert_eq!(decode_pcm16(&bytes), vec![1]);
    }

    #[test]
    fn test_float_to_pcm_clamps() {
        let converted = float_to_pcm(&[0.0, 0.5, -0.5, 1.5, -1.5]);
        assert_eq!(converted, vec![0, 16384, -16384, 32767, -32768]);
    }

    #[test]
    fn test_rms_energy() {
        assert_eq!(rms_energy(&[]), 0.0);
        assert_eq!(rms_energy(&[0; 480]), 0.0);

        // Full-scale square wave has RMS ~1.0
        let square: Vec<i16> = (0..480).map(|i| if i % 2 == 0 { 32767 } else { -32768 }).collect();
        assert!((rms_energy(&square) - 1.0).abs() < 0.001);

        let half = vec![16384i16; 480];
        assert!((rms_energy(&half) - 0.5).abs() < 0.001);
    }

    #[test]
    fn test_downmix_stereo() {
        let stereo = vec![100i16, 300, -200, 200];
        assert_eq!(downmix_to_mono(&stereo, 2), vec![200, 0]);
        assert_eq!(downmix_to_mono(&stereo, 1), stereo);
    }

    #[test]
    fn test_resample_lengths() {
        let input = vec![0i16; 24000];
        assert_eq!(resample_linear(&input, 24000, 16000).len(), 16000);
        assert_eq!(resample_linear(&input, 16000, 16000).len(), 24000);

        let ramp: Vec<i16> = (0..8).map(|i| i * 100).collect();
        let up = resample_linear(&ramp, 8000, 16000);
        assert_eq!(up.len(), 16);
        assert_eq!(up[0], 0);
        assert_eq!(up[2], 100);
        assert_eq!(up[1], 50);
    }
}
