//! # Audio Module
//!
//! Everything that looks at raw caller audio before it becomes an utterance.
//!
//! ## Key Components:
//! - **Processor**: PCM16 decoding, energy, downmix and resampling helpers
//! - **Buffer**: fixed-capacity rings for energy history and pre-roll frames
//! - **Segmenter**: adaptive energy VAD that cuts the stream into utterances
//!
//! ## Audio Format Requirements:
//! - **Sample Rate**: 16kHz (configurable)
//! - **Bit Depth**: 16-bit PCM, little-endian
//! - **Channels**: Mono

pub mod buffer;      // Energy history and pre-roll rings
pub mod processor;   // PCM conversions and format arithmetic
pub mod segmenter;   // Voice activity segmentation

pub use processor::AudioFormat;
pub use segmenter::{Segmenter, SegmenterConfig};
