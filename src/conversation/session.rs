//! # Conversation Session
//!
//! Everything one connection owns: its segmenter, its turn arbiter and a few
//! counters. Created when the socket opens, dropped when it closes, never
//! shared with another connection.

use crate::audio::{AudioFormat, Segmenter, SegmenterConfig};
use crate::conversation::turn::{TurnArbiter, TurnConfig, TurnState};
use chrono::{DateTime, Utc};
use serde::Serialize;
use uuid::Uuid;

pub struct ConversationSession {
    pub session_id: String,
    pub segmenter: Segmenter,
    pub arbiter: TurnArbiter,
    pub created_at: DateTime<Utc>,
    counters: SessionCounters,
}

#[derive(Debug, Default, Clone, Copy)]
struct SessionCounters {
    audio_bytes: u64,
    utterances: u64,
    responses: u64,
    interruptions_buffered: u64,
    pending_discarded: u64,
    pending_replayed: u64,
    service_failures: u64,
}

/// Summary emitted when a conversation ends.
#[derive(Debug, Clone, Serialize)]
pub struct SessionReport {
    pub session_id: String,
    pub created_at: DateTime<Utc>,
    pub duration_ms: i64,
    pub audio_bytes: u64,
    pub utterances: u64,
    pub responses: u64,
    pub interruptions_buffered: u64,
    pub pending_discarded: u64,
    pub pending_replayed: u64,
    /// Caller chunks evicted from a full pending queue
    pub pending_dropped: u64,
    pub service_failures: u64,
    pub final_turn: TurnState,
}

impl ConversationSession {
    pub fn new(format: AudioFormat, vad: SegmenterConfig, turn: TurnConfig) -> Self {
        Self {
            session_id: Uuid::new_v4().to_string(),
            segmenter: Segmenter::new(format, vad),
            arbiter: TurnArbiter::new(turn),
            created_at: Utc::now(),
            counters: SessionCounters::default(),
        }
    }

    /// Reset segmenter and arbiter together.
    pub fn clear(&mut self) {
        self.segmenter.clear();
        self.arbiter.reset();
    }

    pub fn record_audio(&mut self, bytes: usize) {
        self.counters.audio_bytes += bytes as u64;
    }

    pub fn record_utterance(&mut self) {
        self.counters.utterances += 1;
    }

    pub fn record_response(&mut self) {
        self.counters.responses += 1;
    }

    pub fn record_interruption(&mut self) {
        self.counters.interruptions_buffered += 1;
    }

    pub fn record_pending_discarded(&mut self, chunks: usize) {
        self.counters.pending_discarded += chunks as u64;
    }

    pub fn record_pending_replayed(&mut self, chunks: usize) {
        self.counters.pending_replayed += chunks as u64;
    }

    pub fn record_service_failure(&mut self) {
        self.counters.service_failures += 1;
    }

    pub fn report(&self) -> SessionReport {
        let c = self.counters;
        SessionReport {
            session_id: self.session_id.clone(),
            created_at: self.created_at,
            duration_ms: (Utc::now() - self.created_at).num_milliseconds(),
            audio_bytes: c.audio_bytes,
            utterances: c.utterances,
            responses: c.responses,
            interruptions_buffered: c.interruptions_buffered,
            pending_discarded: c.pending_discarded,
            pending_replayed: c.pending_replayed,
            pending_dropped: self.arbiter.dropped_count(),
            service_failures: c.service_failures,
            final_turn: self.arbiter.state(),
        }
    }
}
