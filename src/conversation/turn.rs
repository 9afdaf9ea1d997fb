//! # Turn Arbitration
//!
//! Decides who holds the floor on a connection and what happens to caller
//! audio that arrives while the assistant is speaking.
//!
//! ## State Machine:
//! ```text
//!            set_assistant_turn()
//!  UserTurn ─────────────────────▶ AssistantTurn
//!     ▲  ◀──────────────────────────    │
//!     │        set_user_turn()          │ set_idle()
//!     │                                 ▼
//!     └──────── reset() ─────────────  Idle
//! ```
//! Every transition is an explicit command. Nothing here looks at audio
//! content or timing.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use tracing::{debug, info};

/// Whose turn it is on a connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TurnState {
    #[serde(rename = "user")]
    UserTurn,
    #[serde(rename = "assistant")]
    AssistantTurn,
    Idle,
}

impl TurnState {
    pub fn as_str(&self) -> &str {
        match self {
            TurnState::UserTurn => "user",
            TurnState::AssistantTurn => "assistant",
            TurnState::Idle => "idle",
        }
    }
}

/// Arbiter limits.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TurnConfig {
    /// Maximum caller chunks held while the assistant speaks
    pub pending_capacity: usize,

    /// Maximum transitions kept in the history log
    pub history_capacity: usize,

    /// Feed drained caller audio back through the pipeline after the
    /// assistant's turn instead of discarding it
    pub replay_pending: bool,
}

impl Default for TurnConfig {
    fn default() -> Self {
        Self {
            pending_capacity: 50,
            history_capacity: 100,
            replay_pending: false,
        }
    }
}

/// One entry in the transition log.
#[derive(Debug, Clone, Serialize)]
pub struct TurnTransition {
    pub turn: TurnState,
    pub at: DateTime<Utc>,
}

/// Debug view of the arbiter.
#[derive(Debug, Clone, Serialize)]
pub struct TurnSnapshot {
    pub current_turn: TurnState,
    pub buffered_chunks: usize,
    pub dropped_chunks: u64,
    pub recent_turns: Vec<TurnTransition>,
}

/// Per-connection turn state machine with a bounded interruption queue.
pub struct TurnArbiter {
    state: TurnState,
    pending: VecDeque<Vec<u8>>,
    history: VecDeque<TurnTransition>,
    config: TurnConfig,
    dropped: u64,
}

impl TurnArbiter {
    pub fn new(config: TurnConfig) -> Self {
        Self {
            state: TurnState::UserTurn,
            pending: VecDeque::with_capacity(config.pending_capacity),
            history: VecDeque::with_capacity(config.history_capacity),
            config,
            dropped: 0,
        }
    }

    pub fn state(&self) -> TurnState {
        self.state
    }

    /// The caller may speak whenever the assistant is not holding the floor.
    pub fn is_user_turn(&self) -> bool {
        matches!(self.state, TurnState::UserTurn | TurnState::Idle)
    }

    pub fn is_assistant_turn(&self) -> bool {
        self.state == TurnState::AssistantTurn
    }

    pub fn set_user_turn(&mut self) {
        self.transition(TurnState::UserTurn);
    }

    pub fn set_assistant_turn(&mut self) {
        self.transition(TurnState::AssistantTurn);
    }

    pub fn set_idle(&mut self) {
        self.transition(TurnState::Idle);
    }

    /// Queue caller audio captured out of turn. Oldest entries go first once
    /// the queue is full.
    pub fn buffer_user_audio(&mut self, chunk: Vec<u8>) {
        if self.config.pending_capacity == 0 {
            self.dropped += 1;
            return;
        }

        if self.pending.len() == self.config.pending_capacity {
            self.pending.pop_front();
            self.dropped += 1;
            debug!(capacity = self.config.pending_capacity, "Pending queue full, dropped oldest chunk");
        }
        self.pending.push_back(chunk);
    }

    /// Take every queued chunk in arrival order, leaving the queue empty.
    pub fn drain_pending(&mut self) -> Vec<Vec<u8>> {
        self.pending.drain(..).collect()
    }

    pub fn has_pending(&self) -> bool {
        !self.pending.is_empty()
    }

    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }

    pub fn dropped_count(&self) -> u64 {
        self.dropped
    }

    pub fn replay_pending(&self) -> bool {
        self.config.replay_pending
    }

    /// Back to `UserTurn` with an empty queue.
    pub fn reset(&mut self) {
        self.pending.clear();
        self.transition(TurnState::UserTurn);
        info!("Turn arbiter reset");
    }

    pub fn history(&self) -> impl Iterator<Item = &TurnTransition> {
        self.history.iter()
    }

    pub fn snapshot(&self) -> TurnSnapshot {
        let skip = self.history.len().saturating_sub(5);
        TurnSnapshot {
            current_turn: self.state,
            buffered_chunks: self.pending.len(),
            dropped_chunks: self.dropped,
            recent_turns: self.history().skip(skip).cloned().collect(),
        }
    }

    fn transition(&mut self, next: TurnState) {
        if self.state != next {
            debug!(from = self.state.as_str(), to = next.as_str(), "Turn changed");
        }
        self.state = next;

        if self.config.history_capacity == 0 {
            return;
        }
        if self.history.len() == self.config.history_capacity {
            self.history.pop_front();
        }
        self.history.push_back(TurnTransition {
            turn: next,
            at: Utc::now(),
        });
    }
}

impl Default for TurnArbiter {
    fn default() -> Self {
        Self::new(TurnConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_starts_in_user_turn() {
        let arbiter = TurnArbiter::default();
        assert_eq!(arbiter.state(), TurnState::UserTurn);
        assert!(arbiter.is_user_turn());
        assert!(!arbiter.is_assistant_turn());
        assert!(!arbiter.has_pending());
    }

    #[test]
    fn test_explicit_transitions() {
        let mut arbiter = TurnArbiter::default();

        arbiter.set_assistant_turn();
        assert!(!arbiter.is_user_turn());
        assert!(arbiter.is_assistant_turn());

        arbiter.set_user_turn();
        assert!(arbiter.is_user_turn());
        assert!(!arbiter.is_assistant_turn());

        arbiter.set_idle();
        assert!(arbiter.is_user_turn());
        assert!(!arbiter.is_assistant_turn());
        assert_eq!(arbiter.state().as_str(), "idle");
    }

    #[test]
    fn test_reset_from_any_state() {
        for setup in [TurnArbiter::set_assistant_turn, TurnArbiter::set_idle, TurnArbiter::set_user_turn] {
            let mut arbiter = TurnArbiter::default();
            setup(&mut arbiter);
            arbiter.buffer_user_audio(vec![1, 2, 3]);

            arbiter.reset();
            assert_eq!(arbiter.state(), TurnState::UserTurn);
            assert!(!arbiter.has_pending());
            assert!(arbiter.drain_pending().is_empty());
        }
    }

    #[test]
    fn test_pending_queue_drops_oldest() {
        let mut arbiter = TurnArbiter::default();
        arbiter.set_assistant_turn();

        for i in 0..60u8 {
            arbiter.buffer_user_audio(vec![i]);
        }
        assert_eq!(arbiter.pending_len(), 50);
        assert_eq!(arbiter.dropped_count(), 10);

        let drained = arbiter.drain_pending();
        let expected: Vec<Vec<u8>> = (10..60u8).map(|i| vec![i]).collect();
        assert_eq!(drained, expected);
        assert!(!arbiter.has_pending());
        assert!(arbiter.drain_pending().is_empty());
    }

    #[test]
    fn test_history_is_bounded() {
        let mut arbiter = TurnArbiter::new(TurnConfig {
            history_capacity: 3,
            ..TurnConfig::default()
        });
        arbiter.set_assistant_turn();
        arbiter.set_user_turn();
        arbiter.set_idle();
        arbiter.set_assistant_turn();

        let turns: Vec<TurnState> = arbiter.history().map(|t| t.turn).collect();
        assert_eq!(
            turns,
            vec![TurnState::UserTurn, TurnState::Idle, TurnState::AssistantTurn]
        );
    }

    #[test]
    fn test_snapshot_serializes() {
        let mut arbiter = TurnArbiter::default();
        for _ in 0..7 {
            arbiter.set_assistant_turn();
            arbiter.set_user_turn();
        }
        arbiter.set_assistant_turn();
        arbiter.buffer_user_audio(vec![0; 4]);

        let snapshot = arbiter.snapshot();
        assert_eq!(snapshot.recent_turns.len(), 5);
        assert_eq!(snapshot.buffered_chunks, 1);

        let json = serde_json::to_value(&snapshot).unwrap();
        assert_eq!(json["current_turn"], "assistant");
        assert_eq!(json["recent_turns"][4]["turn"], "assistant");
    }
}
