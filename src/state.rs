//! # Application State Management
//!
//! State shared by every HTTP handler and websocket connection.
//!
//! ## What lives here:
//! - **config**: the validated configuration, read-only after startup
//! - **services**: the transcription/synthesis/policy adapters, one instance shared
//!   by all conversations
//! - **metrics**: server-wide counters, folded in from each conversation's report
//!   when it ends
//!
//! Conversation state itself (segmenter, turn arbiter) is never stored here.
//! Each connection owns its own and drops it on close.
//!
//! ## Arc<RwLock<T>> Pattern
//! - **Arc**: every worker's `App` holds a clone of the same state
//! - **RwLock**: many readers (health, metrics) or one writer (session bookkeeping)

use crate::config::AppConfig;
use crate::conversation::SessionReport;
use crate::services::ConversationServices;
use serde::Serialize;
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::time::Instant;
use tracing::warn;

#[derive(Debug, Clone)]
pub struct AppState {
    pub config: Arc<AppConfig>,
    pub services: ConversationServices,
    pub metrics: Arc<RwLock<AppMetrics>>,
    pub start_time: Instant,
}

/// Server-wide conversation counters.
#[derive(Debug, Default, Clone, Serialize)]
pub struct AppMetrics {
    /// Conversations currently connected
    pub active_sessions: usize,

    /// Conversations accepted since startup
    pub total_sessions: u64,

    /// Conversations refused because the server was full
    pub rejected_sessions: u64,

    pub audio_bytes_received: u64,
    pub utterances: u64,
    pub responses: u64,
    pub interruptions_buffered: u64,
    pub service_failures: u64,
}

impl AppState {
    pub fn new(config: AppConfig, services: ConversationServices) -> Self {
        Self {
            config: Arc::new(config),
            services,
            metrics: Arc::new(RwLock::new(AppMetrics::default())),
            start_time: Instant::now(),
        }
    }

    pub fn get_config(&self) -> &AppConfig {
        &self.config
    }

    // A panic while holding the lock only ever leaves counters half-updated,
    // so a poisoned lock is still safe to use.
    fn metrics_read(&self) -> RwLockReadGuard<'_, AppMetrics> {
        self.metrics.read().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn metrics_write(&self) -> RwLockWriteGuard<'_, AppMetrics> {
        self.metrics.write().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Reserve a conversation slot. Returns false when the server is full.
    pub fn try_open_session(&self) -> bool {
        let max = self.config.performance.max_concurrent_sessions;
        let mut metrics = self.metrics_write();

        if metrics.active_sessions >= max {
            metrics.rejected_sessions += 1;
            warn!(active = metrics.active_sessions, max, "Refusing conversation, server full");
            return false;
        }

        metrics.active_sessions += 1;
        metrics.total_sessions += 1;
        true
    }

    /// Release a slot taken by [`AppState::try_open_session`].
    pub fn close_session(&self) {
        let mut metrics = self.metrics_write();
        if metrics.active_sessions > 0 {
            metrics.active_sessions -= 1;
        }
    }

    /// Fold a finished conversation's counters into the server totals.
    pub fn record_session(&self, report: &SessionReport) {
        let mut metrics = self.metrics_write();
        metrics.audio_bytes_received += report.audio_bytes;
        metrics.utterances += report.utterances;
        metrics.responses += report.responses;
        metrics.interruptions_buffered += report.interruptions_buffered;
        metrics.service_failures += report.service_failures;
    }

    pub fn get_metrics_snapshot(&self) -> AppMetrics {
        self.metrics_read().clone()
    }

    pub fn get_uptime_seconds(&self) -> u64 {
        self.start_time.elapsed().as_secs()
    }
}
