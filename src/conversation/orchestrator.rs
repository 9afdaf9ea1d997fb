//! # Connection Orchestrator
//!
//! The control loop for one conversation. It owns the connection's session
//! state outright, so nothing here needs a lock.
//!
//! ## Per audio message:
//! 1. Feed the segmenter
//! 2. For each completed utterance: buffer it if the assistant holds the turn,
//!    otherwise transcribe → reply → synthesize
//! 3. Stream the reply audio from a separate playback task, so the loop keeps
//!    segmenting (and buffering) caller audio while the assistant speaks
//! 4. When playback finishes: `audio_end`, turn back to the caller
//!
//! Transcription and synthesis run on tokio's blocking pool under a timeout.
//! Errors, panics and timeouts all degrade to an empty result; the turn is
//! always handed back to the caller. A timed-out call cannot be interrupted:
//! its worker keeps a blocking-pool thread until the backend returns, and a
//! watcher task logs when that happens and drops the late result.

use crate::config::AppConfig;
use crate::conversation::protocol::{ClientMessage, InboundMessage, OutboundMessage, Role, ServerEvent};
use crate::conversation::session::{ConversationSession, SessionReport};
use crate::services::ConversationServices;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

/// Timing and sizing knobs for one conversation.
#[derive(Debug, Clone)]
pub struct OrchestratorSettings {
    pub chunk_size: usize,
    pub pacing: Duration,
    pub transcription_timeout: Duration,
    pub synthesis_timeout: Duration,
}

impl OrchestratorSettings {
    pub fn from_config(config: &AppConfig) -> Self {
        Self {
            chunk_size: config.playback.chunk_size,
            pacing: Duration::from_millis(config.playback.pacing_ms),
            transcription_timeout: Duration::from_millis(config.transcription.timeout_ms),
            synthesis_timeout: Duration::from_millis(config.synthesis.timeout_ms),
        }
    }
}

struct Playback {
    generation: u64,
    handle: JoinHandle<()>,
}

pub struct ConnectionOrchestrator {
    session: ConversationSession,
    services: ConversationServices,
    settings: OrchestratorSettings,
    outbound: mpsc::UnboundedSender<OutboundMessage>,

    playback: Option<Playback>,
    playback_generation: u64,
    playback_done_tx: mpsc::UnboundedSender<u64>,
    playback_done_rx: mpsc::UnboundedReceiver<u64>,

    /// Caller audio drained after an assistant turn, waiting to be answered
    replay: Option<Vec<u8>>,
}

impl ConnectionOrchestrator {
    pub fn new(
        session: ConversationSession,
        services: ConversationServices,
        settings: OrchestratorSettings,
        outbound: mpsc::UnboundedSender<OutboundMessage>,
    ) -> Self {
        let (playback_done_tx, playback_done_rx) = mpsc::unbounded_channel();
        Self {
            session,
            services,
            settings,
            outbound,
            playback: None,
            playback_generation: 0,
            playback_done_tx,
            playback_done_rx,
            replay: None,
        }
    }

    pub fn from_config(
        config: &AppConfig,
        services: ConversationServices,
        outbound: mpsc::UnboundedSender<OutboundMessage>,
    ) -> Self {
        let session = ConversationSession::new(
            config.audio.format(),
            config.vad.clone(),
            config.turn.clone(),
        );
        Self::new(session, services, OrchestratorSettings::from_config(config), outbound)
    }

    pub fn session_id(&self) -> &str {
        &self.session.session_id
    }

    /// Drive the conversation until the inbound side closes.
    pub async fn run(mut self, mut inbound: mpsc::Receiver<InboundMessage>) -> SessionReport {
        info!(session_id = %self.session.session_id, "Conversation started");

        loop {
            tokio::select! {
                biased;

                Some(generation) = self.playback_done_rx.recv() => {
                    self.finish_playback(generation);
                }
                message = inbound.recv() => match message {
                    Some(message) => self.handle_inbound(message).await,
                    None => break,
                },
            }

            while let Some(audio) = self.replay.take() {
                self.respond_to(audio).await;
            }
        }

        self.cancel_playback();

        debug!(
            session_id = %self.session.session_id,
            segmenter = ?self.session.segmenter.stats(),
            turn = ?self.session.arbiter.snapshot(),
            "Final conversation state"
        );

        let report = self.session.report();
        info!(
            session_id = %report.session_id,
            utterances = report.utterances,
            responses = report.responses,
            interruptions = report.interruptions_buffered,
            pending_dropped = report.pending_dropped,
            service_failures = report.service_failures,
            duration_ms = report.duration_ms,
            "Conversation ended"
        );
        report
    }

    async fn handle_inbound(&mut self, message: InboundMessage) {
        match message {
            InboundMessage::Audio(bytes) => self.handle_audio(bytes).await,
            InboundMessage::Control(control) => self.handle_control(control).await,
        }
    }

    async fn handle_audio(&mut self, bytes: Vec<u8>) {
        self.session.record_audio(bytes.len());

        let was_speaking = self.session.segmenter.is_speaking();
        let utterances = self.session.segmenter.feed(&bytes);
        let speaking = self.session.segmenter.is_speaking();

        if !was_speaking && speaking {
            debug!(session_id = %self.session.session_id, "Caller started speaking");
        } else if was_speaking && !speaking {
            debug!(session_id = %self.session.session_id, "Speech segment ended");
        }

        for utterance in utterances {
            self.session.record_utterance();

            if !self.session.arbiter.is_user_turn() {
                self.buffer_interruption(utterance.into_bytes());
                continue;
            }

            info!(
                bytes = utterance.len(),
                frames = utterance.frames(),
                duration_secs = utterance.duration_secs(),
                "Utterance complete"
            );
            self.respond_to(utterance.into_bytes()).await;
        }
    }

    async fn handle_control(&mut self, control: ClientMessage) {
        match control {
            ClientMessage::Ping => self.emit(ServerEvent::Pong),
            ClientMessage::ClearBuffer => {
                self.cancel_playback();
                self.replay = None;
                self.session.clear();
                self.emit(ServerEvent::BufferCleared);
                info!(session_id = %self.session.session_id, "Conversation buffers cleared");
            }
            ClientMessage::UserStoppedSpeaking => {
                let flushed = self.session.segmenter.flush();

                if self.playback.is_some() {
                    // The assistant is already talking; treat it as an interruption.
                    if let Some(utterance) = flushed {
                        self.session.record_utterance();
                        self.buffer_interruption(utterance.into_bytes());
                    }
                    return;
                }

                self.session.arbiter.set_assistant_turn();
                match flushed {
                    Some(utterance) => {
                        self.session.record_utterance();
                        debug!(bytes = utterance.len(), "Client ended the utterance early");
                        self.respond_to(utterance.into_bytes()).await;
                    }
                    None => {
                        debug!("Client signalled end of speech with nothing in progress");
                        self.end_assistant_turn();
                        // Nobody holds the floor until the caller speaks again
                        self.session.arbiter.set_idle();
                    }
                }
            }
        }
    }

    fn buffer_interruption(&mut self, audio: Vec<u8>) {
        let bytes = audio.len();
        self.session.arbiter.buffer_user_audio(audio);
        self.session.record_interruption();
        debug!(
            bytes,
            pending = self.session.arbiter.pending_len(),
            "Assistant holds the turn, buffered caller audio"
        );
    }

    /// Transcribe, reply and start playback for one utterance.
    async fn respond_to(&mut self, audio: Vec<u8>) {
        let transcript = self.transcribe(audio).await;
        let text = transcript.trim();

        if text.is_empty() {
            debug!("Empty transcript, treating utterance as noise");
            if self.session.arbiter.is_assistant_turn() {
                self.end_assistant_turn();
            }
            return;
        }

        info!(text, "User said");
        self.emit(ServerEvent::transcript(Role::User, text));

        let reply = self.services.policy.respond(text);
        info!(text = %reply, "Assistant replies");
        self.emit(ServerEvent::transcript(Role::Assistant, reply.as_str()));

        self.session.arbiter.set_assistant_turn();
        self.session.record_response();

        let audio = self.synthesize(reply).await;
        if audio.is_empty() {
            warn!("No reply audio, handing the turn back to the caller");
            self.end_assistant_turn();
            return;
        }

        self.start_playback(audio);
    }

    async fn transcribe(&mut self, audio: Vec<u8>) -> String {
        let service = Arc::clone(&self.services.transcription);
        let budget = self.settings.transcription_timeout;
        let started = Instant::now();

        let mut job = tokio::task::spawn_blocking(move || service.transcribe(&audio));

        match tokio::time::timeout(budget, &mut job).await {
            Ok(Ok(Ok(text))) => {
                debug!(elapsed_ms = started.elapsed().as_millis() as u64, "Transcription returned");
                text
            }
            Ok(Ok(Err(err))) => {
                warn!(error = %err, "Transcription failed");
                self.session.record_service_failure();
                String::new()
            }
            Ok(Err(join_err)) => {
                error!(error = %join_err, "Transcription worker crashed");
                self.session.record_service_failure();
                String::new()
            }
            Err(_) => {
                warn!(timeout_ms = budget.as_millis() as u64, "Transcription timed out");
                self.session.record_service_failure();
                watch_abandoned("transcription", job, started);
                String::new()
            }
        }
    }

    async fn synthesize(&mut self, text: String) -> Vec<u8> {
        let service = Arc::clone(&self.services.synthesis);
        let budget = self.settings.synthesis_timeout;
        let started = Instant::now();

        let mut job = tokio::task::spawn_blocking(move || service.synthesize(&text));

        match tokio::time::timeout(budget, &mut job).await {
            Ok(Ok(audio)) => {
                if audio.is_empty() {
                    self.session.record_service_failure();
                }
                audio
            }
            Ok(Err(join_err)) => {
                error!(error = %join_err, "Synthesis worker crashed");
                self.session.record_service_failure();
                Vec::new()
            }
            Err(_) => {
                warn!(timeout_ms = budget.as_millis() as u64, "Synthesis timed out");
                self.session.record_service_failure();
                watch_abandoned("synthesis", job, started);
                Vec::new()
            }
        }
    }

    fn start_playback(&mut self, audio: Vec<u8>) {
        self.cancel_playback();
        self.playback_generation += 1;

        let generation = self.playback_generation;
        let outbound = self.outbound.clone();
        let done = self.playback_done_tx.clone();
        let chunk_size = self.settings.chunk_size.max(1);
        let pacing = self.settings.pacing;

        debug!(bytes = audio.len(), chunk_size, "Starting reply playback");

        let handle = tokio::spawn(async move {
            for chunk in audio.chunks(chunk_size) {
                if outbound.send(OutboundMessage::Audio(chunk.to_vec())).is_err() {
                    debug!("Client gone, stopping playback");
                    return;
                }
                if !pacing.is_zero() {
                    tokio::time::sleep(pacing).await;
                }
            }
            let _ = done.send(generation);
        });

        self.playback = Some(Playback { generation, handle });
    }

    fn finish_playback(&mut self, generation: u64) {
        match &self.playback {
            Some(playback) if playback.generation == generation => {}
            _ => {
                debug!(generation, "Ignoring completion of a cancelled playback");
                return;
            }
        }

        self.playback = None;
        self.emit(ServerEvent::AudioEnd);
        self.end_assistant_turn();
    }

    fn cancel_playback(&mut self) {
        if let Some(playback) = self.playback.take() {
            playback.handle.abort();
            debug!(generation = playback.generation, "Playback cancelled");
        }
    }

    /// Give the floor back to the caller and settle audio captured meanwhile.
    fn end_assistant_turn(&mut self) {
        self.session.arbiter.set_user_turn();

        if !self.session.arbiter.has_pending() {
            return;
        }

        let drained = self.session.arbiter.drain_pending();
        let chunks = drained.len();
        if self.session.arbiter.replay_pending() {
            let audio = drained.concat();
            info!(chunks, bytes = audio.len(), "Replaying caller audio from the assistant's turn");
            self.session.record_pending_replayed(chunks);
            match self.replay.as_mut() {
                Some(queued) => queued.extend_from_slice(&audio),
                None => self.replay = Some(audio),
            }
        } else {
            info!(chunks, "Discarding caller audio from the assistant's turn");
            self.session.record_pending_discarded(chunks);
        }
    }

    fn emit(&self, event: ServerEvent) {
        if self.outbound.send(event.into()).is_err() {
            debug!("Client gone, dropping outbound event");
        }
    }
}

/// Wait out a blocking call whose result is no longer wanted.
///
/// Resolves to `true` when the worker returned normally.
fn watch_abandoned<T: Send + 'static>(
    service: &'static str,
    job: JoinHandle<T>,
    started: Instant,
) -> JoinHandle<bool> {
    tokio::spawn(async move {
        let finished = job.await.is_ok();
        let elapsed_ms = started.elapsed().as_millis() as u64;
        if finished {
            info!(service, elapsed_ms, "Timed-out call returned, result discarded");
        } else {
            warn!(service, elapsed_ms, "Timed-out call failed in its worker");
        }
        finished
    })
}
