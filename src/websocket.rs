//! # Conversation WebSocket
//!
//! Clients connect to `/ws` and hold a full-duplex voice conversation.
//!
//! ## Actor Model:
//! Each connection is an actix actor (`ConversationSocket`). The actor only
//! moves frames: it decodes client frames into [`InboundMessage`]s for the
//! conversation loop and writes the loop's [`OutboundMessage`]s back out. The
//! loop itself ([`ConnectionOrchestrator`]) runs as a separate tokio task, so a
//! slow transcription never stalls the socket's heartbeat.
//!
//! ## Flow control:
//! The inbound queue is bounded. When it is full the actor stops reading
//! frames (`ctx.wait`) until the loop catches up, which pushes backpressure
//! onto the client's TCP connection.

use crate::conversation::{ClientMessage, ConnectionOrchestrator, InboundMessage, OutboundMessage};
use crate::error::AppError;
use crate::state::AppState;

use actix::prelude::*;
use actix_web::{web, HttpRequest, HttpResponse};
use actix_web_actors::ws;
use std::time::{Duration, Instant};
use tokio::sync::mpsc::{self, error::TrySendError};
use tokio_stream::wrappers::UnboundedReceiverStream;
use tracing::{debug, error, info, warn};

pub struct ConversationSocket {
    session_id: String,
    state: web::Data<AppState>,

    /// Sender half of the conversation loop's queue; dropped to end the loop
    inbound: Option<mpsc::Sender<InboundMessage>>,

    /// Taken once in `started`
    pending_start: Option<(
        ConnectionOrchestrator,
        mpsc::Receiver<InboundMessage>,
        mpsc::UnboundedReceiver<OutboundMessage>,
    )>,

    last_heartbeat: Instant,
    heartbeat_interval: Duration,
    client_timeout: Duration,
}

impl ConversationSocket {
    pub fn new(state: web::Data<AppState>) -> Self {
        let config = state.get_config();

        let (inbound_tx, inbound_rx) = mpsc::channel(config.performance.inbound_queue_capacity);
        let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();
        let orchestrator =
            ConnectionOrchestrator::from_config(config, state.services.clone(), outbound_tx);

        Self {
            session_id: orchestrator.session_id().to_string(),
            heartbeat_interval: Duration::from_secs(config.server.heartbeat_interval_secs),
            client_timeout: Duration::from_secs(config.server.client_timeout_secs),
            state,
            inbound: Some(inbound_tx),
            pending_start: Some((orchestrator, inbound_rx, outbound_rx)),
            last_heartbeat: Instant::now(),
        }
    }

    fn start_heartbeat(&self, ctx: &mut ws::WebsocketContext<Self>) {
        ctx.run_interval(self.heartbeat_interval, |act, ctx| {
            if Instant::now().duration_since(act.last_heartbeat) > act.client_timeout {
                warn!(session_id = %act.session_id, "Websocket heartbeat timeout, closing connection");
                ctx.stop();
                return;
            }
            ctx.ping(b"");
        });
    }

    /// Hand a message to the conversation loop, pausing reads if it is behind.
    fn forward(&mut self, message: InboundMessage, ctx: &mut ws::WebsocketContext<Self>) {
        let Some(sender) = self.inbound.as_ref() else {
            return;
        };

        match sender.try_send(message) {
            Ok(()) => {}
            Err(TrySendError::Full(message)) => {
                debug!(session_id = %self.session_id, "Conversation queue full, pausing reads");
                let sender = sender.clone();
                ctx.wait(
                    async move { sender.send(message).await.is_ok() }
                        .into_actor(self)
                        .map(|delivered, act, ctx| {
                            if !delivered {
                                warn!(session_id = %act.session_id, "Conversation loop gone, closing connection");
                                ctx.stop();
                            }
                        }),
                );
            }
            Err(TrySendError::Closed(_)) => {
                warn!(session_id = %self.session_id, "Conversation loop gone, closing connection");
                ctx.stop();
            }
        }
    }
}

impl Actor for ConversationSocket {
    type Context = ws::WebsocketContext<Self>;

    fn started(&mut self, ctx: &mut Self::Context) {
        info!(session_id = %self.session_id, "Websocket connection started");
        self.start_heartbeat(ctx);

        let Some((orchestrator, inbound_rx, outbound_rx)) = self.pending_start.take() else {
            return;
        };

        ctx.add_stream(UnboundedReceiverStream::new(outbound_rx));

        let state = self.state.clone();
        tokio::spawn(async move {
            let report = orchestrator.run(inbound_rx).await;
            state.record_session(&report);
            state.close_session();
        });
    }

    fn stopped(&mut self, _ctx: &mut Self::Context) {
        // Closing the queue ends the conversation loop, which releases the slot.
        self.inbound.take();
        info!(session_id = %self.session_id, "Websocket connection stopped");
    }
}

/// Frames from the client.
impl StreamHandler<Result<ws::Message, ws::ProtocolError>> for ConversationSocket {
    fn handle(&mut self, msg: Result<ws::Message, ws::ProtocolError>, ctx: &mut Self::Context) {
        match msg {
            Ok(ws::Message::Binary(data)) => {
                self.last_heartbeat = Instant::now();
                self.forward(InboundMessage::Audio(data.to_vec()), ctx);
            }
            Ok(ws::Message::Text(text)) => {
                self.last_heartbeat = Instant::now();
                match ClientMessage::parse(&text) {
                    Ok(control) => self.forward(InboundMessage::Control(control), ctx),
                    Err(err) => {
                        warn!(session_id = %self.session_id, error = %err, "Ignoring malformed control message");
                    }
                }
            }
            Ok(ws::Message::Ping(data)) => {
                self.last_heartbeat = Instant::now();
                ctx.pong(&data);
            }
            Ok(ws::Message::Pong(_)) => {
                self.last_heartbeat = Instant::now();
            }
            Ok(ws::Message::Close(reason)) => {
                info!(session_id = %self.session_id, ?reason, "Websocket closed by client");
                ctx.close(reason);
                ctx.stop();
            }
            Ok(ws::Message::Continuation(_)) => {
                warn!("Received unexpected continuation frame");
            }
            Ok(ws::Message::Nop) => {}
            Err(err) => {
                error!(session_id = %self.session_id, error = %err, "Websocket protocol error");
                ctx.stop();
            }
        }
    }
}

/// Messages from the conversation loop.
impl StreamHandler<OutboundMessage> for ConversationSocket {
    fn handle(&mut self, msg: OutboundMessage, ctx: &mut Self::Context) {
        match msg {
            OutboundMessage::Audio(bytes) => ctx.binary(bytes),
            OutboundMessage::Event(event) => match event.to_json() {
                Ok(json) => ctx.text(json),
                Err(err) => error!(error = %err, "Failed to encode server event"),
            },
        }
    }

    fn finished(&mut self, ctx: &mut Self::Context) {
        debug!(session_id = %self.session_id, "Conversation loop finished");
        ctx.stop();
    }
}

/// Websocket endpoint handler.
///
/// Refuses the upgrade with 503 once `max_concurrent_sessions` conversations
/// are connected.
pub async fn conversation_websocket(
    req: HttpRequest,
    stream: web::Payload,
    state: web::Data<AppState>,
) -> Result<HttpResponse, actix_web::Error> {
    info!(peer = ?req.connection_info().peer_addr(), "New conversation connection request");

    if !state.try_open_session() {
        let max = state.get_config().performance.max_concurrent_sessions;
        return Err(AppError::ServiceUnavailable(format!(
            "Maximum concurrent conversations reached ({})",
            max
        ))
        .into());
    }

    let response = ws::start(ConversationSocket::new(state.clone()), &req, stream);
    if response.is_err() {
        state.close_session();
    }
    response
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::segmenter::tests::{silence_frames, tone_frames};
    use crate::config::AppConfig;
    use crate::services::build_services;
    use actix_web::{http::StatusCode, test as actix_test, App, HttpServer};
    use futures_util::{SinkExt, StreamExt};
    use tokio_tungstenite::tungstenite::Message;

    fn test_state(config: AppConfig) -> web::Data<AppState> {
        let services = build_services(&config).unwrap();
        web::Data::new(AppState::new(config, services))
    }

    fn fast_config() -> AppConfig {
        let mut config = AppConfig::default();
        config.playback.pacing_ms = 0;
        config.synthesis.tone_latency_ms = 0;
        config
    }

    #[actix_web::test]
    async fn test_full_server_refuses_with_503() {
        let mut config = fast_config();
        config.performance.max_concurrent_sessions = 1;
        let state = test_state(config);
        assert!(state.try_open_session());

        let app = actix_test::init_service(
            App::new()
                .app_data(state.clone())
                .route("/ws", web::get().to(conversation_websocket)),
        )
        .await;

        let req = actix_test::TestRequest::get().uri("/ws").to_request();
        let resp = actix_test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::SERVICE_UNAVAILABLE);

        let body: serde_json::Value = actix_test::read_body_json(resp).await;
        assert_eq!(body["error"]["type"], "service_unavailable");
    }

    #[actix_web::test]
    async fn test_failed_upgrade_releases_the_slot() {
        let state = test_state(fast_config());
        let app = actix_test::init_service(
            App::new()
                .app_data(state.clone())
                .route("/ws", web::get().to(conversation_websocket)),
        )
        .await;

        // No upgrade headers
        let req = actix_test::TestRequest::get().uri("/ws").to_request();
        let resp = actix_test::call_service(&app, req).await;
        assert!(resp.status().is_client_error());
        assert_eq!(state.get_metrics_snapshot().active_sessions, 0);
    }

    async fn next_message<S>(socket: &mut S) -> Message
    where
        S: futures_util::Stream<Item = Result<Message, tokio_tungstenite::tungstenite::Error>> + Unpin,
    {
        loop {
            let message = tokio::time::timeout(Duration::from_secs(5), socket.next())
                .await
                .expect("timed out waiting for server")
                .expect("socket closed")
                .expect("socket error");
            match message {
                Message::Ping(_) | Message::Pong(_) => continue,
                other => return other,
            }
        }
    }

    fn event_type(message: &Message) -> Option<String> {
        match message {
            Message::Text(text) => {
                let value: serde_json::Value = serde_json::from_str(text).ok()?;
                value["type"].as_str().map(str::to_string)
            }
            _ => None,
        }
    }

    #[actix_web::test]
    async fn test_conversation_over_a_real_socket() {
        let state = test_state(fast_config());
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();

        let server_state = state.clone();
        let server = HttpServer::new(move || {
            App::new()
                .app_data(server_state.clone())
                .route("/ws", web::get().to(conversation_websocket))
        })
        .workers(1)
        .listen(listener)
        .unwrap()
        .run();
        let handle = server.handle();
        actix_web::rt::spawn(server);

        let (mut socket, _) = tokio_tungstenite::connect_async(format!("ws://{}/ws", addr))
            .await
            .unwrap();

        // Malformed control messages are ignored without a reply.
        socket.send(Message::Text("not json".into())).await.unwrap();
        socket.send(Message::Text(r#"{"type":"ping"}"#.into())).await.unwrap();
        assert_eq!(event_type(&next_message(&mut socket).await).as_deref(), Some("pong"));

        let mut audio = silence_frames(30);
        audio.extend(tone_frames(40, 0.5));
        audio.extend(vec![0u8; 32000]);
        for chunk in audio.chunks(3200) {
            socket.send(Message::Binary(chunk.to_vec())).await.unwrap();
        }

        let user = next_message(&mut socket).await;
        let assistant = next_message(&mut socket).await;
        let user: serde_json::Value = serde_json::from_str(user.to_text().unwrap()).unwrap();
        let assistant: serde_json::Value = serde_json::from_str(assistant.to_text().unwrap()).unwrap();
        assert_eq!(user["role"], "user");
        assert_eq!(user["text"], "hello");
        assert_eq!(assistant["role"], "assistant");
        assert_eq!(assistant["text"], "Hello! How can I help you today?");

        let mut reply_bytes = 0;
        loop {
            let message = next_message(&mut socket).await;
            match message {
                Message::Binary(bytes) => {
                    assert!(bytes.len() <= 4096);
                    reply_bytes += bytes.len();
                }
                other => {
                    assert_eq!(event_type(&other).as_deref(), Some("audio_end"));
                    break;
                }
            }
        }
        // 32 characters of reply at 50 ms each, 16 kHz mono PCM16
        assert_eq!(reply_bytes, 51200);

        socket.send(Message::Text(r#"{"type":"clear_buffer"}"#.into())).await.unwrap();
        assert_eq!(
            event_type(&next_message(&mut socket).await).as_deref(),
            Some("buffer_cleared")
        );

        socket.close(None).await.unwrap();

        // The slot is released once the loop has wound down.
        let mut released = false;
        for _ in 0..50 {
            let metrics = state.get_metrics_snapshot();
            if metrics.active_sessions == 0 && metrics.responses == 1 {
                released = true;
                break;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        assert!(released);

        handle.stop(true).await;
    }
}
