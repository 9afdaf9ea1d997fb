//! # Conversation Wire Protocol
//!
//! JSON control messages travel as websocket text frames tagged by `type`;
//! audio travels as binary frames of raw PCM16.
//!
//! ## Client → Server:
//! - binary: caller audio chunk
//! - `{"type": "ping"}` → `{"type": "pong"}`
//! - `{"type": "clear_buffer"}` → `{"type": "buffer_cleared"}`
//! - `{"type": "user_stopped_speaking"}` → no reply
//!
//! ## Server → Client:
//! - `{"type": "transcript", "role": "user" | "assistant", "text": "..."}`
//! - binary: assistant speech, fixed-size chunks
//! - `{"type": "audio_end"}` after the last chunk of a reply

use serde::{Deserialize, Serialize};

/// Control messages a client may send. Extra fields are ignored.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientMessage {
    Ping,
    ClearBuffer,
    UserStoppedSpeaking,
}

impl ClientMessage {
    pub fn parse(text: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(text)
    }
}

/// Speaker attribution for transcript events.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    User,
    Assistant,
}

/// Structured events sent to the client.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerEvent {
    Transcript { role: Role, text: String },
    AudioEnd,
    Pong,
    BufferCleared,
}

impl ServerEvent {
    pub fn transcript(role: Role, text: impl Into<String>) -> Self {
        ServerEvent::Transcript {
            role,
            text: text.into(),
        }
    }

    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}

/// Anything the transport layer delivers into a conversation.
#[derive(Debug, Clone, PartialEq)]
pub enum InboundMessage {
    Audio(Vec<u8>),
    Control(ClientMessage),
}

/// Anything a conversation asks the transport layer to send.
#[derive(Debug, Clone, PartialEq)]
pub enum OutboundMessage {
    Event(ServerEvent),
    Audio(Vec<u8>),
}

impl From<ServerEvent> for OutboundMessage {
    fn from(event: ServerEvent) -> Self {
        OutboundMessage::Event(event)
    }
}
