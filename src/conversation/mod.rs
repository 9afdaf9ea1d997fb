//! # Conversation Module
//!
//! Per-connection conversation logic, independent of the websocket transport.
//!
//! ## Key Components:
//! - **Protocol**: JSON control messages and server events
//! - **Turn**: who holds the floor, and caller audio buffered meanwhile
//! - **Session**: the state one connection owns (segmenter + arbiter + counters)
//! - **Orchestrator**: the async loop tying audio, services and playback together

pub mod orchestrator;   // Per-connection control loop
pub mod protocol;       // Wire messages
pub mod session;        // Per-connection state and report
pub mod turn;           // Turn-taking state machine

pub use orchestrator::ConnectionOrchestrator;
pub use protocol::{ClientMessage, InboundMessage, OutboundMessage};
pub use session::SessionReport;
