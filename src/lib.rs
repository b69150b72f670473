//! Parley - voice conversation client and gateway
//!
//! One conversational turn flows through the system as:
//!
//! ```text
//! capture ──▶ orchestrator ──▶ gateway ──▶ STT ──▶ LLM
//!    ▲             │                          (external services)
//!    │             ▼
//! playback ◀── history (persisted before speech starts)
//! ```
//!
//! The client owns all durable state (the conversation history); the
//! gateway is stateless per request and horizontally scalable.

pub mod api;
pub mod config;
pub mod error;
pub mod history;
pub mod llm;
pub mod orchestrator;
pub mod voice;

pub use config::Config;
pub use error::{Error, Result};
pub use history::{ConversationHistory, HistoryStore, Message, Role};
pub use orchestrator::{GatewayClient, TerminalTranscript, TranscriptView, TurnOrchestrator};
