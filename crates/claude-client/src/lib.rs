//! `claude-client` — subprocess transport and typed client for the Claude
//! CLI `stream-json` protocol.
//!
//! # Architecture
//!
//! ```text
//! SessionOptions
//!     │
//!     ▼
//! SubprocessTransport  ← discovers and spawns `claude`, reads JSONL from
//!     │                  stdout under a per-line byte budget, serializes
//!     │                  stdin writes
//!     ▼
//! ClaudeClient         ← connect / user messages / control responses /
//!     │                  interrupt
//!     ▼
//! MessageStream        ← futures::Stream<Item = Result<Message>>
//! ```
//!
//! The parser is total: unknown message types and unknown content-block tags
//! are skipped, never fatal. `tool_use.input` and `stream_event.event` stay
//! raw [`serde_json::Value`]s until a consumer opts to decode them.

pub mod client;
pub mod discovery;
pub mod error;
pub mod options;
pub mod transport;
pub mod types;

pub use client::{ClaudeClient, ControlBehavior, MessageStream};
pub use discovery::discover_cli;
pub use error::ClaudeClientError;
pub use options::{
    HostTool, HostToolHandler, McpTransport, OverflowBehavior, OverflowCallback, SessionOptions,
    DEFAULT_MAX_BUFFER_SIZE,
};
pub use transport::SubprocessTransport;
pub use types::{
    parse_line, ChatMessage, ChatPayload, ContentBlock, Message, ResultMessage,
    StreamEventMessage, SystemMessage,
};

/// Convenience `Result` alias for this crate.
pub type Result<T> = std::result::Result<T, ClaudeClientError>;
