use thiserror::Error;

#[derive(Debug, Error)]
pub enum ClaudeClientError {
    #[error("claude CLI not found on PATH or in ~/.local/bin")]
    CliNotFound,

    #[error("client is not connected")]
    NotConnected,

    #[error("transport is closed")]
    TransportClosed,

    #[error("message of {observed} bytes exceeds the {limit} byte read budget")]
    BufferOverflow { observed: usize, limit: usize },

    #[error("claude CLI exited with code {exit_code}: {stderr_tail}")]
    CliExit { exit_code: i32, stderr_tail: String },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to serialize outbound frame: {0}")]
    Encode(#[from] serde_json::Error),
}
