use std::time::Duration;

use thiserror::Error;

use crate::session::SessionStatus;

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("session not found: {0}")]
    SessionNotFound(String),

    #[error("a startup is already in flight for entity {0}")]
    StartupInFlight(String),

    #[error("agent startup failed: {0}")]
    Startup(String),

    #[error("connection to the agent was lost: {0}")]
    ConnectionLost(String),

    #[error("request timed out after {0:?}")]
    Timeout(Duration),

    #[error("operation requires session status {expected:?}, but it is {current:?}")]
    SessionState {
        current: SessionStatus,
        expected: SessionStatus,
    },

    #[error("home directory not found: set HOME environment variable")]
    HomeNotFound,

    #[error(transparent)]
    Client(#[from] claude_client::ClaudeClientError),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),

    #[error(transparent)]
    Yaml(#[from] serde_yaml::Error),
}

impl EngineError {
    /// The stable external error code carried on user-visible failures.
    pub fn code(&self) -> &'static str {
        use claude_client::ClaudeClientError as Client;
        match self {
            EngineError::SessionNotFound(_) => "SESSION_NOT_FOUND",
            EngineError::StartupInFlight(_) | EngineError::Startup(_) => "STARTUP_FAILED",
            EngineError::ConnectionLost(_) => "CONNECTION_LOST",
            EngineError::Timeout(_) => "TIMEOUT",
            EngineError::SessionState { .. } => "STATE_MISMATCH",
            EngineError::Client(Client::CliNotFound) => "STARTUP_FAILED",
            EngineError::Client(Client::NotConnected | Client::TransportClosed) => {
                "CONNECTION_LOST"
            }
            _ => "CLI_ERROR",
        }
    }

    /// Whether the caller may reasonably retry the failed operation.
    /// Startup and lost-connection failures are transient; timeouts, CLI
    /// exits, and state errors are not.
    pub fn is_retryable(&self) -> bool {
        use claude_client::ClaudeClientError as Client;
        matches!(
            self,
            EngineError::StartupInFlight(_)
                | EngineError::Startup(_)
                | EngineError::ConnectionLost(_)
                | EngineError::Client(Client::NotConnected | Client::TransportClosed)
        )
    }
}

pub type Result<T> = std::result::Result<T, EngineError>;
