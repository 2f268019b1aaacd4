use thiserror::Error;

#[derive(Debug, Error)]
pub enum WorkerError {
    #[error("worker request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("worker returned {status}: {body}")]
    Status { status: u16, body: String },
}
