//! `homespun-worker` — alternate execution path for agent sessions that run
//! inside a containerized worker instead of a local subprocess.
//!
//! The worker publishes the same start / send / interrupt / stop / status
//! surface over HTTP, streaming responses as server-sent events. This crate
//! is the client side: request framing, SSE decoding into typed events,
//! host↔container path translation, and user-identity derivation for the
//! container runtime.

pub mod client;
pub mod config;
pub mod error;
pub mod identity;
pub mod paths;

pub use client::{
    StartWorkerSession, WorkerClient, WorkerEvent, WorkerEventStream, WorkerSessionStatus,
};
pub use config::WorkerConfig;
pub use error::WorkerError;
pub use identity::container_user;
pub use paths::to_host_path;

pub type Result<T> = std::result::Result<T, WorkerError>;
