use std::pin::Pin;
use std::task::{Context, Poll};

use futures::{Stream, StreamExt};
use homespun_core::SessionMode;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

use crate::config::WorkerConfig;
use crate::{Result, WorkerError};

// ─── Wire types ───────────────────────────────────────────────────────────

/// `POST /sessions` body. The worker API is camelCase on the wire.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StartWorkerSession {
    pub working_directory: String,
    pub mode: SessionMode,
    pub model: String,
    pub prompt: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub system_prompt: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub resume_session_id: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
struct SendWorkerMessage<'a> {
    message: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    model: Option<&'a str>,
}

#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct WorkerSessionStatus {
    pub session_id: String,
    pub status: String,
}

/// Typed server-sent events off the worker's response stream.
#[derive(Debug, Clone, PartialEq)]
pub enum WorkerEvent {
    SessionStarted { session_id: String },
    /// A protocol message, forwarded raw.
    Message(serde_json::Value),
    /// The terminal result payload, forwarded raw.
    Result(serde_json::Value),
    Error { code: String, message: String },
}

// ─── WorkerClient ─────────────────────────────────────────────────────────

/// Client for the containerized worker: same session surface as the local
/// subprocess path, over HTTP+SSE.
pub struct WorkerClient {
    http: reqwest::Client,
    base_url: String,
    config: WorkerConfig,
}

impl WorkerClient {
    pub fn new(base_url: impl Into<String>, config: WorkerConfig) -> Self {
        WorkerClient {
            http: reqwest::Client::new(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
            config,
        }
    }

    pub fn config(&self) -> &WorkerConfig {
        &self.config
    }

    /// Start a session in the worker. `working_directory` is the container
    /// view; use [`WorkerConfig::to_host_path`] when surfacing paths to the
    /// host side.
    pub async fn start_session(&self, request: StartWorkerSession) -> Result<WorkerEventStream> {
        let url = format!("{}/sessions", self.base_url);
        let response = self
            .http
            .post(&url)
            .timeout(self.config.request_timeout())
            .json(&request)
            .send()
            .await?;
        self.open_stream(response).await
    }

    pub async fn send_message(
        &self,
        session_id: &str,
        message: &str,
        model: Option<&str>,
    ) -> Result<WorkerEventStream> {
        let url = format!("{}/sessions/{session_id}/messages", self.base_url);
        let response = self
            .http
            .post(&url)
            .timeout(self.config.request_timeout())
            .json(&SendWorkerMessage { message, model })
            .send()
            .await?;
        self.open_stream(response).await
    }

    /// 204 on success; 404 is a silent no-op.
    pub async fn interrupt(&self, session_id: &str) -> Result<()> {
        self.fire(format!("{}/sessions/{session_id}/interrupt", self.base_url))
            .await
    }

    /// 204 on success; 404 is a silent no-op.
    pub async fn stop(&self, session_id: &str) -> Result<()> {
        self.fire(format!("{}/sessions/{session_id}/stop", self.base_url))
            .await
    }

    /// `None` when the worker does not know the session.
    pub async fn get_status(&self, session_id: &str) -> Result<Option<WorkerSessionStatus>> {
        let url = format!("{}/sessions/{session_id}", self.base_url);
        let response = self.http.get(&url).send().await?;
        if response.status() == reqwest::StatusCode::NOT_FOUND {
            return Ok(None);
        }
        let response = Self::check_status(response).await?;
        Ok(response.json().await?)
    }

    async fn fire(&self, url: String) -> Result<()> {
        let response = self.http.post(&url).send().await?;
        if response.status() == reqwest::StatusCode::NOT_FOUND {
            return Ok(());
        }
        Self::check_status(response).await?;
        Ok(())
    }

    async fn open_stream(&self, response: reqwest::Response) -> Result<WorkerEventStream> {
        let response = Self::check_status(response).await?;
        let (tx, rx) = mpsc::channel(64);

        tokio::spawn(async move {
            let mut scanner = SseScanner::default();
            let mut bytes = response.bytes_stream();
            while let Some(chunk) = bytes.next().await {
                let chunk = match chunk {
                    Ok(c) => c,
                    Err(e) => {
                        let _ = tx.send(Err(WorkerError::Http(e))).await;
                        return;
                    }
                };
                for frame in scanner.push(&String::from_utf8_lossy(&chunk)) {
                    if let Some(event) = decode_event(&frame) {
                        if tx.send(Ok(event)).await.is_err() {
                            return;
                        }
                    }
                }
            }
            if let Some(frame) = scanner.finish() {
                if let Some(event) = decode_event(&frame) {
                    let _ = tx.send(Ok(event)).await;
                }
            }
        });

        Ok(WorkerEventStream { rx })
    }

    async fn check_status(response: reqwest::Response) -> Result<reqwest::Response> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        let body = response.text().await.unwrap_or_default();
        Err(WorkerError::Status {
            status: status.as_u16(),
            body,
        })
    }
}

/// Events from one worker request, ending at stream close.
pub struct WorkerEventStream {
    rx: mpsc::Receiver<Result<WorkerEvent>>,
}

impl Stream for WorkerEventStream {
    type Item = Result<WorkerEvent>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.rx.poll_recv(cx)
    }
}

// ─── SSE decoding ─────────────────────────────────────────────────────────

#[derive(Debug, Default, PartialEq)]
struct SseFrame {
    event: String,
    data: String,
}

/// Incremental server-sent-event scanner: fields accumulate until a blank
/// line terminates the frame. Comments and unknown fields are ignored.
#[derive(Default)]
struct SseScanner {
    buf: String,
    current: SseFrame,
}

impl SseScanner {
    fn push(&mut self, chunk: &str) -> Vec<SseFrame> {
        self.buf.push_str(chunk);
        let mut frames = Vec::new();
        while let Some(pos) = self.buf.find('\n') {
            let line: String = self.buf.drain(..=pos).collect();
            let line = line.trim_end_matches(['\n', '\r']);
            if line.is_empty() {
                if !self.current.data.is_empty() || !self.current.event.is_empty() {
                    frames.push(std::mem::take(&mut self.current));
                }
                continue;
            }
            if let Some(value) = line.strip_prefix("event:") {
                self.current.event = value.trim_start().to_string();
            } else if let Some(value) = line.strip_prefix("data:") {
                if !self.current.data.is_empty() {
                    self.current.data.push('\n');
                }
                self.current.data.push_str(value.trim_start());
            }
            // ":" comments and other fields fall through
        }
        frames
    }

    fn finish(&mut self) -> Option<SseFrame> {
        if self.current.data.is_empty() && self.current.event.is_empty() {
            return None;
        }
        Some(std::mem::take(&mut self.current))
    }
}

/// Map a frame to a typed event; unknown event names are skipped.
fn decode_event(frame: &SseFrame) -> Option<WorkerEvent> {
    match frame.event.as_str() {
        "session-started" => {
            #[derive(Deserialize)]
            #[serde(rename_all = "camelCase")]
            struct Started {
                session_id: String,
            }
            match serde_json::from_str::<Started>(&frame.data) {
                Ok(s) => Some(WorkerEvent::SessionStarted {
                    session_id: s.session_id,
                }),
                Err(e) => {
                    tracing::warn!(error = %e, "malformed session-started event");
                    None
                }
            }
        }
        "message" => serde_json::from_str(&frame.data)
            .map(WorkerEvent::Message)
            .ok(),
        "result" => serde_json::from_str(&frame.data)
            .map(WorkerEvent::Result)
            .ok(),
        "error" => {
            #[derive(Deserialize)]
            struct ErrorEvent {
                code: String,
                #[serde(default)]
                message: String,
            }
            match serde_json::from_str::<ErrorEvent>(&frame.data) {
                Ok(e) => Some(WorkerEvent::Error {
                    code: e.code,
                    message: e.message,
                }),
                Err(e) => {
                    tracing::warn!(error = %e, "malformed error event");
                    None
                }
            }
        }
        other => {
            tracing::debug!(event = other, "skipping unknown worker event");
            None
        }
    }
}

// ─── Tests ────────────────────────────────────────────────────────────────
