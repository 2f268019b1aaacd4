use std::pin::Pin;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::task::{Context, Poll};

use futures::Stream;
use tokio::sync::mpsc;

use crate::discovery::discover_cli;
use crate::options::SessionOptions;
use crate::transport::SubprocessTransport;
use crate::types::Message;
use crate::{ClaudeClientError, Result};

// ─── ControlBehavior ──────────────────────────────────────────────────────

/// The caller's verdict on a CLI control request (permission prompt or
/// host-served tool call).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControlBehavior {
    Allow,
    Deny,
}

impl ControlBehavior {
    pub fn as_str(&self) -> &'static str {
        match self {
            ControlBehavior::Allow => "allow",
            ControlBehavior::Deny => "deny",
        }
    }
}

// ─── ClaudeClient ─────────────────────────────────────────────────────────

/// A connected Claude CLI session: one subprocess transport plus the framing
/// for user messages and control traffic.
///
/// `connect` is idempotent; every other operation requires it. The incoming
/// message stream is handed out once via [`ClaudeClient::messages`].
pub struct ClaudeClient {
    options: SessionOptions,
    transport: tokio::sync::Mutex<Option<Arc<SubprocessTransport>>>,
    request_seq: AtomicU64,
}

impl ClaudeClient {
    pub fn new(options: SessionOptions) -> Self {
        ClaudeClient {
            options,
            transport: tokio::sync::Mutex::new(None),
            request_seq: AtomicU64::new(0),
        }
    }

    pub fn options(&self) -> &SessionOptions {
        &self.options
    }

    /// Spawn the transport and start its read loop. Concurrent and repeated
    /// calls are no-ops after the first success.
    pub async fn connect(&self) -> Result<()> {
        let mut guard = self.transport.lock().await;
        if guard.is_some() {
            return Ok(());
        }
        let cli_path = discover_cli(self.options.cli_path.as_deref())?;
        let transport = SubprocessTransport::spawn(&self.options, &cli_path)?;
        *guard = Some(Arc::new(transport));
        Ok(())
    }

    /// Wrap an already-spawned transport. Lets tests drive the client with a
    /// mock subprocess.
    #[cfg(test)]
    pub(crate) fn from_transport(options: SessionOptions, transport: SubprocessTransport) -> Self {
        ClaudeClient {
            options,
            transport: tokio::sync::Mutex::new(Some(Arc::new(transport))),
            request_seq: AtomicU64::new(0),
        }
    }

    pub async fn is_connected(&self) -> bool {
        match self.transport.lock().await.as_ref() {
            Some(t) => t.is_ready().await,
            None => false,
        }
    }

    /// Take the incoming message stream. `None` when not connected or when
    /// the stream was already taken; there is exactly one consumer.
    pub async fn messages(&self) -> Option<MessageStream> {
        let guard = self.transport.lock().await;
        let rx = guard.as_ref()?.take_incoming()?;
        Some(MessageStream { rx })
    }

    /// Frame and write a user message:
    /// `{"type":"user","message":{"role":"user","content":[{"type":"text","text":...}]}}`.
    pub async fn send_user_message(&self, text: &str) -> Result<()> {
        let frame = user_message_frame(text);
        self.write(&frame).await
    }

    /// Answer a control request. Allow always carries an `updatedInput`
    /// object (empty when not supplied); deny carries `message` and never
    /// `updatedInput`.
    pub async fn send_control_response(
        &self,
        request_id: &str,
        behavior: ControlBehavior,
        updated_input: Option<serde_json::Value>,
        deny_message: Option<&str>,
    ) -> Result<()> {
        let frame = control_response_frame(request_id, behavior, updated_input, deny_message);
        self.write(&frame).await
    }

    /// Ask the CLI to interrupt the in-flight run.
    pub async fn interrupt(&self) -> Result<()> {
        let id = self.request_seq.fetch_add(1, Ordering::SeqCst) + 1;
        let frame = serde_json::json!({
            "type": "control_request",
            "request_id": format!("req_{id}"),
            "request": { "subtype": "interrupt" },
        });
        self.write(&frame).await
    }

    /// Close the transport; the message stream ends shortly after.
    pub async fn close(&self) {
        let transport = self.transport.lock().await.take();
        if let Some(t) = transport {
            t.close().await;
        }
    }

    async fn write(&self, frame: &serde_json::Value) -> Result<()> {
        let guard = self.transport.lock().await;
        let transport = guard.as_ref().ok_or(ClaudeClientError::NotConnected)?;
        transport.write_line(&frame.to_string()).await
    }
}

// ─── Frames ───────────────────────────────────────────────────────────────

fn user_message_frame(text: &str) -> serde_json::Value {
    serde_json::json!({
        "type": "user",
        "message": {
            "role": "user",
            "content": [ { "type": "text", "text": text } ],
        },
    })
}

fn control_response_frame(
    request_id: &str,
    behavior: ControlBehavior,
    updated_input: Option<serde_json::Value>,
    deny_message: Option<&str>,
) -> serde_json::Value {
    let inner = match behavior {
        ControlBehavior::Allow => serde_json::json!({
            "behavior": "allow",
            "updatedInput": updated_input.unwrap_or_else(|| serde_json::json!({})),
        }),
        ControlBehavior::Deny => serde_json::json!({
            "behavior": "deny",
            "message": deny_message.unwrap_or(""),
        }),
    };
    serde_json::json!({
        "type": "control_response",
        "response": {
            "subtype": "success",
            "request_id": request_id,
            "response": inner,
        },
    })
}

// ─── MessageStream ────────────────────────────────────────────────────────

/// The incoming half of a session: typed messages until EOF, error, or
/// disposal. Backed by the transport's bounded channel.
pub struct MessageStream {
    rx: mpsc::Receiver<Result<Message>>,
}

impl MessageStream {
    /// Test-only constructor: wrap a raw channel as a stream.
    #[cfg(test)]
    pub(crate) fn from_channel(rx: mpsc::Receiver<Result<Message>>) -> Self {
        MessageStream { rx }
    }
}

impl Stream for MessageStream {
    type Item = Result<Message>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.rx.poll_recv(cx)
    }
}

// ─── Tests ────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use futures::StreamExt;
    use tokio::process::Command;

    #[test]
    fn allow_frame_has_updated_input_and_no_message() {
        let frame = control_response_frame("r1", ControlBehavior::Allow, None, None);
        let inner = &frame["response"]["response"];
        assert_eq!(inner["behavior"], "allow");
        assert_eq!(inner["updatedInput"], serde_json::json!({}));
        assert!(inner.get("message").is_none());
        assert_eq!(frame["response"]["request_id"], "r1");
        assert_eq!(frame["response"]["subtype"], "success");
    }

    #[test]
    fn allow_frame_carries_supplied_input() {
        let frame = control_response_frame(
            "r2",
            ControlBehavior::Allow,
            Some(serde_json::json!({"file_path": "/tmp/x"})),
            None,
        );
        assert_eq!(
            frame["response"]["response"]["updatedInput"]["file_path"],
            "/tmp/x"
        );
    }

    #[test]
    fn deny_frame_has_message_and_no_updated_input() {
        let frame = control_response_frame("r3", ControlBehavior::Deny, None, Some("no"));
        let inner = &frame["response"]["response"];
        assert_eq!(inner["behavior"], "deny");
        assert_eq!(inner["message"], "no");
        assert!(inner.get("updatedInput").is_none());
    }

    #[test]
    fn deny_message_defaults_to_empty_string() {
        let frame = control_response_frame("r4", ControlBehavior::Deny, None, None);
        assert_eq!(frame["response"]["response"]["message"], "");
    }

    #[test]
    fn user_message_frame_shape() {
        let frame = user_message_frame("hi there");
        assert_eq!(frame["type"], "user");
        assert_eq!(frame["message"]["role"], "user");
        assert_eq!(frame["message"]["content"][0]["type"], "text");
        assert_eq!(frame["message"]["content"][0]["text"], "hi there");
    }

    #[test]
    fn interrupt_ids_are_unique() {
        let client = ClaudeClient::new(SessionOptions::default());
        let a = client.request_seq.fetch_add(1, Ordering::SeqCst);
        let b = client.request_seq.fetch_add(1, Ordering::SeqCst);
        assert_ne!(a, b);
    }

    /// Pipe written frames into a file via `sh -c 'cat > path'`, then assert
    /// the on-wire shape end to end.
    #[tokio::test]
    async fn frames_are_written_newline_delimited() {
        let dir = tempfile::TempDir::new().unwrap();
        let sink = dir.path().join("stdin.log");
        let mut cmd = Command::new("sh");
        cmd.arg("-c").arg(format!("cat > {}", sink.display()));

        let options = SessionOptions::default();
        let transport =
            crate::transport::SubprocessTransport::spawn_command(cmd, &options).unwrap();
        let client = ClaudeClient::from_transport(options, transport);

        client.send_user_message("hello").await.unwrap();
        client
            .send_control_response("r9", ControlBehavior::Deny, None, Some("nope"))
            .await
            .unwrap();
        client.interrupt().await.unwrap();
        client.close().await;

        let raw = std::fs::read_to_string(&sink).unwrap();
        let lines: Vec<&str> = raw.lines().collect();
        assert_eq!(lines.len(), 3);

        let user: serde_json::Value = serde_json::from_str(lines[0]).unwrap();
        assert_eq!(user["type"], "user");
        assert_eq!(user["message"]["content"][0]["text"], "hello");

        let control: serde_json::Value = serde_json::from_str(lines[1]).unwrap();
        assert_eq!(control["type"], "control_response");
        assert_eq!(control["response"]["response"]["behavior"], "deny");
        assert_eq!(control["response"]["response"]["message"], "nope");

        let interrupt: serde_json::Value = serde_json::from_str(lines[2]).unwrap();
        assert_eq!(interrupt["type"], "control_request");
        assert_eq!(interrupt["request"]["subtype"], "interrupt");
        assert_eq!(interrupt["request_id"], "req_1");
    }

    #[tokio::test]
    async fn operations_before_connect_fail_with_not_connected() {
        let client = ClaudeClient::new(SessionOptions::default());
        let err = client.send_user_message("hi").await.unwrap_err();
        assert!(matches!(err, ClaudeClientError::NotConnected));
        let err = client.interrupt().await.unwrap_err();
        assert!(matches!(err, ClaudeClientError::NotConnected));
        assert!(!client.is_connected().await);
        assert!(client.messages().await.is_none());
    }

    #[tokio::test]
    async fn message_stream_yields_from_channel() {
        let (tx, rx) = mpsc::channel(4);
        let line = r#"{"type":"system","session_id":"s1","subtype":"init"}"#;
        tx.send(Ok(crate::types::parse_line(line).unwrap()))
            .await
            .unwrap();
        drop(tx);
        let stream = MessageStream::from_channel(rx);
        let items: Vec<_> = stream.collect().await;
        assert_eq!(items.len(), 1);
        assert_eq!(items[0].as_ref().unwrap().session_id(), "s1");
    }
}
