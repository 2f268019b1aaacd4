use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

use claude_client::{
    discover_cli, ChatMessage, ClaudeClient, ContentBlock, HostToolHandler, Message,
    MessageStream, SessionOptions,
};
use futures::StreamExt;
use tokio::sync::{broadcast, watch};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::aggregator::{StreamAggregator, UiEvent};
use crate::config::EngineConfig;
use crate::metadata::MetadataStore;
use crate::options;
use crate::session::{SessionMode, SessionRecord, SessionStatus};
use crate::startup::StartupTracker;
use crate::store::SessionIndex;
use crate::transcripts::TranscriptCatalog;
use crate::{EngineError, Result};

const EVENT_CAPACITY: usize = 1024;

// ─── Requests & events ────────────────────────────────────────────────────

/// Everything needed to start a session.
pub struct StartSession {
    pub entity_id: String,
    pub project_id: String,
    pub working_directory: PathBuf,
    pub mode: SessionMode,
    pub model: String,
    pub prompt: String,
    pub system_prompt: Option<String>,
    /// When set, the `homespun` MCP server answers `ask_user` with this.
    pub ask_user: Option<HostToolHandler>,
}

/// What external subscribers see, in per-session arrival order.
#[derive(Debug, Clone)]
pub enum SessionEvent {
    /// A protocol message, forwarded as received.
    Message {
        session_id: String,
        message: Message,
    },
    /// The run's terminal result arrived; `conversation_id` is the resume
    /// token from here on.
    Completed {
        session_id: String,
        conversation_id: String,
        is_error: bool,
    },
    /// A failure converted to a stream event (send path) or mirrored from a
    /// direct failure.
    Error {
        session_id: Option<String>,
        code: &'static str,
        message: String,
        retryable: bool,
    },
}

struct LiveSession {
    client: Arc<ClaudeClient>,
    options: SessionOptions,
    cancel: CancellationToken,
    consumer: JoinHandle<()>,
    /// Bumped once per terminal result; `send` waits on it.
    runs: watch::Receiver<u64>,
}

// ─── SessionManager ───────────────────────────────────────────────────────

/// Composes the transport client, stores, tracker, and aggregator into the
/// create / send / interrupt / stop surface.
///
/// The manager is the sole owner of every component; only value-typed events
/// flow outward, so nothing here holds a back-pointer.
pub struct SessionManager {
    config: EngineConfig,
    /// Discovered once at construction and cached for every spawn.
    cli_path: PathBuf,
    index: Arc<SessionIndex>,
    metadata: Arc<MetadataStore>,
    tracker: Arc<StartupTracker>,
    aggregator: Arc<StreamAggregator>,
    events_tx: broadcast::Sender<SessionEvent>,
    live: tokio::sync::Mutex<HashMap<String, LiveSession>>,
}

impl SessionManager {
    pub fn new(config: EngineConfig) -> Result<Self> {
        let cli_path = discover_cli(config.cli_path.as_deref())?;
        let metadata = Arc::new(MetadataStore::load(&config.metadata_path));
        let (events_tx, _) = broadcast::channel(EVENT_CAPACITY);
        Ok(SessionManager {
            config,
            cli_path,
            index: Arc::new(SessionIndex::new()),
            metadata,
            tracker: Arc::new(StartupTracker::new()),
            aggregator: Arc::new(StreamAggregator::new()),
            events_tx,
            live: tokio::sync::Mutex::new(HashMap::new()),
        })
    }

    pub fn subscribe(&self) -> broadcast::Receiver<SessionEvent> {
        self.events_tx.subscribe()
    }

    pub fn index(&self) -> &Arc<SessionIndex> {
        &self.index
    }

    pub fn metadata(&self) -> &Arc<MetadataStore> {
        &self.metadata
    }

    pub fn tracker(&self) -> &Arc<StartupTracker> {
        &self.tracker
    }

    pub fn aggregator(&self) -> &Arc<StreamAggregator> {
        &self.aggregator
    }

    pub fn transcripts(&self) -> Result<TranscriptCatalog> {
        match &self.config.transcripts_root {
            Some(root) => Ok(TranscriptCatalog::new(root)),
            None => TranscriptCatalog::with_default_root(),
        }
    }

    /// Start a session: claim the entity, register the records, spawn the
    /// CLI, send the initial prompt, and hand the stream to a dedicated
    /// consumer task. Failures unwind everything they created.
    pub async fn start(&self, request: StartSession) -> Result<String> {
        if !self.tracker.try_mark_as_starting(&request.entity_id) {
            return Err(EngineError::StartupInFlight(request.entity_id));
        }

        let session_id = uuid::Uuid::new_v4().to_string();
        let record = SessionRecord::new(
            &session_id,
            &request.entity_id,
            &request.project_id,
            &request.working_directory,
            request.mode,
            &request.model,
        );
        self.index.add(record.clone());

        let first_start = self.metadata.get_by_session_id(&session_id).await.is_none();
        if let Err(e) = self
            .metadata
            .save(record.metadata(request.system_prompt.clone()))
            .await
        {
            self.abort_startup(&request.entity_id, &session_id, first_start, &e)
                .await;
            return Err(e);
        }

        let mut opts = options::session_options(
            request.mode,
            &request.working_directory,
            &request.model,
            request.system_prompt,
            request.ask_user,
        );
        opts.cli_path = Some(self.cli_path.clone());

        let client = Arc::new(ClaudeClient::new(opts.clone()));
        let stream = match self.connect_and_open(&client, &request.prompt).await {
            Ok(stream) => stream,
            Err(e) => {
                self.abort_startup(&request.entity_id, &session_id, first_start, &e)
                    .await;
                return Err(EngineError::Startup(e.to_string()));
            }
        };

        self.tracker.mark_as_started(&request.entity_id);
        self.index
            .update(&session_id, |r| r.status = SessionStatus::Running);

        let cancel = CancellationToken::new();
        let (runs_tx, runs_rx) = watch::channel(0u64);
        let consumer =
            self.spawn_consumer(session_id.clone(), stream, client.clone(), cancel.clone(), runs_tx);
        self.live.lock().await.insert(
            session_id.clone(),
            LiveSession {
                client,
                options: opts,
                cancel,
                consumer,
                runs: runs_rx,
            },
        );

        Ok(session_id)
    }

    /// Send a follow-up message and wait for the run's terminal result.
    ///
    /// An unknown session yields a single `SESSION_NOT_FOUND` error event
    /// rather than a direct failure; other failures surface both as a stream
    /// error event and as the returned error. Options are refreshed
    /// with the current conversation id before every write, so a respawned
    /// transport resumes where the conversation left off.
    pub async fn send(
        &self,
        session_id: &str,
        message: &str,
        model_override: Option<&str>,
    ) -> Result<()> {
        let outcome = self.send_inner(session_id, message, model_override).await;
        if let Err(e) = &outcome {
            self.emit_error(Some(session_id), e);
        }
        outcome
    }

    async fn send_inner(
        &self,
        session_id: &str,
        message: &str,
        model_override: Option<&str>,
    ) -> Result<()> {
        let Some(record) = self.index.get_by_id(session_id) else {
            let err = EngineError::SessionNotFound(session_id.to_string());
            self.emit_error(Some(session_id), &err);
            return Ok(());
        };

        let mut runs = {
            let mut live = self.live.lock().await;
            let Some(handle) = live.get_mut(session_id) else {
                let err = EngineError::SessionNotFound(session_id.to_string());
                self.emit_error(Some(session_id), &err);
                return Ok(());
            };

            handle.options = refresh_options(
                handle.options.clone(),
                record.conversation_id.as_deref(),
                model_override,
            );

            if !handle.client.is_connected().await {
                self.respawn(session_id, handle).await?;
            }

            let mut runs = handle.runs.clone();
            runs.mark_unchanged();
            handle.client.send_user_message(message).await?;
            runs
        };

        let timeout = self.config.request_timeout();
        match tokio::time::timeout(timeout, runs.changed()).await {
            Err(_) => Err(EngineError::Timeout(timeout)),
            Ok(Err(_)) => Err(EngineError::ConnectionLost(
                "session consumer ended before the result".into(),
            )),
            Ok(Ok(())) => Ok(()),
        }
    }

    /// Forward an interrupt to the session's CLI. Unknown ids are no-ops.
    pub async fn interrupt(&self, session_id: &str) {
        let live = self.live.lock().await;
        if let Some(handle) = live.get(session_id) {
            if let Err(e) = handle.client.interrupt().await {
                tracing::debug!(session_id, error = %e, "interrupt on inactive transport");
            }
        }
    }

    /// Tear a session down and drop it from the live index. Idempotent;
    /// unknown ids are no-ops. Clears the entity's startup claim so it can
    /// start a fresh session.
    pub async fn stop(&self, session_id: &str) {
        let handle = self.live.lock().await.remove(session_id);
        let record = self.index.get_by_id(session_id);
        let Some(handle) = handle else {
            self.index.remove(session_id);
            return;
        };

        self.index
            .update(session_id, |r| r.status = SessionStatus::Stopping);
        handle.cancel.cancel();
        handle.client.close().await;
        let _ = handle.consumer.await;
        self.index.remove(session_id);

        if let Some(record) = record {
            self.tracker.clear(&record.entity_id);
        }
    }

    /// Release an entity's startup claim after a failed start, permitting a
    /// retry.
    pub fn clear_startup(&self, entity_id: &str) {
        self.tracker.clear(entity_id);
    }

    async fn connect_and_open(
        &self,
        client: &ClaudeClient,
        prompt: &str,
    ) -> Result<MessageStream> {
        client.connect().await?;
        let stream = client
            .messages()
            .await
            .ok_or_else(|| EngineError::Startup("message stream unavailable".into()))?;
        client.send_user_message(prompt).await?;
        Ok(stream)
    }

    async fn abort_startup(
        &self,
        entity_id: &str,
        session_id: &str,
        first_start: bool,
        error: &EngineError,
    ) {
        self.tracker.mark_as_failed(entity_id, &error.to_string());
        self.index.remove(session_id);
        if first_start {
            if let Err(e) = self.metadata.remove(session_id).await {
                tracing::warn!(session_id, error = %e, "failed to clean up metadata after aborted start");
            }
        }
    }

    /// Replace a dead transport: new client with the refreshed (resuming)
    /// options, new consumer, new run counter.
    async fn respawn(&self, session_id: &str, handle: &mut LiveSession) -> Result<()> {
        tracing::info!(session_id, "transport gone, respawning with resume");
        let client = Arc::new(ClaudeClient::new(handle.options.clone()));
        client.connect().await?;
        let stream = client.messages().await.ok_or_else(|| {
            EngineError::ConnectionLost("message stream unavailable after respawn".into())
        })?;

        let (runs_tx, runs_rx) = watch::channel(0u64);
        handle.consumer.abort();
        handle.consumer = self.spawn_consumer(
            session_id.to_string(),
            stream,
            client.clone(),
            handle.cancel.clone(),
            runs_tx,
        );
        handle.client = client;
        handle.runs = runs_rx;
        Ok(())
    }

    fn spawn_consumer(
        &self,
        session_id: String,
        stream: MessageStream,
        client: Arc<ClaudeClient>,
        cancel: CancellationToken,
        runs_tx: watch::Sender<u64>,
    ) -> JoinHandle<()> {
        let index = self.index.clone();
        let metadata = self.metadata.clone();
        let aggregator = self.aggregator.clone();
        let events_tx = self.events_tx.clone();
        tokio::spawn(consume(
            session_id, stream, client, cancel, runs_tx, index, metadata, aggregator, events_tx,
        ))
    }

    fn emit_error(&self, session_id: Option<&str>, error: &EngineError) {
        emit_error(&self.events_tx, session_id, error);
    }
}

// ─── Consumer loop ────────────────────────────────────────────────────────

#[allow(clippy::too_many_arguments)]
async fn consume(
    session_id: String,
    mut stream: MessageStream,
    client: Arc<ClaudeClient>,
    cancel: CancellationToken,
    runs_tx: watch::Sender<u64>,
    index: Arc<SessionIndex>,
    metadata: Arc<MetadataStore>,
    aggregator: Arc<StreamAggregator>,
    events_tx: broadcast::Sender<SessionEvent>,
) {
    let mut in_run = false;
    loop {
        let item = tokio::select! {
            _ = cancel.cancelled() => {
                let _ = client.interrupt().await;
                client.close().await;
                if in_run {
                    aggregator.apply(&session_id, UiEvent::RunError {
                        message: "session cancelled".into(),
                    });
                }
                return;
            }
            item = stream.next() => item,
        };

        match item {
            None => {
                if in_run {
                    let err =
                        EngineError::ConnectionLost("agent stream ended before a result".into());
                    index.update(&session_id, |r| r.status = SessionStatus::Errored);
                    aggregator.apply(
                        &session_id,
                        UiEvent::RunError {
                            message: err.to_string(),
                        },
                    );
                    emit_error(&events_tx, Some(&session_id), &err);
                }
                return;
            }
            Some(Err(e)) => {
                let err = EngineError::from(e);
                index.update(&session_id, |r| r.status = SessionStatus::Errored);
                if in_run {
                    aggregator.apply(
                        &session_id,
                        UiEvent::RunError {
                            message: err.to_string(),
                        },
                    );
                }
                emit_error(&events_tx, Some(&session_id), &err);
                return;
            }
            Some(Ok(message)) => {
                if !in_run && !matches!(message, Message::Result(_)) {
                    in_run = true;
                    aggregator.apply(
                        &session_id,
                        UiEvent::RunStarted {
                            thread_id: session_id.clone(),
                            run_id: message.session_id().to_string(),
                        },
                    );
                }
                match &message {
                    Message::Result(result) => {
                        let conversation_id = result.session_id.clone();
                        index.update(&session_id, |r| {
                            r.conversation_id = Some(conversation_id.clone());
                        });
                        if let Some(record) = index.get_by_id(&session_id) {
                            let system_prompt = client.options().system_prompt.clone();
                            if let Err(e) = metadata.save(record.metadata(system_prompt)).await {
                                tracing::warn!(%session_id, error = %e, "failed to persist metadata on result");
                            }
                        }
                        if result.is_error {
                            let message = result
                                .errors
                                .as_ref()
                                .map(|e| e.join("; "))
                                .filter(|s| !s.is_empty())
                                .unwrap_or_else(|| "agent run failed".to_string());
                            aggregator.apply(&session_id, UiEvent::RunError { message });
                        } else {
                            aggregator.apply(
                                &session_id,
                                UiEvent::RunFinished {
                                    thread_id: session_id.clone(),
                                    run_id: conversation_id.clone(),
                                },
                            );
                        }
                        let _ = events_tx.send(SessionEvent::Completed {
                            session_id: session_id.clone(),
                            conversation_id,
                            is_error: result.is_error,
                        });
                        runs_tx.send_modify(|n| *n += 1);
                        in_run = false;
                    }
                    Message::Assistant(chat) | Message::User(chat) => {
                        for event in block_events(chat) {
                            aggregator.apply(&session_id, event);
                        }
                        let _ = events_tx.send(SessionEvent::Message {
                            session_id: session_id.clone(),
                            message: message.clone(),
                        });
                    }
                    // Raw stream events pass through untouched; system
                    // messages carry no aggregatable content.
                    Message::System(_) | Message::StreamEvent(_) => {
                        let _ = events_tx.send(SessionEvent::Message {
                            session_id: session_id.clone(),
                            message: message.clone(),
                        });
                    }
                }
            }
        }
    }
}

fn emit_error(
    events_tx: &broadcast::Sender<SessionEvent>,
    session_id: Option<&str>,
    error: &EngineError,
) {
    let _ = events_tx.send(SessionEvent::Error {
        session_id: session_id.map(|s| s.to_string()),
        code: error.code(),
        message: error.to_string(),
        retryable: error.is_retryable(),
    });
}

/// Translate one whole chat message into the fine-grained UI events the
/// aggregator consumes. Complete blocks become start/content/end triples;
/// tool results stay stateless.
fn block_events(chat: &ChatMessage) -> Vec<UiEvent> {
    let role = &chat.message.role;
    let base = chat.uuid.clone().unwrap_or_else(|| chat.session_id.clone());
    let mut events = Vec::new();
    for (i, block) in chat.message.content.iter().enumerate() {
        match block {
            ContentBlock::Text { text } => {
                let message_id = format!("{base}:{i}");
                events.push(UiEvent::TextMessageStart {
                    message_id: message_id.clone(),
                    role: role.clone(),
                });
                events.push(UiEvent::TextMessageContent {
                    message_id: message_id.clone(),
                    delta: text.clone(),
                });
                events.push(UiEvent::TextMessageEnd { message_id });
            }
            // Thinking is forwarded raw with the protocol message; it has no
            // aggregate form.
            ContentBlock::Thinking { .. } => {}
            ContentBlock::ToolUse { id, name, input } => {
                events.push(UiEvent::ToolCallStart {
                    tool_call_id: id.clone(),
                    tool_name: name.clone(),
                    parent_message_id: chat.parent_tool_use_id.clone(),
                });
                events.push(UiEvent::ToolCallArgs {
                    tool_call_id: id.clone(),
                    delta: input.to_string(),
                });
                events.push(UiEvent::ToolCallEnd {
                    tool_call_id: id.clone(),
                });
            }
            ContentBlock::ToolResult {
                tool_use_id,
                content,
                ..
            } => {
                let content = match content {
                    Some(serde_json::Value::String(s)) => s.clone(),
                    Some(v) => v.to_string(),
                    None => String::new(),
                };
                events.push(UiEvent::ToolCallResult {
                    tool_call_id: tool_use_id.clone(),
                    message_id: format!("{base}:{i}"),
                    content,
                });
            }
        }
    }
    events
}

/// Options for the next request: resume from the current conversation and
/// honor a per-send model override.
fn refresh_options(
    mut options: SessionOptions,
    conversation_id: Option<&str>,
    model_override: Option<&str>,
) -> SessionOptions {
    if let Some(conversation_id) = conversation_id {
        options.resume = Some(conversation_id.to_string());
    }
    if let Some(model) = model_override {
        options.model = Some(model.to_string());
    }
    options
}

// ─── Tests ────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::aggregator::AggregatedEvent;
    use std::path::Path;
    use std::time::Duration;
    use tempfile::TempDir;
    use tokio::time::timeout;

    const ASSISTANT_LINE: &str = r#"{"type":"assistant","session_id":"s","message":{"role":"assistant","content":[{"type":"text","text":"hello"}]}}"#;
    const RESULT_LINE: &str = r#"{"type":"result","session_id":"c","duration_ms":1,"duration_api_ms":1,"is_error":false,"num_turns":1,"total_cost_usd":0}"#;

    /// Install an executable shell script standing in for the real CLI.
    fn fake_cli(dir: &Path, body: &str) -> PathBuf {
        use std::os::unix::fs::PermissionsExt;
        let path = dir.join("claude");
        std::fs::write(&path, format!("#!/bin/sh\n{body}\n")).unwrap();
        std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
        path
    }

    fn manager_with(dir: &TempDir, cli_body: &str, timeout_secs: u64) -> SessionManager {
        let config = EngineConfig {
            cli_path: Some(fake_cli(dir.path(), cli_body)),
            metadata_path: dir.path().join("sessions.json"),
            transcripts_root: Some(dir.path().join("transcripts")),
            request_timeout_secs: timeout_secs,
        };
        SessionManager::new(config).unwrap()
    }

    fn start_request(entity: &str) -> StartSession {
        StartSession {
            entity_id: entity.into(),
            project_id: "p1".into(),
            working_directory: "/tmp/p".into(),
            mode: SessionMode::Build,
            model: "m1".into(),
            prompt: "hi".into(),
            system_prompt: None,
            ask_user: None,
        }
    }

    async fn next_event(rx: &mut broadcast::Receiver<SessionEvent>) -> SessionEvent {
        timeout(Duration::from_secs(5), rx.recv())
            .await
            .expect("timed out waiting for session event")
            .expect("event channel closed")
    }

    #[tokio::test]
    async fn start_streams_messages_and_assigns_conversation_id() {
        let dir = TempDir::new().unwrap();
        let body = format!(
            "printf '%s\\n' '{ASSISTANT_LINE}'\nprintf '%s\\n' '{RESULT_LINE}'\ncat >/dev/null"
        );
        let manager = manager_with(&dir, &body, 5);
        let mut events = manager.subscribe();
        let mut ui = manager.aggregator().subscribe();

        let session_id = manager.start(start_request("e1")).await.unwrap();

        match next_event(&mut events).await {
            SessionEvent::Message { message, .. } => {
                let Message::Assistant(chat) = message else {
                    panic!("expected assistant message");
                };
                assert!(matches!(
                    &chat.message.content[0],
                    ContentBlock::Text { text } if text == "hello"
                ));
            }
            other => panic!("expected Message, got {other:?}"),
        }
        match next_event(&mut events).await {
            SessionEvent::Completed {
                conversation_id,
                is_error,
                ..
            } => {
                assert_eq!(conversation_id, "c");
                assert!(!is_error);
            }
            other => panic!("expected Completed, got {other:?}"),
        }

        let record = manager.index().get_by_id(&session_id).unwrap();
        assert_eq!(record.conversation_id.as_deref(), Some("c"));
        assert_eq!(record.status, SessionStatus::Running);

        // Aggregated view: run started, the message completed, run finished.
        let mut kinds = Vec::new();
        for _ in 0..3 {
            kinds.push(
                timeout(Duration::from_secs(5), ui.recv())
                    .await
                    .unwrap()
                    .unwrap(),
            );
        }
        assert!(matches!(kinds[0], AggregatedEvent::RunStarted { .. }));
        assert!(matches!(
            &kinds[1],
            AggregatedEvent::MessageCompleted { text, .. } if text == "hello"
        ));
        assert!(matches!(kinds[2], AggregatedEvent::RunFinished { .. }));

        // Durable metadata exists for the session.
        assert!(manager
            .metadata()
            .get_by_session_id(&session_id)
            .await
            .is_some());
    }

    #[tokio::test]
    async fn concurrent_startup_per_entity_is_single_flight() {
        let dir = TempDir::new().unwrap();
        let manager = manager_with(&dir, "cat >/dev/null", 5);

        let session_id = manager.start(start_request("e1")).await.unwrap();
        let err = manager.start(start_request("e1")).await.unwrap_err();
        assert!(matches!(err, EngineError::StartupInFlight(_)));
        assert!(err.is_retryable());

        // A different entity is unaffected.
        manager.start(start_request("e2")).await.unwrap();

        // Stop clears the claim; the entity can start again.
        manager.stop(&session_id).await;
        assert!(manager.index().get_by_id(&session_id).is_none());
        manager.start(start_request("e1")).await.unwrap();
    }

    #[tokio::test]
    async fn send_to_unknown_session_yields_error_event() {
        let dir = TempDir::new().unwrap();
        let manager = manager_with(&dir, "cat >/dev/null", 5);
        let mut events = manager.subscribe();

        manager.send("ghost", "hello?", None).await.unwrap();

        match next_event(&mut events).await {
            SessionEvent::Error {
                session_id,
                code,
                retryable,
                ..
            } => {
                assert_eq!(session_id.as_deref(), Some("ghost"));
                assert_eq!(code, "SESSION_NOT_FOUND");
                assert!(!retryable);
            }
            other => panic!("expected Error, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn eof_without_result_marks_session_errored() {
        let dir = TempDir::new().unwrap();
        // Consume the prompt before exiting so the initial write never races
        // the process teardown.
        let body = format!("head -n 1 >/dev/null\nprintf '%s\\n' '{ASSISTANT_LINE}'");
        let manager = manager_with(&dir, &body, 5);
        let mut events = manager.subscribe();

        let session_id = manager.start(start_request("e1")).await.unwrap();

        // Assistant message, then the connection-lost error.
        assert!(matches!(
            next_event(&mut events).await,
            SessionEvent::Message { .. }
        ));
        match next_event(&mut events).await {
            SessionEvent::Error {
                code, retryable, ..
            } => {
                assert_eq!(code, "CONNECTION_LOST");
                assert!(retryable);
            }
            other => panic!("expected Error, got {other:?}"),
        }
        assert_eq!(
            manager.index().get_by_id(&session_id).unwrap().status,
            SessionStatus::Errored
        );
    }

    #[tokio::test]
    async fn send_times_out_and_carries_resume_token() {
        let dir = TempDir::new().unwrap();
        let body = format!(
            "printf '%s\\n' '{ASSISTANT_LINE}'\nprintf '%s\\n' '{RESULT_LINE}'\ncat >/dev/null"
        );
        let manager = manager_with(&dir, &body, 1);
        let mut events = manager.subscribe();

        let session_id = manager.start(start_request("e1")).await.unwrap();
        // Wait for the first run to finish so the conversation id is set.
        loop {
            if matches!(next_event(&mut events).await, SessionEvent::Completed { .. }) {
                break;
            }
        }

        // The fake CLI never answers the follow-up; the wait must time out.
        let err = manager
            .send(&session_id, "again", Some("m2"))
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::Timeout(_)));
        assert!(!err.is_retryable());

        // Resume continuity: the refreshed options carry the conversation id
        // and the model override.
        let live = manager.live.lock().await;
        let handle = live.get(&session_id).unwrap();
        assert_eq!(handle.options.resume.as_deref(), Some("c"));
        assert_eq!(handle.options.model.as_deref(), Some("m2"));
    }

    #[tokio::test]
    async fn interrupt_and_stop_on_unknown_ids_are_noops() {
        let dir = TempDir::new().unwrap();
        let manager = manager_with(&dir, "cat >/dev/null", 5);
        manager.interrupt("ghost").await;
        manager.stop("ghost").await;
    }

    #[test]
    fn refresh_options_sets_resume_and_override() {
        let opts = SessionOptions::default();
        let refreshed = refresh_options(opts, Some("conv-9"), Some("m2"));
        assert_eq!(refreshed.resume.as_deref(), Some("conv-9"));
        assert_eq!(refreshed.model.as_deref(), Some("m2"));

        let untouched = refresh_options(SessionOptions::default(), None, None);
        assert!(untouched.resume.is_none());
        assert!(untouched.model.is_none());
    }

    #[test]
    fn block_events_cover_text_tools_and_results() {
        let line = r#"{
            "type": "assistant",
            "session_id": "s",
            "uuid": "u1",
            "message": {
                "role": "assistant",
                "content": [
                    {"type": "text", "text": "reading"},
                    {"type": "thinking", "thinking": "private"},
                    {"type": "tool_use", "id": "t1", "name": "Read", "input": {"file_path": "/x"}},
                    {"type": "tool_result", "tool_use_id": "t1", "content": "42"}
                ]
            }
        }"#;
        let Some(Message::Assistant(chat)) = claude_client::parse_line(line) else {
            panic!("expected assistant");
        };
        let events = block_events(&chat);
        // text start/content/end + tool start/args/end + result; thinking skipped
        assert_eq!(events.len(), 7);
        assert!(matches!(
            &events[0],
            UiEvent::TextMessageStart { message_id, role }
                if message_id == "u1:0" && role == "assistant"
        ));
        assert!(matches!(
            &events[4],
            UiEvent::ToolCallArgs { delta, .. } if delta.contains("file_path")
        ));
        assert!(matches!(
            &events[6],
            UiEvent::ToolCallResult { content, .. } if content == "42"
        ));
    }
}
