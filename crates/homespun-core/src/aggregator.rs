use std::collections::HashMap;
use std::sync::Mutex;

use tokio::sync::broadcast;

const EVENT_CAPACITY: usize = 1024;

// ─── Events ───────────────────────────────────────────────────────────────

/// Fine-grained streaming events as a UI protocol delivers them. Ids are
/// scoped to a session; the same id in two sessions never collides.
#[derive(Debug, Clone)]
pub enum UiEvent {
    TextMessageStart {
        message_id: String,
        role: String,
    },
    TextMessageContent {
        message_id: String,
        delta: String,
    },
    TextMessageEnd {
        message_id: String,
    },
    ToolCallStart {
        tool_call_id: String,
        tool_name: String,
        parent_message_id: Option<String>,
    },
    ToolCallArgs {
        tool_call_id: String,
        delta: String,
    },
    ToolCallEnd {
        tool_call_id: String,
    },
    ToolCallResult {
        tool_call_id: String,
        message_id: String,
        content: String,
    },
    RunStarted {
        thread_id: String,
        run_id: String,
    },
    RunFinished {
        thread_id: String,
        run_id: String,
    },
    RunError {
        message: String,
    },
}

/// Whole reconstructed records, emitted once per completed message, tool
/// call, or run transition.
#[derive(Debug, Clone, PartialEq)]
pub enum AggregatedEvent {
    MessageCompleted {
        session_id: String,
        role: String,
        text: String,
    },
    ToolCallCompleted {
        session_id: String,
        tool_name: String,
        tool_input: String,
    },
    ToolResultReceived {
        session_id: String,
        tool_use_id: String,
        tool_result: String,
    },
    RunStarted {
        session_id: String,
    },
    RunFinished {
        session_id: String,
    },
    RunError {
        session_id: String,
        message: String,
    },
}

// ─── Aggregator ───────────────────────────────────────────────────────────

#[derive(Debug)]
struct MessageAccumulator {
    role: String,
    text: String,
}

#[derive(Debug)]
struct ToolCallAccumulator {
    tool_name: String,
    args: String,
    #[allow(dead_code)]
    parent_message_id: Option<String>,
}

/// Reconstructs whole messages and tool calls from interleaved start/delta/
/// end events, one independent accumulator set per session.
///
/// Events must be applied in receive order within a session; the aggregator
/// does not reorder. Completions fan out on a capped broadcast channel where
/// lagging subscribers lose oldest events rather than blocking the stream.
pub struct StreamAggregator {
    messages: Mutex<HashMap<String, HashMap<String, MessageAccumulator>>>,
    tool_calls: Mutex<HashMap<String, HashMap<String, ToolCallAccumulator>>>,
    tx: broadcast::Sender<AggregatedEvent>,
}

impl Default for StreamAggregator {
    fn default() -> Self {
        Self::new()
    }
}

impl StreamAggregator {
    pub fn new() -> Self {
        let (tx, _) = broadcast::channel(EVENT_CAPACITY);
        StreamAggregator {
            messages: Mutex::new(HashMap::new()),
            tool_calls: Mutex::new(HashMap::new()),
            tx,
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<AggregatedEvent> {
        self.tx.subscribe()
    }

    /// Apply one event for one session. Never fails; malformed sequences
    /// degrade to no-ops or implicit accumulators.
    pub fn apply(&self, session_id: &str, event: UiEvent) {
        match event {
            UiEvent::TextMessageStart { message_id, role } => {
                self.messages
                    .lock()
                    .expect("messages lock poisoned")
                    .entry(session_id.to_string())
                    .or_default()
                    .insert(
                        message_id,
                        MessageAccumulator {
                            role,
                            text: String::new(),
                        },
                    );
            }
            UiEvent::TextMessageContent { message_id, delta } => {
                self.messages
                    .lock()
                    .expect("messages lock poisoned")
                    .entry(session_id.to_string())
                    .or_default()
                    .entry(message_id)
                    .or_insert_with(|| MessageAccumulator {
                        role: "assistant".to_string(),
                        text: String::new(),
                    })
                    .text
                    .push_str(&delta);
            }
            UiEvent::TextMessageEnd { message_id } => {
                let completed = self
                    .messages
                    .lock()
                    .expect("messages lock poisoned")
                    .get_mut(session_id)
                    .and_then(|m| m.remove(&message_id));
                if let Some(acc) = completed {
                    self.emit(AggregatedEvent::MessageCompleted {
                        session_id: session_id.to_string(),
                        role: acc.role,
                        text: acc.text,
                    });
                }
            }
            UiEvent::ToolCallStart {
                tool_call_id,
                tool_name,
                parent_message_id,
            } => {
                self.tool_calls
                    .lock()
                    .expect("tool_calls lock poisoned")
                    .entry(session_id.to_string())
                    .or_default()
                    .insert(
                        tool_call_id,
                        ToolCallAccumulator {
                            tool_name,
                            args: String::new(),
                            parent_message_id,
                        },
                    );
            }
            UiEvent::ToolCallArgs {
                tool_call_id,
                delta,
            } => {
                if let Some(acc) = self
                    .tool_calls
                    .lock()
                    .expect("tool_calls lock poisoned")
                    .get_mut(session_id)
                    .and_then(|m| m.get_mut(&tool_call_id))
                {
                    acc.args.push_str(&delta);
                }
            }
            UiEvent::ToolCallEnd { tool_call_id } => {
                let completed = self
                    .tool_calls
                    .lock()
                    .expect("tool_calls lock poisoned")
                    .get_mut(session_id)
                    .and_then(|m| m.remove(&tool_call_id));
                if let Some(acc) = completed {
                    self.emit(AggregatedEvent::ToolCallCompleted {
                        session_id: session_id.to_string(),
                        tool_name: acc.tool_name,
                        tool_input: acc.args,
                    });
                }
            }
            UiEvent::ToolCallResult {
                tool_call_id,
                content,
                ..
            } => {
                // Results are stateless: forwarded, never accumulated.
                self.emit(AggregatedEvent::ToolResultReceived {
                    session_id: session_id.to_string(),
                    tool_use_id: tool_call_id,
                    tool_result: content,
                });
            }
            UiEvent::RunStarted { .. } => {
                self.emit(AggregatedEvent::RunStarted {
                    session_id: session_id.to_string(),
                });
            }
            UiEvent::RunFinished { .. } => {
                self.clear_session(session_id);
                self.emit(AggregatedEvent::RunFinished {
                    session_id: session_id.to_string(),
                });
            }
            UiEvent::RunError { message } => {
                self.clear_session(session_id);
                self.emit(AggregatedEvent::RunError {
                    session_id: session_id.to_string(),
                    message,
                });
            }
        }
    }

    /// Drop every in-flight accumulator for a session.
    pub fn clear_session(&self, session_id: &str) {
        self.messages
            .lock()
            .expect("messages lock poisoned")
            .remove(session_id);
        self.tool_calls
            .lock()
            .expect("tool_calls lock poisoned")
            .remove(session_id);
    }

    pub fn has_in_flight_message(&self, session_id: &str, message_id: &str) -> bool {
        self.messages
            .lock()
            .expect("messages lock poisoned")
            .get(session_id)
            .is_some_and(|m| m.contains_key(message_id))
    }

    pub fn has_in_flight_tool_call(&self, session_id: &str, tool_call_id: &str) -> bool {
        self.tool_calls
            .lock()
            .expect("tool_calls lock poisoned")
            .get(session_id)
            .is_some_and(|m| m.contains_key(tool_call_id))
    }

    fn emit(&self, event: AggregatedEvent) {
        // No receivers is fine; completions are advisory.
        let _ = self.tx.send(event);
    }
}

// ─── Tests ────────────────────────────────────────────────────────────────
