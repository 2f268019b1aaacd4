use rust_decimal::Decimal;
use serde::{Deserialize, Deserializer, Serialize};

// ─── Message ──────────────────────────────────────────────────────────────

/// Every inbound message the CLI emits on stdout, one JSON object per line.
/// Discriminated by the JSON `"type"` field; wire fields are snake_case.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Message {
    System(SystemMessage),
    Assistant(ChatMessage),
    User(ChatMessage),
    Result(ResultMessage),
    /// Partial assistant chunks; the `event` payload is passed through raw.
    StreamEvent(StreamEventMessage),
}

impl Message {
    pub fn session_id(&self) -> &str {
        match self {
            Message::System(m) => &m.session_id,
            Message::Assistant(m) | Message::User(m) => &m.session_id,
            Message::Result(m) => &m.session_id,
            Message::StreamEvent(m) => &m.session_id,
        }
    }

    /// Returns `Some(&ResultMessage)` if this is the terminal result message.
    pub fn as_result(&self) -> Option<&ResultMessage> {
        if let Message::Result(r) = self {
            Some(r)
        } else {
            None
        }
    }
}

/// Decode one newline-delimited JSON line into a typed message.
///
/// Returns `None` for blank lines, unknown `type` tags, and lines missing
/// required fields; the caller drops the line and keeps reading. Parsing
/// never panics and never fails the stream.
pub fn parse_line(line: &str) -> Option<Message> {
    let trimmed = line.trim();
    if trimmed.is_empty() {
        return None;
    }

    let value: serde_json::Value = match serde_json::from_str(trimmed) {
        Ok(v) => v,
        Err(e) => {
            tracing::warn!(error = %e, "dropping non-JSON line from CLI stdout");
            return None;
        }
    };

    let kind = value
        .get("type")
        .and_then(|t| t.as_str())
        .unwrap_or("")
        .to_string();
    if !matches!(
        kind.as_str(),
        "system" | "assistant" | "user" | "result" | "stream_event"
    ) {
        tracing::debug!(kind, "skipping message of unknown type");
        return None;
    }

    match serde_json::from_value::<Message>(value) {
        Ok(msg) => Some(msg),
        Err(e) => {
            tracing::warn!(kind, error = %e, "dropping malformed {kind} message");
            None
        }
    }
}

// ─── System ───────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct SystemMessage {
    pub session_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub uuid: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub subtype: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tools: Option<Vec<String>>,
}

// ─── Assistant / user ─────────────────────────────────────────────────────

/// `type = "assistant"` and `type = "user"` share one shape; only the inner
/// role differs.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ChatMessage {
    pub session_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub uuid: Option<String>,
    pub message: ChatPayload,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent_tool_use_id: Option<String>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ChatPayload {
    pub role: String,
    #[serde(deserialize_with = "known_content_blocks")]
    pub content: Vec<ContentBlock>,
}

/// Content blocks within an assistant or user message.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ContentBlock {
    Text {
        text: String,
    },
    Thinking {
        thinking: String,
    },
    ToolUse {
        id: String,
        name: String,
        /// Tool inputs are schema-polymorphic (varies per tool), so Value is correct here.
        input: serde_json::Value,
    },
    ToolResult {
        tool_use_id: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        content: Option<serde_json::Value>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        is_error: Option<bool>,
    },
}

/// Deserialize a content array, silently dropping blocks with unknown tags.
/// A future block type must not fail the whole message.
fn known_content_blocks<'de, D>(deserializer: D) -> Result<Vec<ContentBlock>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = Vec::<serde_json::Value>::deserialize(deserializer)?;
    Ok(raw
        .into_iter()
        .filter_map(|v| serde_json::from_value(v).ok())
        .collect())
}

// ─── Result ───────────────────────────────────────────────────────────────

/// `type = "result"` — the terminal message of every run. The `session_id`
/// it carries is the CLI-assigned conversation id used as the resume token.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ResultMessage {
    pub session_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub uuid: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub subtype: Option<String>,
    pub duration_ms: u64,
    pub duration_api_ms: u64,
    pub is_error: bool,
    pub num_turns: u32,
    /// Cost in USD. Decimal, not f64: sub-cent amounts must round-trip.
    pub total_cost_usd: Decimal,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub errors: Option<Vec<String>>,
}

// ─── Stream events ────────────────────────────────────────────────────────

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct StreamEventMessage {
    pub session_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub uuid: Option<String>,
    /// Raw event payload, passed through untouched for downstream consumers.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub event: Option<serde_json::Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent_tool_use_id: Option<String>,
}

// ─── Tests ────────────────────────────────────────────────────────────────
