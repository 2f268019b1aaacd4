use std::collections::{BTreeMap, HashMap};
use std::path::PathBuf;
use std::sync::Arc;

use futures::future::BoxFuture;

// ─── Buffer overflow policy ───────────────────────────────────────────────

/// What to do when a single JSON line exceeds [`SessionOptions::max_buffer_size`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum OverflowBehavior {
    /// Discard the line and invoke the overflow callback.
    #[default]
    SkipMessage,
    /// Parse the truncated prefix; best-effort, may yield nothing.
    Truncate,
    /// Terminate the read loop with `BufferOverflow`.
    Fail,
}

/// Invoked as `(kind, observed_bytes, limit_bytes)` when a line is skipped.
pub type OverflowCallback = Arc<dyn Fn(&str, usize, usize) + Send + Sync>;

/// Default per-line read budget: 10 MiB.
pub const DEFAULT_MAX_BUFFER_SIZE: usize = 10 * 1024 * 1024;

// ─── MCP servers ──────────────────────────────────────────────────────────

/// Handler for a tool served in-process by the host. Receives the raw tool
/// input and resolves to the tool result text.
pub type HostToolHandler = Arc<dyn Fn(serde_json::Value) -> BoxFuture<'static, String> + Send + Sync>;

/// A tool the host answers itself; tool invocations surface as control
/// requests which the embedder settles via
/// [`ClaudeClient::send_control_response`](crate::ClaudeClient::send_control_response).
#[derive(Clone)]
pub struct HostTool {
    pub name: String,
    pub handler: HostToolHandler,
}

impl std::fmt::Debug for HostTool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HostTool").field("name", &self.name).finish()
    }
}

/// How one MCP server reaches the CLI. Keyed by server name in
/// [`SessionOptions::mcp_servers`]; tool names surface as `mcp__<name>__<tool>`.
#[derive(Debug, Clone)]
pub enum McpTransport {
    /// A subprocess the CLI spawns itself.
    Stdio {
        command: String,
        args: Vec<String>,
        env: HashMap<String, String>,
    },
    /// Served in-process by this host over the control channel.
    Host { tools: Vec<HostTool> },
}

// ─── SessionOptions ───────────────────────────────────────────────────────

/// Per-session options for driving a Claude subprocess.
///
/// `allowed_tools = None` (or an empty list) means all tools are allowed;
/// a populated list restricts the CLI to exactly those names.
#[derive(Clone)]
pub struct SessionOptions {
    pub cwd: PathBuf,
    pub model: Option<String>,
    pub system_prompt: Option<String>,
    pub allowed_tools: Option<Vec<String>>,
    pub disallowed_tools: Vec<String>,
    pub mcp_servers: BTreeMap<String, McpTransport>,
    /// Extra variables overlayed on the ambient environment.
    pub env: HashMap<String, String>,
    pub max_buffer_size: usize,
    pub overflow_behavior: OverflowBehavior,
    pub on_overflow: Option<OverflowCallback>,
    /// Conversation id to resume; carried forward after the first result.
    pub resume: Option<String>,
    /// Absolute path to the `claude` binary; skips discovery when set.
    pub cli_path: Option<PathBuf>,
}

impl Default for SessionOptions {
    fn default() -> Self {
        SessionOptions {
            cwd: PathBuf::from("."),
            model: None,
            system_prompt: None,
            allowed_tools: None,
            disallowed_tools: Vec::new(),
            mcp_servers: BTreeMap::new(),
            env: HashMap::new(),
            max_buffer_size: DEFAULT_MAX_BUFFER_SIZE,
            overflow_behavior: OverflowBehavior::SkipMessage,
            on_overflow: None,
            resume: None,
            cli_path: None,
        }
    }
}

impl SessionOptions {
    /// Look up a host-served tool by its bare name across all `Host` servers.
    pub fn host_tool(&self, name: &str) -> Option<&HostTool> {
        self.mcp_servers.values().find_map(|t| match t {
            McpTransport::Host { tools } => tools.iter().find(|t| t.name == name),
            McpTransport::Stdio { .. } => None,
        })
    }
}

impl std::fmt::Debug for SessionOptions {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionOptions")
            .field("cwd", &self.cwd)
            .field("model", &self.model)
            .field("allowed_tools", &self.allowed_tools)
            .field("disallowed_tools", &self.disallowed_tools)
            .field("mcp_servers", &self.mcp_servers.keys().collect::<Vec<_>>())
            .field("max_buffer_size", &self.max_buffer_size)
            .field("overflow_behavior", &self.overflow_behavior)
            .field("resume", &self.resume)
            .finish()
    }
}
