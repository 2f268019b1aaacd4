use std::path::Path;
use std::sync::Arc;

use claude_client::{
    HostTool, HostToolHandler, McpTransport, OverflowBehavior, SessionOptions,
    DEFAULT_MAX_BUFFER_SIZE,
};

use crate::session::SessionMode;

/// Tools a Plan-mode session may use: inspection only, plus the plan
/// hand-off. `ExitPlanMode` is always present.
pub const PLAN_MODE_TOOLS: &[&str] = &[
    "Read",
    "Glob",
    "Grep",
    "WebFetch",
    "WebSearch",
    "ExitPlanMode",
];

/// Name of the host-served MCP server and the fully-qualified ask tool.
pub const HOST_MCP_SERVER: &str = "homespun";
pub const ASK_USER_TOOL: &str = "mcp__homespun__ask_user";

/// The CLI's built-in ask tool, disabled when the host serves its own.
pub const BUILTIN_ASK_USER_TOOL: &str = "AskUserQuestion";

/// Build the per-session options record for a mode.
///
/// Always: a 10 MiB skip-on-overflow read budget with a logging callback,
/// and the playwright MCP server. Plan mode restricts the allow-list to
/// [`PLAN_MODE_TOOLS`]; Build mode leaves all tools allowed. Supplying
/// `ask_user` registers the `homespun` host server, allows its tool in Plan
/// mode, and denies the built-in equivalent.
pub fn session_options(
    mode: SessionMode,
    cwd: &Path,
    model: &str,
    system_prompt: Option<String>,
    ask_user: Option<HostToolHandler>,
) -> SessionOptions {
    let mut opts = SessionOptions {
        cwd: cwd.to_path_buf(),
        model: Some(model.to_string()),
        system_prompt,
        max_buffer_size: DEFAULT_MAX_BUFFER_SIZE,
        overflow_behavior: OverflowBehavior::SkipMessage,
        on_overflow: Some(Arc::new(|kind, observed, limit| {
            tracing::warn!(kind, observed, limit, "oversized agent message skipped");
        })),
        ..SessionOptions::default()
    };

    opts.mcp_servers.insert(
        "playwright".to_string(),
        McpTransport::Stdio {
            command: "npx".to_string(),
            args: vec!["@playwright/mcp@latest".to_string(), "--headless".to_string()],
            env: Default::default(),
        },
    );

    if mode == SessionMode::Plan {
        let mut tools: Vec<String> = PLAN_MODE_TOOLS.iter().map(|t| t.to_string()).collect();
        if ask_user.is_some() {
            tools.push(ASK_USER_TOOL.to_string());
        }
        opts.allowed_tools = Some(tools);
    }

    if let Some(handler) = ask_user {
        opts.mcp_servers.insert(
            HOST_MCP_SERVER.to_string(),
            McpTransport::Host {
                tools: vec![HostTool {
                    name: "ask_user".to_string(),
                    handler,
                }],
            },
        );
        opts.disallowed_tools.push(BUILTIN_ASK_USER_TOOL.to_string());
    }

    opts
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ask_user_stub() -> HostToolHandler {
        Arc::new(|input| {
            Box::pin(async move {
                format!("answered: {}", input["question"].as_str().unwrap_or(""))
            })
        })
    }

    #[test]
    fn plan_mode_allows_only_read_only_tools() {
        let opts = session_options(SessionMode::Plan, Path::new("/tmp/p"), "m1", None, None);
        let tools = opts.allowed_tools.expect("plan mode must restrict tools");
        for forbidden in ["Write", "Edit", "Bash", "NotebookEdit"] {
            assert!(!tools.iter().any(|t| t == forbidden), "{forbidden} leaked");
        }
        assert!(tools.iter().any(|t| t == "ExitPlanMode"));
        assert!(tools.iter().any(|t| t == "Read"));
        assert!(!tools.iter().any(|t| t == ASK_USER_TOOL));
    }

    #[test]
    fn build_mode_allows_everything() {
        let opts = session_options(SessionMode::Build, Path::new("/tmp/p"), "m1", None, None);
        assert!(opts.allowed_tools.is_none());
        assert!(opts.disallowed_tools.is_empty());
    }

    #[test]
    fn playwright_server_is_always_registered() {
        for mode in [SessionMode::Plan, SessionMode::Build] {
            let opts = session_options(mode, Path::new("/tmp/p"), "m1", None, None);
            let Some(McpTransport::Stdio { command, args, .. }) =
                opts.mcp_servers.get("playwright")
            else {
                panic!("playwright must be a stdio server");
            };
            assert_eq!(command, "npx");
            assert_eq!(args, &["@playwright/mcp@latest", "--headless"]);
        }
    }

    #[test]
    fn ask_user_registers_host_server_and_denies_builtin() {
        let opts = session_options(
            SessionMode::Plan,
            Path::new("/tmp/p"),
            "m1",
            None,
            Some(ask_user_stub()),
        );
        let tools = opts.allowed_tools.as_ref().unwrap();
        assert!(tools.iter().any(|t| t == ASK_USER_TOOL));
        assert!(opts
            .disallowed_tools
            .iter()
            .any(|t| t == BUILTIN_ASK_USER_TOOL));
        assert!(opts.mcp_servers.contains_key(HOST_MCP_SERVER));
    }

    #[tokio::test]
    async fn registered_ask_user_handler_is_invocable() {
        let opts = session_options(
            SessionMode::Build,
            Path::new("/tmp/p"),
            "m1",
            None,
            Some(ask_user_stub()),
        );
        let tool = opts.host_tool("ask_user").expect("host tool registered");
        let answer = (tool.handler)(serde_json::json!({"question": "deploy?"})).await;
        assert_eq!(answer, "answered: deploy?");
    }

    #[test]
    fn overflow_policy_is_skip_with_ten_mib_budget() {
        let opts = session_options(SessionMode::Build, Path::new("/tmp/p"), "m1", None, None);
        assert_eq!(opts.max_buffer_size, 10 * 1024 * 1024);
        assert_eq!(opts.overflow_behavior, OverflowBehavior::SkipMessage);
        assert!(opts.on_overflow.is_some());
    }

    #[test]
    fn system_prompt_passes_through() {
        let opts = session_options(
            SessionMode::Build,
            Path::new("/tmp/p"),
            "m1",
            Some("be brief".into()),
            None,
        );
        assert_eq!(opts.system_prompt.as_deref(), Some("be brief"));
    }
}
