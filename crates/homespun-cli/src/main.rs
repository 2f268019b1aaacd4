use std::path::PathBuf;

use anyhow::Context;
use clap::{Parser, Subcommand, ValueEnum};
use claude_client::{ContentBlock, Message};
use homespun_core::{
    EngineConfig, SessionEvent, SessionManager, SessionMode, StartSession, TranscriptCatalog,
};

#[derive(Parser)]
#[command(name = "homespun", about = "Agent session orchestration", version)]
struct Cli {
    /// Engine config file
    #[arg(long, global = true, env = "HOMESPUN_CONFIG", default_value = "homespun.yaml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a one-shot session to completion, streaming output
    Run {
        /// Working directory for the agent
        #[arg(long, default_value = ".")]
        cwd: PathBuf,

        #[arg(long, value_enum, default_value = "build")]
        mode: ModeArg,

        #[arg(long, default_value = "claude-sonnet-4-6")]
        model: String,

        #[arg(long)]
        system_prompt: Option<String>,

        /// Logical entity owning the session
        #[arg(long, default_value = "cli")]
        entity: String,

        #[arg(long, default_value = "default")]
        project: String,

        /// The prompt the agent acts on
        prompt: String,
    },

    /// List transcripts discovered for a working directory
    Transcripts {
        #[arg(long, default_value = ".")]
        cwd: PathBuf,
    },
}

#[derive(Clone, Copy, ValueEnum)]
enum ModeArg {
    Plan,
    Build,
}

impl From<ModeArg> for SessionMode {
    fn from(mode: ModeArg) -> Self {
        match mode {
            ModeArg::Plan => SessionMode::Plan,
            ModeArg::Build => SessionMode::Build,
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing::Level::WARN.into()),
        )
        .with_target(false)
        .init();

    let config = EngineConfig::load(&cli.config)
        .with_context(|| format!("loading {}", cli.config.display()))?;

    match cli.command {
        Commands::Run {
            cwd,
            mode,
            model,
            system_prompt,
            entity,
            project,
            prompt,
        } => run(config, cwd, mode.into(), model, system_prompt, entity, project, prompt).await,
        Commands::Transcripts { cwd } => transcripts(config, cwd).await,
    }
}

#[allow(clippy::too_many_arguments)]
async fn run(
    config: EngineConfig,
    cwd: PathBuf,
    mode: SessionMode,
    model: String,
    system_prompt: Option<String>,
    entity: String,
    project: String,
    prompt: String,
) -> anyhow::Result<()> {
    let cwd = std::fs::canonicalize(&cwd).unwrap_or(cwd);
    let manager = SessionManager::new(config).context("starting session engine")?;
    let mut events = manager.subscribe();

    let session_id = manager
        .start(StartSession {
            entity_id: entity,
            project_id: project,
            working_directory: cwd,
            mode,
            model,
            prompt,
            system_prompt,
            ask_user: None,
        })
        .await?;
    tracing::info!(%session_id, "session started");

    loop {
        match events.recv().await {
            Ok(SessionEvent::Message { message, .. }) => print_message(&message),
            Ok(SessionEvent::Completed {
                conversation_id,
                is_error,
                ..
            }) => {
                manager.stop(&session_id).await;
                if is_error {
                    anyhow::bail!("run failed (conversation {conversation_id})");
                }
                println!("\n[conversation {conversation_id}]");
                return Ok(());
            }
            Ok(SessionEvent::Error { message, code, .. }) => {
                manager.stop(&session_id).await;
                anyhow::bail!("{code}: {message}");
            }
            Err(e) => anyhow::bail!("event stream closed: {e}"),
        }
    }
}

fn print_message(message: &Message) {
    let Message::Assistant(chat) = message else {
        return;
    };
    for block in &chat.message.content {
        match block {
            ContentBlock::Text { text } => println!("{text}"),
            ContentBlock::ToolUse { name, .. } => println!("[tool: {name}]"),
            ContentBlock::Thinking { .. } | ContentBlock::ToolResult { .. } => {}
        }
    }
}

async fn transcripts(config: EngineConfig, cwd: PathBuf) -> anyhow::Result<()> {
    let cwd = std::fs::canonicalize(&cwd).unwrap_or(cwd);
    let catalog = match &config.transcripts_root {
        Some(root) => TranscriptCatalog::new(root),
        None => TranscriptCatalog::with_default_root()?,
    };

    let sessions = catalog
        .discover_sessions(&cwd.to_string_lossy())
        .await
        .context("listing transcripts")?;
    if sessions.is_empty() {
        println!("no transcripts for {}", cwd.display());
        return Ok(());
    }

    for info in sessions {
        let count = catalog
            .message_count(&info.session_id, &cwd.to_string_lossy())
            .await?
            .unwrap_or(0);
        println!(
            "{}  {}  {:>8} bytes  {:>5} messages",
            info.last_modified.format("%Y-%m-%d %H:%M:%S"),
            info.session_id,
            info.file_size,
            count
        );
    }
    Ok(())
}
