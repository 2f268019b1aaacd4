use std::collections::VecDeque;
use std::path::Path;
use std::process::Stdio;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::io::{AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::process::{Child, ChildStderr, ChildStdin, ChildStdout, Command};
use tokio::sync::mpsc;

use crate::options::{McpTransport, OverflowBehavior, OverflowCallback, SessionOptions};
use crate::types::{parse_line, Message};
use crate::{ClaudeClientError, Result};

/// How long `close` waits for the child after dropping stdin.
const SHUTDOWN_GRACE: Duration = Duration::from_secs(5);

/// Stderr lines retained for inclusion in exit errors.
const STDERR_TAIL_LINES: usize = 64;

const INCOMING_CAPACITY: usize = 256;

// ─── SubprocessTransport ──────────────────────────────────────────────────

/// A running Claude CLI subprocess speaking line-delimited JSON over stdio.
///
/// A background task parses stdout into typed [`Message`]s on a bounded
/// channel; a second task collects stderr into a tail ring for exit errors.
/// Writes are serialized by the stdin mutex. The child is spawned with
/// `kill_on_drop`, so cancellation cannot leak the process.
pub struct SubprocessTransport {
    child: Arc<tokio::sync::Mutex<Option<Child>>>,
    stdin: tokio::sync::Mutex<Option<ChildStdin>>,
    incoming: std::sync::Mutex<Option<mpsc::Receiver<Result<Message>>>>,
    stderr_tail: Arc<std::sync::Mutex<VecDeque<String>>>,
    closed: Arc<AtomicBool>,
}

impl SubprocessTransport {
    /// Spawn the CLI at `cli_path` with the given session options.
    pub fn spawn(options: &SessionOptions, cli_path: &Path) -> Result<Self> {
        Self::from_command(build_command(options, cli_path), options)
    }

    /// Spawn an arbitrary command as a mock CLI. Used in tests to inject a
    /// process that emits fixed JSON lines or records stdin.
    #[cfg(test)]
    pub(crate) fn spawn_command(cmd: Command, options: &SessionOptions) -> Result<Self> {
        Self::from_command(cmd, options)
    }

    fn from_command(mut cmd: Command, options: &SessionOptions) -> Result<Self> {
        cmd.stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let mut child = cmd.spawn()?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| std::io::Error::other("stdout not captured"))?;
        let stderr = child
            .stderr
            .take()
            .ok_or_else(|| std::io::Error::other("stderr not captured"))?;
        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| std::io::Error::other("stdin not captured"))?;

        let stderr_tail = Arc::new(std::sync::Mutex::new(VecDeque::new()));
        let stderr_task = tokio::spawn(collect_stderr(stderr, stderr_tail.clone()));

        let child = Arc::new(tokio::sync::Mutex::new(Some(child)));
        let (tx, rx) = mpsc::channel(INCOMING_CAPACITY);
        tokio::spawn(read_loop(
            stdout,
            tx,
            options.max_buffer_size,
            options.overflow_behavior,
            options.on_overflow.clone(),
            child.clone(),
            stderr_tail.clone(),
            stderr_task,
        ));

        Ok(SubprocessTransport {
            child,
            stdin: tokio::sync::Mutex::new(Some(stdin)),
            incoming: std::sync::Mutex::new(Some(rx)),
            stderr_tail,
            closed: Arc::new(AtomicBool::new(false)),
        })
    }

    /// Take the incoming message channel. Yields `None` after the first call;
    /// there is exactly one consumer per transport.
    pub fn take_incoming(&self) -> Option<mpsc::Receiver<Result<Message>>> {
        self.incoming.lock().expect("incoming lock poisoned").take()
    }

    /// Write one line to the child's stdin, appending the newline. Writes
    /// are totally ordered; callers racing here queue on the stdin mutex.
    pub async fn write_line(&self, line: &str) -> Result<()> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(ClaudeClientError::TransportClosed);
        }
        let mut guard = self.stdin.lock().await;
        let stdin = guard.as_mut().ok_or(ClaudeClientError::TransportClosed)?;
        stdin.write_all(line.as_bytes()).await?;
        stdin.write_all(b"\n").await?;
        stdin.flush().await?;
        Ok(())
    }

    /// True iff the child is alive and stdin has not been closed.
    pub async fn is_ready(&self) -> bool {
        if self.closed.load(Ordering::SeqCst) {
            return false;
        }
        if self.stdin.lock().await.is_none() {
            return false;
        }
        match self.child.lock().await.as_mut() {
            Some(child) => matches!(child.try_wait(), Ok(None)),
            None => false,
        }
    }

    /// The retained stderr tail, newline-joined.
    pub fn stderr_tail(&self) -> String {
        let ring = self.stderr_tail.lock().expect("stderr lock poisoned");
        ring.iter().cloned().collect::<Vec<_>>().join("\n")
    }

    /// Close stdin, wait up to the grace period for exit, then kill and reap.
    /// Idempotent; subsequent writes fail with `TransportClosed`.
    pub async fn close(&self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        self.stdin.lock().await.take();
        let mut guard = self.child.lock().await;
        if let Some(child) = guard.as_mut() {
            if tokio::time::timeout(SHUTDOWN_GRACE, child.wait())
                .await
                .is_err()
            {
                tracing::warn!("CLI did not exit within grace period, killing");
                let _ = child.kill().await;
            }
        }
        *guard = None;
    }
}

// ─── Read loop ────────────────────────────────────────────────────────────

#[allow(clippy::too_many_arguments)]
async fn read_loop(
    mut stdout: ChildStdout,
    tx: mpsc::Sender<Result<Message>>,
    limit: usize,
    behavior: OverflowBehavior,
    on_overflow: Option<OverflowCallback>,
    child: Arc<tokio::sync::Mutex<Option<Child>>>,
    stderr_tail: Arc<std::sync::Mutex<VecDeque<String>>>,
    stderr_task: tokio::task::JoinHandle<()>,
) {
    let mut assembler = LineAssembler::new(limit, behavior);
    let mut chunk = [0u8; 8192];
    let mut got_result = false;

    loop {
        let n = match stdout.read(&mut chunk).await {
            Ok(0) => break,
            Ok(n) => n,
            Err(e) => {
                let _ = tx.send(Err(e.into())).await;
                return;
            }
        };

        for outcome in assembler.push(&chunk[..n]) {
            if !deliver(outcome, &tx, limit, &on_overflow, &mut got_result).await {
                // Receiver dropped or the Fail policy tripped; the child is
                // reaped by kill_on_drop / the owning transport.
                return;
            }
        }
    }

    if let Some(outcome) = assembler.finish() {
        if !deliver(outcome, &tx, limit, &on_overflow, &mut got_result).await {
            return;
        }
    }

    // EOF without a terminal result: surface a non-zero exit as CliExit,
    // stderr tail attached (the CLI prints its failure reason there). Wait
    // for the stderr reader to drain its pipe before composing the tail.
    if !got_result {
        let mut guard = child.lock().await;
        if let Some(child) = guard.as_mut() {
            if let Ok(Ok(status)) =
                tokio::time::timeout(Duration::from_secs(1), child.wait()).await
            {
                let code = status.code().unwrap_or(-1);
                if code != 0 {
                    let _ = tokio::time::timeout(Duration::from_secs(1), stderr_task).await;
                    let tail = {
                        let ring = stderr_tail.lock().expect("stderr lock poisoned");
                        ring.iter().cloned().collect::<Vec<_>>().join("\n")
                    };
                    let _ = tx
                        .send(Err(ClaudeClientError::CliExit {
                            exit_code: code,
                            stderr_tail: tail,
                        }))
                        .await;
                }
            }
        }
    }
}

/// Forward one scanner outcome to the channel. Returns false when the loop
/// must stop (receiver gone, or the Fail overflow policy tripped).
async fn deliver(
    outcome: LineOutcome,
    tx: &mpsc::Sender<Result<Message>>,
    limit: usize,
    on_overflow: &Option<OverflowCallback>,
    got_result: &mut bool,
) -> bool {
    let parsed = match outcome {
        LineOutcome::Line(bytes) | LineOutcome::Truncated(bytes) => {
            parse_line(&String::from_utf8_lossy(&bytes))
        }
        LineOutcome::Skipped { observed } => {
            tracing::warn!(observed, limit, "skipping oversized CLI message");
            if let Some(cb) = on_overflow {
                cb("message", observed, limit);
            }
            None
        }
        LineOutcome::Overflowed { observed } => {
            let _ = tx
                .send(Err(ClaudeClientError::BufferOverflow { observed, limit }))
                .await;
            return false;
        }
    };

    if let Some(msg) = parsed {
        if matches!(msg, Message::Result(_)) {
            *got_result = true;
        }
        if tx.send(Ok(msg)).await.is_err() {
            return false; // receiver dropped
        }
    }
    true
}

async fn collect_stderr(stderr: ChildStderr, ring: Arc<std::sync::Mutex<VecDeque<String>>>) {
    let mut lines = BufReader::new(stderr).lines();
    while let Ok(Some(line)) = lines.next_line().await {
        let mut ring = ring.lock().expect("stderr lock poisoned");
        if ring.len() == STDERR_TAIL_LINES {
            ring.pop_front();
        }
        ring.push_back(line);
    }
}

// ─── Line assembly ────────────────────────────────────────────────────────

/// Splits a byte stream into newline-delimited lines under a byte budget.
/// `BufReader::lines` cannot express the overflow policies, hence the manual
/// scanner.
struct LineAssembler {
    limit: usize,
    behavior: OverflowBehavior,
    buf: Vec<u8>,
    /// Bytes seen in the current line, including any discarded past the budget.
    seen: usize,
    overflowed: bool,
}

enum LineOutcome {
    /// A complete line within budget.
    Line(Vec<u8>),
    /// A complete line cut at the budget (Truncate policy).
    Truncated(Vec<u8>),
    /// An oversized line discarded whole (SkipMessage policy).
    Skipped { observed: usize },
    /// The Fail policy tripped; the read loop must terminate.
    Overflowed { observed: usize },
}

impl LineAssembler {
    fn new(limit: usize, behavior: OverflowBehavior) -> Self {
        LineAssembler {
            limit,
            behavior,
            buf: Vec::new(),
            seen: 0,
            overflowed: false,
        }
    }

    fn push(&mut self, chunk: &[u8]) -> Vec<LineOutcome> {
        let mut out = Vec::new();
        let mut rest = chunk;
        loop {
            match rest.iter().position(|&b| b == b'\n') {
                Some(idx) => {
                    if let Some(fail) = self.accept(&rest[..idx]) {
                        out.push(fail);
                        return out;
                    }
                    if self.seen > 0 {
                        out.push(self.complete());
                    }
                    self.reset();
                    rest = &rest[idx + 1..];
                }
                None => {
                    if let Some(fail) = self.accept(rest) {
                        out.push(fail);
                    }
                    return out;
                }
            }
        }
    }

    /// Flush a final unterminated line at EOF.
    fn finish(&mut self) -> Option<LineOutcome> {
        if self.seen == 0 {
            return None;
        }
        let outcome = self.complete();
        self.reset();
        Some(outcome)
    }

    fn accept(&mut self, seg: &[u8]) -> Option<LineOutcome> {
        self.seen += seg.len();
        if self.overflowed {
            return None; // excess bytes of an already-overflowed line
        }
        if self.buf.len() + seg.len() <= self.limit {
            self.buf.extend_from_slice(seg);
            return None;
        }
        self.overflowed = true;
        match self.behavior {
            OverflowBehavior::Fail => Some(LineOutcome::Overflowed {
                observed: self.seen,
            }),
            OverflowBehavior::Truncate => {
                let room = self.limit - self.buf.len();
                self.buf.extend_from_slice(&seg[..room]);
                None
            }
            OverflowBehavior::SkipMessage => {
                self.buf.clear();
                None
            }
        }
    }

    fn complete(&mut self) -> LineOutcome {
        if !self.overflowed {
            return LineOutcome::Line(std::mem::take(&mut self.buf));
        }
        match self.behavior {
            OverflowBehavior::SkipMessage => LineOutcome::Skipped {
                observed: self.seen,
            },
            OverflowBehavior::Truncate => LineOutcome::Truncated(std::mem::take(&mut self.buf)),
            // Fail short-circuits in `accept`
            OverflowBehavior::Fail => unreachable!("fail policy terminates in accept"),
        }
    }

    fn reset(&mut self) {
        self.buf.clear();
        self.seen = 0;
        self.overflowed = false;
    }
}

// ─── Command builder ──────────────────────────────────────────────────────

fn build_command(options: &SessionOptions, cli_path: &Path) -> Command {
    let mut cmd = Command::new(cli_path);

    // Bidirectional streaming mode: user messages arrive on stdin.
    cmd.arg("--print")
        .arg("--input-format")
        .arg("stream-json")
        .arg("--output-format")
        .arg("stream-json")
        .arg("--verbose");

    if let Some(model) = &options.model {
        cmd.arg("--model").arg(model);
    }

    if let Some(tools) = &options.allowed_tools {
        if !tools.is_empty() {
            cmd.arg("--allowed-tools").args(tools);
        }
    }

    if !options.disallowed_tools.is_empty() {
        cmd.arg("--disallowed-tools").args(&options.disallowed_tools);
    }

    if let Some(sp) = &options.system_prompt {
        cmd.arg("--system-prompt").arg(sp);
    }

    if let Some(resume) = &options.resume {
        cmd.arg("--resume").arg(resume);
    }

    if !options.mcp_servers.is_empty() {
        cmd.arg("--mcp-config").arg(build_mcp_config_json(options));
    }

    cmd.current_dir(&options.cwd);
    cmd.envs(&options.env);

    // The CLI requires HOME; guarantee it from the ambient env or the
    // user profile folder.
    if std::env::var_os("HOME").is_none() && !options.env.contains_key("HOME") {
        if let Some(profile) = home::home_dir() {
            cmd.env("HOME", profile);
        }
    }
    cmd.env_remove("CLAUDECODE");

    cmd
}

/// Serialise MCP server entries into the JSON expected by
/// `claude --mcp-config '...'`.
///
/// Stdio entries: `{"type":"stdio","command":"...","args":[...],"env":{...}}`.
/// Host entries: `{"type":"sdk","tools":[...]}`; the CLI routes their tool
/// calls back over the control channel.
fn build_mcp_config_json(options: &SessionOptions) -> String {
    let mut servers = serde_json::Map::new();

    for (name, transport) in &options.mcp_servers {
        let cfg = match transport {
            McpTransport::Stdio { command, args, env } => {
                let mut cfg = serde_json::Map::new();
                cfg.insert("type".into(), "stdio".into());
                cfg.insert("command".into(), command.clone().into());
                if !args.is_empty() {
                    cfg.insert(
                        "args".into(),
                        serde_json::Value::Array(
                            args.iter().map(|a| a.clone().into()).collect(),
                        ),
                    );
                }
                if !env.is_empty() {
                    let env: serde_json::Map<String, serde_json::Value> = env
                        .iter()
                        .map(|(k, v)| (k.clone(), v.clone().into()))
                        .collect();
                    cfg.insert("env".into(), serde_json::Value::Object(env));
                }
                cfg
            }
            McpTransport::Host { tools } => {
                let mut cfg = serde_json::Map::new();
                cfg.insert("type".into(), "sdk".into());
                cfg.insert(
                    "tools".into(),
                    serde_json::Value::Array(
                        tools.iter().map(|t| t.name.clone().into()).collect(),
                    ),
                );
                cfg
            }
        };
        servers.insert(name.clone(), serde_json::Value::Object(cfg));
    }

    serde_json::json!({ "mcpServers": servers }).to_string()
}

// ─── Tests ────────────────────────────────────────────────────────────────
