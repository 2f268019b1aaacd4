use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};

use crate::{EngineError, Result};

/// Encode a working directory into the CLI's transcript directory name:
/// every path separator becomes `-`, all other characters (including `:`)
/// survive.
pub fn encode_project_dir(working_directory: &str) -> String {
    working_directory
        .chars()
        .map(|c| if c == '/' || c == '\\' { '-' } else { c })
        .collect()
}

/// A transcript file found on disk for a prior conversation.
#[derive(Debug, Clone, PartialEq)]
pub struct TranscriptInfo {
    pub session_id: String,
    pub file_path: PathBuf,
    pub file_size: u64,
    pub last_modified: DateTime<Utc>,
}

/// Locates `<root>/<encoded cwd>/<session>.jsonl` transcripts the CLI wrote
/// for earlier conversations. Root defaults to `$HOME/.claude`.
pub struct TranscriptCatalog {
    root: PathBuf,
}

impl TranscriptCatalog {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        TranscriptCatalog { root: root.into() }
    }

    pub fn with_default_root() -> Result<Self> {
        let home = home::home_dir().ok_or(EngineError::HomeNotFound)?;
        Ok(Self::new(home.join(".claude")))
    }

    fn project_dir(&self, working_directory: &str) -> PathBuf {
        self.root.join(encode_project_dir(working_directory))
    }

    /// List transcripts for a working directory, newest first (ties broken
    /// by session id for determinism). An absent directory is simply empty.
    pub async fn discover_sessions(&self, working_directory: &str) -> Result<Vec<TranscriptInfo>> {
        let dir = self.project_dir(working_directory);
        if !dir.is_dir() {
            return Ok(Vec::new());
        }

        let mut sessions = Vec::new();
        let mut entries = tokio::fs::read_dir(&dir).await?;
        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some("jsonl") {
                continue;
            }
            let Some(session_id) = path.file_stem().and_then(|s| s.to_str()) else {
                continue;
            };
            let meta = entry.metadata().await?;
            if !meta.is_file() {
                continue;
            }
            let modified = meta.modified().unwrap_or(std::time::UNIX_EPOCH);
            sessions.push(TranscriptInfo {
                session_id: session_id.to_string(),
                file_path: path.clone(),
                file_size: meta.len(),
                last_modified: DateTime::<Utc>::from(modified),
            });
        }

        sessions.sort_by(|a, b| {
            b.last_modified
                .cmp(&a.last_modified)
                .then_with(|| a.session_id.cmp(&b.session_id))
        });
        Ok(sessions)
    }

    /// Path to a transcript, or `None` when no such file exists.
    pub fn session_file_path(&self, session_id: &str, working_directory: &str) -> Option<PathBuf> {
        let path = self
            .project_dir(working_directory)
            .join(format!("{session_id}.jsonl"));
        path.is_file().then_some(path)
    }

    pub fn session_exists(&self, session_id: &str, working_directory: &str) -> bool {
        self.session_file_path(session_id, working_directory)
            .is_some()
    }

    /// Number of messages in a transcript (one JSON object per line).
    /// `Ok(None)` when the transcript does not exist.
    pub async fn message_count(
        &self,
        session_id: &str,
        working_directory: &str,
    ) -> Result<Option<usize>> {
        let Some(path) = self.session_file_path(session_id, working_directory) else {
            return Ok(None);
        };
        let content = tokio::fs::read_to_string(&path).await?;
        Ok(Some(content.lines().count()))
    }
}
