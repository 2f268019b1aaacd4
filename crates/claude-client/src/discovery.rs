use std::path::{Path, PathBuf};

use crate::{ClaudeClientError, Result};

/// Platform-appropriate executable names, most specific first.
#[cfg(windows)]
const CANDIDATES: &[&str] = &["claude.cmd", "claude.exe", "claude"];
#[cfg(not(windows))]
const CANDIDATES: &[&str] = &["claude"];

/// Locate the Claude CLI executable.
///
/// Search order: a caller-supplied path (used as-is when it exists), then
/// PATH, then `~/.local/bin`. Fails with [`ClaudeClientError::CliNotFound`]
/// when nothing matches. Callers discover once at startup and cache the
/// result.
pub fn discover_cli(override_path: Option<&Path>) -> Result<PathBuf> {
    if let Some(path) = override_path {
        if path.is_file() {
            return Ok(path.to_path_buf());
        }
        tracing::warn!(path = %path.display(), "configured CLI path does not exist, falling back to discovery");
    }

    for name in CANDIDATES {
        if let Ok(found) = which::which(name) {
            return Ok(found);
        }
    }

    if let Some(home) = home::home_dir() {
        let local_bin = home.join(".local").join("bin");
        for name in CANDIDATES {
            let candidate = local_bin.join(name);
            if candidate.is_file() {
                return Ok(candidate);
            }
        }
    }

    Err(ClaudeClientError::CliNotFound)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn override_path_wins_when_it_exists() {
        let mut f = tempfile::NamedTempFile::new().unwrap();
        f.write_all(b"#!/bin/sh\n").unwrap();
        let found = discover_cli(Some(f.path())).unwrap();
        assert_eq!(found, f.path());
    }

    #[test]
    fn missing_override_falls_through_to_search() {
        // The override is bogus; the result depends on whether a real
        // `claude` is installed, but it must never return the bogus path.
        let bogus = Path::new("/nonexistent/claude-bin");
        match discover_cli(Some(bogus)) {
            Ok(found) => assert_ne!(found, bogus),
            Err(ClaudeClientError::CliNotFound) => {}
            Err(e) => panic!("unexpected error: {e}"),
        }
    }
}
