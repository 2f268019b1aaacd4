use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::Result;

/// Engine configuration, loaded from `homespun.yaml`. Every field has a
/// default; a missing file means a default config.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Absolute path to the `claude` binary. Unset means discovery
    /// (PATH, then `~/.local/bin`).
    #[serde(default)]
    pub cli_path: Option<PathBuf>,

    /// Durable session metadata file.
    #[serde(default = "default_metadata_path")]
    pub metadata_path: PathBuf,

    /// Root of the CLI's transcript tree. Unset means `$HOME/.claude`.
    #[serde(default)]
    pub transcripts_root: Option<PathBuf>,

    /// Upper bound on any single response wait.
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
}

fn default_metadata_path() -> PathBuf {
    PathBuf::from(".homespun/sessions.json")
}

fn default_request_timeout_secs() -> u64 {
    30 * 60
}

impl Default for EngineConfig {
    fn default() -> Self {
        EngineConfig {
            cli_path: None,
            metadata_path: default_metadata_path(),
            transcripts_root: None,
            request_timeout_secs: default_request_timeout_secs(),
        }
    }
}

impl EngineConfig {
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let raw = std::fs::read_to_string(path)?;
        Ok(serde_yaml::from_str(&raw)?)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn missing_file_is_default_config() {
        let dir = TempDir::new().unwrap();
        let config = EngineConfig::load(&dir.path().join("homespun.yaml")).unwrap();
        assert!(config.cli_path.is_none());
        assert_eq!(config.request_timeout_secs, 1800);
        assert_eq!(config.metadata_path, PathBuf::from(".homespun/sessions.json"));
    }

    #[test]
    fn partial_yaml_fills_defaults() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("homespun.yaml");
        std::fs::write(&path, "request_timeout_secs: 90\n").unwrap();
        let config = EngineConfig::load(&path).unwrap();
        assert_eq!(config.request_timeout(), Duration::from_secs(90));
        assert!(config.transcripts_root.is_none());
    }

    #[test]
    fn malformed_yaml_is_an_error() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("homespun.yaml");
        std::fs::write(&path, "cli_path: [not, a, path").unwrap();
        assert!(EngineConfig::load(&path).is_err());
    }
}
