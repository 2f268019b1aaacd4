use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// What the session's agent is allowed to do.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionMode {
    /// Read-only: the agent may inspect but not mutate.
    Plan,
    /// Unrestricted tool access.
    Build,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionStatus {
    Starting,
    Running,
    Stopping,
    Stopped,
    Errored,
}

/// A live session as the engine tracks it. `id` is engine-assigned;
/// `conversation_id` is assigned by the CLI on the first result message and
/// from then on serves as the resume token.
#[derive(Debug, Clone)]
pub struct SessionRecord {
    pub id: String,
    pub entity_id: String,
    pub project_id: String,
    pub mode: SessionMode,
    pub working_directory: PathBuf,
    pub model: String,
    pub status: SessionStatus,
    pub created_at: DateTime<Utc>,
    pub conversation_id: Option<String>,
}

impl SessionRecord {
    pub fn new(
        id: impl Into<String>,
        entity_id: impl Into<String>,
        project_id: impl Into<String>,
        working_directory: impl Into<PathBuf>,
        mode: SessionMode,
        model: impl Into<String>,
    ) -> Self {
        SessionRecord {
            id: id.into(),
            entity_id: entity_id.into(),
            project_id: project_id.into(),
            mode,
            working_directory: working_directory.into(),
            model: model.into(),
            status: SessionStatus::Starting,
            created_at: Utc::now(),
            conversation_id: None,
        }
    }

    /// The durable subset persisted across restarts: no status, no
    /// conversation id.
    pub fn metadata(&self, system_prompt: Option<String>) -> SessionMetadata {
        SessionMetadata {
            session_id: self.id.clone(),
            entity_id: self.entity_id.clone(),
            project_id: self.project_id.clone(),
            working_directory: self.working_directory.clone(),
            mode: self.mode,
            model: self.model.clone(),
            system_prompt,
            created_at: self.created_at,
        }
    }
}

/// Durable session descriptor, one array element in the metadata file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionMetadata {
    pub session_id: String,
    pub entity_id: String,
    pub project_id: String,
    pub working_directory: PathBuf,
    pub mode: SessionMode,
    pub model: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub system_prompt: Option<String>,
    pub created_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_record_starts_in_starting_without_conversation() {
        let r = SessionRecord::new("s1", "e1", "p1", "/tmp/p", SessionMode::Build, "m1");
        assert_eq!(r.status, SessionStatus::Starting);
        assert!(r.conversation_id.is_none());
    }

    #[test]
    fn metadata_drops_status_and_conversation() {
        let mut r = SessionRecord::new("s1", "e1", "p1", "/tmp/p", SessionMode::Plan, "m1");
        r.status = SessionStatus::Running;
        r.conversation_id = Some("c1".into());
        let md = r.metadata(Some("be brief".into()));
        assert_eq!(md.session_id, "s1");
        assert_eq!(md.mode, SessionMode::Plan);
        assert_eq!(md.system_prompt.as_deref(), Some("be brief"));
        let json = serde_json::to_string(&md).unwrap();
        assert!(!json.contains("conversation_id"));
        assert!(!json.contains("status"));
    }

    #[test]
    fn mode_serializes_snake_case() {
        assert_eq!(
            serde_json::to_string(&SessionMode::Plan).unwrap(),
            r#""plan""#
        );
        assert_eq!(
            serde_json::to_string(&SessionStatus::Errored).unwrap(),
            r#""errored""#
        );
    }
}
