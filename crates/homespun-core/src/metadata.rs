use std::collections::HashMap;
use std::io::Write;
use std::path::{Path, PathBuf};

use tokio::sync::Mutex;

use crate::session::SessionMetadata;
use crate::Result;

/// File-backed map of session id → durable metadata.
///
/// The whole file (a JSON array of records) is loaded eagerly on
/// construction and rewritten atomically after every mutation. A missing or
/// corrupt file degrades to an empty store with a warning; losing session
/// descriptors must never take the process down.
///
/// All operations serialize on one async mutex; readers get clones.
pub struct MetadataStore {
    path: PathBuf,
    state: Mutex<HashMap<String, SessionMetadata>>,
}

impl MetadataStore {
    pub fn load(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let state = match std::fs::read(&path) {
            Ok(bytes) => match serde_json::from_slice::<Vec<SessionMetadata>>(&bytes) {
                Ok(records) => records
                    .into_iter()
                    .map(|m| (m.session_id.clone(), m))
                    .collect(),
                Err(e) => {
                    tracing::warn!(
                        path = %path.display(),
                        error = %e,
                        "session metadata file is corrupt, starting empty"
                    );
                    HashMap::new()
                }
            },
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => HashMap::new(),
            Err(e) => {
                tracing::warn!(
                    path = %path.display(),
                    error = %e,
                    "cannot read session metadata file, starting empty"
                );
                HashMap::new()
            }
        };
        MetadataStore {
            path,
            state: Mutex::new(state),
        }
    }

    /// Insert or replace by session id, then rewrite the file.
    pub async fn save(&self, metadata: SessionMetadata) -> Result<()> {
        let mut state = self.state.lock().await;
        state.insert(metadata.session_id.clone(), metadata);
        self.persist(&state).await
    }

    /// Remove a record. Returns whether it existed; only an actual removal
    /// rewrites the file.
    pub async fn remove(&self, session_id: &str) -> Result<bool> {
        let mut state = self.state.lock().await;
        if state.remove(session_id).is_none() {
            return Ok(false);
        }
        self.persist(&state).await?;
        Ok(true)
    }

    pub async fn get_by_session_id(&self, session_id: &str) -> Option<SessionMetadata> {
        self.state.lock().await.get(session_id).cloned()
    }

    pub async fn get_by_entity_id(&self, entity_id: &str) -> Vec<SessionMetadata> {
        self.state
            .lock()
            .await
            .values()
            .filter(|m| m.entity_id == entity_id)
            .cloned()
            .collect()
    }

    pub async fn get_all(&self) -> Vec<SessionMetadata> {
        let mut all: Vec<SessionMetadata> = self.state.lock().await.values().cloned().collect();
        all.sort_by(|a, b| a.session_id.cmp(&b.session_id));
        all
    }

    async fn persist(&self, state: &HashMap<String, SessionMetadata>) -> Result<()> {
        let mut records: Vec<&SessionMetadata> = state.values().collect();
        records.sort_by(|a, b| a.session_id.cmp(&b.session_id));
        let bytes = serde_json::to_vec_pretty(&records)?;
        let path = self.path.clone();
        tokio::task::spawn_blocking(move || atomic_write(&path, &bytes))
            .await
            .map_err(std::io::Error::other)??;
        Ok(())
    }
}

/// Write via a tempfile in the target directory, then rename into place.
/// A crash mid-write leaves the previous file intact.
fn atomic_write(path: &Path, data: &[u8]) -> std::io::Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let dir = path.parent().unwrap_or(Path::new("."));
    let mut tmp = tempfile::NamedTempFile::new_in(dir)?;
    tmp.write_all(data)?;
    tmp.persist(path).map_err(|e| e.error)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::{SessionMode, SessionRecord};
    use tempfile::TempDir;

    fn metadata(session_id: &str, entity_id: &str) -> SessionMetadata {
        SessionRecord::new(session_id, entity_id, "p1", "/tmp/p", SessionMode::Build, "m1")
            .metadata(None)
    }

    #[tokio::test]
    async fn save_then_fresh_load_round_trips_every_field() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("sessions.json");

        let md = SessionRecord::new("s1", "e1", "p1", "/work/repo", SessionMode::Plan, "m1")
            .metadata(Some("be careful".into()));
        MetadataStore::load(&path).save(md.clone()).await.unwrap();

        let reopened = MetadataStore::load(&path);
        assert_eq!(reopened.get_by_session_id("s1").await, Some(md));
    }

    #[tokio::test]
    async fn corrupt_file_degrades_to_empty_and_recovers_on_save() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("sessions.json");
        std::fs::write(&path, "{ invalid").unwrap();

        let store = MetadataStore::load(&path);
        assert!(store.get_all().await.is_empty());

        store.save(metadata("s1", "e1")).await.unwrap();
        let reopened = MetadataStore::load(&path);
        assert_eq!(reopened.get_all().await.len(), 1);
    }

    #[tokio::test]
    async fn missing_file_starts_empty_without_warning_noise() {
        let dir = TempDir::new().unwrap();
        let store = MetadataStore::load(dir.path().join("absent.json"));
        assert!(store.get_all().await.is_empty());
        assert!(store.get_by_session_id("s").await.is_none());
    }

    #[tokio::test]
    async fn save_replaces_by_session_id() {
        let dir = TempDir::new().unwrap();
        let store = MetadataStore::load(dir.path().join("sessions.json"));
        store.save(metadata("s1", "e1")).await.unwrap();
        store.save(metadata("s1", "e2")).await.unwrap();

        let all = store.get_all().await;
        assert_eq!(all.len(), 1);
        assert_eq!(all[0].entity_id, "e2");
    }

    #[tokio::test]
    async fn remove_reports_existence_and_persists() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("sessions.json");
        let store = MetadataStore::load(&path);
        store.save(metadata("s1", "e1")).await.unwrap();

        assert!(store.remove("s1").await.unwrap());
        assert!(!store.remove("s1").await.unwrap());
        assert!(MetadataStore::load(&path).get_all().await.is_empty());
    }

    #[tokio::test]
    async fn entity_lookup_filters_records() {
        let dir = TempDir::new().unwrap();
        let store = MetadataStore::load(dir.path().join("sessions.json"));
        store.save(metadata("s1", "e1")).await.unwrap();
        store.save(metadata("s2", "e1")).await.unwrap();
        store.save(metadata("s3", "e2")).await.unwrap();

        assert_eq!(store.get_by_entity_id("e1").await.len(), 2);
        assert_eq!(store.get_by_entity_id("e2").await.len(), 1);
        assert!(store.get_by_entity_id("ghost").await.is_empty());
    }

    #[tokio::test]
    async fn file_is_a_sorted_json_array() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("sessions.json");
        let store = MetadataStore::load(&path);
        store.save(metadata("s2", "e1")).await.unwrap();
        store.save(metadata("s1", "e1")).await.unwrap();

        let raw = std::fs::read_to_string(&path).unwrap();
        let parsed: Vec<SessionMetadata> = serde_json::from_str(&raw).unwrap();
        assert_eq!(parsed.len(), 2);
        assert_eq!(parsed[0].session_id, "s1");
        assert_eq!(parsed[1].session_id, "s2");
    }
}
