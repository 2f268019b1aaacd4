use std::collections::HashMap;
use std::sync::RwLock;

use crate::session::SessionRecord;

#[derive(Default)]
struct Indexes {
    by_id: HashMap<String, SessionRecord>,
    /// entity id → session id; unique, last write wins.
    by_entity: HashMap<String, String>,
    /// project id → session ids; non-unique.
    by_project: HashMap<String, Vec<String>>,
}

/// In-memory catalog of live sessions, indexed by id, entity, and project.
///
/// Mutations are mutually exclusive under the writer lock; readers get
/// snapshot clones of committed state.
#[derive(Default)]
pub struct SessionIndex {
    inner: RwLock<Indexes>,
}

impl SessionIndex {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or overwrite by session id, refreshing secondary indexes.
    pub fn add(&self, record: SessionRecord) {
        let mut inner = self.inner.write().expect("session index poisoned");
        if let Some(old) = inner.by_id.remove(&record.id) {
            unindex(&mut inner, &old);
        }
        index(&mut inner, &record);
        inner.by_id.insert(record.id.clone(), record);
    }

    /// Mutate the record in place. Returns false when the id is unknown.
    pub fn update<F>(&self, id: &str, mutate: F) -> bool
    where
        F: FnOnce(&mut SessionRecord),
    {
        let mut inner = self.inner.write().expect("session index poisoned");
        let Some(mut record) = inner.by_id.remove(id) else {
            return false;
        };
        unindex(&mut inner, &record);
        mutate(&mut record);
        index(&mut inner, &record);
        inner.by_id.insert(record.id.clone(), record);
        true
    }

    pub fn remove(&self, id: &str) -> bool {
        let mut inner = self.inner.write().expect("session index poisoned");
        match inner.by_id.remove(id) {
            Some(record) => {
                unindex(&mut inner, &record);
                true
            }
            None => false,
        }
    }

    pub fn get_by_id(&self, id: &str) -> Option<SessionRecord> {
        self.inner
            .read()
            .expect("session index poisoned")
            .by_id
            .get(id)
            .cloned()
    }

    pub fn get_by_entity_id(&self, entity_id: &str) -> Option<SessionRecord> {
        let inner = self.inner.read().expect("session index poisoned");
        let id = inner.by_entity.get(entity_id)?;
        inner.by_id.get(id).cloned()
    }

    pub fn get_by_project_id(&self, project_id: &str) -> Vec<SessionRecord> {
        let inner = self.inner.read().expect("session index poisoned");
        inner
            .by_project
            .get(project_id)
            .map(|ids| ids.iter().filter_map(|id| inner.by_id.get(id).cloned()).collect())
            .unwrap_or_default()
    }

    /// Snapshot copy of every live session.
    pub fn all(&self) -> Vec<SessionRecord> {
        self.inner
            .read()
            .expect("session index poisoned")
            .by_id
            .values()
            .cloned()
            .collect()
    }
}

fn index(inner: &mut Indexes, record: &SessionRecord) {
    inner
        .by_entity
        .insert(record.entity_id.clone(), record.id.clone());
    inner
        .by_project
        .entry(record.project_id.clone())
        .or_default()
        .push(record.id.clone());
}

fn unindex(inner: &mut Indexes, record: &SessionRecord) {
    if inner.by_entity.get(&record.entity_id) == Some(&record.id) {
        inner.by_entity.remove(&record.entity_id);
    }
    if let Some(ids) = inner.by_project.get_mut(&record.project_id) {
        ids.retain(|id| id != &record.id);
        if ids.is_empty() {
            inner.by_project.remove(&record.project_id);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::{SessionMode, SessionStatus};

    fn record(id: &str, entity: &str, project: &str) -> SessionRecord {
        SessionRecord::new(id, entity, project, "/tmp/p", SessionMode::Build, "m1")
    }

    #[test]
    fn add_and_lookup_by_all_keys() {
        let index = SessionIndex::new();
        index.add(record("s1", "e1", "p1"));
        index.add(record("s2", "e2", "p1"));

        assert_eq!(index.get_by_id("s1").unwrap().entity_id, "e1");
        assert_eq!(index.get_by_entity_id("e2").unwrap().id, "s2");
        let mut project: Vec<String> = index
            .get_by_project_id("p1")
            .into_iter()
            .map(|r| r.id)
            .collect();
        project.sort();
        assert_eq!(project, vec!["s1", "s2"]);
        assert_eq!(index.all().len(), 2);
    }

    #[test]
    fn duplicate_add_overwrites() {
        let index = SessionIndex::new();
        index.add(record("s1", "e1", "p1"));
        index.add(record("s1", "e9", "p9"));

        assert_eq!(index.all().len(), 1);
        assert_eq!(index.get_by_id("s1").unwrap().entity_id, "e9");
        // Stale secondary entries are gone.
        assert!(index.get_by_entity_id("e1").is_none());
        assert!(index.get_by_project_id("p1").is_empty());
        assert_eq!(index.get_by_project_id("p9").len(), 1);
    }

    #[test]
    fn entity_index_is_last_write_wins() {
        let index = SessionIndex::new();
        index.add(record("s1", "shared", "p1"));
        index.add(record("s2", "shared", "p1"));
        assert_eq!(index.get_by_entity_id("shared").unwrap().id, "s2");
    }

    #[test]
    fn remove_cleans_every_index() {
        let index = SessionIndex::new();
        index.add(record("s1", "e1", "p1"));
        assert!(index.remove("s1"));
        assert!(!index.remove("s1"));
        assert!(index.get_by_id("s1").is_none());
        assert!(index.get_by_entity_id("e1").is_none());
        assert!(index.get_by_project_id("p1").is_empty());
    }

    #[test]
    fn update_mutates_in_place() {
        let index = SessionIndex::new();
        index.add(record("s1", "e1", "p1"));
        assert!(index.update("s1", |r| {
            r.status = SessionStatus::Running;
            r.conversation_id = Some("c1".into());
        }));
        let r = index.get_by_id("s1").unwrap();
        assert_eq!(r.status, SessionStatus::Running);
        assert_eq!(r.conversation_id.as_deref(), Some("c1"));
        assert!(!index.update("ghost", |_| {}));
    }

    #[test]
    fn snapshots_do_not_alias_the_store() {
        let index = SessionIndex::new();
        index.add(record("s1", "e1", "p1"));
        let mut snapshot = index.get_by_id("s1").unwrap();
        snapshot.status = SessionStatus::Stopped;
        assert_eq!(
            index.get_by_id("s1").unwrap().status,
            SessionStatus::Starting
        );
    }
}
