use std::collections::HashMap;
use std::sync::Mutex;

use tokio::sync::broadcast;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StartupState {
    Starting,
    Started,
    Failed,
}

/// Emitted on every successful state transition; collisions stay silent.
#[derive(Debug, Clone)]
pub struct StartupChange {
    pub entity_id: String,
    pub state: StartupState,
    pub error: Option<String>,
}

#[derive(Debug)]
struct Entry {
    state: StartupState,
    error: Option<String>,
}

/// Single-flight guard on session startup per entity.
///
/// `try_mark_as_starting` admits exactly one caller until `clear`; marking
/// started or failed keeps the entry in place, so retry after failure is an
/// explicit `clear` + retry, never accidental.
pub struct StartupTracker {
    entries: Mutex<HashMap<String, Entry>>,
    tx: broadcast::Sender<StartupChange>,
}

impl Default for StartupTracker {
    fn default() -> Self {
        Self::new()
    }
}

impl StartupTracker {
    pub fn new() -> Self {
        let (tx, _) = broadcast::channel(64);
        StartupTracker {
            entries: Mutex::new(HashMap::new()),
            tx,
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<StartupChange> {
        self.tx.subscribe()
    }

    /// Atomically claim startup for an entity. Returns false (and emits
    /// nothing) when any entry already exists, whatever its state.
    pub fn try_mark_as_starting(&self, entity_id: &str) -> bool {
        let mut entries = self.entries.lock().expect("startup lock poisoned");
        if entries.contains_key(entity_id) {
            return false;
        }
        entries.insert(
            entity_id.to_string(),
            Entry {
                state: StartupState::Starting,
                error: None,
            },
        );
        self.emit(entity_id, StartupState::Starting, None);
        true
    }

    /// Transition an existing entry to Started. Returns false when the
    /// entity was never marked as starting.
    pub fn mark_as_started(&self, entity_id: &str) -> bool {
        self.transition(entity_id, StartupState::Started, None)
    }

    pub fn mark_as_failed(&self, entity_id: &str, error: &str) -> bool {
        self.transition(entity_id, StartupState::Failed, Some(error.to_string()))
    }

    pub fn is_starting(&self, entity_id: &str) -> bool {
        self.entries
            .lock()
            .expect("startup lock poisoned")
            .get(entity_id)
            .is_some_and(|e| e.state == StartupState::Starting)
    }

    /// Remove the entry; the next `try_mark_as_starting` will succeed.
    pub fn clear(&self, entity_id: &str) {
        self.entries
            .lock()
            .expect("startup lock poisoned")
            .remove(entity_id);
    }

    fn transition(&self, entity_id: &str, state: StartupState, error: Option<String>) -> bool {
        let mut entries = self.entries.lock().expect("startup lock poisoned");
        let Some(entry) = entries.get_mut(entity_id) else {
            tracing::warn!(entity_id, ?state, "startup transition for unknown entity");
            return false;
        };
        entry.state = state;
        entry.error = error.clone();
        self.emit(entity_id, state, error);
        true
    }

    fn emit(&self, entity_id: &str, state: StartupState, error: Option<String>) {
        let _ = self.tx.send(StartupChange {
            entity_id: entity_id.to_string(),
            state,
            error,
        });
    }
}
