//! Config store contract and the desired-state adapter
//!
//! The store is an external collaborator: a session-scoped key-value object.
//! Writes are merges at the top level of a mapping, so a single effect can be
//! added or removed without rewriting the whole desired state. A key written
//! as `"-=<id>"` removes `<id>`.

use std::collections::HashMap;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::RwLock;
use serde_json::{Map, Value};
use thiserror::Error;
use tokio::sync::broadcast;

use crate::effects::{DesiredState, EffectRecord};
use crate::session::SessionId;

/// Prefix marking a key deletion inside a sparse update
pub const DELETE_PREFIX: &str = "-=";

const CHANGE_CHANNEL_CAPACITY: usize = 64;

/// Store failures
#[derive(Debug, Error)]
pub enum StoreError {
    /// The backing store refused the write
    #[error("store rejected write to '{key}': {reason}")]
    Rejected { key: String, reason: String },
    #[error("failed to encode desired state: {0}")]
    Encode(#[from] serde_json::Error),
    #[error("snapshot I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Session-scoped key-value persistence
#[async_trait]
pub trait ConfigStore: Send + Sync {
    /// Read the current value stored under `key`
    fn get(&self, session: &SessionId, key: &str) -> Option<Value>;

    /// Write `value` under `key`.
    ///
    /// When both the stored and the new value are objects, the new object's
    /// keys are merged into the stored one and `"-=<k>"` keys delete `<k>`.
    /// Otherwise the stored value is replaced.
    async fn set(&self, session: &SessionId, key: &str, value: Value) -> Result<(), StoreError>;

    /// Remove `key` entirely
    async fn unset(&self, session: &SessionId, key: &str) -> Result<(), StoreError>;
}

/// Notification published after every successful write
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoreChange {
    pub session: SessionId,
    pub key: String,
}

/// Apply a sparse top-level update to `target`
pub fn merge_sparse(target: &mut Value, patch: Value) {
    match (target, patch) {
        (Value::Object(current), Value::Object(patch)) => {
            let (deletions, insertions): (Vec<_>, Vec<_>) = patch
                .into_iter()
                .partition(|(k, _)| k.starts_with(DELETE_PREFIX));
            for (key, _) in deletions {
                current.remove(&key[DELETE_PREFIX.len()..]);
            }
            for (key, value) in insertions {
                current.insert(key, value);
            }
        }
        (target, patch) => *target = strip_deletions(patch),
    }
}

fn strip_deletions(value: Value) -> Value {
    match value {
        Value::Object(map) => Value::Object(
            map.into_iter()
                .filter(|(k, _)| !k.starts_with(DELETE_PREFIX))
                .collect(),
        ),
        other => other,
    }
}

/// In-memory config store
///
/// Broadcasts a [`StoreChange`] after each successful write and can be
/// persisted to / restored from a JSON snapshot file.
pub struct MemoryConfigStore {
    values: RwLock<HashMap<SessionId, Map<String, Value>>>,
    changes: broadcast::Sender<StoreChange>,
    reject_writes: AtomicBool,
}

impl Default for MemoryConfigStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryConfigStore {
    pub fn new() -> Self {
        let (changes, _) = broadcast::channel(CHANGE_CHANNEL_CAPACITY);
        Self {
            values: RwLock::new(HashMap::new()),
            changes,
            reject_writes: AtomicBool::new(false),
        }
    }

    /// Subscribe to write notifications
    pub fn subscribe(&self) -> broadcast::Receiver<StoreChange> {
        self.changes.subscribe()
    }

    /// Make every following write fail (simulates a persistence outage)
    pub fn set_reject_writes(&self, reject: bool) {
        self.reject_writes.store(reject, Ordering::SeqCst);
    }

    /// Restore from a JSON snapshot of the form `{session: {key: value}}`
    pub fn load_snapshot(path: &Path) -> Result<Self, StoreError> {
        let contents = std::fs::read_to_string(path)?;
        let snapshot: HashMap<SessionId, Map<String, Value>> = serde_json::from_str(&contents)?;
        let store = Self::new();
        *store.values.write() = snapshot;
        Ok(store)
    }

    /// Write a JSON snapshot of every session
    pub fn save_snapshot(&self, path: &Path) -> Result<(), StoreError> {
        let json = serde_json::to_string_pretty(&*self.values.read())?;
        std::fs::write(path, json)?;
        Ok(())
    }

    fn check_writable(&self, key: &str) -> Result<(), StoreError> {
        if self.reject_writes.load(Ordering::SeqCst) {
            return Err(StoreError::Rejected {
                key: key.to_string(),
                reason: "store is read-only".to_string(),
            });
        }
        Ok(())
    }

    fn notify(&self, session: &SessionId, key: &str) {
        // No subscribers is fine
        let _ = self.changes.send(StoreChange {
            session: session.clone(),
            key: key.to_string(),
        });
    }
}

#[async_trait]
impl ConfigStore for MemoryConfigStore {
    fn get(&self, session: &SessionId, key: &str) -> Option<Value> {
        self.values.read().get(session).and_then(|keys| keys.get(key)).cloned()
    }

    async fn set(&self, session: &SessionId, key: &str, value: Value) -> Result<(), StoreError> {
        self.check_writable(key)?;
        {
            let mut values = self.values.write();
            let keys = values.entry(session.clone()).or_default();
            match keys.get_mut(key) {
                Some(current) => merge_sparse(current, value),
                None => {
                    keys.insert(key.to_string(), strip_deletions(value));
                }
            }
        }
        self.notify(session, key);
        Ok(())
    }

    async fn unset(&self, session: &SessionId, key: &str) -> Result<(), StoreError> {
        self.check_writable(key)?;
        let removed = self
            .values
            .write()
            .get_mut(session)
            .and_then(|keys| keys.remove(key))
            .is_some();
        if removed {
            self.notify(session, key);
        }
        Ok(())
    }
}

/// Typed access to the desired-state record of a session
#[derive(Clone)]
pub struct DesiredStateStore {
    store: Arc<dyn ConfigStore>,
    key: String,
}

impl DesiredStateStore {
    pub fn new(store: Arc<dyn ConfigStore>, key: impl Into<String>) -> Self {
        Self {
            store,
            key: key.into(),
        }
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    /// Read the desired state. Malformed records are dropped with a warning.
    pub fn load(&self, session: &SessionId) -> DesiredState {
        let Some(value) = self.store.get(session, &self.key) else {
            return DesiredState::new();
        };
        let Value::Object(entries) = value else {
            tracing::warn!(session = %session, key = %self.key, "Desired state is not a mapping, ignoring it");
            return DesiredState::new();
        };

        entries
            .into_iter()
            .filter_map(|(id, raw)| match serde_json::from_value::<EffectRecord>(raw) {
                Ok(record) => Some((id, record)),
                Err(e) => {
                    tracing::warn!(session = %session, id = %id, "Dropping malformed effect record: {}", e);
                    None
                }
            })
            .collect()
    }

    /// Read a single record
    pub fn get(&self, session: &SessionId, id: &str) -> Option<EffectRecord> {
        self.load(session).remove(id)
    }

    /// Add or replace a single record
    pub async fn upsert(&self, session: &SessionId, id: &str, record: &EffectRecord) -> Result<(), StoreError> {
        let mut patch = Map::new();
        patch.insert(id.to_string(), serde_json::to_value(record)?);
        self.store.set(session, &self.key, Value::Object(patch)).await
    }

    /// Remove a single record with a sparse deletion
    pub async fn remove(&self, session: &SessionId, id: &str) -> Result<(), StoreError> {
        let mut patch = Map::new();
        patch.insert(format!("{}{}", DELETE_PREFIX, id), Value::Null);
        self.store.set(session, &self.key, Value::Object(patch)).await
    }

    /// Replace the whole desired state in one write
    pub async fn replace(&self, session: &SessionId, state: &DesiredState) -> Result<(), StoreError> {
        let mut patch = Map::new();
        if let Some(Value::Object(current)) = self.store.get(session, &self.key) {
            for id in current.keys().filter(|id| !state.contains_key(*id)) {
                patch.insert(format!("{}{}", DELETE_PREFIX, id), Value::Null);
            }
        }
        for (id, record) in state {
            patch.insert(id.clone(), serde_json::to_value(record)?);
        }
        self.store.set(session, &self.key, Value::Object(patch)).await
    }

    /// Drop the desired state entirely
    pub async fn clear(&self, session: &SessionId) -> Result<(), StoreError> {
        self.store.unset(session, &self.key).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::effects::EffectOptions;
    use serde_json::json;

    fn record(effect_type: &str, density: f64) -> EffectRecord {
        EffectRecord::new(effect_type, EffectOptions::new().with("density", density))
    }

    #[test]
    fn test_merge_sparse() {
        let mut target = json!({"a": {"type": "rain", "options": {"x": 1}}, "b": 2});
        merge_sparse(&mut target, json!({"-=b": null, "a": {"type": "fog"}, "c": 3}));
        assert_eq!(target, json!({"a": {"type": "fog"}, "c": 3}));
    }

    #[test]
    fn test_merge_deletes_before_insert() {
        let mut target = json!({"a": 1});
        merge_sparse(&mut target, json!({"a": 2, "-=a": null}));
        assert_eq!(target, json!({"a": 2}));
    }

    #[tokio::test]
    async fn test_memory_store_set_get_unset() {
        let store = MemoryConfigStore::new();
        let session = SessionId::new("scene-1");
        let mut changes = store.subscribe();

        assert!(store.get(&session, "effects").is_none());
        store.set(&session, "effects", json!({"a": 1})).await.unwrap();
        store.set(&session, "effects", json!({"b": 2})).await.unwrap();
        assert_eq!(store.get(&session, "effects"), Some(json!({"a": 1, "b": 2})));
        assert_eq!(changes.recv().await.unwrap().key, "effects");

        store.unset(&session, "effects").await.unwrap();
        assert!(store.get(&session, "effects").is_none());
        assert!(store.get(&SessionId::new("other"), "effects").is_none());
    }

    #[tokio::test]
    async fn test_rejected_writes() {
        let store = MemoryConfigStore::new();
        let session = SessionId::new("s");
        store.set_reject_writes(true);
        let err = store.set(&session, "effects", json!({})).await.unwrap_err();
        assert!(matches!(err, StoreError::Rejected { .. }));
        assert!(store.get(&session, "effects").is_none());
    }

    #[tokio::test]
    async fn test_desired_state_adapter() {
        let store = Arc::new(MemoryConfigStore::new());
        let desired = DesiredStateStore::new(store.clone(), "effects");
        let session = SessionId::new("s");

        desired.upsert(&session, "a", &record("rain", 0.5)).await.unwrap();
        desired.upsert(&session, "b", &record("fog", 0.2)).await.unwrap();
        assert_eq!(desired.load(&session).len(), 2);

        desired.remove(&session, "a").await.unwrap();
        let state = desired.load(&session);
        assert_eq!(state.keys().collect::<Vec<_>>(), vec!["b"]);

        let mut replacement = DesiredState::new();
        replacement.insert("c".to_string(), record("color", 1.0));
        desired.replace(&session, &replacement).await.unwrap();
        assert_eq!(desired.load(&session), replacement);

        desired.clear(&session).await.unwrap();
        assert!(desired.load(&session).is_empty());
    }

    #[tokio::test]
    async fn test_malformed_records_are_dropped() {
        let store = Arc::new(MemoryConfigStore::new());
        let session = SessionId::new("s");
        store
            .set(&session, "effects", json!({"ok": {"type": "rain"}, "bad": {"options": {}}, "worse": 7}))
            .await
            .unwrap();

        let desired = DesiredStateStore::new(store, "effects");
        let state = desired.load(&session);
        assert_eq!(state.keys().collect::<Vec<_>>(), vec!["ok"]);
    }

    #[tokio::test]
    async fn test_snapshot_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("store.json");
        let session = SessionId::new("s");

        let store = MemoryConfigStore::new();
        store.set(&session, "effects", json!({"a": {"type": "fog"}})).await.unwrap();
        store.save_snapshot(&path).unwrap();

        let restored = MemoryConfigStore::load_snapshot(&path).unwrap();
        assert_eq!(restored.get(&session, "effects"), Some(json!({"a": {"type": "fog"}})));
    }
}
