//! Persisted per-replica sync state.

use crate::model::{Millis, Tombstone};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::sync::Mutex;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum StateError {
    #[error("IO error: {0}")]
    Io(String),

    #[error("Serialization error: {0}")]
    Serialization(String),
}

pub type Result<T> = std::result::Result<T, StateError>;

/// What a replica remembers between syncs.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LocalState {
    /// Checksum of the local snapshot after the last successful sync.
    #[serde(default)]
    pub last_checksum: Option<String>,
    #[serde(default)]
    pub last_sync_at: Option<Millis>,
    /// Browser ids the user touched since the last successful sync.
    #[serde(default)]
    pub modified_ids: BTreeSet<String>,
    /// Local deletion witnesses not yet expired.
    #[serde(default)]
    pub tombstones: Vec<Tombstone>,
}

#[async_trait]
pub trait StateStore: Send + Sync {
    /// Load saved state. A store that has never been written yields defaults.
    async fn load(&self) -> Result<LocalState>;

    async fn save(&self, state: &LocalState) -> Result<()>;
}

/// In-memory state store for testing.
#[derive(Default)]
pub struct InMemoryStateStore {
    state: Mutex<LocalState>,
    saves: Mutex<usize>,
}

impl InMemoryStateStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_state(state: LocalState) -> Self {
        Self {
            state: Mutex::new(state),
            saves: Mutex::new(0),
        }
    }

    pub fn current(&self) -> LocalState {
        self.state.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    /// Number of completed saves.
    pub fn save_count(&self) -> usize {
        *self.saves.lock().unwrap_or_else(|e| e.into_inner())
    }
}

#[async_trait]
impl StateStore for InMemoryStateStore {
    async fn load(&self) -> Result<LocalState> {
        Ok(self.current())
    }

    async fn save(&self, state: &LocalState) -> Result<()> {
        *self.state.lock().unwrap_or_else(|e| e.into_inner()) = state.clone();
        *self.saves.lock().unwrap_or_else(|e| e.into_inner()) += 1;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_save_then_load() {
        let store = InMemoryStateStore::new();
        assert_eq!(store.load().await.unwrap(), LocalState::default());

        let state = LocalState {
            last_checksum: Some("abc".into()),
            last_sync_at: Some(5),
            modified_ids: BTreeSet::from(["7".to_string()]),
            tombstones: vec![Tombstone::new("https://x.com", 3)],
        };
        store.save(&state).await.unwrap();
        assert_eq!(store.load().await.unwrap(), state);
        assert_eq!(store.save_count(), 1);
    }

    #[test]
    fn test_state_json_is_camel_case_and_lenient() {
        let json = serde_json::to_value(LocalState::default()).unwrap();
        assert!(json.get("lastChecksum").is_some());
        assert!(json.get("modifiedIds").is_some());

        let parsed: LocalState = serde_json::from_str(r#"{"lastSyncAt": 9}"#).unwrap();
        assert_eq!(parsed.last_sync_at, Some(9));
        assert!(parsed.tombstones.is_empty());
    }
}
