//! Persistence for replica sync state.
//!
//! State is stored in `state.json` within the state directory. Every JSON file
//! the daemon owns is written through [`write_atomic`], so a crash mid-write
//! never leaves a truncated file behind.

use async_trait::async_trait;
use marksync_core::state::{LocalState, Result, StateError, StateStore};
use std::io;
use std::path::{Path, PathBuf};
use tokio::fs;

/// Write `contents` to a sibling temp file, then rename it over `path`.
pub async fn write_atomic(path: &Path, contents: &[u8]) -> io::Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).await?;
    }
    let mut temp = path.as_os_str().to_owned();
    temp.push(format!(".{}.tmp", uuid::Uuid::new_v4()));
    let temp = PathBuf::from(temp);

    fs::write(&temp, contents).await?;
    if let Err(e) = fs::rename(&temp, path).await {
        let _ = fs::remove_file(&temp).await;
        return Err(e);
    }
    Ok(())
}

/// `StateStore` backed by a JSON file.
pub struct JsonStateStore {
    path: PathBuf,
}

impl JsonStateStore {
    /// Store at `<state_dir>/state.json`.
    pub fn new(state_dir: &Path) -> Self {
        Self {
            path: state_dir.join("state.json"),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[async_trait]
impl StateStore for JsonStateStore {
    async fn load(&self) -> Result<LocalState> {
        let contents = match fs::read_to_string(&self.path).await {
            Ok(contents) => contents,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(LocalState::default()),
            Err(e) => return Err(StateError::Io(e.to_string())),
        };
        serde_json::from_str(&contents).map_err(|e| StateError::Serialization(e.to_string()))
    }

    async fn save(&self, state: &LocalState) -> Result<()> {
        let contents = serde_json::to_vec_pretty(state)
            .map_err(|e| StateError::Serialization(e.to_string()))?;
        write_atomic(&self.path, &contents)
            .await
            .map_err(|e| StateError::Io(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use marksync_core::Tombstone;
    use std::collections::BTreeSet;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_missing_file_loads_defaults() {
        let temp = TempDir::new().unwrap();
        let store = JsonStateStore::new(temp.path());
        assert_eq!(store.load().await.unwrap(), LocalState::default());
    }

    #[tokio::test]
    async fn test_save_and_load() {
        let temp = TempDir::new().unwrap();
        let store = JsonStateStore::new(&temp.path().join("nested"));

        let state = LocalState {
            last_checksum: Some("abc123".into()),
            last_sync_at: Some(1_700_000_000_000),
            modified_ids: BTreeSet::from(["42".to_string()]),
            tombstones: vec![Tombstone::new("https://x.com", 5)],
        };
        store.save(&state).await.unwrap();

        let reopened = JsonStateStore::new(&temp.path().join("nested"));
        assert_eq!(reopened.load().await.unwrap(), state);
    }

    #[tokio::test]
    async fn test_corrupt_file_is_serialization_error() {
        let temp = TempDir::new().unwrap();
        let store = JsonStateStore::new(temp.path());
        std::fs::write(store.path(), "{not json").unwrap();
        assert!(matches!(store.load().await, Err(StateError::Serialization(_))));
    }

    #[tokio::test]
    async fn test_write_atomic_leaves_no_temp_files() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("file.json");
        write_atomic(&path, b"one").await.unwrap();
        write_atomic(&path, b"two").await.unwrap();

        assert_eq!(std::fs::read_to_string(&path).unwrap(), "two");
        let entries = std::fs::read_dir(temp.path()).unwrap().count();
        assert_eq!(entries, 1);
    }
}
