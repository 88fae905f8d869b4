//! Engine configuration.

use crate::conflict::ConflictStrategy;

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Tunables for one replica's sync engine.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncConfig {
    /// Quiet period after the last local change before a sync fires.
    #[serde(default = "default_debounce_ms")]
    pub debounce_ms: u64,

    /// Delay before the user-modified id set is written out.
    #[serde(default = "default_persist_debounce_ms")]
    pub persist_debounce_ms: u64,

    /// Age after which a tombstone may be dropped.
    #[serde(default = "default_tombstone_retention_days")]
    pub tombstone_retention_days: u64,

    /// Strategy for identity-addressed conflicts.
    #[serde(default)]
    pub conflict_strategy: ConflictStrategy,
}

fn default_debounce_ms() -> u64 {
    5_000
}

fn default_persist_debounce_ms() -> u64 {
    1_000
}

fn default_tombstone_retention_days() -> u64 {
    30
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            debounce_ms: default_debounce_ms(),
            persist_debounce_ms: default_persist_debounce_ms(),
            tombstone_retention_days: default_tombstone_retention_days(),
            conflict_strategy: ConflictStrategy::default(),
        }
    }
}

impl SyncConfig {
    pub fn debounce(&self) -> Duration {
        Duration::from_millis(self.debounce_ms)
    }

    pub fn persist_debounce(&self) -> Duration {
        Duration::from_millis(self.persist_debounce_ms)
    }

    pub fn tombstone_retention(&self) -> Duration {
        Duration::from_secs(self.tombstone_retention_days.saturating_mul(24 * 60 * 60))
    }
}
