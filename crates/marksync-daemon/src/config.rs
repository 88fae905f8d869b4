//! Daemon configuration loading

use std::path::Path;
use std::time::Duration;

use anyhow::{Context, Result};
use marksync_core::SyncConfig;
use serde::{Deserialize, Serialize};

/// Configuration for one replica daemon, stored at `<state-dir>/config.json`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DaemonConfig {
    /// Engine tunables
    #[serde(default)]
    pub sync: SyncConfig,

    /// Interval between forced syncs in `watch` mode (default: 5 minutes)
    #[serde(default = "default_sync_interval")]
    pub sync_interval_secs: u64,

    /// Token presented to a shared directory guarded by `access.token`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub remote_token: Option<String>,
}

impl Default for DaemonConfig {
    fn default() -> Self {
        Self {
            sync: SyncConfig::default(),
            sync_interval_secs: default_sync_interval(),
            remote_token: None,
        }
    }
}

fn default_sync_interval() -> u64 {
    300
}

impl DaemonConfig {
    /// Load configuration from the state directory.
    ///
    /// A missing file is replaced by the defaults, which are written out for
    /// reference.
    pub fn load(state_dir: &Path) -> Result<Self> {
        let config_file = state_dir.join("config.json");

        if config_file.exists() {
            let content = std::fs::read_to_string(&config_file)
                .with_context(|| format!("Failed to read config file: {:?}", config_file))?;
            let config: DaemonConfig =
                serde_json::from_str(&content).with_context(|| "Failed to parse config.json")?;
            tracing::info!("Loaded configuration from {:?}", config_file);
            Ok(config)
        } else {
            tracing::info!("No config file found at {:?}, using defaults", config_file);
            let config = DaemonConfig::default();

            std::fs::create_dir_all(state_dir)
                .with_context(|| format!("Failed to create state directory: {:?}", state_dir))?;

            let content = serde_json::to_string_pretty(&config)?;
            std::fs::write(&config_file, content)
                .with_context(|| format!("Failed to write default config: {:?}", config_file))?;
            tracing::info!("Created default config at {:?}", config_file);

            Ok(config)
        }
    }

    pub fn sync_interval(&self) -> Duration {
        Duration::from_secs(self.sync_interval_secs.max(1))
    }
}
