//! One replica: a bookmark file, a shared directory, and a state directory,
//! wired to a sync orchestrator.

use crate::config::DaemonConfig;
use crate::directory_remote::DirectoryRemote;
use crate::file_browser::FileBrowser;
use crate::persistence::JsonStateStore;

use anyhow::{Context, Result};
use marksync_core::{BrowserTree, Clock, Subscription, SyncOrchestrator, SystemClock};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::info;

pub type Orchestrator = SyncOrchestrator<FileBrowser, DirectoryRemote>;

/// Where a replica keeps its files.
#[derive(Debug, Clone)]
pub struct ReplicaPaths {
    /// JSON bookmark tree standing in for the browser
    pub bookmarks: PathBuf,
    /// Shared directory holding `record.json`
    pub remote: PathBuf,
    /// Private directory for `state.json` and `config.json`
    pub state_dir: PathBuf,
}

pub struct Replica {
    config: DaemonConfig,
    orchestrator: Arc<Orchestrator>,
    /// Keeps browser changes flowing into the orchestrator
    _changes: Subscription,
}

impl Replica {
    /// Open a replica with the configuration stored in its state directory.
    pub async fn open(paths: &ReplicaPaths) -> Result<Self> {
        let config = DaemonConfig::load(&paths.state_dir)?;
        Self::with_config(paths, config, Arc::new(SystemClock)).await
    }

    pub async fn with_config(
        paths: &ReplicaPaths,
        config: DaemonConfig,
        clock: Arc<dyn Clock>,
    ) -> Result<Self> {
        let browser = FileBrowser::open(&paths.bookmarks, Arc::clone(&clock))
            .await
            .with_context(|| format!("Failed to open bookmark tree {:?}", paths.bookmarks))?;
        let remote = DirectoryRemote::new(
            &paths.remote,
            config.sync.tombstone_retention(),
            Arc::clone(&clock),
        )
        .with_token(config.remote_token.clone());
        let store = JsonStateStore::new(&paths.state_dir);

        let orchestrator = SyncOrchestrator::open(
            Arc::new(browser),
            Arc::new(remote),
            Arc::new(store),
            config.sync.clone(),
            clock,
        )
        .await
        .with_context(|| format!("Failed to load sync state from {:?}", paths.state_dir))?;
        let changes = orchestrator.listen(&orchestrator.browser().changes());

        info!(
            "Replica ready: {:?} <-> {:?}",
            paths.bookmarks, paths.remote
        );
        Ok(Self {
            config,
            orchestrator,
            _changes: changes,
        })
    }

    pub fn config(&self) -> &DaemonConfig {
        &self.config
    }

    pub fn orchestrator(&self) -> &Arc<Orchestrator> {
        &self.orchestrator
    }

    pub fn browser(&self) -> &Arc<FileBrowser> {
        self.orchestrator.browser()
    }

    /// Pick up external edits to the bookmark file. Returns how many changes
    /// were observed.
    pub async fn refresh(&self) -> Result<usize> {
        let events = self
            .browser()
            .refresh()
            .await
            .context("Failed to re-read bookmark tree")?;
        Ok(events.len())
    }
}
