//! Remote store over a shared directory.
//!
//! The directory holds `record.json`, the serialized [`SharedRecord`]. Every
//! call reads the record, folds through [`CoordinationService`], and rewrites
//! the file atomically, so several replicas on one machine (or on a synced
//! folder) converge exactly as they would against a hosted service.
//!
//! A directory may be guarded by an `access.token` file; callers must then
//! present the same token.

use crate::persistence::write_atomic;

use async_trait::async_trait;
use marksync_core::remote::{RemoteError, RemoteStore, Result};
use marksync_core::{
    Clock, CoordinationService, Millis, PushReceipt, PushRequest, RemoteSnapshot, SharedRecord,
};
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::fs;
use tokio::sync::Mutex;
use tracing::debug;

const RECORD_FILE: &str = "record.json";
const TOKEN_FILE: &str = "access.token";

pub struct DirectoryRemote {
    dir: PathBuf,
    token: Option<String>,
    retention: Duration,
    clock: Arc<dyn Clock>,
    /// Serializes read-fold-write cycles within this process.
    lock: Mutex<()>,
}

impl DirectoryRemote {
    pub fn new(dir: impl Into<PathBuf>, retention: Duration, clock: Arc<dyn Clock>) -> Self {
        Self {
            dir: dir.into(),
            token: None,
            retention,
            clock,
            lock: Mutex::new(()),
        }
    }

    /// Present `token` to a guarded directory.
    pub fn with_token(mut self, token: Option<String>) -> Self {
        self.token = token;
        self
    }

    pub fn record_path(&self) -> PathBuf {
        self.dir.join(RECORD_FILE)
    }

    async fn authorize(&self) -> Result<()> {
        let expected = match fs::read_to_string(self.dir.join(TOKEN_FILE)).await {
            Ok(expected) => expected,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(()),
            Err(e) => return Err(RemoteError::Transport(e.to_string())),
        };
        match &self.token {
            Some(token) if token == expected.trim() => Ok(()),
            Some(_) => Err(RemoteError::Unauthorized("access token rejected".into())),
            None => Err(RemoteError::Unauthorized(format!(
                "{:?} requires an access token",
                self.dir
            ))),
        }
    }

    async fn load(&self) -> Result<CoordinationService> {
        let record = read_record(&self.record_path()).await?;
        Ok(CoordinationService::new(record, self.retention))
    }

    async fn store(&self, service: CoordinationService) -> Result<()> {
        let contents = serde_json::to_vec_pretty(service.record())?;
        write_atomic(&self.record_path(), &contents)
            .await
            .map_err(|e| RemoteError::Transport(e.to_string()))
    }

    async fn fold(
        &self,
        request: PushRequest,
        apply: fn(&mut CoordinationService, PushRequest, Millis) -> PushReceipt,
    ) -> Result<PushReceipt> {
        self.authorize().await?;
        let _guard = self.lock.lock().await;
        let mut service = self.load().await?;
        let receipt = apply(&mut service, request, self.clock.now_millis());
        self.store(service).await?;
        debug!(
            "Wrote {:?}: {} added, {} updated",
            self.record_path(),
            receipt.added,
            receipt.updated
        );
        Ok(receipt)
    }
}

async fn read_record(path: &Path) -> Result<SharedRecord> {
    let contents = match fs::read_to_string(path).await {
        Ok(contents) => contents,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(SharedRecord::default()),
        Err(e) => return Err(RemoteError::Transport(e.to_string())),
    };
    Ok(serde_json::from_str(&contents)?)
}

#[async_trait]
impl RemoteStore for DirectoryRemote {
    async fn fetch(&self) -> Result<RemoteSnapshot> {
        self.authorize().await?;
        let _guard = self.lock.lock().await;
        Ok(self.load().await?.fetch())
    }

    async fn push(&self, request: PushRequest) -> Result<PushReceipt> {
        self.fold(request, CoordinationService::push).await
    }

    async fn replace(&self, request: PushRequest) -> Result<PushReceipt> {
        self.fold(request, CoordinationService::replace).await
    }
}
