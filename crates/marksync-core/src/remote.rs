//! Remote store collaborator.
//!
//! Implementations:
//! - `InMemoryRemote` - For testing; shareable between replicas via `Arc`
//! - `DirectoryRemote` (in marksync-daemon) - A record file in a shared directory
//!
//! Both fold pushes through [`CoordinationService`], so the shared record
//! evolves exactly as the engine's own merge does.

use crate::clock::Clock;
use crate::service::{CoordinationService, PushReceipt, PushRequest, RemoteSnapshot};

use async_trait::async_trait;
use std::sync::{Arc, Mutex};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum RemoteError {
    /// Credentials missing or rejected. The caller should prompt, not retry.
    #[error("Authentication required: {0}")]
    Unauthorized(String),

    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Serialization error: {0}")]
    Serialization(String),
}

impl From<serde_json::Error> for RemoteError {
    fn from(err: serde_json::Error) -> Self {
        RemoteError::Serialization(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, RemoteError>;

/// The shared store all replicas push to and fetch from.
#[async_trait]
pub trait RemoteStore: Send + Sync {
    async fn fetch(&self) -> Result<RemoteSnapshot>;

    /// Merge a snapshot into the shared record.
    async fn push(&self, request: PushRequest) -> Result<PushReceipt>;

    /// Overwrite the shared record with a snapshot.
    async fn replace(&self, request: PushRequest) -> Result<PushReceipt>;
}

/// Failure to inject on the next remote calls.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InjectedFailure {
    Unauthorized,
    Transport,
}

impl InjectedFailure {
    fn into_error(self) -> RemoteError {
        match self {
            InjectedFailure::Unauthorized => RemoteError::Unauthorized("token expired".into()),
            InjectedFailure::Transport => RemoteError::Transport("connection reset".into()),
        }
    }
}

#[derive(Default)]
struct Faults {
    fetch: Option<InjectedFailure>,
    push: Option<InjectedFailure>,
}

/// In-memory shared record for testing.
pub struct InMemoryRemote {
    service: Mutex<CoordinationService>,
    clock: Arc<dyn Clock>,
    faults: Mutex<Faults>,
}

impl InMemoryRemote {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self::with_service(CoordinationService::default(), clock)
    }

    pub fn with_service(service: CoordinationService, clock: Arc<dyn Clock>) -> Self {
        Self {
            service: Mutex::new(service),
            clock,
            faults: Mutex::new(Faults::default()),
        }
    }

    /// Current record, bypassing fault injection.
    pub fn snapshot(&self) -> RemoteSnapshot {
        self.service.lock().unwrap_or_else(|e| e.into_inner()).fetch()
    }

    /// Make every fetch fail until cleared.
    pub fn fail_fetch(&self, failure: Option<InjectedFailure>) {
        self.faults.lock().unwrap_or_else(|e| e.into_inner()).fetch = failure;
    }

    /// Make every push and replace fail until cleared.
    pub fn fail_push(&self, failure: Option<InjectedFailure>) {
        self.faults.lock().unwrap_or_else(|e| e.into_inner()).push = failure;
    }

    fn check(&self, pick: impl FnOnce(&Faults) -> Option<InjectedFailure>) -> Result<()> {
        match pick(&self.faults.lock().unwrap_or_else(|e| e.into_inner())) {
            Some(failure) => Err(failure.into_error()),
            None => Ok(()),
        }
    }
}

#[async_trait]
impl RemoteStore for InMemoryRemote {
    async fn fetch(&self) -> Result<RemoteSnapshot> {
        self.check(|f| f.fetch)?;
        Ok(self.snapshot())
    }

    async fn push(&self, request: PushRequest) -> Result<PushReceipt> {
        self.check(|f| f.push)?;
        let now = self.clock.now_millis();
        Ok(self
            .service
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(request, now))
    }

    async fn replace(&self, request: PushRequest) -> Result<PushReceipt> {
        self.check(|f| f.push)?;
        let now = self.clock.now_millis();
        Ok(self
            .service
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .replace(request, now))
    }
}
