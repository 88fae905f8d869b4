//! Event infrastructure.
//!
//! `SyncEvent` reports orchestrator progress for monitoring; `ChangeEvent`
//! carries browser tree notifications into the orchestrator. Both travel on
//! an `EventBus`, whose subscriptions unsubscribe when dropped.

use crate::model::Millis;

use serde::Serialize;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, RwLock, Weak};

/// Sync lifecycle events emitted by the orchestrator.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum SyncEvent {
    /// A cycle entered `Syncing`.
    SyncStarted {
        force: bool,
        /// Milliseconds since Unix epoch.
        timestamp: Millis,
    },
    /// A cycle applied and pushed successfully.
    SyncCompleted {
        created: usize,
        updated: usize,
        deleted: usize,
        checksum: String,
        timestamp: Millis,
    },
    /// Local checksum matched the last synced one; no round-trip made.
    SyncSkipped { checksum: String, timestamp: Millis },
    /// Transport or storage failure. Local data is left consistent.
    SyncFailed { message: String, timestamp: Millis },
    /// The remote rejected our credentials.
    AuthRequired { message: String, timestamp: Millis },
}

/// A browser tree notification, keyed by browser-native id.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum ChangeEvent {
    Created { id: String },
    Moved { id: String },
    Changed { id: String },
    /// A node and its subtree were removed. `urls` lists every bookmark URL
    /// that went with it.
    Removed { id: String, urls: Vec<String> },
}

impl ChangeEvent {
    pub fn id(&self) -> &str {
        match self {
            ChangeEvent::Created { id }
            | ChangeEvent::Moved { id }
            | ChangeEvent::Changed { id }
            | ChangeEvent::Removed { id, .. } => id,
        }
    }
}

type Callback<E> = Arc<dyn Fn(E) + Send + Sync>;

/// Subscription handle that unsubscribes automatically when dropped.
///
/// Hold this value to keep receiving events; drop it to unsubscribe.
#[must_use = "dropping a Subscription unsubscribes immediately"]
pub struct Subscription {
    unsubscribe: Option<Box<dyn FnOnce() + Send + Sync>>,
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if let Some(unsubscribe) = self.unsubscribe.take() {
            unsubscribe();
        }
    }
}

/// Event bus for publishing events to subscribers.
///
/// Thread-safe for use in a multi-threaded Tokio runtime. Wrap in `Arc` to
/// enable subscriptions.
pub struct EventBus<E> {
    callbacks: RwLock<Vec<(usize, Callback<E>)>>,
    next_id: AtomicUsize,
}

impl<E> Default for EventBus<E> {
    fn default() -> Self {
        Self {
            callbacks: RwLock::new(Vec::new()),
            next_id: AtomicUsize::new(0),
        }
    }
}

impl<E: Clone + Send + 'static> EventBus<E> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Subscribe to events. Returns `Subscription` that unsubscribes on drop.
    pub fn subscribe(
        self: &Arc<Self>,
        callback: impl Fn(E) + Send + Sync + 'static,
    ) -> Subscription {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.callbacks
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .push((id, Arc::new(callback)));
        let bus: Weak<Self> = Arc::downgrade(self);
        Subscription {
            unsubscribe: Some(Box::new(move || {
                if let Some(bus) = bus.upgrade() {
                    bus.unsubscribe(id);
                }
            })),
        }
    }

    fn unsubscribe(&self, id: usize) {
        // try_write: Drop may run while an emit on this thread holds the read lock.
        if let Ok(mut guard) = self.callbacks.try_write() {
            guard.retain(|(i, _)| *i != id);
        }
    }

    /// Emit an event to all subscribers.
    pub fn emit(&self, event: E) {
        // Snapshot the list so a callback may subscribe without deadlocking.
        let callbacks: Vec<_> = self
            .callbacks
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .iter()
            .map(|(_, cb)| Arc::clone(cb))
            .collect();

        for callback in callbacks {
            callback(event.clone());
        }
    }
}
