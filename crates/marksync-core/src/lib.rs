//! marksync-core: Shared engine for cross-browser bookmark synchronization.
//!
//! This crate provides the core functionality for:
//! - Canonical folder paths and snapshot checksums
//! - Conversions between browser trees, flat items, and nested exports
//! - Incoming-wins merging and tombstone-based deletion
//! - The per-replica sync orchestrator
//! - The coordination-service fold shared by every remote store
//! - BrowserTree, RemoteStore, and StateStore trait abstractions

pub mod browser;
pub mod checksum;
pub mod clock;
pub mod codec;
pub mod config;
pub mod conflict;
pub mod events;
pub mod merge;
pub mod model;
pub mod orchestrator;
pub mod path;
pub mod reconcile;
pub mod remote;
pub mod service;
pub mod state;
pub mod tombstone;

pub use browser::{BrowserError, BrowserTree, CreateDetails, InMemoryBrowser};
pub use checksum::{checksum, checksum_value, tombstone_checksum};
pub use clock::{Clock, ManualClock, SystemClock};
pub use codec::{extract_from_nested, flatten, nest, parse_export, roots_to_tree};
pub use config::SyncConfig;
pub use conflict::{ConflictResolver, ConflictStrategy, Resolution};
pub use events::{ChangeEvent, EventBus, Subscription, SyncEvent};
pub use merge::{merge, MergeResult};
pub use model::{parse_items, BookmarkItem, ExportRoots, FolderItem, Item, Millis, Tombstone, TreeNode};
pub use orchestrator::{Phase, SyncOrchestrator, SyncOutcome, SyncReport};
pub use path::{normalize_path, CanonicalRoot};
pub use remote::{InMemoryRemote, RemoteError, RemoteStore};
pub use service::{CoordinationService, PushReceipt, PushRequest, RemoteSnapshot, SharedRecord};
pub use state::{InMemoryStateStore, LocalState, StateError, StateStore};
pub use tombstone::{apply_tombstones_locally, merge_tombstones, prune_expired};
