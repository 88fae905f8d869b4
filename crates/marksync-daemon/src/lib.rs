//! marksync-daemon library: Exposes the native collaborators for testing.
//!
//! This is a thin library layer under the `marksync` binary, allowing
//! integration tests to drive file-backed replicas directly.

pub mod config;
pub mod directory_remote;
pub mod file_browser;
pub mod persistence;
pub mod replica;
pub mod tools;
pub mod watcher;

// Re-export key types for convenience
pub use config::DaemonConfig;
pub use directory_remote::DirectoryRemote;
pub use file_browser::FileBrowser;
pub use persistence::JsonStateStore;
pub use replica::{Orchestrator, Replica, ReplicaPaths};
pub use watcher::{FileWatcher, TreeFileEvent};
