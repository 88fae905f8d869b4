//! Debounced watcher for the bookmark tree file.
//!
//! Watches the file's parent directory rather than the file itself, since an
//! atomic save replaces the inode and would silently end a file-level watch.

use anyhow::{Context, Result};
use notify::RecursiveMode;
use notify_debouncer_mini::{new_debouncer, DebouncedEvent};
use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::{Duration, SystemTime};
use tokio::sync::mpsc;
use tracing::{debug, error};

/// What happened to the watched file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TreeFileEvent {
    /// File was created or rewritten
    Modified,
    /// File is gone
    Deleted,
}

pub struct FileWatcher {
    path: PathBuf,
    /// Debouncer handle (must keep alive)
    _debouncer: notify_debouncer_mini::Debouncer<notify::RecommendedWatcher>,
    event_rx: mpsc::UnboundedReceiver<TreeFileEvent>,
}

/// Last seen mtime, to drop events that did not change the file
type LastModified = Arc<Mutex<Option<SystemTime>>>;

impl FileWatcher {
    /// Watch `path` with a 200ms debounce.
    pub fn new(path: PathBuf) -> Result<Self> {
        let parent = path
            .parent()
            .filter(|p| !p.as_os_str().is_empty())
            .unwrap_or_else(|| Path::new("."));
        // FSEvents needs the real path (/var vs /private/var on macOS)
        let parent = parent.canonicalize().unwrap_or_else(|_| parent.to_path_buf());
        let file_name = path
            .file_name()
            .map(|name| name.to_os_string())
            .with_context(|| format!("{:?} does not name a file", path))?;

        let (event_tx, event_rx) = mpsc::unbounded_channel();
        let last_modified: LastModified = Arc::new(Mutex::new(None));

        let mut debouncer = new_debouncer(
            Duration::from_millis(200),
            move |result: std::result::Result<Vec<DebouncedEvent>, notify::Error>| match result {
                Ok(events) => {
                    if let Some(event) = Self::process_events(&events, &file_name, &last_modified) {
                        // Receiver dropped means we are shutting down
                        let _ = event_tx.send(event);
                    }
                }
                Err(e) => {
                    error!("File watcher error: {}", e);
                }
            },
        )?;

        debouncer
            .watcher()
            .watch(&parent, RecursiveMode::NonRecursive)
            .with_context(|| format!("Failed to watch {:?}", parent))?;

        Ok(Self {
            path: parent.join(path.file_name().unwrap_or_default()),
            _debouncer: debouncer,
            event_rx,
        })
    }

    /// Collapse one debounced batch into at most one event for our file.
    fn process_events(
        events: &[DebouncedEvent],
        file_name: &OsString,
        last_modified: &LastModified,
    ) -> Option<TreeFileEvent> {
        let event = events
            .iter()
            .find(|event| event.path.file_name() == Some(file_name.as_os_str()))?;

        let mut last = last_modified.lock().unwrap_or_else(|e| e.into_inner());
        let mtime = std::fs::metadata(&event.path)
            .ok()
            .and_then(|metadata| metadata.modified().ok());

        let kind = match mtime {
            Some(mtime) => {
                if *last == Some(mtime) {
                    return None;
                }
                *last = Some(mtime);
                TreeFileEvent::Modified
            }
            None if event.path.exists() => TreeFileEvent::Modified,
            None => {
                *last = None;
                TreeFileEvent::Deleted
            }
        };

        debug!("Bookmark file event: {:?} - {:?}", kind, event.path);
        Some(kind)
    }

    pub fn event_rx(&mut self) -> &mut mpsc::UnboundedReceiver<TreeFileEvent> {
        &mut self.event_rx
    }

    /// The watched file, with its directory canonicalized.
    pub fn path(&self) -> &Path {
        &self.path
    }
}
