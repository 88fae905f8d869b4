//! Browser tree backed by a JSON file on disk.
//!
//! The file holds one [`TreeNode`]: the untitled root and its containers,
//! the same shape a browser's `getTree()` returns. The engine's own
//! mutations go through [`edit`] and rewrite the file atomically. Edits made
//! by anything else are picked up by [`FileBrowser::refresh`], which diffs
//! the file against the last tree it knew and emits the matching
//! [`ChangeEvent`]s.

use crate::persistence::write_atomic;

use async_trait::async_trait;
use marksync_core::browser::{default_root, edit, BrowserError, BrowserTree, CreateDetails, Result};
use marksync_core::{ChangeEvent, Clock, EventBus, TreeNode};
use std::collections::HashMap;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::fs;
use tokio::sync::Mutex;
use tracing::{debug, info};

/// A `BrowserTree` over a bookmark tree file.
pub struct FileBrowser {
    path: PathBuf,
    cache: Mutex<TreeNode>,
    clock: Arc<dyn Clock>,
    events: Arc<EventBus<ChangeEvent>>,
}

impl FileBrowser {
    /// Open the tree at `path`, creating it with the default containers if
    /// it does not exist.
    pub async fn open(path: impl Into<PathBuf>, clock: Arc<dyn Clock>) -> Result<Self> {
        let path = path.into();
        let root = match read_tree(&path).await? {
            Some(root) => root,
            None => {
                info!("No bookmark tree at {:?}, creating one", path);
                let root = default_root();
                write_tree(&path, &root).await?;
                root
            }
        };

        Ok(Self {
            path,
            cache: Mutex::new(root),
            clock,
            events: Arc::new(EventBus::new()),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Re-read the file and emit an event for every difference from the last
    /// known tree. Returns the emitted events.
    pub async fn refresh(&self) -> Result<Vec<ChangeEvent>> {
        let events = {
            let mut cache = self.cache.lock().await;
            let current = read_tree(&self.path)
                .await?
                .ok_or_else(|| BrowserError::Io(format!("{:?} disappeared", self.path)))?;
            let events = diff_trees(&cache, &current);
            *cache = current;
            events
        };

        if !events.is_empty() {
            debug!("Observed {} external change(s) in {:?}", events.len(), self.path);
        }
        for event in &events {
            self.events.emit(event.clone());
        }
        Ok(events)
    }

    /// Apply a mutation to a copy of the tree, persist it, then swap it in.
    async fn mutate<T>(&self, f: impl FnOnce(&mut TreeNode) -> Result<T>) -> Result<T> {
        let mut cache = self.cache.lock().await;
        let mut next = cache.clone();
        let value = f(&mut next)?;
        write_tree(&self.path, &next).await?;
        *cache = next;
        Ok(value)
    }
}

#[async_trait]
impl BrowserTree for FileBrowser {
    async fn get_tree(&self) -> Result<TreeNode> {
        Ok(self.cache.lock().await.clone())
    }

    async fn create(&self, details: CreateDetails) -> Result<TreeNode> {
        let id = uuid::Uuid::new_v4().to_string();
        let now = self.clock.now_millis();
        let node = self.mutate(|root| edit::create(root, details, id, now)).await?;
        self.events.emit(ChangeEvent::Created {
            id: node.id.clone(),
        });
        Ok(node)
    }

    async fn move_node(&self, id: &str, parent_id: &str, index: Option<i64>) -> Result<()> {
        self.mutate(|root| edit::move_node(root, id, parent_id, index))
            .await?;
        self.events.emit(ChangeEvent::Moved { id: id.to_string() });
        Ok(())
    }

    async fn update(&self, id: &str, title: &str) -> Result<()> {
        self.mutate(|root| edit::update(root, id, title)).await?;
        self.events.emit(ChangeEvent::Changed { id: id.to_string() });
        Ok(())
    }

    async fn remove_tree(&self, id: &str) -> Result<()> {
        let urls = self.mutate(|root| edit::remove_tree(root, id)).await?;
        self.events.emit(ChangeEvent::Removed {
            id: id.to_string(),
            urls,
        });
        Ok(())
    }

    fn changes(&self) -> Arc<EventBus<ChangeEvent>> {
        Arc::clone(&self.events)
    }
}

async fn read_tree(path: &Path) -> Result<Option<TreeNode>> {
    let contents = match fs::read_to_string(path).await {
        Ok(contents) => contents,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(BrowserError::Io(e.to_string())),
    };
    serde_json::from_str(&contents)
        .map(Some)
        .map_err(|e| BrowserError::Io(format!("malformed bookmark tree {:?}: {}", path, e)))
}

async fn write_tree(path: &Path, root: &TreeNode) -> Result<()> {
    let contents = serde_json::to_vec_pretty(root).map_err(|e| BrowserError::Io(e.to_string()))?;
    write_atomic(path, &contents)
        .await
        .map_err(|e| BrowserError::Io(e.to_string()))
}

/// Where a node sits and what it shows.
struct Placement<'a> {
    parent: &'a str,
    index: i64,
    title: &'a str,
    url: Option<&'a str>,
    node: &'a TreeNode,
}

fn index_tree(root: &TreeNode) -> HashMap<&str, Placement<'_>> {
    fn walk<'a>(node: &'a TreeNode, index: &mut HashMap<&'a str, Placement<'a>>) {
        for (position, child) in node.children().iter().enumerate() {
            index.insert(
                child.id.as_str(),
                Placement {
                    parent: node.id.as_str(),
                    index: child.index.unwrap_or(position as i64),
                    title: child.title(),
                    url: child.url.as_deref(),
                    node: child,
                },
            );
            walk(child, index);
        }
    }

    let mut index = HashMap::new();
    walk(root, &mut index);
    index
}

/// Events that turn `before` into `after`.
///
/// A removed subtree yields one `Removed` for its top node carrying every URL
/// beneath it. Every node new to the tree yields `Created`. A surviving node
/// whose parent or stored index changed yields `Moved`; one whose title or
/// URL changed yields `Changed`.
pub fn diff_trees(before: &TreeNode, after: &TreeNode) -> Vec<ChangeEvent> {
    let old = index_tree(before);
    let new = index_tree(after);
    let mut events = Vec::new();

    let mut removed: Vec<(&str, &Placement)> = old
        .iter()
        .filter(|(id, _)| !new.contains_key(*id))
        .filter(|(_, placement)| {
            placement.parent == before.id.as_str() || new.contains_key(placement.parent)
        })
        .map(|(id, placement)| (*id, placement))
        .collect();
    removed.sort_by_key(|(id, _)| *id);
    for (id, placement) in removed {
        events.push(ChangeEvent::Removed {
            id: id.to_string(),
            urls: placement.node.urls(),
        });
    }

    let mut survivors: Vec<(&str, &Placement)> =
        new.iter().map(|(id, placement)| (*id, placement)).collect();
    survivors.sort_by_key(|(id, _)| *id);
    for (id, placement) in survivors {
        let Some(previous) = old.get(id) else {
            events.push(ChangeEvent::Created { id: id.to_string() });
            continue;
        };
        if previous.parent != placement.parent || previous.index != placement.index {
            events.push(ChangeEvent::Moved { id: id.to_string() });
        }
        if previous.title != placement.title || previous.url != placement.url {
            events.push(ChangeEvent::Changed { id: id.to_string() });
        }
    }

    events
}
