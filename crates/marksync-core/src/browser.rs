//! Browser bookmark tree collaborator.
//!
//! Implementations:
//! - `InMemoryBrowser` - For testing and offline tooling
//! - `FileBrowser` (in marksync-daemon) - A JSON tree file on disk
//!
//! Every mutation is keyed by the browser-native id. The engine never invents
//! those ids; it only passes them through.

use crate::clock::Clock;
use crate::events::{ChangeEvent, EventBus};
use crate::model::{Millis, TreeNode};
use crate::path::CanonicalRoot;

use async_trait::async_trait;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum BrowserError {
    #[error("Bookmark node not found: {0}")]
    NotFound(String),

    #[error("Invalid operation: {0}")]
    InvalidOperation(String),

    #[error("IO error: {0}")]
    Io(String),
}

pub type Result<T> = std::result::Result<T, BrowserError>;

/// Arguments for creating a node. A missing `url` creates a folder.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CreateDetails {
    pub parent_id: String,
    pub title: String,
    pub url: Option<String>,
    /// Position among siblings; appended when absent or out of range.
    pub index: Option<i64>,
}

/// A replica's native bookmark tree.
#[async_trait]
pub trait BrowserTree: Send + Sync {
    /// The full tree, starting at the untitled root.
    async fn get_tree(&self) -> Result<TreeNode>;

    /// Create a node and return it with its assigned id.
    async fn create(&self, details: CreateDetails) -> Result<TreeNode>;

    /// Move a node under `parent_id`, at `index` if given.
    async fn move_node(&self, id: &str, parent_id: &str, index: Option<i64>) -> Result<()>;

    /// Retitle a node.
    async fn update(&self, id: &str, title: &str) -> Result<()>;

    /// Remove a node and its whole subtree.
    async fn remove_tree(&self, id: &str) -> Result<()>;

    /// Notifications for every mutation, whoever made it.
    fn changes(&self) -> Arc<EventBus<ChangeEvent>>;
}

/// Default root: the untitled node plus the three canonical containers.
pub fn default_root() -> TreeNode {
    let containers = [
        ("1", CanonicalRoot::Toolbar),
        ("2", CanonicalRoot::Other),
        ("3", CanonicalRoot::Menu),
    ]
    .into_iter()
    .enumerate()
    .map(|(position, (id, root))| TreeNode {
        index: Some(position as i64),
        ..TreeNode::folder(id, root.browser_title(), Vec::new())
    })
    .collect();
    TreeNode::folder("0", "", containers)
}

/// Largest numeric id in the tree, for seeding an id counter.
pub fn max_numeric_id(node: &TreeNode) -> u64 {
    node.children()
        .iter()
        .map(max_numeric_id)
        .fold(node.id.parse().unwrap_or(0), u64::max)
}

fn find_mut<'a>(node: &'a mut TreeNode, id: &str) -> Option<&'a mut TreeNode> {
    if node.id == id {
        return Some(node);
    }
    node.children
        .as_mut()?
        .iter_mut()
        .find_map(|child| find_mut(child, id))
}

fn reindex(children: &mut [TreeNode]) {
    for (position, child) in children.iter_mut().enumerate() {
        child.index = Some(position as i64);
    }
}

fn insert_at(children: &mut Vec<TreeNode>, node: TreeNode, index: Option<i64>) {
    let position = index
        .and_then(|i| usize::try_from(i).ok())
        .map_or(children.len(), |i| i.min(children.len()));
    children.insert(position, node);
    reindex(children);
}

fn detach(node: &mut TreeNode, id: &str) -> Option<TreeNode> {
    let children = node.children.as_mut()?;
    if let Some(position) = children.iter().position(|child| child.id == id) {
        let removed = children.remove(position);
        reindex(children);
        return Some(removed);
    }
    children.iter_mut().find_map(|child| detach(child, id))
}

fn guard_structural(root: &TreeNode, id: &str) -> Result<()> {
    let is_container = root
        .children()
        .iter()
        .any(|child| child.id == id && child.is_folder());
    if root.id == id || is_container {
        return Err(BrowserError::InvalidOperation(format!(
            "cannot modify root container {id}"
        )));
    }
    Ok(())
}

/// Tree mutations shared by every `BrowserTree` that keeps its tree in memory.
pub mod edit {
    use super::*;

    pub fn create(
        root: &mut TreeNode,
        details: CreateDetails,
        id: String,
        now: Millis,
    ) -> Result<TreeNode> {
        let parent = find_mut(root, &details.parent_id)
            .ok_or_else(|| BrowserError::NotFound(details.parent_id.clone()))?;
        if !parent.is_folder() {
            return Err(BrowserError::InvalidOperation(format!(
                "parent {} is not a folder",
                details.parent_id
            )));
        }
        let is_folder = details.url.is_none();
        let node = TreeNode {
            id: id.clone(),
            title: Some(details.title),
            url: details.url,
            index: None,
            date_added: Some(now),
            children: is_folder.then(Vec::new),
        };
        let siblings = parent.children.get_or_insert_with(Vec::new);
        insert_at(siblings, node, details.index);
        siblings
            .iter()
            .find(|child| child.id == id)
            .cloned()
            .ok_or(BrowserError::NotFound(id))
    }

    pub fn move_node(
        root: &mut TreeNode,
        id: &str,
        parent_id: &str,
        index: Option<i64>,
    ) -> Result<()> {
        guard_structural(root, id)?;
        let moving = root
            .find(id)
            .ok_or_else(|| BrowserError::NotFound(id.to_string()))?;
        if moving.find(parent_id).is_some() {
            return Err(BrowserError::InvalidOperation(format!(
                "cannot move {id} into its own subtree"
            )));
        }
        match root.find(parent_id) {
            None => return Err(BrowserError::NotFound(parent_id.to_string())),
            Some(parent) if !parent.is_folder() => {
                return Err(BrowserError::InvalidOperation(format!(
                    "parent {parent_id} is not a folder"
                )));
            }
            Some(_) => {}
        }

        let node = detach(root, id).ok_or_else(|| BrowserError::NotFound(id.to_string()))?;
        let parent = find_mut(root, parent_id)
            .ok_or_else(|| BrowserError::NotFound(parent_id.to_string()))?;
        insert_at(parent.children.get_or_insert_with(Vec::new), node, index);
        Ok(())
    }

    pub fn update(root: &mut TreeNode, id: &str, title: &str) -> Result<()> {
        let node = find_mut(root, id).ok_or_else(|| BrowserError::NotFound(id.to_string()))?;
        node.title = Some(title.to_string());
        Ok(())
    }

    /// Remove a subtree, returning every bookmark URL it held.
    pub fn remove_tree(root: &mut TreeNode, id: &str) -> Result<Vec<String>> {
        guard_structural(root, id)?;
        let removed = detach(root, id).ok_or_else(|| BrowserError::NotFound(id.to_string()))?;
        Ok(removed.urls())
    }
}

/// In-memory browser tree for testing.
pub struct InMemoryBrowser {
    root: Mutex<TreeNode>,
    next_id: AtomicU64,
    clock: Arc<dyn Clock>,
    events: Arc<EventBus<ChangeEvent>>,
}

impl InMemoryBrowser {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self::with_tree(default_root(), clock)
    }

    pub fn with_tree(root: TreeNode, clock: Arc<dyn Clock>) -> Self {
        let next_id = max_numeric_id(&root) + 1;
        Self {
            root: Mutex::new(root),
            next_id: AtomicU64::new(next_id),
            clock,
            events: Arc::new(EventBus::new()),
        }
    }

    /// Current tree without going through the async trait.
    pub fn tree(&self) -> TreeNode {
        self.root.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    fn with_root<T>(&self, f: impl FnOnce(&mut TreeNode) -> Result<T>) -> Result<T> {
        let mut root = self.root.lock().unwrap_or_else(|e| e.into_inner());
        f(&mut root)
    }
}

#[async_trait]
impl BrowserTree for InMemoryBrowser {
    async fn get_tree(&self) -> Result<TreeNode> {
        Ok(self.tree())
    }

    async fn create(&self, details: CreateDetails) -> Result<TreeNode> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed).to_string();
        let now = self.clock.now_millis();
        let node = self.with_root(|root| edit::create(root, details, id, now))?;
        self.events.emit(ChangeEvent::Created {
            id: node.id.clone(),
        });
        Ok(node)
    }

    async fn move_node(&self, id: &str, parent_id: &str, index: Option<i64>) -> Result<()> {
        self.with_root(|root| edit::move_node(root, id, parent_id, index))?;
        self.events.emit(ChangeEvent::Moved { id: id.to_string() });
        Ok(())
    }

    async fn update(&self, id: &str, title: &str) -> Result<()> {
        self.with_root(|root| edit::update(root, id, title))?;
        self.events.emit(ChangeEvent::Changed { id: id.to_string() });
        Ok(())
    }

    async fn remove_tree(&self, id: &str) -> Result<()> {
        let urls = self.with_root(|root| edit::remove_tree(root, id))?;
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

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::codec::flatten;

    fn browser() -> InMemoryBrowser {
        InMemoryBrowser::new(Arc::new(ManualClock::new(1_000)))
    }

    fn bookmark(parent: &str, title: &str, url: &str) -> CreateDetails {
        CreateDetails {
            parent_id: parent.into(),
            title: title.into(),
            url: Some(url.into()),
            index: None,
        }
    }

    #[tokio::test]
    async fn test_create_assigns_id_and_date() {
        let browser = browser();
        let node = browser.create(bookmark("1", "X", "https://x.com")).await.unwrap();
        assert_eq!(node.id, "4");
        assert_eq!(node.date_added, Some(1_000));
        assert_eq!(node.index, Some(0));

        let items = flatten(&browser.get_tree().await.unwrap());
        assert_eq!(items.len(), 1);
        assert_eq!(items[0].folder_path(), "toolbar");
    }

    #[tokio::test]
    async fn test_create_index_is_clamped() {
        let browser = browser();
        browser.create(bookmark("1", "A", "https://a.com")).await.unwrap();
        let node = browser
            .create(CreateDetails {
                index: Some(99),
                ..bookmark("1", "B", "https://b.com")
            })
            .await
            .unwrap();
        assert_eq!(node.index, Some(1));

        let first = browser
            .create(CreateDetails {
                index: Some(0),
                ..bookmark("1", "C", "https://c.com")
            })
            .await
            .unwrap();
        assert_eq!(first.index, Some(0));
        let tree = browser.tree();
        let titles: Vec<_> = tree.find("1").unwrap().children().iter().map(TreeNode::title).collect();
        assert_eq!(titles, vec!["C", "A", "B"]);
    }

    #[tokio::test]
    async fn test_create_under_bookmark_is_rejected() {
        let browser = browser();
        let node = browser.create(bookmark("1", "X", "https://x.com")).await.unwrap();
        let err = browser.create(bookmark(&node.id, "Y", "https://y.com")).await.unwrap_err();
        assert!(matches!(err, BrowserError::InvalidOperation(_)));
        let err = browser.create(bookmark("404", "Y", "https://y.com")).await.unwrap_err();
        assert!(matches!(err, BrowserError::NotFound(_)));
    }

    #[tokio::test]
    async fn test_move_and_update() {
        let browser = browser();
        let folder = browser
            .create(CreateDetails {
                parent_id: "1".into(),
                title: "Work".into(),
                url: None,
                index: None,
            })
            .await
            .unwrap();
        let node = browser.create(bookmark("2", "X", "https://x.com")).await.unwrap();

        browser.move_node(&node.id, &folder.id, None).await.unwrap();
        browser.update(&node.id, "Renamed").await.unwrap();

        let items = flatten(&browser.tree());
        let moved = items.iter().find(|i| i.url() == Some("https://x.com")).unwrap();
        assert_eq!(moved.folder_path(), "toolbar/Work");
        assert_eq!(moved.title(), "Renamed");
    }

    #[tokio::test]
    async fn test_move_into_own_subtree_rejected() {
        let browser = browser();
        let outer = browser
            .create(CreateDetails {
                parent_id: "1".into(),
                title: "Outer".into(),
                ..Default::default()
            })
            .await
            .unwrap();
        let inner = browser
            .create(CreateDetails {
                parent_id: outer.id.clone(),
                title: "Inner".into(),
                ..Default::default()
            })
            .await
            .unwrap();
        let err = browser.move_node(&outer.id, &inner.id, None).await.unwrap_err();
        assert!(matches!(err, BrowserError::InvalidOperation(_)));
    }

    #[tokio::test]
    async fn test_remove_tree_reports_urls() {
        let browser = browser();
        let folder = browser
            .create(CreateDetails {
                parent_id: "1".into(),
                title: "Work".into(),
                ..Default::default()
            })
            .await
            .unwrap();
        browser.create(bookmark(&folder.id, "A", "https://a.com")).await.unwrap();

        let events = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&events);
        let _sub = browser.changes().subscribe(move |event| sink.lock().unwrap().push(event));

        browser.remove_tree(&folder.id).await.unwrap();
        assert_eq!(
            *events.lock().unwrap(),
            vec![ChangeEvent::Removed {
                id: folder.id.clone(),
                urls: vec!["https://a.com".into()],
            }]
        );
        assert!(flatten(&browser.tree()).is_empty());
    }

    #[tokio::test]
    async fn test_root_containers_are_protected() {
        let browser = browser();
        assert!(matches!(
            browser.remove_tree("1").await,
            Err(BrowserError::InvalidOperation(_))
        ));
        assert!(matches!(
            browser.move_node("2", "1", None).await,
            Err(BrowserError::InvalidOperation(_))
        ));
    }

    #[test]
    fn test_with_tree_continues_numbering() {
        let mut root = default_root();
        if let Some(children) = root.children.as_mut() {
            children[0]
                .children
                .get_or_insert_with(Vec::new)
                .push(TreeNode::bookmark("41", "X", "https://x.com"));
        }
        let browser = InMemoryBrowser::with_tree(root, Arc::new(ManualClock::new(0)));
        assert_eq!(browser.next_id.load(Ordering::Relaxed), 42);
    }
}
