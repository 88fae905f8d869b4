//! Bookmark, folder, and tombstone types shared by replicas and the
//! coordination service.
//!
//! Flat items travel as `{"type": "bookmark" | "folder", ...}` objects with
//! camelCase fields. Anything the engine does not understand is ignored on
//! input, so newer replicas can add fields without breaking older ones.

use crate::path::normalize_path;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

/// Milliseconds since the Unix epoch.
pub type Millis = i64;

/// A bookmark. Its identity across replicas is the literal `url`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BookmarkItem {
    /// Replica-local browser id. Never part of identity or checksum.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    pub url: String,
    /// May be empty. Never defaulted to the URL.
    #[serde(default)]
    pub title: String,
    /// Canonical `/`-joined titles of the ancestor folders.
    #[serde(default)]
    pub folder_path: String,
    /// Position within the folder.
    #[serde(default)]
    pub index: i64,
    /// Creation (or re-creation) instant. Excluded from the checksum.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub date_added: Option<Millis>,
}

/// A folder. Identity is `(folder_path, title)` where `folder_path` is the
/// path of its parent.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FolderItem {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub folder_path: String,
    #[serde(default)]
    pub index: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub date_added: Option<Millis>,
}

/// One entry of a flat snapshot.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum Item {
    Bookmark(BookmarkItem),
    Folder(FolderItem),
}

/// Cross-replica identity of an item.
///
/// Folder paths are normalized before the key is built, so keys coming from
/// different browser families compare equal.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ItemKey {
    Bookmark(String),
    Folder { folder_path: String, title: String },
}

impl Item {
    pub fn bookmark(url: &str, title: &str, folder_path: &str, index: i64) -> Self {
        Item::Bookmark(BookmarkItem {
            id: None,
            url: url.to_string(),
            title: title.to_string(),
            folder_path: folder_path.to_string(),
            index,
            date_added: None,
        })
    }

    pub fn folder(title: &str, folder_path: &str, index: i64) -> Self {
        Item::Folder(FolderItem {
            id: None,
            title: title.to_string(),
            folder_path: folder_path.to_string(),
            index,
            date_added: None,
        })
    }

    pub fn key(&self) -> ItemKey {
        match self {
            Item::Bookmark(b) => ItemKey::Bookmark(b.url.clone()),
            Item::Folder(f) => ItemKey::Folder {
                folder_path: normalize_path(&f.folder_path),
                title: f.title.clone(),
            },
        }
    }

    pub fn is_folder(&self) -> bool {
        matches!(self, Item::Folder(_))
    }

    pub fn url(&self) -> Option<&str> {
        match self {
            Item::Bookmark(b) => Some(&b.url),
            Item::Folder(_) => None,
        }
    }

    pub fn id(&self) -> Option<&str> {
        match self {
            Item::Bookmark(b) => b.id.as_deref(),
            Item::Folder(f) => f.id.as_deref(),
        }
    }

    pub fn title(&self) -> &str {
        match self {
            Item::Bookmark(b) => &b.title,
            Item::Folder(f) => &f.title,
        }
    }

    pub fn folder_path(&self) -> &str {
        match self {
            Item::Bookmark(b) => &b.folder_path,
            Item::Folder(f) => &f.folder_path,
        }
    }

    pub fn index(&self) -> i64 {
        match self {
            Item::Bookmark(b) => b.index,
            Item::Folder(f) => f.index,
        }
    }

    pub fn date_added(&self) -> Option<Millis> {
        match self {
            Item::Bookmark(b) => b.date_added,
            Item::Folder(f) => f.date_added,
        }
    }

    /// Overwrite the mutable fields (`title`, `folder_path`, `index`) with
    /// `other`'s, keeping this item's id. Returns whether anything changed.
    pub fn overwrite_from(&mut self, other: &Item) -> bool {
        let title = other.title().to_string();
        let folder_path = normalize_path(other.folder_path());
        let index = other.index();
        let changed = self.title() != title
            || normalize_path(self.folder_path()) != folder_path
            || self.index() != index;
        match self {
            Item::Bookmark(b) => {
                b.title = title;
                b.folder_path = folder_path;
                b.index = index;
            }
            Item::Folder(f) => {
                f.title = title;
                f.folder_path = folder_path;
                f.index = index;
            }
        }
        changed
    }

    /// Copy with the folder path rewritten to its canonical form.
    pub fn normalized(&self) -> Item {
        let mut item = self.clone();
        match &mut item {
            Item::Bookmark(b) => b.folder_path = normalize_path(&b.folder_path),
            Item::Folder(f) => f.folder_path = normalize_path(&f.folder_path),
        }
        item
    }

    /// Copy without the replica-local id, as sent upstream.
    pub fn without_local_id(&self) -> Item {
        let mut item = self.clone();
        match &mut item {
            Item::Bookmark(b) => b.id = None,
            Item::Folder(f) => f.id = None,
        }
        item
    }

    /// Parse one flat item leniently. Non-objects yield `None`; missing
    /// fields fall back to empty string, zero index, and a type inferred
    /// from the presence of `url`.
    pub fn from_value(value: &Value) -> Option<Item> {
        let obj = value.as_object()?;
        let text = |key: &str| obj.get(key).and_then(Value::as_str).map(str::to_string);
        let id = obj.get("id").and_then(|v| match v {
            Value::String(s) => Some(s.clone()),
            Value::Number(n) => Some(n.to_string()),
            _ => None,
        });
        let title = text("title").unwrap_or_default();
        let folder_path = text("folderPath").unwrap_or_default();
        let index = obj.get("index").and_then(Value::as_i64).unwrap_or(0);
        let date_added = obj.get("dateAdded").and_then(Value::as_i64);
        let url = text("url");

        let is_folder = match obj.get("type").and_then(Value::as_str) {
            Some("folder") => true,
            Some("bookmark") => false,
            _ => url.is_none(),
        };

        if is_folder {
            Some(Item::Folder(FolderItem {
                id,
                title,
                folder_path,
                index,
                date_added,
            }))
        } else {
            Some(Item::Bookmark(BookmarkItem {
                id,
                url: url.unwrap_or_default(),
                title,
                folder_path,
                index,
                date_added,
            }))
        }
    }
}

/// Parse an untyped flat snapshot. Anything that is not an array yields an
/// empty list; elements that are not objects are skipped.
pub fn parse_items(value: &Value) -> Vec<Item> {
    match value {
        Value::Array(entries) => entries.iter().filter_map(Item::from_value).collect(),
        _ => Vec::new(),
    }
}

/// A deletion witness for a URL.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Tombstone {
    pub url: String,
    pub deleted_at: Millis,
}

impl Tombstone {
    pub fn new(url: &str, deleted_at: Millis) -> Self {
        Self {
            url: url.to_string(),
            deleted_at,
        }
    }
}

/// Parse an untyped tombstone list, skipping malformed entries.
pub fn parse_tombstones(value: &Value) -> Vec<Tombstone> {
    let Value::Array(entries) = value else {
        return Vec::new();
    };
    entries
        .iter()
        .filter_map(|entry| {
            let obj = entry.as_object()?;
            let url = obj.get("url")?.as_str()?;
            let deleted_at = obj.get("deletedAt").and_then(Value::as_i64).unwrap_or(0);
            Some(Tombstone::new(url, deleted_at))
        })
        .collect()
}

/// The unit of comparison: flat items plus the tombstones travelling with
/// them.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Snapshot {
    #[serde(default)]
    pub items: Vec<Item>,
    #[serde(default)]
    pub tombstones: Vec<Tombstone>,
}

/// A node of a browser's native bookmark tree.
///
/// Folders have no `url`. `id` is opaque browser data; the engine only passes
/// it through.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TreeNode {
    #[serde(default)]
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub index: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub date_added: Option<Millis>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub children: Option<Vec<TreeNode>>,
}

impl TreeNode {
    pub fn folder(id: &str, title: &str, children: Vec<TreeNode>) -> Self {
        Self {
            id: id.to_string(),
            title: Some(title.to_string()),
            children: Some(children),
            ..Default::default()
        }
    }

    pub fn bookmark(id: &str, title: &str, url: &str) -> Self {
        Self {
            id: id.to_string(),
            title: Some(title.to_string()),
            url: Some(url.to_string()),
            ..Default::default()
        }
    }

    pub fn is_folder(&self) -> bool {
        self.url.is_none()
    }

    pub fn title(&self) -> &str {
        self.title.as_deref().unwrap_or("")
    }

    pub fn children(&self) -> &[TreeNode] {
        self.children.as_deref().unwrap_or(&[])
    }

    /// Depth-first search by id.
    pub fn find(&self, id: &str) -> Option<&TreeNode> {
        if self.id == id {
            return Some(self);
        }
        self.children().iter().find_map(|child| child.find(id))
    }

    /// URLs of every bookmark in this subtree, including the node itself.
    pub fn urls(&self) -> Vec<String> {
        let mut urls = Vec::new();
        let mut stack = vec![self];
        while let Some(node) = stack.pop() {
            if let Some(url) = &node.url {
                urls.push(url.clone());
            }
            stack.extend(node.children());
        }
        urls
    }
}

/// A node of the nested interchange format.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExportNode {
    #[serde(default)]
    pub title: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub index: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub date_added: Option<Millis>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub children: Vec<ExportNode>,
}

impl ExportNode {
    pub fn is_folder(&self) -> bool {
        self.url.is_none()
    }
}

/// The nested "roots" interchange object.
///
/// Paths whose root is not one of the three canonical containers are kept
/// under `extra`, keyed by their first path segment.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExportRoots {
    #[serde(default)]
    pub toolbar: Vec<ExportNode>,
    #[serde(default)]
    pub menu: Vec<ExportNode>,
    #[serde(default)]
    pub other: Vec<ExportNode>,
    #[serde(flatten)]
    pub extra: BTreeMap<String, Vec<ExportNode>>,
}

impl ExportRoots {
    /// `(root name, nodes)` pairs, canonical roots first.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &[ExportNode])> {
        [
            ("toolbar", self.toolbar.as_slice()),
            ("menu", self.menu.as_slice()),
            ("other", self.other.as_slice()),
        ]
        .into_iter()
        .chain(self.extra.iter().map(|(k, v)| (k.as_str(), v.as_slice())))
    }

    pub(crate) fn root_mut(&mut self, name: &str) -> &mut Vec<ExportNode> {
        match name {
            "toolbar" => &mut self.toolbar,
            "menu" => &mut self.menu,
            "other" => &mut self.other,
            _ => self.extra.entry(name.to_string()).or_default(),
        }
    }
}
