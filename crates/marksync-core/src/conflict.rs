//! Resolution of identity-addressed conflicts.
//!
//! The URL/path-keyed [`crate::merge`] covers plain snapshots. Replicas that
//! keep their own per-item identity (richer records with tags and notes)
//! resolve same-id disagreements here under a configurable strategy.

use crate::config::SyncConfig;

use chrono::DateTime;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap};

/// How two versions of the same record are reconciled.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ConflictStrategy {
    /// Later `modified_at` wins; local wins ties and unparseable timestamps.
    #[default]
    NewerWins,
    LocalWins,
    RemoteWins,
    /// Union set-valued fields, newer-wins for scalars.
    Merge,
    /// Hand both versions back for a human decision.
    Manual,
}

/// A bookmark with replica-maintained identity and metadata.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BookmarkRecord {
    pub id: String,
    pub url: String,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub folder_path: String,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub notes: Option<String>,
    /// RFC 3339 instant or integer milliseconds.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub modified_at: Option<String>,
}

/// A folder with replica-maintained identity.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FolderRecord {
    pub id: String,
    #[serde(default)]
    pub title: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub modified_at: Option<String>,
    #[serde(default)]
    pub children: Vec<RecordNode>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum RecordNode {
    Bookmark(BookmarkRecord),
    Folder(FolderRecord),
}

impl RecordNode {
    pub fn id(&self) -> &str {
        match self {
            RecordNode::Bookmark(b) => &b.id,
            RecordNode::Folder(f) => &f.id,
        }
    }

    fn modified_at(&self) -> Option<&str> {
        match self {
            RecordNode::Bookmark(b) => b.modified_at.as_deref(),
            RecordNode::Folder(f) => f.modified_at.as_deref(),
        }
    }
}

/// Both sides of an unresolved conflict.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ConflictDescriptor<T> {
    /// Always `true`; lets consumers tell a descriptor from a resolved value.
    pub conflict: bool,
    pub local: T,
    pub remote: T,
}

/// Outcome of resolving one record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(untagged)]
pub enum Resolution<T> {
    Resolved(T),
    Conflict(ConflictDescriptor<T>),
}

impl<T> Resolution<T> {
    fn conflict(local: T, remote: T) -> Self {
        Resolution::Conflict(ConflictDescriptor {
            conflict: true,
            local,
            remote,
        })
    }

    pub fn is_conflict(&self) -> bool {
        matches!(self, Resolution::Conflict(_))
    }

    /// The resolved value, or the local side of an unresolved conflict.
    pub fn into_value(self) -> T {
        match self {
            Resolution::Resolved(value) => value,
            Resolution::Conflict(descriptor) => descriptor.local,
        }
    }
}

/// Parse a `modified_at` value. Accepts RFC 3339 or integer milliseconds.
pub fn parse_timestamp(raw: &str) -> Option<i64> {
    let raw = raw.trim();
    if let Ok(millis) = raw.parse::<i64>() {
        return Some(millis);
    }
    DateTime::parse_from_rfc3339(raw)
        .ok()
        .map(|dt| dt.timestamp_millis())
}

/// True only when both timestamps parse and `remote` is strictly later.
fn remote_is_newer(local: Option<&str>, remote: Option<&str>) -> bool {
    match (
        local.and_then(parse_timestamp),
        remote.and_then(parse_timestamp),
    ) {
        (Some(local), Some(remote)) => remote > local,
        _ => false,
    }
}

fn tag_set(tags: &[String]) -> BTreeSet<&str> {
    tags.iter().map(String::as_str).collect()
}

fn union_tags(local: &[String], remote: &[String]) -> Vec<String> {
    let mut seen = BTreeSet::new();
    local
        .iter()
        .chain(remote)
        .filter(|tag| seen.insert(tag.as_str()))
        .cloned()
        .collect()
}

/// Whether two bookmark records differ in any content field. `id` and
/// `modified_at` are not content.
pub fn detect_conflict(a: &BookmarkRecord, b: &BookmarkRecord) -> bool {
    a.title != b.title
        || a.url != b.url
        || a.folder_path != b.folder_path
        || a.notes != b.notes
        || tag_set(&a.tags) != tag_set(&b.tags)
}

/// Whether two folder records differ in title or, recursively, in children.
pub fn detect_folder_conflict(a: &FolderRecord, b: &FolderRecord) -> bool {
    if a.title != b.title || a.children.len() != b.children.len() {
        return true;
    }
    let theirs: HashMap<&str, &RecordNode> = b.children.iter().map(|c| (c.id(), c)).collect();
    a.children.iter().any(|child| match (child, theirs.get(child.id())) {
        (RecordNode::Bookmark(x), Some(RecordNode::Bookmark(y))) => detect_conflict(x, y),
        (RecordNode::Folder(x), Some(RecordNode::Folder(y))) => detect_folder_conflict(x, y),
        _ => true,
    })
}

/// Strategy-driven resolver.
#[derive(Debug, Clone, Copy, Default)]
pub struct ConflictResolver {
    strategy: ConflictStrategy,
}

impl ConflictResolver {
    pub fn new(strategy: ConflictStrategy) -> Self {
        Self { strategy }
    }

    pub fn from_config(config: &SyncConfig) -> Self {
        Self::new(config.conflict_strategy)
    }

    pub fn strategy(&self) -> ConflictStrategy {
        self.strategy
    }

    /// Pick the side that wins scalar fields.
    fn remote_wins(&self, local: Option<&str>, remote: Option<&str>) -> bool {
        match self.strategy {
            ConflictStrategy::LocalWins => false,
            ConflictStrategy::RemoteWins => true,
            ConflictStrategy::NewerWins | ConflictStrategy::Merge | ConflictStrategy::Manual => {
                remote_is_newer(local, remote)
            }
        }
    }

    /// Resolve two versions of one bookmark. A missing side yields the other.
    pub fn resolve(
        &self,
        local: Option<&BookmarkRecord>,
        remote: Option<&BookmarkRecord>,
    ) -> Option<Resolution<BookmarkRecord>> {
        let (local, remote) = match (local, remote) {
            (None, None) => return None,
            (Some(only), None) | (None, Some(only)) => {
                return Some(Resolution::Resolved(only.clone()));
            }
            (Some(local), Some(remote)) => (local, remote),
        };

        if !detect_conflict(local, remote) {
            return Some(Resolution::Resolved(local.clone()));
        }
        if self.strategy == ConflictStrategy::Manual {
            return Some(Resolution::conflict(local.clone(), remote.clone()));
        }

        let remote_wins =
            self.remote_wins(local.modified_at.as_deref(), remote.modified_at.as_deref());
        let mut winner = if remote_wins { remote.clone() } else { local.clone() };
        if self.strategy == ConflictStrategy::Merge {
            winner.tags = union_tags(&local.tags, &remote.tags);
        }
        Some(Resolution::Resolved(winner))
    }

    /// Resolve two versions of a folder, recursing into children.
    ///
    /// Folder fields resolve like bookmark fields. Children are unioned by
    /// id (local order first, then remote-only children), and children present
    /// on both sides are resolved recursively.
    pub fn resolve_folder(
        &self,
        local: Option<&FolderRecord>,
        remote: Option<&FolderRecord>,
    ) -> Option<Resolution<FolderRecord>> {
        let (local, remote) = match (local, remote) {
            (None, None) => return None,
            (Some(only), None) | (None, Some(only)) => {
                return Some(Resolution::Resolved(only.clone()));
            }
            (Some(local), Some(remote)) => (local, remote),
        };

        if self.strategy == ConflictStrategy::Manual {
            if detect_folder_conflict(local, remote) {
                return Some(Resolution::conflict(local.clone(), remote.clone()));
            }
            return Some(Resolution::Resolved(local.clone()));
        }

        let remote_wins =
            self.remote_wins(local.modified_at.as_deref(), remote.modified_at.as_deref());
        let base = if remote_wins { remote } else { local };

        Some(Resolution::Resolved(FolderRecord {
            id: local.id.clone(),
            title: base.title.clone(),
            modified_at: base.modified_at.clone(),
            children: self.merge_children(&local.children, &remote.children),
        }))
    }

    fn merge_children(&self, local: &[RecordNode], remote: &[RecordNode]) -> Vec<RecordNode> {
        let theirs: HashMap<&str, &RecordNode> = remote.iter().map(|c| (c.id(), c)).collect();
        let ours: BTreeSet<&str> = local.iter().map(RecordNode::id).collect();

        let mut children: Vec<RecordNode> = local
            .iter()
            .map(|child| match theirs.get(child.id()) {
                Some(other) => self.resolve_node(child, other),
                None => child.clone(),
            })
            .collect();
        children.extend(
            remote
                .iter()
                .filter(|child| !ours.contains(child.id()))
                .cloned(),
        );
        children
    }

    fn resolve_node(&self, local: &RecordNode, remote: &RecordNode) -> RecordNode {
        match (local, remote) {
            (RecordNode::Bookmark(l), RecordNode::Bookmark(r)) => self
                .resolve(Some(l), Some(r))
                .map(|res| RecordNode::Bookmark(res.into_value()))
                .unwrap_or_else(|| local.clone()),
            (RecordNode::Folder(l), RecordNode::Folder(r)) => self
                .resolve_folder(Some(l), Some(r))
                .map(|res| RecordNode::Folder(res.into_value()))
                .unwrap_or_else(|| local.clone()),
            // Same id, different kinds: fall back to the scalar rule.
            _ => {
                if self.remote_wins(local.modified_at(), remote.modified_at()) {
                    remote.clone()
                } else {
                    local.clone()
                }
            }
        }
    }
}
