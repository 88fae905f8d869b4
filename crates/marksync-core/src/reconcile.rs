//! Pure planning step of a client sync cycle.
//!
//! Given the local snapshot, the fetched remote snapshot, and the set of
//! items the user touched since the last sync, [`plan`] works out the merged
//! state and the local tree operations that realize it. Nothing here touches
//! the browser; the orchestrator applies the resulting ops.

use crate::merge::merge;
use crate::model::{Item, ItemKey, Millis, Tombstone};
use crate::path::normalize_path;
use crate::service::RemoteSnapshot;
use crate::tombstone::{apply_tombstones_locally, merge_tombstones, prune_expired, visible_items};

use std::collections::{BTreeSet, HashMap, HashSet};
use std::time::Duration;

/// Where an item should sit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Placement {
    pub folder_path: String,
    pub index: i64,
}

/// One local tree mutation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LocalOp {
    /// Remove a node buried by a tombstone.
    Delete { id: String, url: Option<String> },
    /// Create an item that exists remotely but not locally.
    Create { item: Item },
    /// Retitle and/or relocate an existing node.
    Update {
        id: String,
        title: Option<String>,
        placement: Option<Placement>,
    },
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReconcileStats {
    pub created: usize,
    pub updated: usize,
    pub deleted: usize,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReconcilePlan {
    /// Local state once every op is applied.
    pub merged: Vec<Item>,
    /// Merged and pruned tombstones to keep locally.
    pub tombstones: Vec<Tombstone>,
    /// Deletes first, then folder creates parents-first, then bookmark
    /// creates, then updates.
    pub ops: Vec<LocalOp>,
    pub stats: ReconcileStats,
}

fn depth(path: &str) -> usize {
    if path.is_empty() {
        0
    } else {
        path.matches('/').count() + 1
    }
}

/// Plan a sync cycle.
///
/// Remote items the user has not touched win over local copies. Remote items
/// matching a touched local item are left out, so a pending local edit is
/// pushed instead of being reverted by a stale remote version.
pub fn plan(
    local: &[Item],
    remote: &RemoteSnapshot,
    local_tombstones: &[Tombstone],
    touched_ids: &BTreeSet<String>,
    now: Millis,
    retention: Duration,
) -> ReconcilePlan {
    let tombstones = prune_expired(
        &merge_tombstones(local_tombstones, &remote.tombstones),
        now,
        retention,
    );

    let doomed = apply_tombstones_locally(&tombstones, local);
    let surviving = visible_items(local, &tombstones);

    let touched: HashSet<ItemKey> = surviving
        .iter()
        .filter(|item| item.id().is_some_and(|id| touched_ids.contains(id)))
        .map(Item::key)
        .collect();
    let candidates: Vec<Item> = visible_items(&remote.items, &tombstones)
        .into_iter()
        .filter(|item| !touched.contains(&item.key()))
        .collect();

    let merged = merge(&surviving, &candidates).merged;

    let by_key: HashMap<ItemKey, &Item> = surviving.iter().map(|item| (item.key(), item)).collect();
    let mut deletes = Vec::new();
    let mut folder_creates = Vec::new();
    let mut bookmark_creates = Vec::new();
    let mut updates = Vec::new();

    for item in &doomed {
        if let Some(id) = item.id() {
            deletes.push(LocalOp::Delete {
                id: id.to_string(),
                url: item.url().map(str::to_string),
            });
        }
    }

    for item in &merged {
        let Some(existing) = by_key.get(&item.key()) else {
            if item.is_folder() {
                folder_creates.push(item.clone());
            } else {
                bookmark_creates.push(item.clone());
            }
            continue;
        };
        let Some(id) = existing.id() else {
            continue;
        };

        let title = (existing.title() != item.title()).then(|| item.title().to_string());
        let folder_path = normalize_path(item.folder_path());
        let placement = (normalize_path(existing.folder_path()) != folder_path
            || existing.index() != item.index())
        .then(|| Placement {
            folder_path,
            index: item.index(),
        });
        if title.is_some() || placement.is_some() {
            updates.push(LocalOp::Update {
                id: id.to_string(),
                title,
                placement,
            });
        }
    }

    folder_creates.sort_by(|a, b| {
        depth(a.folder_path())
            .cmp(&depth(b.folder_path()))
            .then_with(|| a.folder_path().cmp(b.folder_path()))
            .then(a.index().cmp(&b.index()))
    });
    bookmark_creates.sort_by(|a, b| {
        a.folder_path()
            .cmp(b.folder_path())
            .then(a.index().cmp(&b.index()))
    });
    updates.sort_by_key(|op| match op {
        LocalOp::Update {
            placement: Some(p), ..
        } => (p.folder_path.clone(), p.index),
        _ => (String::new(), i64::MIN),
    });

    let stats = ReconcileStats {
        created: folder_creates.len() + bookmark_creates.len(),
        updated: updates.len(),
        deleted: deletes.len(),
    };

    let mut ops = deletes;
    ops.extend(
        folder_creates
            .into_iter()
            .chain(bookmark_creates)
            .map(|item| LocalOp::Create { item }),
    );
    ops.extend(updates);

    ReconcilePlan {
        merged,
        tombstones,
        ops,
        stats,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::BookmarkItem;
    use crate::service::{CoordinationService, PushRequest};
    use crate::tombstone::DEFAULT_RETENTION;

    fn local(id: &str, url: &str, title: &str, path: &str, index: i64, added: Millis) -> Item {
        Item::Bookmark(BookmarkItem {
            id: Some(id.into()),
            url: url.into(),
            title: title.into(),
            folder_path: path.into(),
            index,
            date_added: Some(added),
        })
    }

    fn remote(items: Vec<Item>, tombstones: Vec<Tombstone>) -> RemoteSnapshot {
        RemoteSnapshot {
            checksum: crate::checksum::checksum(&items),
            items,
            tombstones,
        }
    }

    fn no_touch() -> BTreeSet<String> {
        BTreeSet::new()
    }

    #[test]
    fn test_deletion_propagates_between_replicas() {
        let now = 10_000;
        let original = local("a-1", "https://x.com", "A-title", "toolbar", 0, 500);

        // Replica A pushed the original, then deleted it.
        let mut service = CoordinationService::default();
        service.push(
            PushRequest {
                items: vec![original.clone()],
                tombstones: vec![],
            },
            500,
        );
        service.push(
            PushRequest {
                items: vec![],
                tombstones: vec![Tombstone::new("https://x.com", 1_000)],
            },
            1_000,
        );
        assert_eq!(service.record().items.len(), 1);

        // Replica B still holds it.
        let replica_b = vec![local("b-7", "https://x.com", "A-title", "toolbar", 0, 500)];
        let plan = plan(&replica_b, &service.fetch(), &[], &no_touch(), now, DEFAULT_RETENTION);

        assert!(plan.merged.is_empty());
        assert_eq!(plan.tombstones, vec![Tombstone::new("https://x.com", 1_000)]);
        assert_eq!(
            plan.ops,
            vec![LocalOp::Delete {
                id: "b-7".into(),
                url: Some("https://x.com".into()),
            }]
        );
        assert_eq!(plan.stats.deleted, 1);
    }

    #[test]
    fn test_readded_bookmark_survives_and_is_not_recreated() {
        let locals = vec![local("1", "https://x.com", "X", "toolbar", 0, 2_000)];
        let snapshot = remote(
            vec![Item::bookmark("https://x.com", "X", "toolbar", 0)],
            vec![Tombstone::new("https://x.com", 1_000)],
        );
        let plan = plan(&locals, &snapshot, &[], &no_touch(), 3_000, DEFAULT_RETENTION);
        assert!(plan.ops.is_empty());
        assert_eq!(plan.merged.len(), 1);
    }

    #[test]
    fn test_remote_additions_become_creates_parents_first() {
        let snapshot = remote(
            vec![
                Item::bookmark("https://deep.com", "Deep", "toolbar/Work/Sub", 0),
                Item::folder("Sub", "toolbar/Work", 0),
                Item::folder("Work", "toolbar", 0),
                Item::bookmark("https://top.com", "Top", "toolbar", 1),
            ],
            vec![],
        );
        let plan = plan(&[], &snapshot, &[], &no_touch(), 0, DEFAULT_RETENTION);

        let created: Vec<(bool, String)> = plan
            .ops
            .iter()
            .map(|op| match op {
                LocalOp::Create { item } => (item.is_folder(), item.title().to_string()),
                other => panic!("unexpected {other:?}"),
            })
            .collect();
        assert_eq!(
            created,
            vec![
                (true, "Work".to_string()),
                (true, "Sub".to_string()),
                (false, "Top".to_string()),
                (false, "Deep".to_string()),
            ]
        );
        assert_eq!(plan.stats.created, 4);
    }

    #[test]
    fn test_untouched_local_item_follows_remote() {
        let locals = vec![local("5", "https://x.com", "Old", "toolbar", 0, 1)];
        let snapshot = remote(vec![Item::bookmark("https://x.com", "New", "other", 2)], vec![]);
        let plan = plan(&locals, &snapshot, &[], &no_touch(), 0, DEFAULT_RETENTION);
        assert_eq!(
            plan.ops,
            vec![LocalOp::Update {
                id: "5".into(),
                title: Some("New".into()),
                placement: Some(Placement {
                    folder_path: "other".into(),
                    index: 2,
                }),
            }]
        );
        assert_eq!(plan.merged[0].id(), Some("5"));
    }

    #[test]
    fn test_touched_local_item_wins() {
        let locals = vec![local("5", "https://x.com", "Mine", "toolbar", 0, 1)];
        let snapshot = remote(vec![Item::bookmark("https://x.com", "Stale", "toolbar", 0)], vec![]);
        let touched = BTreeSet::from(["5".to_string()]);
        let plan = plan(&locals, &snapshot, &[], &touched, 0, DEFAULT_RETENTION);
        assert!(plan.ops.is_empty());
        assert_eq!(plan.merged[0].title(), "Mine");
    }

    #[test]
    fn test_unchanged_state_plans_nothing() {
        let locals = vec![
            local("1", "https://a.com", "A", "Bookmarks Bar", 0, 1),
            local("2", "https://b.com", "B", "other", 0, 1),
        ];
        let snapshot = remote(
            locals.iter().map(|i| i.without_local_id().normalized()).collect(),
            vec![],
        );
        let plan = plan(&locals, &snapshot, &[], &no_touch(), 0, DEFAULT_RETENTION);
        assert!(plan.ops.is_empty());
        assert_eq!(plan.stats, ReconcileStats::default());
    }

    #[test]
    fn test_expired_tombstones_dropped() {
        let day = 24 * 60 * 60 * 1000;
        let now = 90 * day;
        let snapshot = remote(vec![], vec![Tombstone::new("https://old.com", now - 60 * day)]);
        let plan = plan(
            &[],
            &snapshot,
            &[Tombstone::new("https://recent.com", now - day)],
            &no_touch(),
            now,
            DEFAULT_RETENTION,
        );
        assert_eq!(plan.tombstones, vec![Tombstone::new("https://recent.com", now - day)]);
    }
}
