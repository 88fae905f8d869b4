//! Deletion witnesses.
//!
//! Tombstones are merged freely and relayed by the coordination service, but
//! only a replica applies them, and only to its own local items. The service
//! never deletes from the shared record: a bookmark still held by a replica
//! that has not synced yet must survive until that replica has pushed.

use crate::model::{Item, Millis, Tombstone};

use std::collections::{BTreeMap, HashMap};
use std::time::Duration;

/// Default retention horizon before a tombstone may be garbage collected.
pub const DEFAULT_RETENTION: Duration = Duration::from_secs(30 * 24 * 60 * 60);

/// Union two tombstone sets, keeping the latest `deleted_at` per URL.
///
/// Commutative, associative, and idempotent. Output is sorted by URL.
pub fn merge_tombstones(a: &[Tombstone], b: &[Tombstone]) -> Vec<Tombstone> {
    let mut latest: BTreeMap<&str, Millis> = BTreeMap::new();
    for tombstone in a.iter().chain(b) {
        latest
            .entry(tombstone.url.as_str())
            .and_modify(|at| *at = (*at).max(tombstone.deleted_at))
            .or_insert(tombstone.deleted_at);
    }
    latest
        .into_iter()
        .map(|(url, deleted_at)| Tombstone::new(url, deleted_at))
        .collect()
}

fn index_by_url(tombstones: &[Tombstone]) -> HashMap<&str, Millis> {
    let mut index = HashMap::new();
    for tombstone in tombstones {
        let at = index.entry(tombstone.url.as_str()).or_insert(tombstone.deleted_at);
        *at = (*at).max(tombstone.deleted_at);
    }
    index
}

fn is_buried(index: &HashMap<&str, Millis>, item: &Item) -> bool {
    match item {
        Item::Bookmark(b) => index
            .get(b.url.as_str())
            .is_some_and(|deleted_at| *deleted_at > b.date_added.unwrap_or(0)),
        Item::Folder(_) => false,
    }
}

/// Local items a replica must delete.
///
/// An item is slated for deletion only when a tombstone for its URL is newer
/// than the item's `date_added`; a bookmark re-added after the deletion
/// survives. Only ever call this against a replica's own items.
pub fn apply_tombstones_locally(tombstones: &[Tombstone], items: &[Item]) -> Vec<Item> {
    let index = index_by_url(tombstones);
    items
        .iter()
        .filter(|item| is_buried(&index, item))
        .cloned()
        .collect()
}

/// Items that remain visible under the tombstone rule.
pub fn visible_items(items: &[Item], tombstones: &[Tombstone]) -> Vec<Item> {
    let index = index_by_url(tombstones);
    items
        .iter()
        .filter(|item| !is_buried(&index, item))
        .cloned()
        .collect()
}

/// Drop tombstones older than `retention` relative to `now`, whether or not
/// any bookmark still references the URL.
pub fn prune_expired(tombstones: &[Tombstone], now: Millis, retention: Duration) -> Vec<Tombstone> {
    let horizon = now.saturating_sub(retention.as_millis().min(i64::MAX as u128) as i64);
    tombstones
        .iter()
        .filter(|t| t.deleted_at >= horizon)
        .cloned()
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::BookmarkItem;

    fn bookmark(url: &str, date_added: Option<Millis>) -> Item {
        Item::Bookmark(BookmarkItem {
            id: Some(format!("id-{url}")),
            url: url.to_string(),
            title: String::new(),
            folder_path: "toolbar".into(),
            index: 0,
            date_added,
        })
    }

    #[test]
    fn test_merge_keeps_latest() {
        let a = vec![Tombstone::new("https://x.com", 1000), Tombstone::new("https://y.com", 5)];
        let b = vec![Tombstone::new("https://x.com", 2000)];
        let merged = merge_tombstones(&a, &b);
        assert_eq!(
            merged,
            vec![Tombstone::new("https://x.com", 2000), Tombstone::new("https://y.com", 5)]
        );
    }

    #[test]
    fn test_merge_commutative() {
        let a = vec![Tombstone::new("https://b.com", 3), Tombstone::new("https://a.com", 9)];
        let b = vec![Tombstone::new("https://a.com", 4), Tombstone::new("https://c.com", 1)];
        assert_eq!(merge_tombstones(&a, &b), merge_tombstones(&b, &a));
    }

    #[test]
    fn test_merge_associative_and_idempotent() {
        let a = vec![Tombstone::new("https://a.com", 1)];
        let b = vec![Tombstone::new("https://a.com", 2), Tombstone::new("https://b.com", 1)];
        let c = vec![Tombstone::new("https://b.com", 7)];
        let left = merge_tombstones(&merge_tombstones(&a, &b), &c);
        let right = merge_tombstones(&a, &merge_tombstones(&b, &c));
        assert_eq!(left, right);
        assert_eq!(merge_tombstones(&left, &left), left);
    }

    #[test]
    fn test_readded_after_delete_survives() {
        let tombstones = vec![Tombstone::new("https://x.com", 1000)];
        let items = vec![bookmark("https://x.com", Some(2000))];
        assert!(apply_tombstones_locally(&tombstones, &items).is_empty());
    }

    #[test]
    fn test_older_item_is_slated_for_deletion() {
        let tombstones = vec![Tombstone::new("https://x.com", 1000)];
        let items = vec![bookmark("https://x.com", Some(500)), bookmark("https://y.com", Some(1))];
        let doomed = apply_tombstones_locally(&tombstones, &items);
        assert_eq!(doomed.len(), 1);
        assert_eq!(doomed[0].url(), Some("https://x.com"));
    }

    #[test]
    fn test_missing_date_added_counts_as_oldest() {
        let tombstones = vec![Tombstone::new("https://x.com", 1)];
        let items = vec![bookmark("https://x.com", None)];
        assert_eq!(apply_tombstones_locally(&tombstones, &items).len(), 1);
    }

    #[test]
    fn test_folders_never_buried() {
        let tombstones = vec![Tombstone::new("", 1000)];
        let items = vec![Item::folder("", "toolbar", 0)];
        assert!(apply_tombstones_locally(&tombstones, &items).is_empty());
    }

    #[test]
    fn test_visible_items_is_complement() {
        let tombstones = vec![Tombstone::new("https://x.com", 1000)];
        let items = vec![
            bookmark("https://x.com", Some(10)),
            bookmark("https://y.com", Some(10)),
            Item::folder("Work", "toolbar", 1),
        ];
        let visible = visible_items(&items, &tombstones);
        assert_eq!(visible.len(), 2);
        assert!(visible.iter().all(|i| i.url() != Some("https://x.com")));
    }

    #[test]
    fn test_prune_expired() {
        let day = 24 * 60 * 60 * 1000;
        let now = 100 * day;
        let tombstones = vec![
            Tombstone::new("https://old.com", now - 31 * day),
            Tombstone::new("https://edge.com", now - 30 * day),
            Tombstone::new("https://new.com", now - day),
        ];
        let kept = prune_expired(&tombstones, now, DEFAULT_RETENTION);
        let urls: Vec<_> = kept.iter().map(|t| t.url.as_str()).collect();
        assert_eq!(urls, vec!["https://edge.com", "https://new.com"]);
    }
}
