//! The shared coordination record and its fold.
//!
//! Every replica push goes through [`CoordinationService::push`]: incoming
//! items are merged into the record, tombstones are unioned and pruned, and
//! nothing is ever deleted from the record's items. Deletions only take
//! effect when each replica applies the relayed tombstones to its own tree.

use crate::checksum::{checksum, tombstone_checksum};
use crate::merge::merge;
use crate::model::{Item, Millis, Tombstone};
use crate::tombstone::{merge_tombstones, prune_expired};

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::Duration;
use tracing::debug;

/// The single logical record all replicas converge on.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SharedRecord {
    #[serde(default)]
    pub items: Vec<Item>,
    #[serde(default)]
    pub tombstones: Vec<Tombstone>,
    #[serde(default)]
    pub checksum: String,
    #[serde(default)]
    pub tombstone_checksum: String,
    #[serde(default)]
    pub updated_at: Millis,
}

impl Default for SharedRecord {
    fn default() -> Self {
        Self {
            items: Vec::new(),
            tombstones: Vec::new(),
            checksum: checksum(&[]),
            tombstone_checksum: tombstone_checksum(&[]),
            updated_at: 0,
        }
    }
}

/// What a replica receives on fetch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RemoteSnapshot {
    pub items: Vec<Item>,
    pub tombstones: Vec<Tombstone>,
    pub checksum: String,
}

/// What a replica sends on push.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PushRequest {
    #[serde(default)]
    pub items: Vec<Item>,
    #[serde(default)]
    pub tombstones: Vec<Tombstone>,
}

/// Merge statistics returned for a push.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PushReceipt {
    pub added: usize,
    pub updated: usize,
    pub checksum: String,
    pub tombstone_count: usize,
}

/// Service-side fold over a [`SharedRecord`].
#[derive(Debug, Clone)]
pub struct CoordinationService {
    record: SharedRecord,
    retention: Duration,
}

impl Default for CoordinationService {
    fn default() -> Self {
        Self::new(SharedRecord::default(), crate::tombstone::DEFAULT_RETENTION)
    }
}

impl CoordinationService {
    pub fn new(record: SharedRecord, retention: Duration) -> Self {
        Self { record, retention }
    }

    pub fn record(&self) -> &SharedRecord {
        &self.record
    }

    pub fn into_record(self) -> SharedRecord {
        self.record
    }

    pub fn fetch(&self) -> RemoteSnapshot {
        RemoteSnapshot {
            items: self.record.items.clone(),
            tombstones: self.record.tombstones.clone(),
            checksum: self.record.checksum.clone(),
        }
    }

    /// Merge a replica's snapshot into the record. Items covered by a
    /// tombstone stay in the record.
    pub fn push(&mut self, request: PushRequest, now: Millis) -> PushReceipt {
        let incoming: Vec<Item> = request.items.iter().map(Item::without_local_id).collect();
        let mut result = merge(&self.record.items, &incoming);
        carry_newest_date_added(&mut result.merged, &incoming);
        let tombstones = prune_expired(
            &merge_tombstones(&self.record.tombstones, &request.tombstones),
            now,
            self.retention,
        );
        debug!(
            "Folded push: {} added, {} updated, {} tombstones",
            result.added,
            result.updated,
            tombstones.len()
        );
        self.store(result.merged, tombstones, now);
        PushReceipt {
            added: result.added,
            updated: result.updated,
            checksum: self.record.checksum.clone(),
            tombstone_count: self.record.tombstones.len(),
        }
    }

    /// Replace the record wholesale with a replica's snapshot.
    pub fn replace(&mut self, request: PushRequest, now: Millis) -> PushReceipt {
        let items: Vec<Item> = request
            .items
            .iter()
            .map(|item| item.without_local_id().normalized())
            .collect();
        let tombstones = merge_tombstones(&request.tombstones, &[]);
        let added = items.len();
        self.store(items, tombstones, now);
        PushReceipt {
            added,
            updated: 0,
            checksum: self.record.checksum.clone(),
            tombstone_count: self.record.tombstones.len(),
        }
    }

    fn store(&mut self, items: Vec<Item>, tombstones: Vec<Tombstone>, now: Millis) {
        self.record.checksum = checksum(&items);
        self.record.tombstone_checksum = tombstone_checksum(&tombstones);
        self.record.items = items;
        self.record.tombstones = tombstones;
        self.record.updated_at = now;
    }
}

/// Keep the newest `date_added` per URL, so a bookmark re-added after its
/// deletion is not hidden by the older tombstone on other replicas.
fn carry_newest_date_added(items: &mut [Item], incoming: &[Item]) {
    let newest: HashMap<&str, Millis> = incoming
        .iter()
        .filter_map(|item| match item {
            Item::Bookmark(b) => Some((b.url.as_str(), b.date_added?)),
            Item::Folder(_) => None,
        })
        .collect();
    for item in items {
        let Item::Bookmark(b) = item else { continue };
        if let Some(&at) = newest.get(b.url.as_str()) {
            if b.date_added.is_none_or(|current| at > current) {
                b.date_added = Some(at);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::BookmarkItem;

    const DAY: Millis = 24 * 60 * 60 * 1000;

    fn dated(url: &str, title: &str, date_added: Millis) -> Item {
        Item::Bookmark(BookmarkItem {
            id: Some("local-1".into()),
            url: url.into(),
            title: title.into(),
            folder_path: "toolbar".into(),
            index: 0,
            date_added: Some(date_added),
        })
    }

    #[test]
    fn test_service_never_deletes() {
        let mut service = CoordinationService::default();
        service.push(
            PushRequest {
                items: vec![dated("https://x.com", "X", 500)],
                tombstones: vec![],
            },
            1_000,
        );
        let receipt = service.push(
            PushRequest {
                items: vec![],
                tombstones: vec![Tombstone::new("https://x.com", 1_000)],
            },
            1_000,
        );

        assert_eq!(receipt.tombstone_count, 1);
        let snapshot = service.fetch();
        assert_eq!(snapshot.items.len(), 1);
        assert_eq!(snapshot.items[0].url(), Some("https://x.com"));
        assert_eq!(snapshot.tombstones, vec![Tombstone::new("https://x.com", 1_000)]);
    }

    #[test]
    fn test_readd_refreshes_date_added() {
        let mut service = CoordinationService::default();
        service.push(
            PushRequest {
                items: vec![dated("https://x.com", "X", 500)],
                tombstones: vec![Tombstone::new("https://x.com", 1_000)],
            },
            1_000,
        );
        service.push(
            PushRequest {
                items: vec![dated("https://x.com", "X", 2_000)],
                tombstones: vec![],
            },
            2_000,
        );
        assert_eq!(service.record().items[0].date_added(), Some(2_000));

        service.push(
            PushRequest {
                items: vec![dated("https://x.com", "X", 10)],
                tombstones: vec![],
            },
            3_000,
        );
        assert_eq!(service.record().items[0].date_added(), Some(2_000));
    }

    #[test]
    fn test_push_strips_local_ids() {
        let mut service = CoordinationService::default();
        service.push(
            PushRequest {
                items: vec![dated("https://x.com", "X", 1)],
                tombstones: vec![],
            },
            10,
        );
        assert_eq!(service.record().items[0].id(), None);
        assert_eq!(service.record().updated_at, 10);
    }

    #[test]
    fn test_push_reports_merge_stats_and_checksum() {
        let mut service = CoordinationService::default();
        let first = service.push(
            PushRequest {
                items: vec![dated("https://a.com", "A", 1), dated("https://b.com", "B", 1)],
                tombstones: vec![],
            },
            1,
        );
        assert_eq!((first.added, first.updated), (2, 0));

        let second = service.push(
            PushRequest {
                items: vec![dated("https://a.com", "A2", 1)],
                tombstones: vec![],
            },
            2,
        );
        assert_eq!((second.added, second.updated), (0, 1));
        assert_eq!(second.checksum, checksum(&service.record().items));
        assert_eq!(service.record().items.len(), 2);
    }

    #[test]
    fn test_push_prunes_expired_tombstones() {
        let mut service = CoordinationService::default();
        let now = 100 * DAY;
        service.push(
            PushRequest {
                items: vec![],
                tombstones: vec![
                    Tombstone::new("https://old.com", now - 40 * DAY),
                    Tombstone::new("https://new.com", now - DAY),
                ],
            },
            now,
        );
        assert_eq!(service.record().tombstones, vec![Tombstone::new("https://new.com", now - DAY)]);
    }

    #[test]
    fn test_replace_overwrites_record() {
        let mut service = CoordinationService::default();
        service.push(
            PushRequest {
                items: vec![dated("https://a.com", "A", 1)],
                tombstones: vec![Tombstone::new("https://gone.com", 5)],
            },
            5,
        );
        let receipt = service.replace(
            PushRequest {
                items: vec![Item::bookmark("https://b.com", "B", "Bookmarks Bar", 0)],
                tombstones: vec![],
            },
            6,
        );
        assert_eq!(receipt.added, 1);
        assert_eq!(receipt.tombstone_count, 0);
        let record = service.record();
        assert_eq!(record.items, vec![Item::bookmark("https://b.com", "B", "toolbar", 0)]);
        assert!(record.tombstones.is_empty());
        assert_eq!(record.tombstone_checksum, tombstone_checksum(&[]));
    }

    #[test]
    fn test_record_json_roundtrip_shape() {
        let json = serde_json::to_value(SharedRecord::default()).unwrap();
        assert!(json["items"].as_array().unwrap().is_empty());
        assert!(json.get("tombstoneChecksum").is_some());
        assert!(json.get("updatedAt").is_some());
    }
}
