//! Incoming-wins snapshot merge.
//!
//! Bookmarks match by URL, folders by `(folder_path, title)`. On a match the
//! incoming item's `title`, `folder_path`, and `index` replace the existing
//! ones unconditionally. Timestamps play no part: `date_added` never changes
//! for a move or rename, so using it as a tie-break drops legitimate edits.
//! Existing items absent from the incoming side are kept untouched, since they
//! may belong to a replica that has not pushed yet.

use crate::model::{Item, ItemKey};

use std::collections::HashMap;

/// Result of [`merge`]. Output order is unspecified.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MergeResult {
    pub merged: Vec<Item>,
    /// Incoming items with no existing match.
    pub added: usize,
    /// Matched items whose mutable fields actually changed.
    pub updated: usize,
}

/// Merge `incoming` into `existing`. Pure; never looks at tombstones.
pub fn merge(existing: &[Item], incoming: &[Item]) -> MergeResult {
    let mut merged: Vec<Item> = existing.iter().map(Item::normalized).collect();
    let mut by_key: HashMap<ItemKey, usize> = HashMap::with_capacity(merged.len());
    for (position, item) in merged.iter().enumerate() {
        by_key.entry(item.key()).or_insert(position);
    }

    let mut added = 0;
    let mut updated = 0;
    for item in incoming {
        match by_key.get(&item.key()) {
            Some(&position) => {
                if merged[position].overwrite_from(item) {
                    updated += 1;
                }
            }
            None => {
                let item = item.normalized();
                by_key.insert(item.key(), merged.len());
                merged.push(item);
                added += 1;
            }
        }
    }

    MergeResult {
        merged,
        added,
        updated,
    }
}
