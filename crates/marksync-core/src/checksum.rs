//! Canonical form and SHA-256 checksum of a snapshot's items.
//!
//! Only `type`, `title`, normalized `folderPath`, `index`, and (for
//! bookmarks) `url` take part. Ids, `dateAdded`, and any unknown fields are
//! dropped, so a flat list and a nested export of the same logical state hash
//! identically. Tombstones are checksummed separately.

use crate::model::{parse_items, Item, Tombstone};
use crate::path::normalize_path;

use serde::Serialize;
use serde_json::Value;
use sha2::{Digest, Sha256};
use std::cmp::Ordering;

/// Comparison-relevant projection of an item. Field order is fixed by
/// declaration order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CanonicalItem {
    #[serde(rename = "type")]
    pub kind: &'static str,
    pub title: String,
    #[serde(rename = "folderPath")]
    pub folder_path: String,
    pub index: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
}

impl CanonicalItem {
    pub(crate) fn project(item: &Item) -> Self {
        match item {
            Item::Bookmark(b) => Self {
                kind: "bookmark",
                title: b.title.clone(),
                folder_path: normalize_path(&b.folder_path),
                index: b.index,
                url: Some(b.url.clone()),
            },
            Item::Folder(f) => Self {
                kind: "folder",
                title: f.title.clone(),
                folder_path: normalize_path(&f.folder_path),
                index: f.index,
                url: None,
            },
        }
    }
}

/// Total canonical ordering: `(folder_path, index)`, with the remaining
/// fields breaking ties so the result never depends on input order. The
/// variant is never a primary key.
pub fn canonical_order(a: &CanonicalItem, b: &CanonicalItem) -> Ordering {
    a.folder_path
        .cmp(&b.folder_path)
        .then(a.index.cmp(&b.index))
        .then_with(|| a.kind.cmp(b.kind))
        .then_with(|| a.title.cmp(&b.title))
        .then_with(|| a.url.cmp(&b.url))
}

/// Project and sort items into canonical form.
pub fn canonical_form(items: &[Item]) -> Vec<CanonicalItem> {
    let mut projected: Vec<CanonicalItem> = items.iter().map(CanonicalItem::project).collect();
    projected.sort_by(canonical_order);
    projected
}

/// Deterministic byte encoding of the canonical form (compact JSON).
pub fn canonical_bytes(items: &[Item]) -> Vec<u8> {
    serde_json::to_vec(&canonical_form(items))
        .expect("canonical items hold only strings and integers")
}

/// Lowercase hex SHA-256 of the canonical form.
pub fn checksum(items: &[Item]) -> String {
    sha256_hex(&canonical_bytes(items))
}

/// Checksum of an untyped flat snapshot. Malformed input checksums as the
/// empty list.
pub fn checksum_value(value: &Value) -> String {
    checksum(&parse_items(value))
}

/// Checksum of a tombstone set, independent of input order.
pub fn tombstone_checksum(tombstones: &[Tombstone]) -> String {
    let mut sorted: Vec<&Tombstone> = tombstones.iter().collect();
    sorted.sort_by(|a, b| a.url.cmp(&b.url).then(a.deleted_at.cmp(&b.deleted_at)));
    let bytes =
        serde_json::to_vec(&sorted).expect("tombstones hold only a string and an integer");
    sha256_hex(&bytes)
}

fn sha256_hex(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    hex::encode(hasher.finalize())
}
