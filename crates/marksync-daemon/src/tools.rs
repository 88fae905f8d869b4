//! Offline document tooling behind the `checksum`, `flatten`, `nest`,
//! `merge`, and `resolve` subcommands.
//!
//! The first four accept any of the three bookmark document shapes and
//! read it leniently: a flat item list, a browser tree (a root node or the
//! one-element array `getTree()` returns), or a nested export with or without
//! its `roots` wrapper. `resolve` takes two versions of one identity-bearing
//! record and must parse them strictly.

use anyhow::{Context, Result};
use marksync_core::conflict::{BookmarkRecord, FolderRecord};
use marksync_core::{
    checksum, extract_from_nested, flatten, merge, nest, parse_export, parse_items,
    ConflictResolver, ConflictStrategy, Item, SyncConfig, TreeNode,
};
use serde_json::{json, Value};

/// The shape a document was recognized as.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DocumentKind {
    Items,
    Tree,
    Export,
}

pub fn document_kind(value: &Value) -> DocumentKind {
    let is_tree_node =
        |v: &Value| v.get("children").is_some() && v.get("type").is_none() && v.get("roots").is_none();
    match value {
        Value::Array(entries) if !entries.is_empty() && entries.iter().all(is_tree_node) => {
            DocumentKind::Tree
        }
        Value::Array(_) => DocumentKind::Items,
        v if is_tree_node(v) => DocumentKind::Tree,
        _ => DocumentKind::Export,
    }
}

/// Items held by any supported document. Unrecognized input yields none.
pub fn document_items(value: &Value) -> Vec<Item> {
    match document_kind(value) {
        DocumentKind::Items => parse_items(value),
        DocumentKind::Tree => {
            let roots: Vec<&Value> = match value {
                Value::Array(entries) => entries.iter().collect(),
                other => vec![other],
            };
            roots
                .into_iter()
                .filter_map(|root| serde_json::from_value::<TreeNode>(root.clone()).ok())
                .flat_map(|root| flatten(&root))
                .collect()
        }
        DocumentKind::Export => extract_from_nested(&parse_export(value)),
    }
}

pub fn checksum_document(value: &Value) -> String {
    checksum(&document_items(value))
}

/// Flat item list of a document.
pub fn flatten_document(value: &Value) -> Value {
    json!(document_items(value))
}

/// Nested export of a document, wrapped in `roots`.
pub fn nest_document(value: &Value) -> Value {
    json!({ "roots": nest(&document_items(value)) })
}

/// Merge `incoming` into `existing`, reporting counts and the new checksum.
pub fn merge_documents(existing: &Value, incoming: &Value) -> Value {
    let result = merge(&document_items(existing), &document_items(incoming));
    json!({
        "added": result.added,
        "updated": result.updated,
        "checksum": checksum(&result.merged),
        "items": result.merged,
    })
}

/// Parse a strategy name as written on the command line, e.g. `local-wins`.
pub fn parse_strategy(raw: &str) -> std::result::Result<ConflictStrategy, String> {
    let name = raw.trim().to_uppercase().replace('-', "_");
    serde_json::from_value(Value::String(name))
        .map_err(|_| format!("unknown conflict strategy {raw:?}"))
}

/// Resolve two versions of one record under the configured strategy.
///
/// Records with `children` are folders and resolve recursively; anything
/// else must be a bookmark record. The result is the winning record, or a
/// `{"conflict": true, ...}` descriptor under the manual strategy.
pub fn resolve_documents(local: &Value, remote: &Value, config: &SyncConfig) -> Result<Value> {
    let resolver = ConflictResolver::from_config(config);
    let is_folder = |v: &Value| v.get("children").is_some();

    let resolution = if is_folder(local) && is_folder(remote) {
        let local: FolderRecord =
            serde_json::from_value(local.clone()).context("Local folder record is malformed")?;
        let remote: FolderRecord =
            serde_json::from_value(remote.clone()).context("Remote folder record is malformed")?;
        json!(resolver.resolve_folder(Some(&local), Some(&remote)))
    } else {
        let local: BookmarkRecord =
            serde_json::from_value(local.clone()).context("Local bookmark record is malformed")?;
        let remote: BookmarkRecord = serde_json::from_value(remote.clone())
            .context("Remote bookmark record is malformed")?;
        json!(resolver.resolve(Some(&local), Some(&remote)))
    };
    Ok(resolution)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tree() -> Value {
        json!({
            "id": "0",
            "children": [
                {"id": "1", "title": "Bookmarks Bar", "children": [
                    {"id": "10", "title": "Rust", "url": "https://rust-lang.org"},
                    {"id": "11", "title": "Work", "children": [
                        {"id": "12", "title": "CI", "url": "https://ci.example.com"}
                    ]}
                ]},
                {"id": "2", "title": "Other Bookmarks", "children": []}
            ]
        })
    }

    #[test]
    fn test_document_kinds() {
        assert_eq!(document_kind(&tree()), DocumentKind::Tree);
        assert_eq!(document_kind(&json!([tree()])), DocumentKind::Tree);
        assert_eq!(document_kind(&json!([])), DocumentKind::Items);
        assert_eq!(document_kind(&json!({"roots": {"toolbar": []}})), DocumentKind::Export);
    }

    #[test]
    fn test_every_shape_checksums_alike() {
        let from_tree = checksum_document(&tree());
        assert_eq!(checksum_document(&json!([tree()])), from_tree);
        assert_eq!(checksum_document(&flatten_document(&tree())), from_tree);
        assert_eq!(checksum_document(&nest_document(&tree())), from_tree);
    }

    #[test]
    fn test_flatten_document_lists_items() {
        let items = flatten_document(&tree());
        let items = items.as_array().unwrap();
        assert_eq!(items.len(), 3);
        assert!(items
            .iter()
            .any(|i| i["url"] == "https://ci.example.com" && i["folderPath"] == "toolbar/Work"));
    }

    #[test]
    fn test_merge_documents_counts() {
        let incoming = json!([
            {"type": "bookmark", "url": "https://rust-lang.org", "title": "Rust!", "folderPath": "toolbar", "index": 0},
            {"type": "bookmark", "url": "https://new.example.com", "title": "New", "folderPath": "other", "index": 0}
        ]);
        let report = merge_documents(&tree(), &incoming);
        assert_eq!(report["added"], 1);
        assert_eq!(report["updated"], 1);
        assert_eq!(report["items"].as_array().unwrap().len(), 4);
        assert_eq!(report["checksum"], checksum_document(&report["items"]));
    }

    #[test]
    fn test_garbage_is_empty() {
        assert_eq!(checksum_document(&json!("nope")), checksum(&[]));
        assert_eq!(checksum_document(&json!(42)), checksum(&[]));
    }

    fn record(title: &str, tags: &[&str], modified_at: &str) -> Value {
        json!({
            "id": "b-1",
            "url": "https://rust-lang.org",
            "title": title,
            "folderPath": "toolbar",
            "tags": tags,
            "modifiedAt": modified_at,
        })
    }

    fn config(strategy: ConflictStrategy) -> SyncConfig {
        SyncConfig {
            conflict_strategy: strategy,
            ..SyncConfig::default()
        }
    }

    #[test]
    fn test_parse_strategy_names() {
        assert_eq!(parse_strategy("local-wins"), Ok(ConflictStrategy::LocalWins));
        assert_eq!(parse_strategy("REMOTE_WINS"), Ok(ConflictStrategy::RemoteWins));
        assert_eq!(parse_strategy("manual"), Ok(ConflictStrategy::Manual));
        assert!(parse_strategy("coin-flip").is_err());
    }

    #[test]
    fn test_resolve_follows_configured_strategy() {
        let local = record("Local", &["a"], "2024-01-01T00:00:00Z");
        let remote = record("Remote", &["b"], "2024-06-01T00:00:00Z");

        let newer = resolve_documents(&local, &remote, &SyncConfig::default()).unwrap();
        assert_eq!(newer["title"], "Remote");

        let pinned =
            resolve_documents(&local, &remote, &config(ConflictStrategy::LocalWins)).unwrap();
        assert_eq!(pinned["title"], "Local");

        let merged = resolve_documents(&local, &remote, &config(ConflictStrategy::Merge)).unwrap();
        assert_eq!(merged["title"], "Remote");
        assert_eq!(merged["tags"], json!(["a", "b"]));

        let manual =
            resolve_documents(&local, &remote, &config(ConflictStrategy::Manual)).unwrap();
        assert_eq!(manual["conflict"], true);
        assert_eq!(manual["local"]["title"], "Local");
        assert_eq!(manual["remote"]["title"], "Remote");
    }

    #[test]
    fn test_resolve_folders_unions_children() {
        let child = |id: &str, url: &str| {
            json!({"type": "bookmark", "id": id, "url": url, "title": id})
        };
        let local = json!({"id": "f-1", "title": "Work", "children": [child("c-1", "https://a.com")]});
        let remote = json!({"id": "f-1", "title": "Work", "children": [child("c-2", "https://b.com")]});

        let resolved = resolve_documents(&local, &remote, &SyncConfig::default()).unwrap();
        let ids: Vec<_> = resolved["children"]
            .as_array()
            .unwrap()
            .iter()
            .map(|c| c["id"].as_str().unwrap())
            .collect();
        assert_eq!(ids, vec!["c-1", "c-2"]);
    }

    #[test]
    fn test_resolve_rejects_malformed_record() {
        let remote = record("R", &[], "1");
        let err = resolve_documents(&json!({"title": "no id"}), &remote, &SyncConfig::default())
            .unwrap_err();
        assert!(err.to_string().contains("Local bookmark record"));
    }
}
