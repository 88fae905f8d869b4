//! Conversions between browser trees, flat item lists, and the nested
//! "roots" export format.
//!
//! Both directions are total. For any tree `T`,
//! `checksum(flatten(T)) == checksum(extract_from_nested(&nest(&flatten(T))))`.

use crate::checksum::{canonical_order, CanonicalItem};
use crate::model::{BookmarkItem, ExportNode, ExportRoots, FolderItem, Item, TreeNode};
use crate::path::{join_path, normalize_path, root_segment, CanonicalRoot};

use serde_json::Value;
use std::collections::{BTreeMap, BTreeSet, HashSet};

/// Flatten a browser tree rooted at its (untitled) root node.
///
/// The root's children are the root containers: they set the path prefix
/// and are not emitted themselves. Every deeper folder with a non-empty title
/// becomes a [`FolderItem`] keyed at its parent's path. Nodes without an
/// explicit index get their position among siblings.
pub fn flatten(root: &TreeNode) -> Vec<Item> {
    let mut out = Vec::new();
    for (position, container) in root.children().iter().enumerate() {
        if container.is_folder() {
            let path = normalize_path(container.title());
            flatten_children(container.children(), &path, &mut out);
        } else {
            out.push(bookmark_from_node(container, "", position));
        }
    }
    out
}

fn flatten_children(children: &[TreeNode], path: &str, out: &mut Vec<Item>) {
    for (position, node) in children.iter().enumerate() {
        if !node.is_folder() {
            out.push(bookmark_from_node(node, path, position));
            continue;
        }

        let title = node.title();
        if title.is_empty() {
            flatten_children(node.children(), path, out);
            continue;
        }

        out.push(Item::Folder(FolderItem {
            id: local_id(&node.id),
            title: title.to_string(),
            folder_path: path.to_string(),
            index: node.index.unwrap_or(position as i64),
            date_added: node.date_added,
        }));
        flatten_children(node.children(), &join_path(path, title), out);
    }
}

fn bookmark_from_node(node: &TreeNode, path: &str, position: usize) -> Item {
    Item::Bookmark(BookmarkItem {
        id: local_id(&node.id),
        url: node.url.clone().unwrap_or_default(),
        title: node.title().to_string(),
        folder_path: path.to_string(),
        index: node.index.unwrap_or(position as i64),
        date_added: node.date_added,
    })
}

fn local_id(id: &str) -> Option<String> {
    (!id.is_empty()).then(|| id.to_string())
}

/// Rebuild per-root nested trees from a flat list.
///
/// Folder boundaries come from shared path prefixes. A path segment with no
/// matching [`FolderItem`] becomes an implicit folder without an explicit
/// index, placed after its explicit siblings.
pub fn nest(items: &[Item]) -> ExportRoots {
    let mut by_path: BTreeMap<String, Vec<(CanonicalItem, &Item)>> = BTreeMap::new();
    for item in items {
        let canonical = CanonicalItem::project(item);
        by_path
            .entry(canonical.folder_path.clone())
            .or_default()
            .push((canonical, item));
    }
    for entries in by_path.values_mut() {
        entries.sort_by(|a, b| canonical_order(&a.0, &b.0));
    }

    let mut roots = ExportRoots::default();
    let root_names: BTreeSet<&str> = by_path.keys().map(|path| root_segment(path)).collect();

    let mut visited = HashSet::new();
    for root in root_names {
        let nodes = build_level(root, &by_path, &mut visited);
        roots.root_mut(root).extend(nodes);
    }
    roots
}

fn build_level(
    path: &str,
    by_path: &BTreeMap<String, Vec<(CanonicalItem, &Item)>>,
    visited: &mut HashSet<String>,
) -> Vec<ExportNode> {
    if !visited.insert(path.to_string()) {
        return Vec::new();
    }

    let mut nodes = Vec::new();
    let mut explicit_folders = HashSet::new();
    for (canonical, item) in by_path.get(path).map(Vec::as_slice).unwrap_or(&[]) {
        match item {
            Item::Bookmark(b) => nodes.push(ExportNode {
                title: b.title.clone(),
                url: Some(b.url.clone()),
                index: Some(b.index),
                date_added: b.date_added,
                children: Vec::new(),
            }),
            Item::Folder(f) => {
                explicit_folders.insert(f.title.clone());
                let child_path = join_path(&canonical.folder_path, &f.title);
                nodes.push(ExportNode {
                    title: f.title.clone(),
                    url: None,
                    index: Some(f.index),
                    date_added: f.date_added,
                    children: build_level(&child_path, by_path, visited),
                });
            }
        }
    }

    for segment in child_segments(path, by_path) {
        if explicit_folders.contains(&segment) {
            continue;
        }
        let child_path = join_path(path, &segment);
        nodes.push(ExportNode {
            title: segment,
            url: None,
            index: None,
            date_added: None,
            children: build_level(&child_path, by_path, visited),
        });
    }
    nodes
}

/// Distinct next segments of every known path strictly below `path`.
fn child_segments<T>(path: &str, by_path: &BTreeMap<String, T>) -> BTreeSet<String> {
    let prefix = format!("{}/", path);
    by_path
        .range(prefix.clone()..)
        .take_while(|(key, _)| key.starts_with(&prefix))
        .filter_map(|(key, _)| key[prefix.len()..].split('/').next().map(str::to_string))
        .collect()
}

/// Flatten the nested export format back into items.
pub fn extract_from_nested(roots: &ExportRoots) -> Vec<Item> {
    let mut out = Vec::new();
    for (root, nodes) in roots.iter() {
        extract_nodes(nodes, &normalize_path(root), &mut out);
    }
    out
}

fn extract_nodes(nodes: &[ExportNode], path: &str, out: &mut Vec<Item>) {
    for (position, node) in nodes.iter().enumerate() {
        let index = node.index.unwrap_or(position as i64);
        match &node.url {
            Some(url) => out.push(Item::Bookmark(BookmarkItem {
                id: None,
                url: url.clone(),
                title: node.title.clone(),
                folder_path: path.to_string(),
                index,
                date_added: node.date_added,
            })),
            None if node.title.is_empty() => extract_nodes(&node.children, path, out),
            None => {
                out.push(Item::Folder(FolderItem {
                    id: None,
                    title: node.title.clone(),
                    folder_path: path.to_string(),
                    index,
                    date_added: node.date_added,
                }));
                extract_nodes(&node.children, &join_path(path, &node.title), out);
            }
        }
    }
}

/// Build a browser-shaped tree from the export format.
///
/// Root containers carry browser titles; ids are left blank for the
/// browser to assign on import.
pub fn roots_to_tree(roots: &ExportRoots) -> TreeNode {
    let containers = roots
        .iter()
        .filter(|(name, nodes)| CanonicalRoot::from_segment(name).is_some() || !nodes.is_empty())
        .map(|(name, nodes)| {
            let title = CanonicalRoot::from_segment(name)
                .map(|root| root.browser_title().to_string())
                .unwrap_or_else(|| name.to_string());
            TreeNode {
                title: Some(title),
                children: Some(nodes.iter().map(export_to_tree).collect()),
                ..Default::default()
            }
        })
        .collect();

    TreeNode {
        children: Some(containers),
        ..Default::default()
    }
}

fn export_to_tree(node: &ExportNode) -> TreeNode {
    TreeNode {
        id: String::new(),
        title: Some(node.title.clone()),
        url: node.url.clone(),
        index: node.index,
        date_added: node.date_added,
        children: node
            .is_folder()
            .then(|| node.children.iter().map(export_to_tree).collect()),
    }
}

/// Parse an untyped export leniently. Accepts either the roots object itself
/// or a wrapper with a `roots` key; anything else yields empty roots.
pub fn parse_export(value: &Value) -> ExportRoots {
    let value = value.get("roots").unwrap_or(value);
    let mut roots = ExportRoots::default();
    let Some(obj) = value.as_object() else {
        return roots;
    };

    for (key, nodes) in obj {
        let Value::Array(nodes) = nodes else {
            continue;
        };
        let name = normalize_path(key);
        roots
            .root_mut(&name)
            .extend(nodes.iter().filter_map(parse_export_node));
    }
    roots
}

fn parse_export_node(value: &Value) -> Option<ExportNode> {
    let obj = value.as_object()?;
    Some(ExportNode {
        title: obj
            .get("title")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string(),
        url: obj.get("url").and_then(Value::as_str).map(str::to_string),
        index: obj.get("index").and_then(Value::as_i64),
        date_added: obj.get("dateAdded").and_then(Value::as_i64),
        children: obj
            .get("children")
            .and_then(Value::as_array)
            .map(|children| children.iter().filter_map(parse_export_node).collect())
            .unwrap_or_default(),
    })
}
