//! Folder path canonicalization.
//!
//! Each browser family names its root containers differently ("Bookmarks
//! Bar", "Favorites Bar", "Speed Dial", ...). Every path is rewritten to one
//! of three canonical roots before it is compared, hashed, or used as a merge
//! key. Folder names below the root are preserved verbatim.

/// The canonical root containers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CanonicalRoot {
    Toolbar,
    Menu,
    Other,
}

/// Ordered prefix rules, matched case-insensitively against the first path
/// segment.
const ROOT_RULES: &[(&[&str], CanonicalRoot)] = &[
    (
        &[
            "bookmarks bar",
            "bookmarks toolbar",
            "speed dial",
            "favourites bar",
            "favorites bar",
        ],
        CanonicalRoot::Toolbar,
    ),
    (
        &["other bookmarks", "unsorted bookmarks"],
        CanonicalRoot::Other,
    ),
    (&["bookmarks menu"], CanonicalRoot::Menu),
];

impl CanonicalRoot {
    pub const ALL: [CanonicalRoot; 3] = [
        CanonicalRoot::Toolbar,
        CanonicalRoot::Menu,
        CanonicalRoot::Other,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            CanonicalRoot::Toolbar => "toolbar",
            CanonicalRoot::Menu => "menu",
            CanonicalRoot::Other => "other",
        }
    }

    /// Title a browser gives this container.
    pub fn browser_title(&self) -> &'static str {
        match self {
            CanonicalRoot::Toolbar => "Bookmarks Bar",
            CanonicalRoot::Menu => "Bookmarks Menu",
            CanonicalRoot::Other => "Other Bookmarks",
        }
    }

    /// Parse an already-canonical root segment.
    pub fn from_segment(segment: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|root| root.as_str() == segment)
    }

    /// Match a browser-specific root container title.
    pub fn from_browser_title(title: &str) -> Option<Self> {
        let lowered = title.to_lowercase();
        ROOT_RULES
            .iter()
            .find(|(names, _)| names.contains(&lowered.as_str()))
            .map(|(_, root)| *root)
    }
}

/// Rewrite a raw folder path to its canonical form.
///
/// Trailing `/` is stripped. Paths whose first segment matches no rule pass
/// through otherwise unchanged.
pub fn normalize_path(raw: &str) -> String {
    let trimmed = raw.trim_end_matches('/');
    let (head, rest) = match trimmed.split_once('/') {
        Some((head, rest)) => (head, Some(rest)),
        None => (trimmed, None),
    };

    match CanonicalRoot::from_browser_title(head) {
        Some(root) => match rest {
            Some(rest) => format!("{}/{}", root.as_str(), rest),
            None => root.as_str().to_string(),
        },
        None => trimmed.to_string(),
    }
}

/// First segment of a path.
pub fn root_segment(path: &str) -> &str {
    path.split('/').next().unwrap_or("")
}

/// Path of a child folder titled `title` inside `parent`.
pub fn join_path(parent: &str, title: &str) -> String {
    if parent.is_empty() {
        title.to_string()
    } else {
        format!("{}/{}", parent, title)
    }
}

/// Parent path and final segment, or `None` for a single-segment path.
pub fn split_parent(path: &str) -> Option<(&str, &str)> {
    path.rsplit_once('/')
}
