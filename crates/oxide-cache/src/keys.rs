//! Object naming within the cache bucket.

use oxide_core::CompressionMethod;

/// Maps cache keys onto object identifiers under an optional root prefix.
///
/// Archives are stored as `<root>/<key>/<archive name>`, so listing by
/// `<root>/<key>` finds both exact saves and anything sharing the prefix.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct KeyLayout {
    root: Option<String>,
}

impl KeyLayout {
    pub fn new(root: Option<&str>) -> Self {
        let root = root
            .map(|r| r.trim_matches('/'))
            .filter(|r| !r.is_empty())
            .map(str::to_string);
        Self { root }
    }

    /// Object identifier an archive for `key` is saved under.
    pub fn object_name(&self, key: &str, compression: CompressionMethod) -> String {
        self.prefixed(&format!("{}/{}", key, compression.archive_name()))
    }

    /// Listing prefix for a primary or restore key.
    pub fn listing_prefix(&self, key: &str) -> String {
        self.prefixed(key)
    }

    fn prefixed(&self, path: &str) -> String {
        match &self.root {
            Some(root) => format!("{}/{}", root, path),
            None => path.to_string(),
        }
    }
}

/// Check if an identifier falls under a prefix.
pub fn matches_prefix(identifier: &str, prefix: &str) -> bool {
    identifier.starts_with(prefix)
}

/// Check if an identifier names an archive produced with `compression`.
///
/// Objects from a different compression method stored under an overlapping
/// prefix are rejected here.
pub fn matches_archive(identifier: &str, compression: CompressionMethod) -> bool {
    identifier.contains(compression.archive_name())
}
