//! Cache types.

use crate::error::{Error, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Compression applied to the cache archive.
///
/// Chosen once per run; it determines both the archive file name and the
/// filter used when matching restore keys.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CompressionMethod {
    Gzip,
    #[default]
    Zstd,
}

impl CompressionMethod {
    /// Canonical archive file name for this method.
    pub fn archive_name(&self) -> &'static str {
        match self {
            CompressionMethod::Gzip => "cache.tgz",
            CompressionMethod::Zstd => "cache.tzst",
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            CompressionMethod::Gzip => "gzip",
            CompressionMethod::Zstd => "zstd",
        }
    }
}

impl fmt::Display for CompressionMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for CompressionMethod {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "gzip" | "gz" => Ok(CompressionMethod::Gzip),
            "zstd" | "zst" => Ok(CompressionMethod::Zstd),
            other => Err(Error::InvalidInput {
                name: "compression".into(),
                reason: format!("unsupported compression method '{}'", other),
            }),
        }
    }
}

/// Primary key plus ordered restore-key prefixes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheKeys {
    /// Exact identity of this run's cache content.
    pub primary: String,
    /// Fallback prefixes, highest priority first.
    #[serde(default)]
    pub restore_keys: Vec<String>,
}

impl CacheKeys {
    pub fn new(primary: impl Into<String>, restore_keys: Vec<String>) -> Self {
        Self {
            primary: primary.into(),
            restore_keys,
        }
    }

    /// Primary key followed by the restore keys, in priority order.
    pub fn all(&self) -> Vec<String> {
        std::iter::once(self.primary.clone())
            .chain(self.restore_keys.iter().cloned())
            .collect()
    }
}

/// An object as reported by the store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoredObject {
    /// Full object name, relative to the configured root.
    pub identifier: String,
    /// Size in bytes.
    pub size: u64,
    /// Last modification time, when the backend reports one.
    pub last_modified: Option<DateTime<Utc>>,
}

/// The single object selected by key resolution.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MatchResult {
    pub object: StoredObject,
    /// The primary key or the restore key that produced the hit.
    pub matching_key: String,
}

impl MatchResult {
    pub fn is_exact(&self, primary: &str) -> bool {
        self.matching_key == primary
    }
}

/// Access credentials in effect for a run.
#[derive(Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Credentials {
    pub access_key: String,
    pub secret_key: String,
    pub session_token: Option<String>,
    pub region: Option<String>,
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("access_key", &self.access_key)
            .field("secret_key", &"<redacted>")
            .field(
                "session_token",
                &self.session_token.as_ref().map(|_| "<redacted>"),
            )
            .field("region", &self.region)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_archive_names() {
        assert_eq!(CompressionMethod::Gzip.archive_name(), "cache.tgz");
        assert_eq!(CompressionMethod::Zstd.archive_name(), "cache.tzst");
    }

    #[test]
    fn test_parse_compression() {
        assert_eq!(
            "GZIP".parse::<CompressionMethod>().unwrap(),
            CompressionMethod::Gzip
        );
        assert_eq!(
            " zstd ".parse::<CompressionMethod>().unwrap(),
            CompressionMethod::Zstd
        );
        assert!("lz4".parse::<CompressionMethod>().is_err());
    }

    #[test]
    fn test_keys_in_priority_order() {
        let keys = CacheKeys::new(
            "linux-x64-abc",
            vec!["linux-x64-".to_string(), "linux-".to_string()],
        );
        assert_eq!(keys.all(), vec!["linux-x64-abc", "linux-x64-", "linux-"]);
    }

    #[test]
    fn test_credentials_debug_redacts_secrets() {
        let creds = Credentials {
            access_key: "AKIA".into(),
            secret_key: "super-secret".into(),
            session_token: Some("sess-tok-123".into()),
            region: None,
        };
        let rendered = format!("{:?}", creds);
        assert!(rendered.contains("AKIA"));
        assert!(!rendered.contains("super-secret"));
        assert!(!rendered.contains("sess-tok-123"));
    }
}
