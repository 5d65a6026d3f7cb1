//! Transfer types shared by the storage adapters and the transfer engine.

use oxide_core::{Error, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

/// Lifetime of a presigned request.
pub const PRESIGN_EXPIRY: Duration = Duration::from_secs(600);

/// Upper bound on a single listing call.
pub const LIST_TIMEOUT: Duration = Duration::from_secs(10);

/// Direction a presigned request grants access for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransferDirection {
    Read,
    Write,
}

/// How bytes move between disk and the store.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransferMode {
    /// The adapter reads and writes objects with its own credentials.
    #[default]
    Direct,
    /// The adapter only signs requests; a plain HTTP client moves the bytes.
    Presigned,
}

impl fmt::Display for TransferMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TransferMode::Direct => f.write_str("direct"),
            TransferMode::Presigned => f.write_str("presigned"),
        }
    }
}

impl FromStr for TransferMode {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "direct" => Ok(TransferMode::Direct),
            "presigned" | "presign" => Ok(TransferMode::Presigned),
            other => Err(Error::InvalidInput {
                name: "transfer-mode".into(),
                reason: format!("expected 'direct' or 'presigned', got '{}'", other),
            }),
        }
    }
}

/// A signed request descriptor scoped to one object and one direction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PresignedRequest {
    pub method: String,
    pub url: String,
    pub headers: HashMap<String, String>,
    /// Object size known at signing time, if any.
    pub content_length: Option<u64>,
}

/// Result of a completed download or upload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransferReport {
    pub identifier: String,
    pub path: PathBuf,
    /// Final object size. Missing sizes are missing telemetry, not failures.
    pub size: Option<u64>,
}
