//! Oxide Cache Core
//!
//! Shared vocabulary for the S3 cache action: the error taxonomy and the
//! cache data model used by the engine and the command-line entrypoint.

pub mod cache;
pub mod error;

pub use cache::{CacheKeys, CompressionMethod, Credentials, MatchResult, StoredObject};
pub use error::{Error, Result};
