//! Key resolution: primary key plus ordered restore keys to one stored object.

use crate::keys::{KeyLayout, matches_archive};
use crate::storage::StorageBackend;
use crate::types::LIST_TIMEOUT;
use oxide_core::{CacheKeys, CompressionMethod, Error, MatchResult, Result, StoredObject};
use std::time::Duration;
use tracing::debug;

/// Resolves cache keys against a storage backend.
///
/// Policy: an exact primary-key hit wins outright. Otherwise restore keys are
/// tried in the order supplied and the first one with any matching archive
/// wins; within that key the most recently modified archive is chosen.
pub struct KeyResolver<'a> {
    backend: &'a StorageBackend,
    layout: &'a KeyLayout,
    list_timeout: Duration,
}

impl<'a> KeyResolver<'a> {
    pub fn new(backend: &'a StorageBackend, layout: &'a KeyLayout) -> Self {
        Self {
            backend,
            layout,
            list_timeout: LIST_TIMEOUT,
        }
    }

    pub fn with_list_timeout(mut self, timeout: Duration) -> Self {
        self.list_timeout = timeout;
        self
    }

    /// Find the best stored object for `keys`.
    ///
    /// Returns `Ok(None)` when nothing matches; that is a normal outcome.
    pub async fn resolve(
        &self,
        keys: &CacheKeys,
        compression: CompressionMethod,
    ) -> Result<Option<MatchResult>> {
        let exact_name = self.layout.object_name(&keys.primary, compression);
        let exact: Vec<StoredObject> = self
            .list(&keys.primary)
            .await?
            .into_iter()
            .filter(|o| o.identifier == exact_name)
            .collect();
        if let Some(object) = self.select_latest(exact).await? {
            debug!(key = %keys.primary, object = %object.identifier, "Exact key match");
            return Ok(Some(MatchResult {
                object,
                matching_key: keys.primary.clone(),
            }));
        }

        for restore_key in &keys.restore_keys {
            let candidates: Vec<StoredObject> = self
                .list(restore_key)
                .await?
                .into_iter()
                .filter(|o| matches_archive(&o.identifier, compression))
                .collect();
            debug!(
                restore_key = %restore_key,
                candidates = candidates.len(),
                "Checked restore key"
            );
            if let Some(object) = self.select_latest(candidates).await? {
                return Ok(Some(MatchResult {
                    object,
                    matching_key: restore_key.clone(),
                }));
            }
        }

        Ok(None)
    }

    async fn list(&self, key: &str) -> Result<Vec<StoredObject>> {
        let prefix = self.layout.listing_prefix(key);
        match tokio::time::timeout(self.list_timeout, self.backend.list(&prefix)).await {
            Ok(listed) => listed,
            Err(_) => Err(Error::Timeout {
                operation: format!("Listing objects under '{}'", prefix),
                seconds: self.list_timeout.as_secs(),
            }),
        }
    }

    /// Pick the newest candidate, filling in timestamps the listing left out
    /// with one stat call per candidate.
    async fn select_latest(&self, candidates: Vec<StoredObject>) -> Result<Option<StoredObject>> {
        let mut resolved = Vec::with_capacity(candidates.len());
        for candidate in candidates {
            if candidate.last_modified.is_some() {
                resolved.push(candidate);
            } else {
                let stat = self.backend.stat(&candidate.identifier).await?;
                resolved.push(StoredObject {
                    last_modified: stat.last_modified,
                    ..candidate
                });
            }
        }
        Ok(pick_latest(resolved))
    }
}

/// Latest `last_modified` wins; ties and unknown timestamps fall back to
/// listing order. A known timestamp always beats an unknown one.
pub fn pick_latest(candidates: Vec<StoredObject>) -> Option<StoredObject> {
    let mut best: Option<StoredObject> = None;
    for candidate in candidates {
        let replace = match &best {
            None => true,
            Some(current) => match (candidate.last_modified, current.last_modified) {
                (Some(a), Some(b)) => a > b,
                (Some(_), None) => true,
                (None, _) => false,
            },
        };
        if replace {
            best = Some(candidate);
        }
    }
    best
}
