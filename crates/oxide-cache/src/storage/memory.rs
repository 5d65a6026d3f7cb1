//! In-memory storage provider for local runs and tests.

use super::{DirectProvider, StorageProvider};
use crate::keys::matches_prefix;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use oxide_core::{Error, Result, StoredObject};
use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

struct MemoryObject {
    data: Vec<u8>,
    last_modified: Option<DateTime<Utc>>,
}

/// Process-local object store.
///
/// Listing is lexicographic by identifier, like S3. Listing can be told to
/// omit timestamps to mimic backends that only report them through a stat
/// call, and transfers can be made to fail.
#[derive(Default)]
pub struct MemoryProvider {
    objects: Mutex<BTreeMap<String, MemoryObject>>,
    hide_listing_timestamps: AtomicBool,
    fail_transfers: AtomicBool,
    transfers: AtomicUsize,
    stats: AtomicUsize,
}

impl MemoryProvider {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store an object directly, bypassing the transfer counters.
    pub fn insert(
        &self,
        identifier: impl Into<String>,
        data: Vec<u8>,
        last_modified: Option<DateTime<Utc>>,
    ) {
        self.lock().insert(
            identifier.into(),
            MemoryObject {
                data,
                last_modified,
            },
        );
    }

    /// Contents of a stored object.
    pub fn get(&self, identifier: &str) -> Option<Vec<u8>> {
        self.lock().get(identifier).map(|o| o.data.clone())
    }

    pub fn identifiers(&self) -> Vec<String> {
        self.lock().keys().cloned().collect()
    }

    pub fn hide_listing_timestamps(&self, hide: bool) {
        self.hide_listing_timestamps.store(hide, Ordering::SeqCst);
    }

    pub fn fail_transfers(&self, fail: bool) {
        self.fail_transfers.store(fail, Ordering::SeqCst);
    }

    /// Number of get/put calls served.
    pub fn transfer_count(&self) -> usize {
        self.transfers.load(Ordering::SeqCst)
    }

    /// Number of stat calls served.
    pub fn stat_count(&self) -> usize {
        self.stats.load(Ordering::SeqCst)
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, BTreeMap<String, MemoryObject>> {
        self.objects.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn begin_transfer(&self) -> Result<()> {
        self.transfers.fetch_add(1, Ordering::SeqCst);
        if self.fail_transfers.load(Ordering::SeqCst) {
            return Err(Error::StorageUnavailable(
                "memory provider configured to fail transfers".into(),
            ));
        }
        Ok(())
    }
}

#[async_trait]
impl StorageProvider for MemoryProvider {
    async fn list(&self, prefix: &str) -> Result<Vec<StoredObject>> {
        let hide = self.hide_listing_timestamps.load(Ordering::SeqCst);
        Ok(self
            .lock()
            .iter()
            .filter(|(id, _)| matches_prefix(id, prefix))
            .map(|(id, object)| StoredObject {
                identifier: id.clone(),
                size: object.data.len() as u64,
                last_modified: if hide { None } else { object.last_modified },
            })
            .collect())
    }

    async fn stat(&self, identifier: &str) -> Result<StoredObject> {
        self.stats.fetch_add(1, Ordering::SeqCst);
        self.lock()
            .get(identifier)
            .map(|object| StoredObject {
                identifier: identifier.to_string(),
                size: object.data.len() as u64,
                last_modified: object.last_modified,
            })
            .ok_or_else(|| Error::NotFound(vec![identifier.to_string()]))
    }

    fn name(&self) -> &str {
        "memory"
    }
}

#[async_trait]
impl DirectProvider for MemoryProvider {
    async fn get_to_file(&self, identifier: &str, dest: &Path) -> Result<()> {
        self.begin_transfer()?;
        let data = self
            .get(identifier)
            .ok_or_else(|| Error::NotFound(vec![identifier.to_string()]))?;
        tokio::fs::write(dest, data).await?;
        Ok(())
    }

    async fn put_from_file(&self, src: &Path, identifier: &str) -> Result<()> {
        self.begin_transfer()?;
        let data = tokio::fs::read(src).await?;
        self.insert(identifier, data, Some(Utc::now()));
        Ok(())
    }
}
