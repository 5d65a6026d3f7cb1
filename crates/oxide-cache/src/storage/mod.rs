//! Storage adapters.
//!
//! A backend is exposed in one of two capability shapes: a direct client
//! that moves bytes itself, or a signer that hands out presigned requests for
//! the transfer engine to execute.

pub mod memory;
pub mod s3;

use crate::types::{PresignedRequest, TransferDirection, TransferMode};
use async_trait::async_trait;
use oxide_core::{Credentials, Result, StoredObject};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

pub use memory::MemoryProvider;
pub use s3::{S3Connector, S3Provider, S3Settings};

/// Read-only view shared by every backend.
#[async_trait]
pub trait StorageProvider: Send + Sync {
    /// List objects whose identifier starts with `prefix`, in listing order.
    async fn list(&self, prefix: &str) -> Result<Vec<StoredObject>>;

    /// Fetch metadata for a single object.
    async fn stat(&self, identifier: &str) -> Result<StoredObject>;

    /// Provider name for logging.
    fn name(&self) -> &str;
}

/// Backend holding long-lived credentials that performs transfers itself.
#[async_trait]
pub trait DirectProvider: StorageProvider {
    /// Stream an object into a local file.
    async fn get_to_file(&self, identifier: &str, dest: &Path) -> Result<()>;

    /// Stream a local file into an object.
    async fn put_from_file(&self, src: &Path, identifier: &str) -> Result<()>;
}

/// Backend that consumes credentials only to sign requests.
#[async_trait]
pub trait PresignProvider: StorageProvider {
    async fn presign(
        &self,
        identifier: &str,
        direction: TransferDirection,
        expires_in: Duration,
    ) -> Result<PresignedRequest>;
}

/// A configured backend in one of its two capability shapes.
#[derive(Clone)]
pub enum StorageBackend {
    Direct(Arc<dyn DirectProvider>),
    Presigned(Arc<dyn PresignProvider>),
}

impl StorageBackend {
    pub async fn list(&self, prefix: &str) -> Result<Vec<StoredObject>> {
        match self {
            StorageBackend::Direct(provider) => provider.list(prefix).await,
            StorageBackend::Presigned(provider) => provider.list(prefix).await,
        }
    }

    pub async fn stat(&self, identifier: &str) -> Result<StoredObject> {
        match self {
            StorageBackend::Direct(provider) => provider.stat(identifier).await,
            StorageBackend::Presigned(provider) => provider.stat(identifier).await,
        }
    }

    pub fn name(&self) -> &str {
        match self {
            StorageBackend::Direct(provider) => provider.name(),
            StorageBackend::Presigned(provider) => provider.name(),
        }
    }

    pub fn mode(&self) -> TransferMode {
        match self {
            StorageBackend::Direct(_) => TransferMode::Direct,
            StorageBackend::Presigned(_) => TransferMode::Presigned,
        }
    }
}

impl std::fmt::Debug for StorageBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StorageBackend")
            .field("provider", &self.name())
            .field("mode", &self.mode())
            .finish()
    }
}

/// Builds a backend for a given identity.
///
/// The restore phase connects with freshly read credentials; the save phase
/// connects with the snapshot recorded during restore.
pub trait StorageConnector: Send + Sync {
    fn connect(&self, credentials: &Credentials) -> Result<StorageBackend>;
}
