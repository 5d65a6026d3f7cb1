//! Moves archives between local disk and the store.

use crate::storage::StorageBackend;
use crate::types::{PRESIGN_EXPIRY, PresignedRequest, TransferDirection, TransferReport};
use futures::StreamExt;
use oxide_core::{Error, Result};
use reqwest::header::CONTENT_LENGTH;
use std::path::Path;
use tokio::io::AsyncWriteExt;
use tokio_util::io::ReaderStream;
use tracing::debug;

/// Transfer engine over either capability shape of a backend.
///
/// Both strategies behave the same from the caller's point of view: the
/// archive ends up at the destination and the object size is reported when
/// the store provides it.
pub struct TransferEngine {
    backend: StorageBackend,
    http: reqwest::Client,
}

impl TransferEngine {
    pub fn new(backend: StorageBackend) -> Self {
        Self::with_http_client(backend, reqwest::Client::new())
    }

    pub fn with_http_client(backend: StorageBackend, http: reqwest::Client) -> Self {
        Self { backend, http }
    }

    /// Download an object to `dest`.
    pub async fn download(&self, identifier: &str, dest: &Path) -> Result<TransferReport> {
        let size = match &self.backend {
            StorageBackend::Direct(provider) => {
                provider.get_to_file(identifier, dest).await?;
                match provider.stat(identifier).await {
                    Ok(object) => Some(object.size),
                    Err(e) => {
                        debug!(identifier, error = %e, "Object size unavailable");
                        None
                    }
                }
            }
            StorageBackend::Presigned(provider) => {
                let request = provider
                    .presign(identifier, TransferDirection::Read, PRESIGN_EXPIRY)
                    .await?;
                let response = self.send(&request, None).await?;

                let mut file = tokio::fs::File::create(dest).await?;
                let mut body = response.bytes_stream();
                while let Some(chunk) = body.next().await {
                    let chunk = chunk.map_err(|e| {
                        Error::StorageUnavailable(format!("Download of {} failed: {}", identifier, e))
                    })?;
                    file.write_all(&chunk).await?;
                }
                file.flush().await?;
                request.content_length
            }
        };

        Ok(TransferReport {
            identifier: identifier.to_string(),
            path: dest.to_path_buf(),
            size,
        })
    }

    /// Upload the file at `src` as `identifier`.
    pub async fn upload(&self, src: &Path, identifier: &str) -> Result<TransferReport> {
        let size = match &self.backend {
            StorageBackend::Direct(provider) => {
                provider.put_from_file(src, identifier).await?;
                match provider.stat(identifier).await {
                    Ok(object) => Some(object.size),
                    Err(e) => {
                        debug!(identifier, error = %e, "Object size unavailable");
                        None
                    }
                }
            }
            StorageBackend::Presigned(provider) => {
                let request = provider
                    .presign(identifier, TransferDirection::Write, PRESIGN_EXPIRY)
                    .await?;
                let len = tokio::fs::metadata(src).await?.len();
                let file = tokio::fs::File::open(src).await?;
                let body = reqwest::Body::wrap_stream(ReaderStream::new(file));
                self.send(&request, Some((body, len))).await?;
                Some(len)
            }
        };

        Ok(TransferReport {
            identifier: identifier.to_string(),
            path: src.to_path_buf(),
            size,
        })
    }

    /// Execute a presigned request descriptor as-is.
    async fn send(
        &self,
        request: &PresignedRequest,
        body: Option<(reqwest::Body, u64)>,
    ) -> Result<reqwest::Response> {
        let method = reqwest::Method::from_bytes(request.method.as_bytes()).map_err(|e| {
            Error::Internal(format!("Invalid presigned method '{}': {}", request.method, e))
        })?;

        let mut builder = self.http.request(method.clone(), &request.url);
        for (name, value) in &request.headers {
            builder = builder.header(name.as_str(), value.as_str());
        }
        if let Some((body, len)) = body {
            builder = builder.header(CONTENT_LENGTH, len).body(body);
        }

        let response = builder.send().await.map_err(|e| {
            Error::StorageUnavailable(format!("Presigned {} request failed: {}", method, e))
        })?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(Error::StorageUnavailable(format!(
                "Presigned {} request returned {}: {}",
                method, status, text
            )));
        }
        Ok(response)
    }
}

/// Human readable size in decimal units, e.g. `1.5MB`.
pub fn format_size(bytes: u64) -> String {
    const UNITS: [&str; 6] = ["kB", "MB", "GB", "TB", "PB", "EB"];

    if bytes < 1000 {
        return format!("{} byte{}", bytes, if bytes == 1 { "" } else { "s" });
    }
    let mut value = bytes as f64;
    let mut exp = 0;
    while value >= 1000.0 && exp < UNITS.len() {
        value /= 1000.0;
        exp += 1;
    }
    let rounded = (value * 100.0).round() / 100.0;
    format!("{}{}", rounded, UNITS[exp - 1])
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::MemoryProvider;
    use std::sync::Arc;

    #[test]
    fn test_format_size() {
        assert_eq!(format_size(0), "0 bytes");
        assert_eq!(format_size(1), "1 byte");
        assert_eq!(format_size(512), "512 bytes");
        assert_eq!(format_size(2_000), "2kB");
        assert_eq!(format_size(1_500_000), "1.5MB");
        assert_eq!(format_size(1_234_567_890), "1.23GB");
    }

    #[tokio::test]
    async fn test_direct_download_reports_store_size() {
        let dir = tempfile::tempdir().unwrap();
        let provider = Arc::new(MemoryProvider::new());
        provider.insert("k/cache.tzst", vec![7; 42], None);
        let engine = TransferEngine::new(StorageBackend::Direct(provider.clone()));

        let dest = dir.path().join("cache.tzst");
        let report = engine.download("k/cache.tzst", &dest).await.unwrap();

        assert_eq!(report.size, Some(42));
        assert_eq!(tokio::fs::read(&dest).await.unwrap(), vec![7; 42]);
    }

    #[tokio::test]
    async fn test_direct_upload() {
        let dir = tempfile::tempdir().unwrap();
        let src = dir.path().join("cache.tzst");
        tokio::fs::write(&src, b"payload").await.unwrap();
        let provider = Arc::new(MemoryProvider::new());
        let engine = TransferEngine::new(StorageBackend::Direct(provider.clone()));

        let report = engine.upload(&src, "k/cache.tzst").await.unwrap();

        assert_eq!(report.size, Some(7));
        assert_eq!(provider.get("k/cache.tzst").unwrap(), b"payload");
    }

    #[tokio::test]
    async fn test_direct_download_missing_object() {
        let dir = tempfile::tempdir().unwrap();
        let provider = Arc::new(MemoryProvider::new());
        let engine = TransferEngine::new(StorageBackend::Direct(provider));

        let err = engine
            .download("missing/cache.tzst", &dir.path().join("out"))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::NotFound(_)));
    }
}
