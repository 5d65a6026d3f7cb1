//! Client for the runner's hosted cache service, used as the fallback cache.

use crate::archiver::Archiver;
use crate::fallback::SecondaryCache;
use async_trait::async_trait;
use futures::StreamExt;
use oxide_core::{CompressionMethod, Error, Result};
use reqwest::StatusCode;
use reqwest::header::{ACCEPT, CONTENT_RANGE, CONTENT_TYPE};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tracing::{debug, info};

const API_ACCEPT: &str = "application/json;api-version=6.0-preview.1";
const VERSION_SALT: &str = "1.0";
const UPLOAD_CHUNK_SIZE: usize = 32 * 1024 * 1024;

/// Where the hosted cache service lives and how to authenticate to it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HostedCacheEndpoint {
    pub base_url: String,
    pub token: String,
}

impl HostedCacheEndpoint {
    /// Read `ACTIONS_CACHE_URL` and `ACTIONS_RUNTIME_TOKEN`.
    pub fn from_env() -> Option<Self> {
        Some(Self {
            base_url: std::env::var("ACTIONS_CACHE_URL").ok()?,
            token: std::env::var("ACTIONS_RUNTIME_TOKEN").ok()?,
        })
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct CacheEntryResponse {
    cache_key: Option<String>,
    archive_location: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct ReserveCacheRequest<'a> {
    key: &'a str,
    version: &'a str,
    cache_size: u64,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ReserveCacheResponse {
    cache_id: i64,
}

#[derive(Debug, Serialize)]
struct CommitCacheRequest {
    size: u64,
}

/// Cache version: archives are only interchangeable between runs caching
/// the same paths with the same compression.
///
/// The version is private to this client. Archives here use this crate's
/// entry layout (workspace-relative names, `~` for the home directory) and
/// the compression is part of the hash, so entries saved by other cache
/// clients under the same key never match and are never extracted.
pub fn cache_version(paths: &[String], compression: CompressionMethod) -> String {
    let mut components: Vec<&str> = paths.iter().map(String::as_str).collect();
    components.push(compression.as_str());
    components.push(VERSION_SALT);
    hex::encode(Sha256::digest(components.join("|").as_bytes()))
}

/// Hosted cache client.
pub struct HostedCache {
    http: reqwest::Client,
    endpoint: Option<HostedCacheEndpoint>,
    archiver: Arc<dyn Archiver>,
    compression: CompressionMethod,
    temp_dir: PathBuf,
}

impl HostedCache {
    pub fn new(
        endpoint: Option<HostedCacheEndpoint>,
        archiver: Arc<dyn Archiver>,
        compression: CompressionMethod,
        temp_dir: impl Into<PathBuf>,
    ) -> Self {
        Self {
            http: reqwest::Client::new(),
            endpoint,
            archiver,
            compression,
            temp_dir: temp_dir.into(),
        }
    }

    fn endpoint(&self) -> Result<&HostedCacheEndpoint> {
        self.endpoint.as_ref().ok_or_else(|| {
            Error::FallbackFailed("hosted cache service is not configured for this run".into())
        })
    }

    fn url(&self, endpoint: &HostedCacheEndpoint, resource: &str) -> String {
        format!(
            "{}/_apis/artifactcache/{}",
            endpoint.base_url.trim_end_matches('/'),
            resource
        )
    }

    fn request(
        &self,
        endpoint: &HostedCacheEndpoint,
        method: reqwest::Method,
        resource: &str,
    ) -> reqwest::RequestBuilder {
        self.http
            .request(method, self.url(endpoint, resource))
            .header(ACCEPT, API_ACCEPT)
            .bearer_auth(&endpoint.token)
    }

    async fn download(&self, location: &str, dest: &Path) -> Result<()> {
        let response = self
            .http
            .get(location)
            .send()
            .await
            .map_err(|e| Error::FallbackFailed(format!("archive download failed: {}", e)))?;
        if !response.status().is_success() {
            return Err(Error::FallbackFailed(format!(
                "archive download returned {}",
                response.status()
            )));
        }

        let mut file = tokio::fs::File::create(dest).await?;
        let mut body = response.bytes_stream();
        while let Some(chunk) = body.next().await {
            let chunk = chunk
                .map_err(|e| Error::FallbackFailed(format!("archive download failed: {}", e)))?;
            file.write_all(&chunk).await?;
        }
        file.flush().await?;
        Ok(())
    }

    async fn reserve(
        &self,
        endpoint: &HostedCacheEndpoint,
        key: &str,
        version: &str,
        size: u64,
    ) -> Result<i64> {
        let response = self
            .request(endpoint, reqwest::Method::POST, "caches")
            .json(&ReserveCacheRequest {
                key,
                version,
                cache_size: size,
            })
            .send()
            .await
            .map_err(|e| Error::FallbackFailed(format!("cache reservation failed: {}", e)))?;

        if !response.status().is_success() {
            return Err(Error::FallbackFailed(format!(
                "unable to reserve cache with key {} ({})",
                key,
                response.status()
            )));
        }
        let reserved: ReserveCacheResponse = response
            .json()
            .await
            .map_err(|e| Error::FallbackFailed(format!("invalid reservation response: {}", e)))?;
        Ok(reserved.cache_id)
    }

    /// Upload the archive in fixed-size ranges.
    async fn upload_chunks(
        &self,
        endpoint: &HostedCacheEndpoint,
        cache_id: i64,
        archive: &Path,
        size: u64,
    ) -> Result<()> {
        let resource = format!("caches/{}", cache_id);
        let mut file = tokio::fs::File::open(archive).await?;
        let mut offset = 0u64;

        while offset < size {
            let len = UPLOAD_CHUNK_SIZE.min((size - offset) as usize);
            let mut chunk = vec![0u8; len];
            file.read_exact(&mut chunk).await?;

            let range = format!("bytes {}-{}/*", offset, offset + len as u64 - 1);
            let response = self
                .request(endpoint, reqwest::Method::PATCH, &resource)
                .header(CONTENT_TYPE, "application/octet-stream")
                .header(CONTENT_RANGE, &range)
                .body(chunk)
                .send()
                .await
                .map_err(|e| Error::FallbackFailed(format!("chunk upload failed: {}", e)))?;
            if !response.status().is_success() {
                return Err(Error::FallbackFailed(format!(
                    "chunk upload {} returned {}",
                    range,
                    response.status()
                )));
            }
            debug!(cache_id, range = %range, "Uploaded chunk");
            offset += len as u64;
        }
        Ok(())
    }

    async fn commit(
        &self,
        endpoint: &HostedCacheEndpoint,
        cache_id: i64,
        size: u64,
    ) -> Result<()> {
        let response = self
            .request(endpoint, reqwest::Method::POST, &format!("caches/{}", cache_id))
            .json(&CommitCacheRequest { size })
            .send()
            .await
            .map_err(|e| Error::FallbackFailed(format!("cache commit failed: {}", e)))?;
        if !response.status().is_success() {
            return Err(Error::FallbackFailed(format!(
                "cache commit returned {}",
                response.status()
            )));
        }
        Ok(())
    }

    fn scratch_dir(&self) -> Result<tempfile::TempDir> {
        std::fs::create_dir_all(&self.temp_dir)?;
        Ok(tempfile::Builder::new()
            .prefix("oxide-cache-fallback")
            .tempdir_in(&self.temp_dir)?)
    }
}

#[async_trait]
impl SecondaryCache for HostedCache {
    async fn restore(
        &self,
        paths: &[String],
        primary_key: &str,
        restore_keys: &[String],
    ) -> Result<Option<String>> {
        let endpoint = self.endpoint()?;
        let keys = std::iter::once(primary_key)
            .chain(restore_keys.iter().map(String::as_str))
            .collect::<Vec<_>>()
            .join(",");
        let version = cache_version(paths, self.compression);

        let response = self
            .request(endpoint, reqwest::Method::GET, "cache")
            .query(&[("keys", keys.as_str()), ("version", version.as_str())])
            .send()
            .await
            .map_err(|e| Error::FallbackFailed(format!("cache lookup failed: {}", e)))?;

        match response.status() {
            StatusCode::NO_CONTENT | StatusCode::NOT_FOUND => return Ok(None),
            status if !status.is_success() => {
                return Err(Error::FallbackFailed(format!(
                    "cache lookup returned {}",
                    status
                )));
            }
            _ => {}
        }

        let entry: CacheEntryResponse = response
            .json()
            .await
            .map_err(|e| Error::FallbackFailed(format!("invalid cache entry: {}", e)))?;
        let Some(location) = entry.archive_location else {
            return Ok(None);
        };

        let scratch = self.scratch_dir()?;
        let archive = scratch.path().join(self.compression.archive_name());
        self.download(&location, &archive).await?;

        let archiver = self.archiver.clone();
        let compression = self.compression;
        tokio::task::spawn_blocking(move || archiver.unpack(&archive, compression))
            .await
            .map_err(|e| Error::Internal(e.to_string()))??;

        Ok(Some(entry.cache_key.unwrap_or_else(|| primary_key.to_string())))
    }

    async fn save(&self, paths: &[String], primary_key: &str) -> Result<()> {
        let endpoint = self.endpoint()?;
        let version = cache_version(paths, self.compression);

        let scratch = self.scratch_dir()?;
        let archiver = self.archiver.clone();
        let archive_dir = scratch.path().to_path_buf();
        let cache_paths: Vec<PathBuf> = paths.iter().map(PathBuf::from).collect();
        let compression = self.compression;
        let archive = tokio::task::spawn_blocking(move || {
            archiver.pack(&archive_dir, &cache_paths, compression)
        })
        .await
        .map_err(|e| Error::Internal(e.to_string()))??;
        let size = tokio::fs::metadata(&archive).await?.len();

        let cache_id = self.reserve(endpoint, primary_key, &version, size).await?;
        self.upload_chunks(endpoint, cache_id, &archive, size).await?;
        self.commit(endpoint, cache_id, size).await?;
        info!(key = primary_key, cache_id, size, "Saved cache to hosted cache service");
        Ok(())
    }
}
