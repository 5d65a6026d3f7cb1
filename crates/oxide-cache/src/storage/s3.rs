//! S3-compatible storage provider (AWS, MinIO, R2, ...).

use super::{DirectProvider, PresignProvider, StorageBackend, StorageConnector, StorageProvider};
use crate::types::{PresignedRequest, TransferDirection, TransferMode};
use async_trait::async_trait;
use aws_sdk_s3::Client;
use aws_sdk_s3::config::{BehaviorVersion, Region};
use aws_sdk_s3::error::DisplayErrorContext;
use aws_sdk_s3::presigning::PresigningConfig;
use aws_sdk_s3::primitives::ByteStream;
use chrono::{DateTime, Utc};
use oxide_core::{Credentials, Error, Result, StoredObject};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tracing::debug;

const DEFAULT_REGION: &str = "us-east-1";

/// Connection settings for an S3-compatible endpoint.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct S3Settings {
    pub bucket: String,
    /// Host name or full URL. `None` means the AWS default endpoint.
    pub endpoint: Option<String>,
    pub port: Option<u16>,
    pub use_ssl: bool,
}

impl S3Settings {
    /// Endpoint URL handed to the SDK, if a custom endpoint is configured.
    pub fn endpoint_url(&self) -> Option<String> {
        let endpoint = self.endpoint.as_deref()?.trim().trim_end_matches('/');
        if endpoint.is_empty() {
            return None;
        }
        let base = if endpoint.contains("://") {
            endpoint.to_string()
        } else {
            let scheme = if self.use_ssl { "https" } else { "http" };
            format!("{}://{}", scheme, endpoint)
        };
        Some(match self.port {
            Some(port) => format!("{}:{}", base, port),
            None => base,
        })
    }
}

/// S3 provider usable in both capability shapes.
pub struct S3Provider {
    client: Client,
    bucket: String,
}

impl S3Provider {
    pub fn new(settings: &S3Settings, credentials: &Credentials) -> Self {
        let region = credentials
            .region
            .clone()
            .unwrap_or_else(|| DEFAULT_REGION.to_string());
        let static_credentials = aws_sdk_s3::config::Credentials::new(
            credentials.access_key.clone(),
            credentials.secret_key.clone(),
            credentials.session_token.clone(),
            None,
            "oxide-cache",
        );

        let mut builder = aws_sdk_s3::Config::builder()
            .behavior_version(BehaviorVersion::latest())
            .region(Region::new(region))
            .credentials_provider(static_credentials)
            .force_path_style(true);
        if let Some(url) = settings.endpoint_url() {
            debug!(endpoint = %url, "Using custom S3 endpoint");
            builder = builder.endpoint_url(url);
        }

        Self {
            client: Client::from_conf(builder.build()),
            bucket: settings.bucket.clone(),
        }
    }
}

fn storage_error<E: std::error::Error>(action: &str, err: E) -> Error {
    Error::StorageUnavailable(format!("{} failed: {}", action, DisplayErrorContext(err)))
}

fn to_chrono(ts: &aws_sdk_s3::primitives::DateTime) -> Option<DateTime<Utc>> {
    DateTime::from_timestamp(ts.secs(), ts.subsec_nanos())
}

fn to_size(len: Option<i64>) -> u64 {
    len.unwrap_or_default().max(0) as u64
}

#[async_trait]
impl StorageProvider for S3Provider {
    async fn list(&self, prefix: &str) -> Result<Vec<StoredObject>> {
        let mut pages = self
            .client
            .list_objects_v2()
            .bucket(&self.bucket)
            .prefix(prefix)
            .into_paginator()
            .send();

        let mut objects = Vec::new();
        while let Some(page) = pages.next().await {
            let page = page.map_err(|e| storage_error("ListObjectsV2", e))?;
            for object in page.contents() {
                let Some(key) = object.key() else {
                    continue;
                };
                objects.push(StoredObject {
                    identifier: key.to_string(),
                    size: to_size(object.size()),
                    last_modified: object.last_modified().and_then(to_chrono),
                });
            }
        }

        debug!(bucket = %self.bucket, prefix, count = objects.len(), "Listed objects");
        Ok(objects)
    }

    async fn stat(&self, identifier: &str) -> Result<StoredObject> {
        let output = self
            .client
            .head_object()
            .bucket(&self.bucket)
            .key(identifier)
            .send()
            .await
            .map_err(|e| {
                if e.as_service_error().is_some_and(|s| s.is_not_found()) {
                    Error::NotFound(vec![identifier.to_string()])
                } else {
                    storage_error("HeadObject", e)
                }
            })?;

        Ok(StoredObject {
            identifier: identifier.to_string(),
            size: to_size(output.content_length()),
            last_modified: output.last_modified().and_then(to_chrono),
        })
    }

    fn name(&self) -> &str {
        "s3"
    }
}

#[async_trait]
impl DirectProvider for S3Provider {
    async fn get_to_file(&self, identifier: &str, dest: &Path) -> Result<()> {
        let output = self
            .client
            .get_object()
            .bucket(&self.bucket)
            .key(identifier)
            .send()
            .await
            .map_err(|e| storage_error("GetObject", e))?;

        let mut reader = output.body.into_async_read();
        let mut file = tokio::fs::File::create(dest).await?;
        tokio::io::copy(&mut reader, &mut file).await?;
        file.flush().await?;
        Ok(())
    }

    async fn put_from_file(&self, src: &Path, identifier: &str) -> Result<()> {
        let body = ByteStream::from_path(src)
            .await
            .map_err(|e| Error::Internal(format!("Failed to open {}: {}", src.display(), e)))?;

        self.client
            .put_object()
            .bucket(&self.bucket)
            .key(identifier)
            .body(body)
            .send()
            .await
            .map_err(|e| storage_error("PutObject", e))?;
        Ok(())
    }
}

#[async_trait]
impl PresignProvider for S3Provider {
    async fn presign(
        &self,
        identifier: &str,
        direction: TransferDirection,
        expires_in: Duration,
    ) -> Result<PresignedRequest> {
        let config = PresigningConfig::expires_in(expires_in)
            .map_err(|e| Error::Internal(format!("Invalid presign expiry: {}", e)))?;

        let (request, content_length) = match direction {
            TransferDirection::Read => {
                let object = self.stat(identifier).await?;
                let request = self
                    .client
                    .get_object()
                    .bucket(&self.bucket)
                    .key(identifier)
                    .presigned(config)
                    .await
                    .map_err(|e| storage_error("Presign GetObject", e))?;
                (request, Some(object.size))
            }
            TransferDirection::Write => {
                let request = self
                    .client
                    .put_object()
                    .bucket(&self.bucket)
                    .key(identifier)
                    .presigned(config)
                    .await
                    .map_err(|e| storage_error("Presign PutObject", e))?;
                (request, None)
            }
        };

        Ok(PresignedRequest {
            method: request.method().to_string(),
            url: request.uri().to_string(),
            headers: request
                .headers()
                .map(|(name, value)| (name.to_string(), value.to_string()))
                .collect(),
            content_length,
        })
    }
}

/// Connects [`S3Provider`]s in the configured transfer mode.
pub struct S3Connector {
    settings: S3Settings,
    mode: TransferMode,
}

impl S3Connector {
    pub fn new(settings: S3Settings, mode: TransferMode) -> Self {
        Self { settings, mode }
    }
}

impl StorageConnector for S3Connector {
    fn connect(&self, credentials: &Credentials) -> Result<StorageBackend> {
        let provider = Arc::new(S3Provider::new(&self.settings, credentials));
        Ok(match self.mode {
            TransferMode::Direct => StorageBackend::Direct(provider),
            TransferMode::Presigned => StorageBackend::Presigned(provider),
        })
    }
}
