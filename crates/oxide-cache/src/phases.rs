//! The restore and save phases of a run.
//!
//! Each phase is a separate process invocation. Everything a phase needs is
//! carried in a [`RunContext`]; the only thing shared between phases is the
//! run state record behind [`RunStateBridge`].

use crate::archiver::Archiver;
use crate::fallback::{FallbackCoordinator, FallbackDirection, FallbackOutcome, FallbackRequest};
use crate::host::HostEnvironment;
use crate::inputs::ActionConfig;
use crate::outputs::ActionOutputs;
use crate::keys::KeyLayout;
use crate::resolver::KeyResolver;
use crate::state::{RunState, RunStateBridge};
use crate::storage::StorageConnector;
use crate::transfer::{TransferEngine, format_size};
use oxide_core::{CacheKeys, CompressionMethod, Error, MatchResult, Result};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Handles for one phase of a run.
pub struct RunContext {
    pub config: ActionConfig,
    pub environment: HostEnvironment,
    pub state: RunStateBridge,
    pub archiver: Arc<dyn Archiver>,
    pub fallback: FallbackCoordinator,
    pub connector: Arc<dyn StorageConnector>,
}

impl RunContext {
    /// Verbose diagnostics, from the `debug` input or the host.
    pub fn debug(&self) -> bool {
        self.config.debug || self.environment.runner_debug
    }

    fn scratch_dir(&self) -> Result<tempfile::TempDir> {
        std::fs::create_dir_all(&self.environment.temp_dir)?;
        Ok(tempfile::Builder::new()
            .prefix("oxide-cache")
            .tempdir_in(&self.environment.temp_dir)?)
    }

    async fn log_contents(&self, archive: &Path, compression: CompressionMethod) {
        if !self.debug() {
            return;
        }
        let archiver = self.archiver.clone();
        let archive = archive.to_path_buf();
        let listed =
            tokio::task::spawn_blocking(move || archiver.list_contents(&archive, compression))
                .await
                .map_err(|e| Error::Internal(e.to_string()));
        match listed {
            Ok(Ok(entries)) => {
                for entry in entries {
                    debug!(entry = %entry, "Archive entry");
                }
            }
            Ok(Err(e)) | Err(e) => debug!(error = %e, "Could not list archive contents"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RestoreSource {
    Primary,
    Fallback,
    None,
}

/// Result of the restore phase.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RestoreOutcome {
    pub matched_key: Option<String>,
    pub cache_hit: bool,
    pub size: Option<u64>,
    pub source: RestoreSource,
}

impl RestoreOutcome {
    pub fn outputs(&self) -> ActionOutputs {
        ActionOutputs {
            cache_hit: self.cache_hit,
            matched_key: self.matched_key.clone(),
            cache_size: self.size,
        }
    }
}

/// Result of the save phase.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SaveOutcome {
    SkippedExactMatch,
    Saved { identifier: String, size: Option<u64> },
    /// None of the cache paths exist; nothing was uploaded.
    NothingToSave,
    Fallback(FallbackOutcome),
}

/// Restore phase: resolve, download, extract, and record what matched.
///
/// Only configuration errors are returned; storage failures end in the
/// fallback cache or a clean miss.
pub async fn restore(ctx: &RunContext) -> Result<RestoreOutcome> {
    let keys = ctx.config.cache_keys()?;
    ctx.state
        .record_identity(&keys.primary, &ctx.config.credentials)?;
    ctx.state
        .record_layout(ctx.config.compression, ctx.config.root.as_deref())?;

    let (matched_key, size, source) = match restore_from_storage(ctx, &keys).await {
        Ok((matched, size)) => (Some(matched.matching_key), size, RestoreSource::Primary),
        Err(e) => {
            match &e {
                Error::NotFound(keys) => info!("Cache not found for keys: {}", keys.join(", ")),
                other => warn!("Restore s3 cache failed: {}", other),
            }
            let request = FallbackRequest {
                paths: &ctx.config.paths,
                primary_key: &keys.primary,
                restore_keys: &keys.restore_keys,
                direction: FallbackDirection::Restore,
            };
            match ctx.fallback.on_primary_failure(request).await {
                FallbackOutcome::Restored {
                    matched_key: Some(key),
                } => (Some(key), None, RestoreSource::Fallback),
                _ => (None, None, RestoreSource::None),
            }
        }
    };

    ctx.state.record_match(matched_key.as_deref())?;
    let cache_hit = matched_key.as_deref() == Some(keys.primary.as_str());
    Ok(RestoreOutcome {
        matched_key,
        cache_hit,
        size,
        source,
    })
}

async fn restore_from_storage(
    ctx: &RunContext,
    keys: &CacheKeys,
) -> Result<(MatchResult, Option<u64>)> {
    let backend = ctx.connector.connect(&ctx.config.credentials)?;
    let layout = ctx.config.layout();
    let compression = ctx.config.compression;

    let matched = KeyResolver::new(&backend, &layout)
        .resolve(keys, compression)
        .await?
        .ok_or_else(|| Error::NotFound(keys.all()))?;
    info!(
        key = %matched.matching_key,
        identifier = %matched.object.identifier,
        "Found cache object"
    );

    let scratch = ctx.scratch_dir()?;
    let archive = scratch.path().join(compression.archive_name());
    let report = TransferEngine::new(backend)
        .download(&matched.object.identifier, &archive)
        .await?;
    let size = report.size.or(Some(matched.object.size).filter(|s| *s > 0));
    if let Some(size) = size {
        info!("Cache Size: {} ({} bytes)", format_size(size), size);
    }

    ctx.log_contents(&archive, compression).await;

    let archiver = ctx.archiver.clone();
    tokio::task::spawn_blocking(move || archiver.unpack(&archive, compression))
        .await
        .map_err(|e| Error::Internal(e.to_string()))??;
    info!(key = %matched.matching_key, "Cache restored from s3");

    Ok((matched, size))
}

/// Save phase: replay the recorded identity, pack, and upload.
///
/// Skips everything when the restore phase had an exact hit. Compression and
/// key root come from the run state, not from the re-evaluated inputs.
pub async fn save(ctx: &RunContext) -> Result<SaveOutcome> {
    let state = ctx.state.load()?;
    if state.is_exact_match() {
        info!("Cache was exact key match, not saving");
        return Ok(SaveOutcome::SkippedExactMatch);
    }

    match save_to_storage(ctx, &state).await {
        Ok((identifier, size)) => Ok(SaveOutcome::Saved { identifier, size }),
        Err(e @ Error::NoCachePaths(_)) => {
            warn!("{}", e);
            Ok(SaveOutcome::NothingToSave)
        }
        Err(e) => {
            warn!("Save s3 cache failed: {}", e);
            let request = FallbackRequest {
                paths: &ctx.config.paths,
                primary_key: &state.primary_key,
                restore_keys: &[],
                direction: FallbackDirection::Save,
            };
            Ok(SaveOutcome::Fallback(
                ctx.fallback.on_primary_failure(request).await,
            ))
        }
    }
}

async fn save_to_storage(ctx: &RunContext, state: &RunState) -> Result<(String, Option<u64>)> {
    let backend = ctx.connector.connect(&state.credentials)?;
    let compression = state.compression;
    let identifier =
        KeyLayout::new(state.root.as_deref()).object_name(&state.primary_key, compression);

    let scratch = ctx.scratch_dir()?;
    let archiver = ctx.archiver.clone();
    let archive_dir = scratch.path().to_path_buf();
    let paths: Vec<PathBuf> = ctx.config.paths.iter().map(PathBuf::from).collect();
    let archive =
        tokio::task::spawn_blocking(move || archiver.pack(&archive_dir, &paths, compression))
            .await
            .map_err(|e| Error::Internal(e.to_string()))??;

    ctx.log_contents(&archive, compression).await;

    info!("Uploading tar to s3...");
    let report = TransferEngine::new(backend)
        .upload(&archive, &identifier)
        .await?;
    match report.size {
        Some(size) => info!(identifier = %identifier, "Cache saved ({})", format_size(size)),
        None => info!(identifier = %identifier, "Cache saved"),
    }

    Ok((identifier, report.size))
}
