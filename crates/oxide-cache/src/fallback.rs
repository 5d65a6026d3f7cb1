//! Fallback to the secondary hosted cache when the primary store fails.

use crate::host::HostEnvironment;
use async_trait::async_trait;
use oxide_core::{Error, Result};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// The secondary cache, reached through a fixed save/restore call.
#[async_trait]
pub trait SecondaryCache: Send + Sync {
    /// Restore `paths`; returns the key that matched, if any.
    async fn restore(
        &self,
        paths: &[String],
        primary_key: &str,
        restore_keys: &[String],
    ) -> Result<Option<String>>;

    async fn save(&self, paths: &[String], primary_key: &str) -> Result<()>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FallbackDirection {
    Restore,
    Save,
}

/// What the primary path was trying to do when it failed.
#[derive(Debug, Clone, Copy)]
pub struct FallbackRequest<'a> {
    pub paths: &'a [String],
    pub primary_key: &'a str,
    pub restore_keys: &'a [String],
    pub direction: FallbackDirection,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FallbackOutcome {
    /// Fallback is turned off by configuration.
    Disabled,
    /// The host does not offer a secondary cache.
    Unsupported,
    Restored { matched_key: Option<String> },
    Saved,
    /// The secondary cache failed too. Never fatal.
    Failed(String),
}

/// Decides whether and how to hand a failed operation to the secondary cache.
pub struct FallbackCoordinator {
    enabled: bool,
    environment: HostEnvironment,
    cache: Arc<dyn SecondaryCache>,
}

impl FallbackCoordinator {
    pub fn new(enabled: bool, environment: HostEnvironment, cache: Arc<dyn SecondaryCache>) -> Self {
        Self {
            enabled,
            environment,
            cache,
        }
    }

    fn check_supported(&self) -> Result<()> {
        if self.environment.is_public_host() {
            Ok(())
        } else {
            Err(Error::FallbackUnsupported(self.environment.host_name()))
        }
    }

    pub async fn on_primary_failure(&self, request: FallbackRequest<'_>) -> FallbackOutcome {
        if !self.enabled {
            debug!("Skipped fallback cache");
            return FallbackOutcome::Disabled;
        }
        if let Err(e) = self.check_supported() {
            warn!("{}", e);
            return FallbackOutcome::Unsupported;
        }

        match request.direction {
            FallbackDirection::Restore => {
                info!("Restoring cache using fallback cache");
                match self
                    .cache
                    .restore(request.paths, request.primary_key, request.restore_keys)
                    .await
                {
                    Ok(Some(key)) => {
                        info!(matched_key = %key, "Fallback cache restored successfully");
                        FallbackOutcome::Restored {
                            matched_key: Some(key),
                        }
                    }
                    Ok(None) => {
                        info!("Fallback cache not found");
                        FallbackOutcome::Restored { matched_key: None }
                    }
                    Err(e) => {
                        warn!("Fallback cache restore failed: {}", e);
                        FallbackOutcome::Failed(e.to_string())
                    }
                }
            }
            FallbackDirection::Save => {
                info!("Saving cache using fallback cache");
                match self.cache.save(request.paths, request.primary_key).await {
                    Ok(()) => {
                        info!("Fallback cache saved successfully");
                        FallbackOutcome::Saved
                    }
                    Err(e) => {
                        warn!("Fallback cache save failed: {}", e);
                        FallbackOutcome::Failed(e.to_string())
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    #[derive(Default)]
    struct RecordingCache {
        calls: Mutex<Vec<String>>,
        restore_result: Option<String>,
        fail: bool,
    }

    #[async_trait]
    impl SecondaryCache for RecordingCache {
        async fn restore(
            &self,
            _paths: &[String],
            primary_key: &str,
            _restore_keys: &[String],
        ) -> Result<Option<String>> {
            self.calls.lock().unwrap().push(format!("restore:{primary_key}"));
            if self.fail {
                return Err(Error::FallbackFailed("service down".into()));
            }
            Ok(self.restore_result.clone())
        }

        async fn save(&self, _paths: &[String], primary_key: &str) -> Result<()> {
            self.calls.lock().unwrap().push(format!("save:{primary_key}"));
            if self.fail {
                return Err(Error::FallbackFailed("service down".into()));
            }
            Ok(())
        }
    }

    fn environment(server_url: &str) -> HostEnvironment {
        HostEnvironment {
            server_url: Some(server_url.to_string()),
            ..HostEnvironment::default()
        }
    }

    const NONE: &[String] = &[];

    fn request(direction: FallbackDirection) -> FallbackRequest<'static> {
        FallbackRequest {
            paths: NONE,
            primary_key: "linux-x64-abc",
            restore_keys: NONE,
            direction,
        }
    }

    #[tokio::test]
    async fn test_disabled() {
        let cache = Arc::new(RecordingCache::default());
        let coordinator =
            FallbackCoordinator::new(false, environment("https://github.com"), cache.clone());

        let outcome = coordinator
            .on_primary_failure(request(FallbackDirection::Restore))
            .await;
        assert_eq!(outcome, FallbackOutcome::Disabled);
        assert!(cache.calls.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_unsupported_host_skips_secondary() {
        let cache = Arc::new(RecordingCache::default());
        let coordinator =
            FallbackCoordinator::new(true, environment("https://git.example.corp"), cache.clone());

        let outcome = coordinator
            .on_primary_failure(request(FallbackDirection::Save))
            .await;
        assert_eq!(outcome, FallbackOutcome::Unsupported);
        assert!(cache.calls.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_restore_delegates() {
        let cache = Arc::new(RecordingCache {
            restore_result: Some("linux-x64-abc".into()),
            ..Default::default()
        });
        let coordinator =
            FallbackCoordinator::new(true, environment("https://github.com"), cache.clone());

        let outcome = coordinator
            .on_primary_failure(request(FallbackDirection::Restore))
            .await;
        assert_eq!(
            outcome,
            FallbackOutcome::Restored {
                matched_key: Some("linux-x64-abc".into())
            }
        );
        assert_eq!(*cache.calls.lock().unwrap(), vec!["restore:linux-x64-abc"]);
    }

    #[tokio::test]
    async fn test_failures_are_reported_not_raised() {
        let cache = Arc::new(RecordingCache {
            fail: true,
            ..Default::default()
        });
        let coordinator =
            FallbackCoordinator::new(true, environment("https://github.com"), cache.clone());

        let outcome = coordinator
            .on_primary_failure(request(FallbackDirection::Save))
            .await;
        assert!(matches!(outcome, FallbackOutcome::Failed(msg) if msg.contains("service down")));
    }
}
