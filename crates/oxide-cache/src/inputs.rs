//! Action inputs and the configuration derived from them.

use crate::keys::KeyLayout;
use crate::storage::S3Settings;
use crate::types::TransferMode;
use oxide_core::{CacheKeys, CompressionMethod, Credentials, Error, Result};
use std::collections::HashMap;

/// Source of raw action inputs.
pub trait InputSource {
    fn raw(&self, name: &str) -> Option<String>;
}

/// Inputs passed by the runner as `INPUT_<NAME>` environment variables.
pub struct EnvInputs;

impl EnvInputs {
    pub fn variable_name(name: &str) -> String {
        format!("INPUT_{}", name.replace(' ', "_").to_uppercase())
    }
}

impl InputSource for EnvInputs {
    fn raw(&self, name: &str) -> Option<String> {
        std::env::var(Self::variable_name(name)).ok()
    }
}

impl InputSource for HashMap<String, String> {
    fn raw(&self, name: &str) -> Option<String> {
        self.get(name).cloned()
    }
}

/// Trimmed, non-empty input value.
pub fn get_input(source: &dyn InputSource, name: &str) -> Option<String> {
    source
        .raw(name)
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

pub fn get_required_input(source: &dyn InputSource, name: &str) -> Result<String> {
    get_input(source, name).ok_or_else(|| Error::MissingInput(name.to_string()))
}

/// Boolean input in YAML core-schema spelling; absent means `false`.
pub fn get_input_as_bool(source: &dyn InputSource, name: &str) -> Result<bool> {
    match get_input(source, name).as_deref() {
        None => Ok(false),
        Some("true" | "True" | "TRUE") => Ok(true),
        Some("false" | "False" | "FALSE") => Ok(false),
        Some(other) => Err(Error::InvalidInput {
            name: name.to_string(),
            reason: format!("expected true or false, got '{}'", other),
        }),
    }
}

/// Newline-separated list input; blank lines are dropped.
pub fn get_input_as_list(source: &dyn InputSource, name: &str) -> Vec<String> {
    source
        .raw(name)
        .unwrap_or_default()
        .lines()
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}

pub fn get_input_as_port(source: &dyn InputSource, name: &str) -> Result<Option<u16>> {
    get_input(source, name)
        .map(|v| {
            v.parse::<u16>().map_err(|e| Error::InvalidInput {
                name: name.to_string(),
                reason: e.to_string(),
            })
        })
        .transpose()
}

/// Everything the action reads from its inputs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ActionConfig {
    pub bucket: String,
    /// Prefix all cache objects live under.
    pub root: Option<String>,
    pub endpoint: Option<String>,
    pub port: Option<u16>,
    pub use_ssl: bool,
    pub credentials: Credentials,
    /// Primary key; only the restore phase requires it.
    pub key: Option<String>,
    pub restore_keys: Vec<String>,
    pub paths: Vec<String>,
    pub use_fallback: bool,
    pub debug: bool,
    pub compression: CompressionMethod,
    pub transfer_mode: TransferMode,
}

impl ActionConfig {
    pub fn from_inputs(source: &dyn InputSource) -> Result<Self> {
        let bucket = get_required_input(source, "bucket")?;
        let paths = get_input_as_list(source, "path");
        if paths.is_empty() {
            return Err(Error::MissingInput("path".to_string()));
        }

        let compression = get_input(source, "compression")
            .map(|v| v.parse::<CompressionMethod>())
            .transpose()?
            .unwrap_or_default();
        let transfer_mode = get_input(source, "transfer-mode")
            .map(|v| v.parse::<TransferMode>())
            .transpose()?
            .unwrap_or_default();

        Ok(Self {
            bucket,
            root: get_input(source, "root"),
            endpoint: get_input(source, "endpoint"),
            port: get_input_as_port(source, "port")?,
            use_ssl: !get_input_as_bool(source, "insecure")?,
            credentials: Credentials {
                access_key: get_input(source, "accessKey").unwrap_or_default(),
                secret_key: get_input(source, "secretKey").unwrap_or_default(),
                session_token: get_input(source, "sessionToken"),
                region: get_input(source, "region"),
            },
            key: get_input(source, "key"),
            restore_keys: get_input_as_list(source, "restore-keys"),
            paths,
            use_fallback: get_input_as_bool(source, "use-fallback")?,
            debug: get_input_as_bool(source, "debug")?,
            compression,
            transfer_mode,
        })
    }

    /// Keys for the restore phase.
    pub fn cache_keys(&self) -> Result<CacheKeys> {
        let primary = self
            .key
            .clone()
            .ok_or_else(|| Error::MissingInput("key".to_string()))?;
        Ok(CacheKeys::new(primary, self.restore_keys.clone()))
    }

    pub fn layout(&self) -> KeyLayout {
        KeyLayout::new(self.root.as_deref())
    }

    pub fn s3_settings(&self) -> S3Settings {
        S3Settings {
            bucket: self.bucket.clone(),
            endpoint: self.endpoint.clone(),
            port: self.port,
            use_ssl: self.use_ssl,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn inputs(pairs: &[(&str, &str)]) -> HashMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn test_variable_name() {
        assert_eq!(EnvInputs::variable_name("restore-keys"), "INPUT_RESTORE-KEYS");
        assert_eq!(EnvInputs::variable_name("use fallback"), "INPUT_USE_FALLBACK");
    }

    #[test]
    fn test_full_config() {
        let source = inputs(&[
            ("bucket", "actions-cache"),
            ("root", "team-a"),
            ("endpoint", "minio.internal"),
            ("port", "9000"),
            ("insecure", "true"),
            ("accessKey", "AKIA"),
            ("secretKey", "secret"),
            ("sessionToken", "session"),
            ("region", "eu-west-1"),
            ("key", "linux-x64-abc"),
            ("restore-keys", "linux-x64-\n\n  linux-  \n"),
            ("path", "target\n~/.cargo/registry"),
            ("use-fallback", "true"),
            ("compression", "gzip"),
            ("transfer-mode", "presigned"),
        ]);

        let config = ActionConfig::from_inputs(&source).unwrap();
        assert_eq!(config.bucket, "actions-cache");
        assert_eq!(config.port, Some(9000));
        assert!(!config.use_ssl);
        assert!(config.use_fallback);
        assert!(!config.debug);
        assert_eq!(config.restore_keys, vec!["linux-x64-", "linux-"]);
        assert_eq!(config.paths, vec!["target", "~/.cargo/registry"]);
        assert_eq!(config.compression, CompressionMethod::Gzip);
        assert_eq!(config.transfer_mode, TransferMode::Presigned);
        assert_eq!(config.credentials.session_token.as_deref(), Some("session"));

        let keys = config.cache_keys().unwrap();
        assert_eq!(keys.primary, "linux-x64-abc");
        assert_eq!(
            config.layout().object_name("linux-x64-abc", config.compression),
            "team-a/linux-x64-abc/cache.tgz"
        );
        assert_eq!(
            config.s3_settings().endpoint_url().as_deref(),
            Some("http://minio.internal:9000")
        );
    }

    #[test]
    fn test_defaults() {
        let config =
            ActionConfig::from_inputs(&inputs(&[("bucket", "b"), ("path", "target")])).unwrap();
        assert!(config.use_ssl);
        assert!(!config.use_fallback);
        assert_eq!(config.compression, CompressionMethod::Zstd);
        assert_eq!(config.transfer_mode, TransferMode::Direct);
        assert_eq!(config.credentials.session_token, None);
        assert!(matches!(config.cache_keys(), Err(Error::MissingInput(name)) if name == "key"));
    }

    #[test]
    fn test_missing_required_inputs() {
        let err = ActionConfig::from_inputs(&inputs(&[("path", "target")])).unwrap_err();
        assert!(matches!(err, Error::MissingInput(ref name) if name == "bucket"));
        assert!(err.is_config_error());

        let err = ActionConfig::from_inputs(&inputs(&[("bucket", "b"), ("path", " \n ")]))
            .unwrap_err();
        assert!(matches!(err, Error::MissingInput(ref name) if name == "path"));
    }

    #[test]
    fn test_invalid_inputs() {
        let base = [("bucket", "b"), ("path", "target")];

        let mut source = inputs(&base);
        source.insert("port".into(), "ninety".into());
        assert!(matches!(
            ActionConfig::from_inputs(&source),
            Err(Error::InvalidInput { .. })
        ));

        let mut source = inputs(&base);
        source.insert("use-fallback".into(), "yes".into());
        assert!(matches!(
            ActionConfig::from_inputs(&source),
            Err(Error::InvalidInput { .. })
        ));
    }
}
