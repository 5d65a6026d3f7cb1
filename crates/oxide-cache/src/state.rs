//! Run state carried from the restore phase to the save phase.
//!
//! The host re-evaluates action inputs before the save phase runs, so the
//! save phase must not trust its own inputs for the key, the credentials, or
//! the object layout. The restore phase records them here once and the save
//! phase replays them.

use crate::host::append_file_command;
use oxide_core::{CompressionMethod, Credentials, Error, Result};
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use tracing::debug;

/// Fields recorded during the restore phase.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StateField {
    PrimaryKey,
    MatchedKey,
    AccessKey,
    SecretKey,
    SessionToken,
    Region,
    Compression,
    Root,
}

impl StateField {
    pub fn as_str(&self) -> &'static str {
        match self {
            StateField::PrimaryKey => "primary-key",
            StateField::MatchedKey => "matched-key",
            StateField::AccessKey => "access-key",
            StateField::SecretKey => "secret-key",
            StateField::SessionToken => "session-token",
            StateField::Region => "region",
            StateField::Compression => "compression",
            StateField::Root => "root",
        }
    }
}

/// Run-scoped key/value storage.
pub trait StateStore: Send + Sync {
    fn persist(&self, field: StateField, value: &str) -> Result<()>;

    fn read(&self, field: StateField) -> Result<Option<String>>;
}

/// State through the GitHub `GITHUB_STATE` file command.
///
/// Values written in one step are handed back to the post step by the
/// runner as `STATE_<name>` environment variables.
pub struct GithubStateStore {
    state_file: PathBuf,
    saved: HashMap<String, String>,
}

impl GithubStateStore {
    pub fn new(state_file: impl Into<PathBuf>, saved: HashMap<String, String>) -> Self {
        Self {
            state_file: state_file.into(),
            saved,
        }
    }

    /// Available when the runner provides a state file.
    pub fn from_env() -> Option<Self> {
        let state_file = std::env::var_os("GITHUB_STATE")?;
        let saved = std::env::vars()
            .filter_map(|(k, v)| k.strip_prefix("STATE_").map(|name| (name.to_string(), v)))
            .collect();
        Some(Self::new(state_file, saved))
    }
}

impl StateStore for GithubStateStore {
    fn persist(&self, field: StateField, value: &str) -> Result<()> {
        append_file_command(&self.state_file, field.as_str(), value)
    }

    fn read(&self, field: StateField) -> Result<Option<String>> {
        Ok(self.saved.get(field.as_str()).cloned())
    }
}

/// State in a JSON file, for hosts without file commands.
pub struct JsonFileStateStore {
    path: PathBuf,
}

impl JsonFileStateStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    fn load(&self) -> Result<HashMap<String, String>> {
        if !self.path.exists() {
            return Ok(HashMap::new());
        }
        let content = std::fs::read_to_string(&self.path)?;
        Ok(serde_json::from_str(&content)?)
    }
}

impl StateStore for JsonFileStateStore {
    fn persist(&self, field: StateField, value: &str) -> Result<()> {
        let mut values = self.load()?;
        values.insert(field.as_str().to_string(), value.to_string());
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(&self.path, serde_json::to_string_pretty(&values)?)?;
        Ok(())
    }

    fn read(&self, field: StateField) -> Result<Option<String>> {
        Ok(self.load()?.remove(field.as_str()))
    }
}

/// State held in memory.
#[derive(Default)]
pub struct MemoryStateStore {
    values: Mutex<HashMap<StateField, String>>,
}

impl MemoryStateStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl StateStore for MemoryStateStore {
    fn persist(&self, field: StateField, value: &str) -> Result<()> {
        self.values
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert(field, value.to_string());
        Ok(())
    }

    fn read(&self, field: StateField) -> Result<Option<String>> {
        Ok(self
            .values
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .get(&field)
            .cloned())
    }
}

/// What the save phase sees of the restore phase.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunState {
    pub primary_key: String,
    pub matched_key: Option<String>,
    pub credentials: Credentials,
    pub compression: CompressionMethod,
    pub root: Option<String>,
}

impl RunState {
    /// An exact hit at restore time means there is nothing new to save.
    pub fn is_exact_match(&self) -> bool {
        self.matched_key.as_deref() == Some(self.primary_key.as_str())
    }
}

/// Typed access to the run state record.
#[derive(Clone)]
pub struct RunStateBridge {
    store: Arc<dyn StateStore>,
}

impl RunStateBridge {
    pub fn new(store: Arc<dyn StateStore>) -> Self {
        Self { store }
    }

    /// Record the identity this run authenticates and saves with.
    pub fn record_identity(&self, primary_key: &str, credentials: &Credentials) -> Result<()> {
        self.store.persist(StateField::PrimaryKey, primary_key)?;
        self.store
            .persist(StateField::AccessKey, &credentials.access_key)?;
        self.store
            .persist(StateField::SecretKey, &credentials.secret_key)?;
        self.store.persist(
            StateField::SessionToken,
            credentials.session_token.as_deref().unwrap_or_default(),
        )?;
        self.store.persist(
            StateField::Region,
            credentials.region.as_deref().unwrap_or_default(),
        )?;
        debug!(primary_key, "Recorded run identity");
        Ok(())
    }

    /// Record how objects are named, so the save phase writes where the
    /// restore phase looked.
    pub fn record_layout(&self, compression: CompressionMethod, root: Option<&str>) -> Result<()> {
        self.store
            .persist(StateField::Compression, compression.as_str())?;
        self.store
            .persist(StateField::Root, root.unwrap_or_default())
    }

    /// Record which key produced the restored cache; empty when none did.
    pub fn record_match(&self, matched_key: Option<&str>) -> Result<()> {
        self.store
            .persist(StateField::MatchedKey, matched_key.unwrap_or_default())
    }

    /// Replay the restore phase's record.
    pub fn load(&self) -> Result<RunState> {
        let primary_key = self.read(StateField::PrimaryKey)?.ok_or_else(|| {
            Error::StateMissing(
                "no primary key was recorded; did the restore phase run?".to_string(),
            )
        })?;
        let compression = self
            .read(StateField::Compression)?
            .ok_or_else(|| {
                Error::StateMissing("no compression method was recorded".to_string())
            })?
            .parse::<CompressionMethod>()
            .map_err(|e| Error::Serialization(format!("recorded compression: {}", e)))?;

        Ok(RunState {
            primary_key,
            matched_key: self.read(StateField::MatchedKey)?,
            credentials: Credentials {
                access_key: self.read(StateField::AccessKey)?.unwrap_or_default(),
                secret_key: self.read(StateField::SecretKey)?.unwrap_or_default(),
                session_token: self.read(StateField::SessionToken)?,
                region: self.read(StateField::Region)?,
            },
            compression,
            root: self.read(StateField::Root)?,
        })
    }

    /// Non-empty value of a field.
    fn read(&self, field: StateField) -> Result<Option<String>> {
        Ok(self.store.read(field)?.filter(|v| !v.is_empty()))
    }
}
