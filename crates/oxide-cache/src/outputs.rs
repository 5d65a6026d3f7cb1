//! Step outputs reported back to the workflow.

use crate::host::append_file_command;
use oxide_core::Result;
use std::path::PathBuf;
use tracing::info;

/// Outputs of the restore phase.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ActionOutputs {
    pub cache_hit: bool,
    pub matched_key: Option<String>,
    pub cache_size: Option<u64>,
}

impl ActionOutputs {
    /// Name/value pairs in the order they are emitted.
    pub fn entries(&self) -> Vec<(&'static str, String)> {
        let mut entries = vec![("cache-hit", self.cache_hit.to_string())];
        if let Some(key) = &self.matched_key {
            entries.push(("cache-matched-key", key.clone()));
        }
        if let Some(size) = self.cache_size {
            entries.push(("cache-size", size.to_string()));
        }
        entries
    }
}

pub trait OutputSink: Send + Sync {
    fn set_output(&self, name: &str, value: &str) -> Result<()>;
}

/// Emit every output of `outputs` to `sink`.
pub fn write_outputs(sink: &dyn OutputSink, outputs: &ActionOutputs) -> Result<()> {
    for (name, value) in outputs.entries() {
        sink.set_output(name, &value)?;
    }
    Ok(())
}

/// Outputs through the `GITHUB_OUTPUT` file command.
pub struct GithubOutputSink {
    path: PathBuf,
}

impl GithubOutputSink {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn from_env() -> Option<Self> {
        std::env::var_os("GITHUB_OUTPUT").map(Self::new)
    }
}

impl OutputSink for GithubOutputSink {
    fn set_output(&self, name: &str, value: &str) -> Result<()> {
        append_file_command(&self.path, name, value)
    }
}

/// Outputs that only go to the log.
pub struct LogOutputSink;

impl OutputSink for LogOutputSink {
    fn set_output(&self, name: &str, value: &str) -> Result<()> {
        info!(output = name, value, "Set output");
        Ok(())
    }
}
