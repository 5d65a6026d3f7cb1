//! CI host environment and file commands.

use oxide_core::{Error, Result};
use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};

const PUBLIC_HOST: &str = "github.com";

/// What the surrounding CI host tells us through its environment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HostEnvironment {
    /// Server URL of the host (`GITHUB_SERVER_URL`).
    pub server_url: Option<String>,
    /// Directory cache paths are resolved against.
    pub workspace: PathBuf,
    /// Scratch space for archives.
    pub temp_dir: PathBuf,
    /// Step debug logging requested by the host (`RUNNER_DEBUG=1`).
    pub runner_debug: bool,
    /// Identifies this run attempt (`GITHUB_RUN_ID`-`GITHUB_RUN_ATTEMPT`).
    pub run_id: Option<String>,
}

impl HostEnvironment {
    pub fn from_env() -> Self {
        let workspace = std::env::var_os("GITHUB_WORKSPACE")
            .map(PathBuf::from)
            .or_else(|| std::env::current_dir().ok())
            .unwrap_or_else(|| PathBuf::from("."));
        let temp_dir = std::env::var_os("RUNNER_TEMP")
            .map(PathBuf::from)
            .unwrap_or_else(std::env::temp_dir);

        Self {
            server_url: std::env::var("GITHUB_SERVER_URL").ok(),
            workspace,
            temp_dir,
            runner_debug: std::env::var("RUNNER_DEBUG").is_ok_and(|v| v == "1"),
            run_id: run_id(
                std::env::var("GITHUB_RUN_ID").ok(),
                std::env::var("GITHUB_RUN_ATTEMPT").ok(),
            ),
        }
    }

    /// Host name the run executes against.
    pub fn host_name(&self) -> String {
        match &self.server_url {
            None => PUBLIC_HOST.to_string(),
            Some(raw) => url::Url::parse(raw)
                .ok()
                .and_then(|u| u.host_str().map(str::to_string))
                .unwrap_or_else(|| raw.clone()),
        }
    }

    /// Whether the host is the public service. Enterprise deployments have no
    /// hosted cache to fall back to.
    pub fn is_public_host(&self) -> bool {
        match &self.server_url {
            None => true,
            Some(raw) => url::Url::parse(raw)
                .ok()
                .and_then(|u| u.host_str().map(|h| h.eq_ignore_ascii_case(PUBLIC_HOST)))
                .unwrap_or(false),
        }
    }
}

impl Default for HostEnvironment {
    fn default() -> Self {
        Self {
            server_url: None,
            workspace: PathBuf::from("."),
            temp_dir: std::env::temp_dir(),
            runner_debug: false,
            run_id: None,
        }
    }
}

fn run_id(id: Option<String>, attempt: Option<String>) -> Option<String> {
    let id = id.filter(|v| !v.is_empty())?;
    Some(match attempt.filter(|v| !v.is_empty()) {
        Some(attempt) => format!("{}-{}", id, attempt),
        None => id,
    })
}

/// Append a `name<<delimiter` record to a file command file
/// (`GITHUB_OUTPUT`, `GITHUB_STATE`).
pub fn append_file_command(path: &Path, name: &str, value: &str) -> Result<()> {
    let delimiter = format!("ghadelimiter_{}", uuid::Uuid::new_v4());
    if name.contains(&delimiter) || value.contains(&delimiter) {
        return Err(Error::Internal(format!(
            "Unexpected input: '{}' contains the delimiter",
            name
        )));
    }

    let mut file = OpenOptions::new().create(true).append(true).open(path)?;
    writeln!(file, "{}<<{}", name, delimiter)?;
    writeln!(file, "{}", value)?;
    writeln!(file, "{}", delimiter)?;
    Ok(())
}
