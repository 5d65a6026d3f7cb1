//! Command handlers.

use oxide_cache::archiver::{Archiver, TarArchiver};
use oxide_cache::fallback::{FallbackCoordinator, FallbackOutcome};
use oxide_cache::host::HostEnvironment;
use oxide_cache::hosted::{HostedCache, HostedCacheEndpoint};
use oxide_cache::inputs::{ActionConfig, EnvInputs};
use oxide_cache::outputs::{GithubOutputSink, LogOutputSink, OutputSink, write_outputs};
use oxide_cache::phases::{self, RestoreSource, RunContext, SaveOutcome};
use oxide_cache::state::{
    GithubStateStore, JsonFileStateStore, MemoryStateStore, RunStateBridge, StateStore,
};
use oxide_cache::storage::S3Connector;
use oxide_core::{Error, Result};
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use tracing::{debug, info, warn};


/// Restore phase.
pub async fn restore(state_file: Option<PathBuf>, force_debug: bool) -> Result<()> {
    let ctx = build_context(state_file, force_debug, false)?;
    let outcome = phases::restore(&ctx).await?;

    match (&outcome.source, &outcome.matched_key) {
        (RestoreSource::Primary, Some(key)) => info!("Cache restored from key: {}", key),
        (RestoreSource::Fallback, Some(key)) => {
            info!("Cache restored from fallback cache with key: {}", key)
        }
        _ => info!("Cache not found"),
    }

    let sink: Box<dyn OutputSink> = match GithubOutputSink::from_env() {
        Some(sink) => Box::new(sink),
        None => Box::new(LogOutputSink),
    };
    write_outputs(sink.as_ref(), &outcome.outputs())
}

/// Save phase.
pub async fn save(state_file: Option<PathBuf>, force_debug: bool) -> Result<()> {
    let ctx = build_context(state_file, force_debug, true)?;

    match phases::save(&ctx).await? {
        SaveOutcome::SkippedExactMatch => {}
        SaveOutcome::Saved { identifier, .. } => info!(identifier = %identifier, "Cache saved"),
        SaveOutcome::NothingToSave => info!("No cache paths found, nothing saved"),
        SaveOutcome::Fallback(FallbackOutcome::Saved) => info!("Cache saved to fallback cache"),
        SaveOutcome::Fallback(other) => warn!(outcome = ?other, "Cache was not saved"),
    }
    Ok(())
}

/// With `replay_layout`, compression and key root recorded by the restore
/// phase override the re-evaluated inputs for every cache the run talks to.
fn build_context(
    state_file: Option<PathBuf>,
    force_debug: bool,
    replay_layout: bool,
) -> Result<RunContext> {
    let mut config = ActionConfig::from_inputs(&EnvInputs)?;
    config.debug |= force_debug;
    let environment = HostEnvironment::from_env();
    debug!(environment = ?environment, "Host environment");

    let state = RunStateBridge::new(state_store(state_file, &environment));
    if replay_layout {
        if let Ok(recorded) = state.load() {
            config.compression = recorded.compression;
            config.root = recorded.root;
        }
    }

    let archiver: Arc<dyn Archiver> = Arc::new(TarArchiver::new(&environment.workspace));
    let hosted = HostedCache::new(
        HostedCacheEndpoint::from_env(),
        archiver.clone(),
        config.compression,
        &environment.temp_dir,
    );
    let connector = S3Connector::new(config.s3_settings(), config.transfer_mode);

    Ok(RunContext {
        state,
        fallback: FallbackCoordinator::new(
            config.use_fallback,
            environment.clone(),
            Arc::new(hosted),
        ),
        connector: Arc::new(connector),
        archiver,
        config,
        environment,
    })
}

/// An explicit state file wins, then the runner's state file command, then a
/// JSON file in the temp directory scoped to the run attempt.
///
/// Without any of those, state lives only as long as this process and the
/// save phase reports it missing.
fn state_store(state_file: Option<PathBuf>, environment: &HostEnvironment) -> Arc<dyn StateStore> {
    if let Some(path) = state_file {
        return Arc::new(JsonFileStateStore::new(path));
    }
    if let Some(store) = GithubStateStore::from_env() {
        return Arc::new(store);
    }
    match &environment.run_id {
        Some(run_id) => Arc::new(JsonFileStateStore::new(
            environment.temp_dir.join(run_state_file_name(run_id)),
        )),
        None => {
            warn!("No run id or state file command; pass --state-file to carry state to save");
            Arc::new(MemoryStateStore::new())
        }
    }
}

fn run_state_file_name(run_id: &str) -> String {
    format!("oxide-cache-state-{}.json", run_id)
}

fn is_fatal(err: &Error) -> bool {
    err.is_config_error()
}

/// Map the phase result to the process exit code.
///
/// Configuration errors fail the step; anything else is a warning so a
/// broken cache never fails a build.
pub fn report(result: Result<()>) -> ExitCode {
    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) if is_fatal(&e) => {
            println!("::error::{}", e);
            ExitCode::FAILURE
        }
        Err(e) => {
            warn!("{}", e);
            ExitCode::SUCCESS
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use oxide_cache::state::StateField;
    use oxide_core::CompressionMethod;

    #[test]
    fn test_only_config_errors_are_fatal() {
        assert!(is_fatal(&Error::MissingInput("bucket".into())));
        assert!(is_fatal(&Error::InvalidInput {
            name: "port".into(),
            reason: "not a number".into(),
        }));
        assert!(!is_fatal(&Error::StateMissing("no primary key".into())));
        assert!(!is_fatal(&Error::StorageUnavailable("connection reset".into())));
        assert!(!is_fatal(&Error::FallbackUnsupported("git.example.corp".into())));
    }

    fn environment(temp_dir: &std::path::Path, run_id: Option<&str>) -> HostEnvironment {
        HostEnvironment {
            temp_dir: temp_dir.to_path_buf(),
            run_id: run_id.map(str::to_string),
            ..HostEnvironment::default()
        }
    }

    #[test]
    fn test_explicit_state_file_wins() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("state.json");
        let environment = environment(dir.path(), Some("4711-1"));

        let store = state_store(Some(path.clone()), &environment);
        store.persist(StateField::PrimaryKey, "linux-x64-abc").unwrap();

        assert!(path.exists());
        assert!(!dir.path().join(run_state_file_name("4711-1")).exists());
    }

    #[test]
    fn test_state_is_scoped_to_the_run() {
        if std::env::var_os("GITHUB_STATE").is_some() {
            return;
        }
        let dir = tempfile::tempdir().unwrap();

        let restore =
            RunStateBridge::new(state_store(None, &environment(dir.path(), Some("4711-1"))));
        restore
            .record_identity("linux-x64-abc", &Default::default())
            .unwrap();
        restore
            .record_layout(CompressionMethod::Zstd, None)
            .unwrap();
        assert!(dir.path().join(run_state_file_name("4711-1")).exists());

        let same_run =
            RunStateBridge::new(state_store(None, &environment(dir.path(), Some("4711-1"))));
        assert_eq!(same_run.load().unwrap().primary_key, "linux-x64-abc");

        let next_run =
            RunStateBridge::new(state_store(None, &environment(dir.path(), Some("4712-1"))));
        assert!(matches!(next_run.load(), Err(Error::StateMissing(_))));
    }

    #[test]
    fn test_state_without_run_id_does_not_outlive_the_process() {
        if std::env::var_os("GITHUB_STATE").is_some() {
            return;
        }
        let dir = tempfile::tempdir().unwrap();

        let restore =
            RunStateBridge::new(state_store(None, &environment(dir.path(), None)));
        restore
            .record_identity("linux-x64-abc", &Default::default())
            .unwrap();
        restore
            .record_layout(CompressionMethod::Zstd, None)
            .unwrap();
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 0);

        let save =
            RunStateBridge::new(state_store(None, &environment(dir.path(), None)));
        assert!(matches!(save.load(), Err(Error::StateMissing(_))));
    }
}
