//! S3-backed build cache for CI runs.
//!
//! A run has two phases in separate processes: [`phases::restore`] resolves
//! and downloads the best cache object, [`phases::save`] uploads a new one
//! unless restore already had an exact hit.

pub mod archiver;
pub mod fallback;
pub mod host;
pub mod hosted;
pub mod inputs;
pub mod keys;
pub mod outputs;
pub mod phases;
pub mod resolver;
pub mod state;
pub mod storage;
pub mod transfer;
pub mod types;

pub use archiver::{Archiver, TarArchiver};
pub use fallback::{FallbackCoordinator, FallbackOutcome, SecondaryCache};
pub use host::HostEnvironment;
pub use hosted::{HostedCache, HostedCacheEndpoint};
pub use inputs::{ActionConfig, EnvInputs, InputSource};
pub use keys::KeyLayout;
pub use outputs::{ActionOutputs, GithubOutputSink, LogOutputSink, OutputSink};
pub use phases::{RestoreOutcome, RestoreSource, RunContext, SaveOutcome};
pub use resolver::KeyResolver;
pub use state::{
    GithubStateStore, JsonFileStateStore, MemoryStateStore, RunStateBridge, StateStore,
};
pub use storage::{StorageBackend, StorageConnector};
pub use transfer::{TransferEngine, format_size};
pub use types::{TransferMode, TransferReport};
