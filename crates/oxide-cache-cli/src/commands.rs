//! CLI command definitions.

use clap::Subcommand;

#[derive(Subcommand)]
pub enum Commands {
    /// Restore the cache before the job runs
    Restore,

    /// Save the cache after the job has run
    Save,
}
