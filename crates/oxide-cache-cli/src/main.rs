//! Oxide S3 cache action entrypoint.

use clap::Parser;
use oxide_cache::inputs::{EnvInputs, get_input_as_bool};
use std::path::PathBuf;
use std::process::ExitCode;
use tracing_subscriber::EnvFilter;

mod commands;
mod handlers;

use commands::Commands;

#[derive(Parser)]
#[command(name = "oxide-cache")]
#[command(author, version, about = "S3-backed build cache for CI runs", long_about = None)]
struct Cli {
    /// Run state file, for hosts without a state file command
    #[arg(long, global = true)]
    state_file: Option<PathBuf>,

    /// Verbose diagnostics
    #[arg(long, global = true)]
    debug: bool,

    #[command(subcommand)]
    command: Commands,
}

fn init_tracing(debug: bool) {
    let default_level = if debug { "debug" } else { "info" };
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default_level));

    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_target(false)
        .init();
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    let debug = cli.debug
        || get_input_as_bool(&EnvInputs, "debug").unwrap_or(false)
        || std::env::var("RUNNER_DEBUG").is_ok_and(|v| v == "1");
    init_tracing(debug);

    let result = match cli.command {
        Commands::Restore => handlers::restore(cli.state_file, cli.debug).await,
        Commands::Save => handlers::save(cli.state_file, cli.debug).await,
    };

    handlers::report(result)
}
