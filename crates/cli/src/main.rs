//! Driftwood CLI - Main Entry Point
//!
//! Declarative infrastructure reconciliation: plan and apply a stack
//! document against a provider, with persisted per-stack state.

use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::process::ExitCode;

mod commands;
mod output;

use commands::{apply, plan, state};
use driftwood_common::Error;

/// Distinct exit codes so scripts can tell failure classes apart
mod exit_codes {
    pub const GENERAL: u8 = 1;
    pub const VALIDATION: u8 = 2;
    pub const LOCKED: u8 = 3;
    pub const PARTIAL_APPLY: u8 = 4;
}

/// Driftwood - Declarative Infrastructure Reconciler
#[derive(Parser)]
#[command(name = "driftwood")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
struct Cli {
    /// State database path (defaults to ~/.driftwood/stacks/<stack>.db)
    #[arg(long, global = true)]
    state: Option<PathBuf>,

    /// Output format
    #[arg(long, default_value = "table", global = true)]
    format: output::OutputFormat,

    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Show what apply would change, without calling the provider
    Plan(plan::PlanArgs),

    /// Reconcile the declared stack against the provider
    Apply(apply::ApplyArgs),

    /// Inspect persisted state
    #[command(subcommand)]
    State(state::StateCommands),

    /// Remove a stale apply lock
    ForceUnlock(state::ForceUnlockArgs),

    /// Show version information
    Version,
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    // Initialize logging
    let log_level = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(log_level)),
        )
        .with_target(false)
        .init();

    let result = match cli.command {
        Commands::Plan(args) => plan::execute(args, cli.state, cli.format),
        Commands::Apply(args) => apply::execute(args, cli.state, cli.format).await,
        Commands::State(cmd) => state::execute(cmd, cli.state, cli.format),
        Commands::ForceUnlock(args) => state::force_unlock(args, cli.state),
        Commands::Version => {
            println!("Driftwood v{}", driftwood_common::VERSION);
            Ok(())
        }
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            output::print_error(&e.to_string());
            ExitCode::from(code_for(&e))
        }
    }
}

fn code_for(error: &Error) -> u8 {
    match error {
        Error::Validation(_)
        | Error::UnresolvedReference { .. }
        | Error::CyclicDependency { .. }
        | Error::RetainedDelete { .. }
        | Error::StateVersion { .. } => exit_codes::VALIDATION,
        Error::StateLocked { .. } => exit_codes::LOCKED,
        Error::PartialApply { .. } => exit_codes::PARTIAL_APPLY,
        _ => exit_codes::GENERAL,
    }
}
