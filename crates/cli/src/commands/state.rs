//! `driftwood state` - inspect persisted state, plus lock recovery

use crate::output::{self, OutputFormat, TableDisplay};
use clap::{Args, Subcommand};
use driftwood_common::{Error, Result, StateRecord};
use std::path::PathBuf;

#[derive(Subcommand)]
pub enum StateCommands {
    /// List applied resources
    List(StateArgs),

    /// Show one resource record
    Show(ShowArgs),
}

#[derive(Args)]
pub struct StateArgs {
    /// Stack document
    #[arg(short, long, default_value = "stack.toml")]
    pub file: PathBuf,
}

#[derive(Args)]
pub struct ShowArgs {
    #[command(flatten)]
    pub base: StateArgs,

    /// Logical resource id
    pub id: String,
}

#[derive(Args)]
pub struct ForceUnlockArgs {
    /// Stack document
    #[arg(short, long, default_value = "stack.toml")]
    pub file: PathBuf,
}

pub fn execute(cmd: StateCommands, state: Option<PathBuf>, format: OutputFormat) -> Result<()> {
    match cmd {
        StateCommands::List(args) => {
            let (doc, _) = super::load_stack(&args.file)?;
            let store = super::open_store(state.as_deref(), &doc.stack.name)?;
            let records = store.load()?.into_values().collect::<Vec<_>>();
            output::print_list(&records, format);
        }
        StateCommands::Show(args) => {
            let (doc, _) = super::load_stack(&args.base.file)?;
            let store = super::open_store(state.as_deref(), &doc.stack.name)?;
            let record = store.get(&args.id)?.ok_or_else(|| {
                Error::Validation(format!("no state record for {}", args.id))
            })?;
            // Full record including config, so show is always JSON-shaped
            println!(
                "{}",
                serde_json::to_string_pretty(&record).unwrap_or_default()
            );
        }
    }
    Ok(())
}

pub fn force_unlock(args: ForceUnlockArgs, state: Option<PathBuf>) -> Result<()> {
    let (doc, _) = super::load_stack(&args.file)?;
    let store = super::open_store(state.as_deref(), &doc.stack.name)?;
    if store.force_unlock()? {
        output::print_success(&format!("Removed apply lock for {}", doc.stack.name));
    } else {
        output::print_warning(&format!("No apply lock held for {}", doc.stack.name));
    }
    Ok(())
}

impl TableDisplay for StateRecord {
    fn headers() -> Vec<&'static str> {
        vec!["Resource", "Kind", "Physical ID", "Applied", "Retain"]
    }

    fn row(&self) -> Vec<String> {
        let applied = chrono::DateTime::from_timestamp(self.applied_at, 0)
            .map(|dt| dt.format("%Y-%m-%d %H:%M:%S UTC").to_string())
            .unwrap_or_else(|| self.applied_at.to_string());
        vec![
            self.logical_id.clone(),
            self.kind.to_string(),
            self.physical_id.clone(),
            applied,
            if self.retain { "yes" } else { "" }.to_string(),
        ]
    }
}
