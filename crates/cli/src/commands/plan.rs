//! `driftwood plan` - dry-run diff against stored state

use crate::output::{self, OutputFormat, TableDisplay};
use clap::Args;
use colored::Colorize;
use driftwood_common::{DiffAction, DiffEntry, Plan, Result};
use driftwood_engine::{plan_stack, DiffOptions};
use std::path::PathBuf;

#[derive(Args)]
pub struct PlanArgs {
    /// Stack document
    #[arg(short, long, default_value = "stack.toml")]
    pub file: PathBuf,

    /// Permit deletion of retain-flagged resources
    #[arg(long)]
    pub allow_retained_delete: bool,
}

pub fn execute(args: PlanArgs, state: Option<PathBuf>, format: OutputFormat) -> Result<()> {
    let (doc, graph) = super::load_stack(&args.file)?;
    let store = super::open_store(state.as_deref(), &doc.stack.name)?;
    let _lock = store.lock(&super::lock_holder())?;

    let plan = plan_stack(
        &graph,
        &store.load()?,
        DiffOptions {
            allow_retained_delete: args.allow_retained_delete,
        },
    )?;

    print_plan(&plan, format);
    Ok(())
}

pub(crate) fn print_plan(plan: &Plan, format: OutputFormat) {
    if let OutputFormat::Json = format {
        println!(
            "{}",
            serde_json::to_string_pretty(plan).unwrap_or_default()
        );
        return;
    }

    let changes: Vec<DiffEntry> = plan
        .entries()
        .filter(|e| e.action.is_change())
        .cloned()
        .collect();
    if changes.is_empty() {
        output::print_success("No changes. Declared stack matches state.");
        return;
    }

    output::print_list(&changes, format);
    println!("{}", summary(plan));
}

fn summary(plan: &Plan) -> String {
    let count = |action: DiffAction| plan.entries().filter(|e| e.action == action).count();
    format!(
        "Plan: {} to create, {} to update, {} to replace, {} to delete ({} unchanged)",
        count(DiffAction::Create),
        count(DiffAction::Update),
        count(DiffAction::Replace),
        count(DiffAction::Delete),
        count(DiffAction::Unchanged),
    )
}

impl TableDisplay for DiffEntry {
    fn headers() -> Vec<&'static str> {
        vec!["Action", "Resource", "Kind", "Reason"]
    }

    fn row(&self) -> Vec<String> {
        let action = match self.action {
            DiffAction::Create => "create".green().to_string(),
            DiffAction::Update => "update".yellow().to_string(),
            DiffAction::Replace => "replace".magenta().to_string(),
            DiffAction::Delete => "delete".red().to_string(),
            DiffAction::Unchanged => "unchanged".to_string(),
        };
        vec![
            action,
            self.logical_id.clone(),
            self.kind.to_string(),
            self.reason.clone(),
        ]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn summary_counts_actions() {
        let entry = |id: &str, action: DiffAction| DiffEntry {
            logical_id: id.to_string(),
            kind: driftwood_common::ResourceKind::Queue,
            action,
            reason: String::new(),
        };
        let plan = Plan {
            stack: "s".to_string(),
            tiers: vec![
                vec![
                    entry("a", DiffAction::Create),
                    entry("b", DiffAction::Unchanged),
                ],
                vec![entry("c", DiffAction::Delete)],
            ],
        };
        assert_eq!(
            summary(&plan),
            "Plan: 1 to create, 0 to update, 0 to replace, 1 to delete (1 unchanged)"
        );
    }
}
