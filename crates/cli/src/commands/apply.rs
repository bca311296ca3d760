//! `driftwood apply` - reconcile the declared stack against the provider

use crate::commands::plan::PlanArgs;
use crate::output::{self, OutputFormat, TableDisplay};
use clap::{Args, ValueEnum};
use colored::Colorize;
use driftwood_common::{ApplyOutcome, ApplyReport, Result};
use driftwood_engine::{plan_stack, ApplyOptions, DiffOptions, Executor};
use driftwood_provider::{Provider, SimProvider};
use serde::Serialize;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::warn;

#[derive(Args)]
pub struct ApplyArgs {
    #[command(flatten)]
    pub plan: PlanArgs,

    /// Concurrent node applications per tier
    #[arg(long, default_value_t = 4)]
    pub concurrency: usize,

    /// Retries for throttled provider calls
    #[arg(long, default_value_t = 4)]
    pub max_retries: u32,

    /// Per-attempt provider timeout in seconds
    #[arg(long, default_value_t = 30)]
    pub timeout_secs: u64,

    /// Provider backend
    #[arg(long, value_enum, default_value = "sim")]
    pub provider: ProviderBackend,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
pub enum ProviderBackend {
    /// Local simulated backend persisted under the store directory
    Sim,
}

pub async fn execute(args: ApplyArgs, state: Option<PathBuf>, format: OutputFormat) -> Result<()> {
    let (doc, graph) = super::load_stack(&args.plan.file)?;
    let store = super::open_store(state.as_deref(), &doc.stack.name)?;
    let _lock = store.lock(&super::lock_holder())?;

    let plan = plan_stack(
        &graph,
        &store.load()?,
        DiffOptions {
            allow_retained_delete: args.plan.allow_retained_delete,
        },
    )?;

    if plan.is_empty() {
        output::print_success("No changes. Declared stack matches state.");
        return Ok(());
    }
    crate::commands::plan::print_plan(&plan, format);

    let provider: Arc<dyn Provider> = match args.provider {
        ProviderBackend::Sim => {
            let path = super::sim_storage_path(&doc.stack.name);
            Arc::new(SimProvider::persistent(path).map_err(|e| {
                driftwood_common::Error::Internal(format!("cannot open sim backend: {e}"))
            })?)
        }
    };

    let executor = Executor::new(
        provider,
        ApplyOptions {
            concurrency: args.concurrency,
            max_retries: args.max_retries,
            attempt_timeout: Duration::from_secs(args.timeout_secs),
            ..ApplyOptions::default()
        },
    );

    // First ctrl-c drains in-flight work and stops scheduling more
    let cancel = executor.cancellation_token();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Cancellation requested; letting in-flight operations finish");
            cancel.cancel();
        }
    });

    let report = executor.apply(&graph, &plan, &store).await?;
    print_report(&report, format);
    report.into_result().map(|_| ())
}

fn print_report(report: &ApplyReport, format: OutputFormat) {
    let rows: Vec<OutcomeRow> = report
        .outcomes
        .iter()
        .filter(|(_, o)| !matches!(o, ApplyOutcome::Unchanged))
        .map(|(id, outcome)| OutcomeRow {
            resource: id.clone(),
            outcome: outcome.clone(),
        })
        .collect();
    output::print_list(&rows, format);

    if report.success() {
        output::print_success(&format!(
            "Apply complete: {} resources applied.",
            report.applied().len()
        ));
    } else if report.cancelled {
        output::print_warning(&format!(
            "Apply cancelled: {} applied, {} skipped.",
            report.applied().len(),
            report.skipped().len()
        ));
    } else {
        output::print_error(&format!(
            "Apply failed: {} applied, {} failed, {} skipped.",
            report.applied().len(),
            report.failed().len(),
            report.skipped().len()
        ));
    }
}

#[derive(Serialize)]
struct OutcomeRow {
    resource: String,
    outcome: ApplyOutcome,
}

impl TableDisplay for OutcomeRow {
    fn headers() -> Vec<&'static str> {
        vec!["Resource", "Outcome"]
    }

    fn row(&self) -> Vec<String> {
        let outcome = match &self.outcome {
            ApplyOutcome::Applied => "applied".green().to_string(),
            ApplyOutcome::Unchanged => "unchanged".to_string(),
            ApplyOutcome::Failed { error } => format!("{} {}", "failed".red(), error),
            ApplyOutcome::Skipped => "skipped".yellow().to_string(),
        };
        vec![self.resource.clone(), outcome]
    }
}
