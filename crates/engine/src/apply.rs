//! Apply executor: runs a plan against a provider
//!
//! Tiers run in order; entries within a tier run concurrently under a
//! semaphore. Throttled and timed-out provider calls retry with exponential
//! backoff; any other failure marks the node Failed, lets in-flight siblings
//! finish, and stops later tiers. State is written per node on success, so a
//! partial run leaves an accurate record of what exists.

use crate::graph::resolve_config;
use crate::state::StateStore;
use driftwood_common::{
    ApplyOutcome, ApplyReport, DiffAction, DiffEntry, Error, Plan, ProviderError,
    ProviderErrorKind, ResourceGraph, ResourceNode, Result, StateRecord,
};
use driftwood_provider::{schema, Provider};
use parking_lot::RwLock;
use rand::Rng;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Executor tuning
#[derive(Debug, Clone, Copy)]
pub struct ApplyOptions {
    /// Concurrent node applications per tier
    pub concurrency: usize,
    /// Retries after the first attempt, retryable errors only
    pub max_retries: u32,
    /// Timeout per provider attempt
    pub attempt_timeout: Duration,
    /// First backoff delay; doubles per retry, plus jitter
    pub base_backoff: Duration,
}

impl Default for ApplyOptions {
    fn default() -> Self {
        Self {
            concurrency: 4,
            max_retries: 4,
            attempt_timeout: Duration::from_secs(30),
            base_backoff: Duration::from_millis(500),
        }
    }
}

/// Applies plans against a provider
pub struct Executor {
    provider: Arc<dyn Provider>,
    options: ApplyOptions,
    cancel: CancellationToken,
}

enum NodeResult {
    Applied,
    Skipped,
    Failed(String),
}

impl Executor {
    pub fn new(provider: Arc<dyn Provider>, options: ApplyOptions) -> Self {
        Self {
            provider,
            options,
            cancel: CancellationToken::new(),
        }
    }

    /// Token to wire external cancellation (ctrl-c) into the run
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Execute the plan. Returns the report even on partial failure; callers
    /// turn it into an error with [`ApplyReport::into_result`].
    pub async fn apply(
        &self,
        graph: &ResourceGraph,
        plan: &Plan,
        store: &StateStore,
    ) -> Result<ApplyReport> {
        let graph = Arc::new(graph.clone());
        let mut report = ApplyReport {
            stack: plan.stack.clone(),
            ..Default::default()
        };

        // Physical ids of everything applied so far, for reference resolution
        let physical_ids: Arc<RwLock<HashMap<String, String>>> = Arc::new(RwLock::new(
            store
                .load()?
                .into_iter()
                .map(|(id, record)| (id, record.physical_id))
                .collect(),
        ));
        let semaphore = Arc::new(Semaphore::new(self.options.concurrency.max(1)));
        let mut halted = false;

        for tier in &plan.tiers {
            if halted || self.cancel.is_cancelled() {
                for entry in tier {
                    let outcome = if entry.action.is_change() {
                        ApplyOutcome::Skipped
                    } else {
                        ApplyOutcome::Unchanged
                    };
                    report.outcomes.insert(entry.logical_id.clone(), outcome);
                }
                continue;
            }

            let mut tasks: JoinSet<(String, NodeResult)> = JoinSet::new();
            for entry in tier {
                if !entry.action.is_change() {
                    report
                        .outcomes
                        .insert(entry.logical_id.clone(), ApplyOutcome::Unchanged);
                    continue;
                }

                let provider = Arc::clone(&self.provider);
                let options = self.options;
                let graph = Arc::clone(&graph);
                let store = store.clone();
                let physical_ids = Arc::clone(&physical_ids);
                let semaphore = Arc::clone(&semaphore);
                let cancel = self.cancel.clone();
                let entry = entry.clone();

                tasks.spawn(async move {
                    let permit = match semaphore.acquire_owned().await {
                        Ok(permit) => permit,
                        Err(_) => return (entry.logical_id, NodeResult::Skipped),
                    };
                    // Cancellation observed between queueing and start
                    if cancel.is_cancelled() {
                        return (entry.logical_id, NodeResult::Skipped);
                    }
                    let result =
                        match run_node(provider, options, graph, store, physical_ids, &entry)
                            .await
                        {
                            Ok(()) => NodeResult::Applied,
                            Err(e) => NodeResult::Failed(e.to_string()),
                        };
                    drop(permit);
                    (entry.logical_id, result)
                });
            }

            let mut tier_failed = false;
            while let Some(joined) = tasks.join_next().await {
                let (id, result) = joined
                    .map_err(|e| Error::Internal(format!("apply task panicked: {e}")))?;
                match result {
                    NodeResult::Applied => {
                        report.outcomes.insert(id, ApplyOutcome::Applied);
                    }
                    NodeResult::Skipped => {
                        report.outcomes.insert(id, ApplyOutcome::Skipped);
                    }
                    NodeResult::Failed(error) => {
                        warn!("Apply failed for {}: {}", id, error);
                        tier_failed = true;
                        report.outcomes.insert(id, ApplyOutcome::Failed { error });
                    }
                }
            }

            if tier_failed {
                halted = true;
            }
        }

        report.cancelled = self.cancel.is_cancelled();
        info!(
            "Apply for stack {}: {} applied, {} failed, {} skipped",
            report.stack,
            report.applied().len(),
            report.failed().len(),
            report.skipped().len()
        );
        Ok(report)
    }
}

async fn run_node(
    provider: Arc<dyn Provider>,
    options: ApplyOptions,
    graph: Arc<ResourceGraph>,
    store: StateStore,
    physical_ids: Arc<RwLock<HashMap<String, String>>>,
    entry: &DiffEntry,
) -> Result<()> {
    let id = &entry.logical_id;
    match entry.action {
        DiffAction::Create => {
            let node = declared(&graph, id)?;
            let resolved = {
                let ids = physical_ids.read().clone();
                resolve_config(node, &graph, &ids)?
            };
            let physical_id = with_retry(&options, || provider.create(node.kind, &resolved))
                .await
                .map_err(|e| provider_error(id, "create", e))?;
            physical_ids.write().insert(id.clone(), physical_id.clone());
            store.save(&applied_record(node, physical_id))?;
            info!("Created {} {}", node.kind, id);
        }
        DiffAction::Update => {
            let node = declared(&graph, id)?;
            let record = recorded(&store, id)?;
            let resolved = {
                let ids = physical_ids.read().clone();
                resolve_config(node, &graph, &ids)?
            };
            with_retry(&options, || {
                provider.update(&record.physical_id, node.kind, &resolved)
            })
            .await
            .map_err(|e| provider_error(id, "update", e))?;
            store.save(&applied_record(node, record.physical_id))?;
            info!("Updated {} {}", node.kind, id);
        }
        DiffAction::Replace => {
            let node = declared(&graph, id)?;
            let record = recorded(&store, id)?;
            let resolved = {
                let ids = physical_ids.read().clone();
                resolve_config(node, &graph, &ids)?
            };

            if schema::for_kind(node.kind).create_before_delete {
                let physical_id =
                    with_retry(&options, || provider.create(node.kind, &resolved))
                        .await
                        .map_err(|e| provider_error(id, "create (replace)", e))?;
                physical_ids.write().insert(id.clone(), physical_id.clone());
                store.save(&applied_record(node, physical_id))?;
                // The replacement is live and recorded; a failure here only
                // leaks the old instance
                with_retry(&options, || {
                    provider.delete(&record.physical_id, record.kind)
                })
                .await
                .map_err(|e| provider_error(id, "delete (replace)", e))?;
            } else {
                with_retry(&options, || {
                    provider.delete(&record.physical_id, record.kind)
                })
                .await
                .map_err(|e| provider_error(id, "delete (replace)", e))?;
                store.delete(id)?;
                physical_ids.write().remove(id);

                let physical_id =
                    with_retry(&options, || provider.create(node.kind, &resolved))
                        .await
                        .map_err(|e| provider_error(id, "create (replace)", e))?;
                physical_ids.write().insert(id.clone(), physical_id.clone());
                store.save(&applied_record(node, physical_id))?;
            }
            info!("Replaced {} {}", node.kind, id);
        }
        DiffAction::Delete => {
            let record = recorded(&store, id)?;
            with_retry(&options, || {
                provider.delete(&record.physical_id, record.kind)
            })
            .await
            .map_err(|e| provider_error(id, "delete", e))?;
            store.delete(id)?;
            physical_ids.write().remove(id);
            info!("Deleted {} {}", record.kind, id);
        }
        DiffAction::Unchanged => {}
    }
    Ok(())
}

fn declared<'a>(graph: &'a ResourceGraph, id: &str) -> Result<&'a ResourceNode> {
    graph
        .get(id)
        .ok_or_else(|| Error::Internal(format!("plan entry {id} is not in the graph")))
}

fn recorded(store: &StateStore, id: &str) -> Result<StateRecord> {
    store
        .get(id)?
        .ok_or_else(|| Error::Internal(format!("plan entry {id} has no state record")))
}

fn applied_record(node: &ResourceNode, physical_id: String) -> StateRecord {
    StateRecord {
        logical_id: node.name.clone(),
        kind: node.kind,
        physical_id,
        config_hash: node.config_hash.clone(),
        config: node.config.clone(),
        depends_on: node.depends_on.iter().cloned().collect(),
        retain: node.retain,
        applied_at: chrono::Utc::now().timestamp(),
    }
}

fn provider_error(id: &str, action: &str, source: ProviderError) -> Error {
    Error::Provider {
        id: id.to_string(),
        action: action.to_string(),
        source,
    }
}

/// Retry a provider call on throttling or attempt timeout, with capped
/// exponential backoff and jitter
async fn with_retry<T, F, Fut>(
    options: &ApplyOptions,
    mut call: F,
) -> std::result::Result<T, ProviderError>
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = std::result::Result<T, ProviderError>>,
{
    let mut attempt = 0u32;
    loop {
        attempt += 1;
        let outcome = match tokio::time::timeout(options.attempt_timeout, call()).await {
            Ok(result) => result,
            Err(_) => Err(ProviderError::new(
                ProviderErrorKind::Timeout,
                format!("attempt timed out after {:?}", options.attempt_timeout),
            )),
        };
        match outcome {
            Ok(value) => return Ok(value),
            Err(e) if e.is_retryable() && attempt <= options.max_retries => {
                let delay = backoff_delay(options.base_backoff, attempt);
                debug!(
                    "Retryable provider error ({}), attempt {}, backing off {:?}",
                    e, attempt, delay
                );
                tokio::time::sleep(delay).await;
            }
            Err(e) => return Err(e),
        }
    }
}

fn backoff_delay(base: Duration, attempt: u32) -> Duration {
    let exp = base.saturating_mul(1u32 << (attempt - 1).min(10));
    let jitter_cap = (base.as_millis() as u64 / 2).min(1000);
    let jitter = Duration::from_millis(rand::thread_rng().gen_range(0..=jitter_cap));
    exp + jitter
}
