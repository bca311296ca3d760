//! Driftwood Engine
//!
//! The reconciliation core: document parsing, graph construction, diffing
//! against stored state, dependency-ordered planning, and apply execution.

pub mod apply;
pub mod diff;
pub mod document;
pub mod graph;
pub mod plan;
pub mod state;

pub use apply::{ApplyOptions, Executor};
pub use diff::DiffOptions;
pub use document::StackDocument;
pub use state::{StateLock, StateStore};

use driftwood_common::{Plan, ResourceGraph, Result, StateRecord};
use std::collections::BTreeMap;

/// Diff the declared graph against stored state and order the result.
///
/// The one-call path behind both `plan` and `apply`.
pub fn plan_stack(
    graph: &ResourceGraph,
    state: &BTreeMap<String, StateRecord>,
    options: DiffOptions,
) -> Result<Plan> {
    let entries = diff::diff(graph, state, options)?;
    plan::order(graph, state, entries)
}
