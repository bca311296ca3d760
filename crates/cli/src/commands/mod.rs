//! CLI command implementations

pub mod apply;
pub mod plan;
pub mod state;

use driftwood_common::{ResourceGraph, Result};
use driftwood_engine::{graph, StackDocument, StateStore};
use std::path::{Path, PathBuf};

/// Parse the stack document and build its graph
pub(crate) fn load_stack(file: &Path) -> Result<(StackDocument, ResourceGraph)> {
    let doc = StackDocument::from_path(file)?;
    let graph = graph::build(&doc)?;
    Ok((doc, graph))
}

/// Open the state store for a stack, honoring a --state override
pub(crate) fn open_store(override_path: Option<&Path>, stack: &str) -> Result<StateStore> {
    let path = match override_path {
        Some(path) => path.to_path_buf(),
        None => default_state_path(stack),
    };
    StateStore::open(path, stack)
}

pub(crate) fn default_state_path(stack: &str) -> PathBuf {
    driftwood_common::default_store_path()
        .join("stacks")
        .join(format!("{stack}.db"))
}

/// Where the sim provider keeps its resources for a stack
pub(crate) fn sim_storage_path(stack: &str) -> PathBuf {
    driftwood_common::default_store_path()
        .join("stacks")
        .join(format!("{stack}.sim.json"))
}

/// Lock holder id: enough to find the other apply when contention hits
pub(crate) fn lock_holder() -> String {
    let user = std::env::var("USER").unwrap_or_else(|_| "unknown".to_string());
    let host = hostname::get()
        .ok()
        .and_then(|h| h.into_string().ok())
        .unwrap_or_else(|| "localhost".to_string());
    format!("{}@{}:{}", user, host, std::process::id())
}
