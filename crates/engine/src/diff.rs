//! Diff engine: declared graph vs stored state

use driftwood_common::{
    DiffAction, DiffEntry, Error, ResourceGraph, ResourceNode, Result, StateRecord,
};
use driftwood_provider::schema;
use std::collections::BTreeMap;
use tracing::debug;

/// Diff behavior switches
#[derive(Debug, Clone, Copy, Default)]
pub struct DiffOptions {
    /// Permit Delete entries for resources whose state carries the retain flag
    pub allow_retained_delete: bool,
}

/// Classify every declared node and every orphaned state record.
///
/// Entries come back sorted lexicographically by logical id, so two runs over
/// the same inputs produce the same diff.
pub fn diff(
    graph: &ResourceGraph,
    state: &BTreeMap<String, StateRecord>,
    options: DiffOptions,
) -> Result<Vec<DiffEntry>> {
    let mut entries = Vec::new();

    for (name, node) in &graph.nodes {
        entries.push(classify(node, state.get(name)));
    }

    for (name, record) in state {
        if graph.nodes.contains_key(name) {
            continue;
        }
        if record.retain && !options.allow_retained_delete {
            return Err(Error::RetainedDelete { id: name.clone() });
        }
        entries.push(DiffEntry {
            logical_id: name.clone(),
            kind: record.kind,
            action: DiffAction::Delete,
            reason: "no longer declared".to_string(),
        });
    }

    entries.sort_by(|a, b| a.logical_id.cmp(&b.logical_id));
    debug!(
        "Diff for stack {}: {} entries, {} changes",
        graph.stack,
        entries.len(),
        entries.iter().filter(|e| e.action.is_change()).count()
    );
    Ok(entries)
}

fn classify(node: &ResourceNode, record: Option<&StateRecord>) -> DiffEntry {
    let Some(record) = record else {
        return DiffEntry {
            logical_id: node.name.clone(),
            kind: node.kind,
            action: DiffAction::Create,
            reason: "not in state".to_string(),
        };
    };

    if record.kind != node.kind {
        return DiffEntry {
            logical_id: node.name.clone(),
            kind: node.kind,
            action: DiffAction::Replace,
            reason: format!("kind changed from {} to {}", record.kind, node.kind),
        };
    }

    if record.config_hash == node.config_hash {
        return DiffEntry {
            logical_id: node.name.clone(),
            kind: node.kind,
            action: DiffAction::Unchanged,
            reason: "config hash matches".to_string(),
        };
    }

    let changed = changed_attrs(record, node);
    let kind_schema = schema::for_kind(node.kind);
    let immutable: Vec<&String> = changed
        .iter()
        .filter(|attr| kind_schema.is_immutable(attr))
        .collect();

    if let Some(attr) = immutable.first() {
        DiffEntry {
            logical_id: node.name.clone(),
            kind: node.kind,
            action: DiffAction::Replace,
            reason: format!("immutable attribute {attr} changed"),
        }
    } else {
        DiffEntry {
            logical_id: node.name.clone(),
            kind: node.kind,
            action: DiffAction::Update,
            reason: format!("attributes changed: {}", changed.join(", ")),
        }
    }
}

/// Attribute names whose declared value differs from the applied value
fn changed_attrs(record: &StateRecord, node: &ResourceNode) -> Vec<String> {
    let mut changed = Vec::new();
    for key in record.config.keys().chain(node.config.keys()) {
        if changed.iter().any(|c| c == key) {
            continue;
        }
        if record.config.get(key) != node.config.get(key) {
            changed.push(key.clone());
        }
    }
    changed
}
