//! Core types for Driftwood

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

/// Declared configuration attributes of a resource, opaque to the core.
///
/// BTreeMap keeps key order deterministic for hashing and display.
pub type ConfigMap = BTreeMap<String, serde_json::Value>;

/// Resource kind
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResourceKind {
    Bucket,
    Queue,
    Topic,
    Subscription,
    Policy,
}

impl std::fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ResourceKind::Bucket => write!(f, "bucket"),
            ResourceKind::Queue => write!(f, "queue"),
            ResourceKind::Topic => write!(f, "topic"),
            ResourceKind::Subscription => write!(f, "subscription"),
            ResourceKind::Policy => write!(f, "policy"),
        }
    }
}

/// A declared resource, immutable once its graph is built
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResourceNode {
    /// Logical name, unique within the graph
    pub name: String,
    pub kind: ResourceKind,
    pub config: ConfigMap,
    /// Logical names this resource depends on (explicit and from references)
    pub depends_on: BTreeSet<String>,
    /// Deletion of this resource must be explicitly allowed
    #[serde(default)]
    pub retain: bool,
    /// Content hash of kind + config in canonical form
    pub config_hash: String,
}

/// A dependency edge: `from` depends on `to`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceEdge {
    pub from: String,
    pub to: String,
}

/// The declared resource graph. Invariant: acyclic, verified before planning.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ResourceGraph {
    pub stack: String,
    pub nodes: BTreeMap<String, ResourceNode>,
    pub edges: Vec<ResourceEdge>,
}

impl ResourceGraph {
    pub fn get(&self, name: &str) -> Option<&ResourceNode> {
        self.nodes.get(name)
    }

    /// Logical names `name` depends on
    pub fn dependencies(&self, name: &str) -> Vec<&str> {
        self.edges
            .iter()
            .filter(|e| e.from == name)
            .map(|e| e.to.as_str())
            .collect()
    }

    /// Logical names that depend on `name`
    pub fn dependents(&self, name: &str) -> Vec<&str> {
        self.edges
            .iter()
            .filter(|e| e.to == name)
            .map(|e| e.from.as_str())
            .collect()
    }
}

/// Last-applied state of one resource
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StateRecord {
    pub logical_id: String,
    pub kind: ResourceKind,
    /// Identifier assigned by the provider on creation
    pub physical_id: String,
    pub config_hash: String,
    /// Config as applied, needed to tell mutable from immutable changes
    pub config: ConfigMap,
    /// Dependencies as declared at apply time, needed to order deletes
    pub depends_on: Vec<String>,
    #[serde(default)]
    pub retain: bool,
    pub applied_at: i64,
}

/// Planned action for one resource
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DiffAction {
    Create,
    Update,
    Replace,
    Delete,
    Unchanged,
}

impl DiffAction {
    pub fn is_change(&self) -> bool {
        !matches!(self, DiffAction::Unchanged)
    }
}

impl std::fmt::Display for DiffAction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DiffAction::Create => write!(f, "create"),
            DiffAction::Update => write!(f, "update"),
            DiffAction::Replace => write!(f, "replace"),
            DiffAction::Delete => write!(f, "delete"),
            DiffAction::Unchanged => write!(f, "unchanged"),
        }
    }
}

/// One entry of a diff, ephemeral per apply cycle
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DiffEntry {
    pub logical_id: String,
    pub kind: ResourceKind,
    pub action: DiffAction,
    pub reason: String,
}

/// Ordered apply plan: tiers of mutually independent entries
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Plan {
    pub stack: String,
    pub tiers: Vec<Vec<DiffEntry>>,
}

impl Plan {
    pub fn entries(&self) -> impl Iterator<Item = &DiffEntry> {
        self.tiers.iter().flatten()
    }

    pub fn changes(&self) -> usize {
        self.entries().filter(|e| e.action.is_change()).count()
    }

    pub fn is_empty(&self) -> bool {
        self.changes() == 0
    }
}

/// Outcome of one node during apply
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ApplyOutcome {
    Applied,
    Unchanged,
    Failed { error: String },
    Skipped,
}

impl std::fmt::Display for ApplyOutcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ApplyOutcome::Applied => write!(f, "applied"),
            ApplyOutcome::Unchanged => write!(f, "unchanged"),
            ApplyOutcome::Failed { error } => write!(f, "failed: {}", error),
            ApplyOutcome::Skipped => write!(f, "skipped"),
        }
    }
}

/// Final report of an apply run
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ApplyReport {
    pub stack: String,
    pub outcomes: BTreeMap<String, ApplyOutcome>,
    pub cancelled: bool,
}

impl ApplyReport {
    pub fn applied(&self) -> Vec<&str> {
        self.by(|o| matches!(o, ApplyOutcome::Applied))
    }

    pub fn failed(&self) -> Vec<&str> {
        self.by(|o| matches!(o, ApplyOutcome::Failed { .. }))
    }

    pub fn skipped(&self) -> Vec<&str> {
        self.by(|o| matches!(o, ApplyOutcome::Skipped))
    }

    fn by(&self, pred: impl Fn(&ApplyOutcome) -> bool) -> Vec<&str> {
        self.outcomes
            .iter()
            .filter(|(_, o)| pred(o))
            .map(|(id, _)| id.as_str())
            .collect()
    }

    pub fn success(&self) -> bool {
        !self.cancelled && self.failed().is_empty() && self.skipped().is_empty()
    }

    /// Turn a failed run into the error surfaced to the caller.
    pub fn into_result(self) -> crate::Result<Self> {
        if self.success() {
            Ok(self)
        } else {
            Err(crate::Error::PartialApply {
                applied: self.applied().iter().map(|s| s.to_string()).collect(),
                failed: self.failed().iter().map(|s| s.to_string()).collect(),
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kind_round_trips_through_serde() {
        let json = serde_json::to_string(&ResourceKind::Subscription).unwrap();
        assert_eq!(json, "\"subscription\"");
        let back: ResourceKind = serde_json::from_str(&json).unwrap();
        assert_eq!(back, ResourceKind::Subscription);
    }

    #[test]
    fn report_partitions_outcomes() {
        let mut report = ApplyReport {
            stack: "test".into(),
            ..Default::default()
        };
        report
            .outcomes
            .insert("a".into(), ApplyOutcome::Applied);
        report.outcomes.insert(
            "b".into(),
            ApplyOutcome::Failed {
                error: "conflict: exists".into(),
            },
        );
        report.outcomes.insert("c".into(), ApplyOutcome::Skipped);

        assert_eq!(report.applied(), vec!["a"]);
        assert_eq!(report.failed(), vec!["b"]);
        assert_eq!(report.skipped(), vec!["c"]);
        assert!(!report.success());
        assert!(report.into_result().is_err());
    }
}
