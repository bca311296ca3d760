//! Plan ordering: topological tiers over the diff

use driftwood_common::{
    DiffAction, DiffEntry, Error, Plan, ResourceGraph, Result, StateRecord,
};
use std::collections::{BTreeMap, HashMap, HashSet};
use tracing::debug;

/// Order diff entries into tiers of mutually independent entries.
///
/// Forward actions run after their dependencies; Delete entries run before
/// the resources they depended on (dependents are deprovisioned first, using
/// the dependencies recorded in state, since deleted resources are no longer
/// declared). Fails with the offending cycle if the graph is not acyclic.
pub fn order(
    graph: &ResourceGraph,
    state: &BTreeMap<String, StateRecord>,
    entries: Vec<DiffEntry>,
) -> Result<Plan> {
    let ids: HashSet<&str> = entries.iter().map(|e| e.logical_id.as_str()).collect();

    // before[x] lists entries that must complete before x
    let mut before: HashMap<&str, Vec<&str>> = HashMap::new();
    for entry in &entries {
        let id = entry.logical_id.as_str();
        before.entry(id).or_default();
        match entry.action {
            DiffAction::Delete => {
                // Recorded dependencies wait for this delete
                if let Some(record) = state.get(id) {
                    for dep in &record.depends_on {
                        if ids.contains(dep.as_str()) {
                            before.entry(dep.as_str()).or_default().push(id);
                        }
                    }
                }
            }
            _ => {
                for dep in graph.dependencies(id) {
                    if ids.contains(dep) {
                        before.entry(id).or_default().push(dep);
                    }
                }
            }
        }
    }

    let mut indegree: HashMap<&str, usize> =
        before.iter().map(|(id, deps)| (*id, deps.len())).collect();
    let mut by_id: BTreeMap<&str, &DiffEntry> = entries
        .iter()
        .map(|e| (e.logical_id.as_str(), e))
        .collect();

    let mut tiers: Vec<Vec<DiffEntry>> = Vec::new();
    let mut placed = 0usize;

    while placed < entries.len() {
        // BTreeMap iteration keeps each tier lexicographically sorted
        let ready: Vec<&str> = by_id
            .keys()
            .copied()
            .filter(|id| indegree[id] == 0)
            .collect();

        if ready.is_empty() {
            let remaining: Vec<&str> = by_id.keys().copied().collect();
            return Err(Error::CyclicDependency {
                cycle: find_cycle(&remaining, &before),
            });
        }

        let mut tier = Vec::with_capacity(ready.len());
        for id in &ready {
            if let Some(entry) = by_id.remove(id) {
                tier.push(entry.clone());
            }
        }
        for (id, deps) in before.iter() {
            if by_id.contains_key(id) {
                let satisfied = deps.iter().filter(|d| ready.contains(d)).count();
                if let Some(degree) = indegree.get_mut(id) {
                    *degree -= satisfied;
                }
            }
        }

        placed += tier.len();
        tiers.push(tier);
    }

    debug!(
        "Plan for stack {}: {} tiers, {} entries",
        graph.stack,
        tiers.len(),
        placed
    );
    Ok(Plan {
        stack: graph.stack.clone(),
        tiers,
    })
}

/// Walk the stuck subgraph and report one offending cycle, closing the loop
/// so the message reads a -> b -> a.
fn find_cycle(nodes: &[&str], before: &HashMap<&str, Vec<&str>>) -> Vec<String> {
    let node_set: HashSet<&str> = nodes.iter().copied().collect();
    let mut visited: HashSet<&str> = HashSet::new();

    for start in nodes {
        if visited.contains(start) {
            continue;
        }
        let mut path: Vec<&str> = Vec::new();
        let mut on_path: HashSet<&str> = HashSet::new();
        if let Some(cycle) = dfs(*start, &node_set, before, &mut visited, &mut path, &mut on_path) {
            return cycle;
        }
    }

    // Unreachable for a stuck Kahn run, but keep the error usable
    nodes.iter().map(|s| s.to_string()).collect()
}

fn dfs<'a>(
    node: &'a str,
    nodes: &HashSet<&'a str>,
    before: &HashMap<&'a str, Vec<&'a str>>,
    visited: &mut HashSet<&'a str>,
    path: &mut Vec<&'a str>,
    on_path: &mut HashSet<&'a str>,
) -> Option<Vec<String>> {
    visited.insert(node);
    on_path.insert(node);
    path.push(node);

    if let Some(deps) = before.get(node) {
        for &dep in deps {
            if !nodes.contains(dep) {
                continue;
            }
            if on_path.contains(dep) {
                let from = path.iter().position(|n| *n == dep).unwrap_or(0);
                let mut cycle: Vec<String> =
                    path[from..].iter().map(|s| s.to_string()).collect();
                cycle.push(dep.to_string());
                return Some(cycle);
            }
            if !visited.contains(dep) {
                if let Some(cycle) = dfs(dep, nodes, before, visited, path, on_path) {
                    return Some(cycle);
                }
            }
        }
    }

    path.pop();
    on_path.remove(node);
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::diff::{diff, DiffOptions};
    use crate::document::StackDocument;
    use crate::graph;
    use driftwood_common::ResourceKind;

    fn plan_for(input: &str, state: &BTreeMap<String, StateRecord>) -> Result<Plan> {
        let graph = graph::build(&StackDocument::from_str(input).unwrap())?;
        let entries = diff(&graph, state, DiffOptions::default())?;
        order(&graph, state, entries)
    }

    fn tier_of(plan: &Plan, id: &str) -> usize {
        plan.tiers
            .iter()
            .position(|tier| tier.iter().any(|e| e.logical_id == id))
            .unwrap_or_else(|| panic!("{id} not in plan"))
    }

    #[test]
    fn dependencies_come_before_dependents() {
        let plan = plan_for(crate::document::tests::WORKER_STACK, &BTreeMap::new()).unwrap();

        assert!(tier_of(&plan, "worker-dlq") < tier_of(&plan, "worker-queue"));
        assert!(tier_of(&plan, "worker-queue") < tier_of(&plan, "queue-policy"));
        assert!(tier_of(&plan, "artifacts") < tier_of(&plan, "queue-policy"));
        assert!(tier_of(&plan, "notifications") < tier_of(&plan, "queue-subscription"));
        assert!(tier_of(&plan, "worker-queue") < tier_of(&plan, "queue-subscription"));
    }

    #[test]
    fn first_tier_is_independent_and_sorted() {
        let plan = plan_for(crate::document::tests::WORKER_STACK, &BTreeMap::new()).unwrap();
        let first: Vec<&str> = plan.tiers[0].iter().map(|e| e.logical_id.as_str()).collect();
        let mut sorted = first.clone();
        sorted.sort();
        assert_eq!(first, sorted);
        assert!(first.contains(&"artifacts"));
        assert!(first.contains(&"worker-dlq"));
        assert!(first.contains(&"notifications"));
    }

    #[test]
    fn two_node_cycle_is_rejected() {
        let err = plan_for(
            r#"
[stack]
name = "s"

[resources.a]
kind = "queue"
depends_on = ["b"]

[resources.b]
kind = "queue"
depends_on = ["a"]
"#,
            &BTreeMap::new(),
        )
        .unwrap_err();

        match err {
            Error::CyclicDependency { cycle } => {
                assert!(cycle.len() >= 3);
                assert_eq!(cycle.first(), cycle.last());
                assert!(cycle.contains(&"a".to_string()));
                assert!(cycle.contains(&"b".to_string()));
            }
            other => panic!("expected CyclicDependency, got {other}"),
        }
    }

    #[test]
    fn deletes_run_before_their_recorded_dependencies() {
        // State holds policy -> queue; the new declaration drops the policy.
        let input = r#"
[stack]
name = "s"

[resources.q]
kind = "queue"

[resources.q.config]
queue_name = "worker"
"#;
        let graph = graph::build(&StackDocument::from_str(input).unwrap()).unwrap();
        let q = graph.get("q").unwrap();

        let state = BTreeMap::from([
            (
                "q".to_string(),
                StateRecord {
                    logical_id: "q".to_string(),
                    kind: ResourceKind::Queue,
                    physical_id: "arn:sim:queue::worker".to_string(),
                    config_hash: "stale".to_string(),
                    config: q.config.clone(),
                    depends_on: vec![],
                    retain: false,
                    applied_at: 0,
                },
            ),
            (
                "old-policy".to_string(),
                StateRecord {
                    logical_id: "old-policy".to_string(),
                    kind: ResourceKind::Policy,
                    physical_id: "arn:sim:policy::p".to_string(),
                    config_hash: "stale".to_string(),
                    config: Default::default(),
                    depends_on: vec!["q".to_string()],
                    retain: false,
                    applied_at: 0,
                },
            ),
        ]);

        let entries = diff(&graph, &state, DiffOptions::default()).unwrap();
        let plan = order(&graph, &state, entries).unwrap();
        // The orphaned dependent is deleted before its dependency is touched
        assert!(tier_of(&plan, "old-policy") < tier_of(&plan, "q"));
    }

    #[test]
    fn plan_is_idempotent_without_state_change() {
        let a = plan_for(crate::document::tests::WORKER_STACK, &BTreeMap::new()).unwrap();
        let b = plan_for(crate::document::tests::WORKER_STACK, &BTreeMap::new()).unwrap();
        let flat = |p: &Plan| {
            p.entries()
                .map(|e| (e.logical_id.clone(), e.action))
                .collect::<Vec<_>>()
        };
        assert_eq!(flat(&a), flat(&b));
    }
}
