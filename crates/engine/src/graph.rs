//! Resource graph construction and reference resolution

use crate::document::StackDocument;
use driftwood_common::{
    content_hash, ConfigMap, Error, ResourceEdge, ResourceGraph, ResourceNode, Result,
};
use std::collections::{BTreeSet, HashMap};
use tracing::debug;

/// A `${target.attr}` reference found in a config value
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reference {
    pub target: String,
    pub attr: String,
}

impl Reference {
    fn token(&self) -> String {
        format!("${{{}.{}}}", self.target, self.attr)
    }
}

/// Build a [`ResourceGraph`] from a parsed document.
///
/// Validates every explicit dependency and every reference target before any
/// state or provider access, and stamps each node with its content hash.
pub fn build(doc: &StackDocument) -> Result<ResourceGraph> {
    let mut graph = ResourceGraph {
        stack: doc.stack.name.clone(),
        ..Default::default()
    };

    for (name, decl) in &doc.resources {
        if name.is_empty() || name.contains('.') {
            return Err(Error::Validation(format!(
                "invalid resource name {name:?}: names must be non-empty and must not contain '.'"
            )));
        }

        let config = decl.config_map();

        let mut depends_on: BTreeSet<String> = decl.depends_on.iter().cloned().collect();
        for reference in find_references(&config) {
            let target = doc.resources.get(&reference.target).ok_or_else(|| {
                Error::UnresolvedReference {
                    resource: name.clone(),
                    reference: reference.token(),
                }
            })?;
            // A reference resolves to the physical id or to a declared attribute
            if reference.attr != "arn"
                && reference.attr != "id"
                && !target.config.contains_key(&reference.attr)
            {
                return Err(Error::UnresolvedReference {
                    resource: name.clone(),
                    reference: reference.token(),
                });
            }
            depends_on.insert(reference.target.clone());
        }

        for dep in &decl.depends_on {
            if !doc.resources.contains_key(dep) {
                return Err(Error::UnresolvedReference {
                    resource: name.clone(),
                    reference: dep.clone(),
                });
            }
        }
        if depends_on.contains(name) {
            return Err(Error::Validation(format!(
                "resource {name} depends on itself"
            )));
        }

        for dep in &depends_on {
            graph.edges.push(ResourceEdge {
                from: name.clone(),
                to: dep.clone(),
            });
        }

        let config_hash = content_hash(decl.kind, &config);
        graph.nodes.insert(
            name.clone(),
            ResourceNode {
                name: name.clone(),
                kind: decl.kind,
                config,
                depends_on,
                retain: decl.retain,
                config_hash,
            },
        );
    }

    debug!(
        "Built graph for stack {}: {} resources, {} edges",
        graph.stack,
        graph.nodes.len(),
        graph.edges.len()
    );
    Ok(graph)
}

/// Collect every reference token in a config map
pub fn find_references(config: &ConfigMap) -> Vec<Reference> {
    let mut refs = Vec::new();
    for value in config.values() {
        scan_value(value, &mut refs);
    }
    refs
}

fn scan_value(value: &serde_json::Value, refs: &mut Vec<Reference>) {
    match value {
        serde_json::Value::String(s) => scan_string(s, refs),
        serde_json::Value::Array(items) => {
            for item in items {
                scan_value(item, refs);
            }
        }
        serde_json::Value::Object(map) => {
            for item in map.values() {
                scan_value(item, refs);
            }
        }
        _ => {}
    }
}

fn scan_string(s: &str, refs: &mut Vec<Reference>) {
    let mut rest = s;
    while let Some(start) = rest.find("${") {
        let Some(end) = rest[start..].find('}') else {
            break;
        };
        let token = &rest[start + 2..start + end];
        if let Some((target, attr)) = token.split_once('.') {
            if !target.is_empty() && !attr.is_empty() {
                refs.push(Reference {
                    target: target.to_string(),
                    attr: attr.to_string(),
                });
            }
        }
        rest = &rest[start + end + 1..];
    }
}

/// Substitute reference tokens with their values.
///
/// `${x.arn}` and `${x.id}` become x's physical identifier; any other
/// `${x.attr}` becomes x's declared attribute value. Called per node during
/// apply, after every dependency has a physical id.
pub fn resolve_config(
    node: &ResourceNode,
    graph: &ResourceGraph,
    physical_ids: &HashMap<String, String>,
) -> Result<ConfigMap> {
    node.config
        .iter()
        .map(|(k, v)| Ok((k.clone(), resolve_value(v, graph, physical_ids)?)))
        .collect()
}

fn resolve_value(
    value: &serde_json::Value,
    graph: &ResourceGraph,
    physical_ids: &HashMap<String, String>,
) -> Result<serde_json::Value> {
    match value {
        serde_json::Value::String(s) => {
            Ok(serde_json::Value::String(resolve_string(s, graph, physical_ids)?))
        }
        serde_json::Value::Array(items) => Ok(serde_json::Value::Array(
            items
                .iter()
                .map(|v| resolve_value(v, graph, physical_ids))
                .collect::<Result<_>>()?,
        )),
        serde_json::Value::Object(map) => Ok(serde_json::Value::Object(
            map.iter()
                .map(|(k, v)| Ok((k.clone(), resolve_value(v, graph, physical_ids)?)))
                .collect::<Result<_>>()?,
        )),
        other => Ok(other.clone()),
    }
}

fn resolve_string(
    s: &str,
    graph: &ResourceGraph,
    physical_ids: &HashMap<String, String>,
) -> Result<String> {
    let mut refs = Vec::new();
    scan_string(s, &mut refs);

    let mut resolved = s.to_string();
    for reference in refs {
        let replacement = if reference.attr == "arn" || reference.attr == "id" {
            physical_ids
                .get(&reference.target)
                .cloned()
                .ok_or_else(|| {
                    Error::Internal(format!(
                        "no physical id for {} while resolving {}",
                        reference.target,
                        reference.token()
                    ))
                })?
        } else {
            let target = graph.get(&reference.target).ok_or_else(|| {
                Error::Internal(format!("unknown resource in token {}", reference.token()))
            })?;
            match target.config.get(&reference.attr) {
                Some(serde_json::Value::String(v)) => v.clone(),
                Some(other) => other.to_string(),
                None => {
                    return Err(Error::Internal(format!(
                        "unknown attribute in token {}",
                        reference.token()
                    )))
                }
            }
        };
        resolved = resolved.replace(&reference.token(), &replacement);
    }
    Ok(resolved)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::document::tests::WORKER_STACK;
    use driftwood_common::ResourceKind;

    fn worker_graph() -> ResourceGraph {
        build(&StackDocument::from_str(WORKER_STACK).unwrap()).unwrap()
    }

    #[test]
    fn builds_edges_from_references_and_depends_on() {
        let graph = worker_graph();
        assert_eq!(graph.nodes.len(), 6);

        let mut queue_deps = graph.dependencies("worker-queue");
        queue_deps.sort();
        assert_eq!(queue_deps, vec!["worker-dlq"]);

        let mut policy_deps = graph.dependencies("queue-policy");
        policy_deps.sort();
        assert_eq!(policy_deps, vec!["artifacts", "worker-queue"]);

        let mut sub_deps = graph.dependencies("queue-subscription");
        sub_deps.sort();
        assert_eq!(sub_deps, vec!["notifications", "worker-queue"]);

        assert!(graph.dependents("worker-dlq").contains(&"worker-queue"));
    }

    #[test]
    fn unresolved_reference_is_rejected() {
        let doc = StackDocument::from_str(
            r#"
[stack]
name = "s"

[resources.policy]
kind = "policy"

[resources.policy.config]
queue = "${ghost-queue.arn}"
"#,
        )
        .unwrap();
        let err = build(&doc).unwrap_err();
        match err {
            Error::UnresolvedReference { resource, reference } => {
                assert_eq!(resource, "policy");
                assert_eq!(reference, "${ghost-queue.arn}");
            }
            other => panic!("expected UnresolvedReference, got {other}"),
        }
    }

    #[test]
    fn unknown_attribute_reference_is_rejected() {
        let doc = StackDocument::from_str(
            r#"
[stack]
name = "s"

[resources.dlq]
kind = "queue"

[resources.dlq.config]
queue_name = "dlq"

[resources.q]
kind = "queue"

[resources.q.config]
queue_name = "q"
dead_letter_queue = "${dlq.nonexistent_attr}"
"#,
        )
        .unwrap();
        assert!(matches!(
            build(&doc).unwrap_err(),
            Error::UnresolvedReference { .. }
        ));
    }

    #[test]
    fn self_dependency_is_rejected() {
        let doc = StackDocument::from_str(
            r#"
[stack]
name = "s"

[resources.q]
kind = "queue"
depends_on = ["q"]
"#,
        )
        .unwrap();
        assert!(matches!(build(&doc).unwrap_err(), Error::Validation(_)));
    }

    #[test]
    fn hash_is_stable_across_rebuilds() {
        let a = worker_graph();
        let b = worker_graph();
        for (name, node) in &a.nodes {
            assert_eq!(node.config_hash, b.nodes[name].config_hash);
        }
    }

    #[test]
    fn resolution_substitutes_physical_ids_and_attrs() {
        let graph = worker_graph();
        let mut ids = HashMap::new();
        ids.insert("worker-queue".to_string(), "arn:sim:queue::wq".to_string());
        ids.insert("artifacts".to_string(), "arn:sim:bucket::ab".to_string());

        let resolved =
            resolve_config(graph.get("queue-policy").unwrap(), &graph, &ids).unwrap();
        assert_eq!(resolved["queue"], "arn:sim:queue::wq");
        assert_eq!(resolved["source_bucket"], "arn:sim:bucket::ab");
        // Non-reference values pass through untouched
        assert_eq!(resolved["source_account"], "094724549126");
    }

    #[test]
    fn resolution_fails_without_dependency_physical_id() {
        let graph = worker_graph();
        let err =
            resolve_config(graph.get("queue-policy").unwrap(), &graph, &HashMap::new())
                .unwrap_err();
        assert!(matches!(err, Error::Internal(_)));
    }

    #[test]
    fn kinds_survive_the_build() {
        let graph = worker_graph();
        assert_eq!(graph.get("artifacts").unwrap().kind, ResourceKind::Bucket);
        assert_eq!(
            graph.get("queue-subscription").unwrap().kind,
            ResourceKind::Subscription
        );
        assert!(graph.get("artifacts").unwrap().retain);
    }
}
