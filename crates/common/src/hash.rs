//! Content hashing for declared configurations

use crate::types::{ConfigMap, ResourceKind};
use sha2::{Digest, Sha256};

/// Compute the content hash of a resource declaration.
///
/// The hash covers kind plus the canonical JSON of the config map. serde_json
/// serializes map keys in sorted order, so the result is independent of
/// declaration order. `${name.attr}` reference tokens are hashed in textual
/// form; their resolved values only exist at apply time.
pub fn content_hash(kind: ResourceKind, config: &ConfigMap) -> String {
    let mut hasher = Sha256::new();
    hasher.update(kind.to_string().as_bytes());
    hasher.update(b"\n");
    // ConfigMap is a BTreeMap, serialization cannot fail
    let canonical = serde_json::to_vec(config).unwrap_or_default();
    hasher.update(&canonical);
    hex::encode(hasher.finalize())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn config(pairs: &[(&str, serde_json::Value)]) -> ConfigMap {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.clone()))
            .collect()
    }

    #[test]
    fn hash_is_order_independent() {
        let a = config(&[("x", json!(1)), ("y", json!("z"))]);
        let b = config(&[("y", json!("z")), ("x", json!(1))]);
        assert_eq!(
            content_hash(ResourceKind::Queue, &a),
            content_hash(ResourceKind::Queue, &b)
        );
    }

    #[test]
    fn hash_changes_with_value() {
        let a = config(&[("retention_days", json!(2))]);
        let b = config(&[("retention_days", json!(4))]);
        assert_ne!(
            content_hash(ResourceKind::Queue, &a),
            content_hash(ResourceKind::Queue, &b)
        );
    }

    #[test]
    fn hash_distinguishes_kind() {
        let cfg = config(&[("name", json!("shared"))]);
        assert_ne!(
            content_hash(ResourceKind::Queue, &cfg),
            content_hash(ResourceKind::Topic, &cfg)
        );
    }
}
