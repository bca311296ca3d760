//! Declarative stack document
//!
//! The user-facing input is a TOML file: a `[stack]` header plus one
//! `[resources.<name>]` block per resource. String attribute values may
//! embed `${other.attr}` reference tokens, resolved at apply time.

use driftwood_common::{ConfigMap, Error, ResourceKind, Result};
use serde::Deserialize;
use std::collections::BTreeMap;
use std::path::Path;

/// Parsed stack document
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct StackDocument {
    pub stack: StackMeta,
    #[serde(default)]
    pub resources: BTreeMap<String, ResourceDecl>,
}

/// Stack-level metadata
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct StackMeta {
    /// Scope key for state and locking
    pub name: String,
}

/// One declared resource
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ResourceDecl {
    pub kind: ResourceKind,
    #[serde(default)]
    pub depends_on: Vec<String>,
    /// Refuse deletion of this resource unless explicitly allowed
    #[serde(default)]
    pub retain: bool,
    #[serde(default)]
    pub config: toml::Table,
}

impl StackDocument {
    pub fn from_str(input: &str) -> Result<Self> {
        toml::from_str(input).map_err(|e| Error::Validation(e.to_string()))
    }

    pub fn from_path(path: impl AsRef<Path>) -> Result<Self> {
        let content = std::fs::read_to_string(path.as_ref())?;
        Self::from_str(&content)
    }
}

impl ResourceDecl {
    /// Declared config as the opaque JSON attribute map the core works with
    pub fn config_map(&self) -> ConfigMap {
        self.config
            .iter()
            .map(|(k, v)| (k.clone(), toml_to_json(v)))
            .collect()
    }
}

fn toml_to_json(value: &toml::Value) -> serde_json::Value {
    match value {
        toml::Value::String(s) => serde_json::Value::String(s.clone()),
        toml::Value::Integer(i) => serde_json::Value::from(*i),
        toml::Value::Float(f) => serde_json::Value::from(*f),
        toml::Value::Boolean(b) => serde_json::Value::Bool(*b),
        toml::Value::Datetime(dt) => serde_json::Value::String(dt.to_string()),
        toml::Value::Array(items) => {
            serde_json::Value::Array(items.iter().map(toml_to_json).collect())
        }
        toml::Value::Table(table) => serde_json::Value::Object(
            table
                .iter()
                .map(|(k, v)| (k.clone(), toml_to_json(v)))
                .collect(),
        ),
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use serde_json::json;

    /// Stack derived from a production CI worker deployment: a bucket, a
    /// queue with dead-letter queue and policy, and a topic feeding the
    /// queue through a subscription.
    pub(crate) const WORKER_STACK: &str = r#"
[stack]
name = "prod-worker"

[resources.artifacts]
kind = "bucket"
retain = true

[resources.artifacts.config]
bucket_name = "prod-fetched-resources"
versioned = true
encryption = "kms_managed"
block_public_access = true

[resources.worker-dlq]
kind = "queue"

[resources.worker-dlq.config]
queue_name = "prod-iac-ci-worker-sqs-dl"

[resources.worker-queue]
kind = "queue"
depends_on = ["worker-dlq"]

[resources.worker-queue.config]
queue_name = "prod-iac-ci-worker-sqs"
encryption = "kms_managed"
retention_days = 2
visibility_timeout_secs = 43200
max_message_bytes = 262144
receive_wait_secs = 0
fifo_queue = false
content_based_deduplication = false
dead_letter_queue = "${worker-dlq.arn}"
max_receive_count = 3

[resources.worker-queue.config.tags]
environment = "prod"
project = "flywheel"

[resources.queue-policy]
kind = "policy"

[resources.queue-policy.config]
queue = "${worker-queue.arn}"
principal = "s3.amazonaws.com"
actions = ["sqs:SendMessage"]
source_account = "094724549126"
source_bucket = "${artifacts.arn}"

[resources.notifications]
kind = "topic"

[resources.notifications.config]
topic_name = "prod-iac-ci-worker-sns"
display_name = "Prod IAC CI Worker SNS"
encryption = "kms_managed"
fifo = false
max_retry_delay_secs = 300
http_retry_delay_secs = 5
num_retries = 3

[resources.notifications.config.tags]
environment = "prod"
project = "flywheel"

[resources.queue-subscription]
kind = "subscription"

[resources.queue-subscription.config]
topic = "${notifications.arn}"
protocol = "sqs"
endpoint = "${worker-queue.arn}"
"#;

    #[test]
    fn parses_worker_stack() {
        let doc = StackDocument::from_str(WORKER_STACK).unwrap();
        assert_eq!(doc.stack.name, "prod-worker");
        assert_eq!(doc.resources.len(), 6);

        let bucket = &doc.resources["artifacts"];
        assert_eq!(bucket.kind, ResourceKind::Bucket);
        assert!(bucket.retain);

        let queue = &doc.resources["worker-queue"];
        assert_eq!(queue.depends_on, vec!["worker-dlq"]);
        let config = queue.config_map();
        assert_eq!(config["retention_days"], json!(2));
        assert_eq!(config["fifo_queue"], json!(false));
        assert_eq!(config["tags"]["environment"], json!("prod"));
    }

    #[test]
    fn unknown_kind_is_rejected() {
        let err = StackDocument::from_str(
            r#"
[stack]
name = "s"

[resources.x]
kind = "lambda"
"#,
        )
        .unwrap_err();
        assert!(matches!(err, Error::Validation(_)));
    }

    #[test]
    fn unknown_top_level_field_is_rejected() {
        let err = StackDocument::from_str(
            r#"
[stack]
name = "s"

[resources.x]
kind = "queue"
retention = 2
"#,
        )
        .unwrap_err();
        assert!(matches!(err, Error::Validation(_)));
    }
}
