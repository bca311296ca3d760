//! Simulated in-memory provider
//!
//! Stands in for a real cloud backend in tests and local runs. Resources
//! live in a process-local map; physical ids are ARN-shaped so reference
//! resolution looks like the real thing. Failure injection lets tests drive
//! the executor's retry and partial-failure paths.

use crate::{Provider, ProviderResult};
use async_trait::async_trait;
use driftwood_common::{ConfigMap, ProviderError, ProviderErrorKind, ResourceKind};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::PathBuf;
use tracing::debug;
use uuid::Uuid;

/// In-memory provider backend
#[derive(Default)]
pub struct SimProvider {
    /// physical id -> live resource
    resources: RwLock<HashMap<String, SimResource>>,
    failures: RwLock<Vec<FailureRule>>,
    /// Optional JSON snapshot so CLI runs see resources from earlier runs
    storage: Option<PathBuf>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct SimResource {
    kind: ResourceKind,
    config: ConfigMap,
}

/// Injected failure: any call whose kind+config+physical id contains
/// `needle` fails with `error` for the next `remaining` matches.
struct FailureRule {
    needle: String,
    error: ProviderErrorKind,
    remaining: usize,
}

impl SimProvider {
    pub fn new() -> Self {
        Self::default()
    }

    /// Backend persisted as a JSON snapshot at `path`
    pub fn persistent(path: impl Into<PathBuf>) -> ProviderResult<Self> {
        let path = path.into();
        let resources: HashMap<String, SimResource> = match std::fs::read_to_string(&path) {
            Ok(content) => serde_json::from_str(&content)
                .map_err(|e| ProviderError::new(ProviderErrorKind::Unknown, e.to_string()))?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => HashMap::new(),
            Err(e) => return Err(ProviderError::new(ProviderErrorKind::Unknown, e.to_string())),
        };
        Ok(Self {
            resources: RwLock::new(resources),
            failures: RwLock::new(Vec::new()),
            storage: Some(path),
        })
    }

    fn persist(&self, resources: &HashMap<String, SimResource>) -> ProviderResult<()> {
        let Some(path) = &self.storage else {
            return Ok(());
        };
        let snapshot = serde_json::to_string_pretty(resources)
            .map_err(|e| ProviderError::new(ProviderErrorKind::Unknown, e.to_string()))?;
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .map_err(|e| ProviderError::new(ProviderErrorKind::Unknown, e.to_string()))?;
        }
        std::fs::write(path, snapshot)
            .map_err(|e| ProviderError::new(ProviderErrorKind::Unknown, e.to_string()))
    }

    /// Fail every matching call until the rule is cleared
    pub fn inject_failure(&self, needle: &str, error: ProviderErrorKind) {
        self.inject_failures(needle, error, usize::MAX);
    }

    /// Fail the next `count` matching calls, then succeed
    pub fn inject_failures(&self, needle: &str, error: ProviderErrorKind, count: usize) {
        self.failures.write().push(FailureRule {
            needle: needle.to_string(),
            error,
            remaining: count,
        });
    }

    /// Number of live resources
    pub fn len(&self) -> usize {
        self.resources.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.resources.read().is_empty()
    }

    /// Whether a physical id refers to a live resource
    pub fn contains(&self, physical_id: &str) -> bool {
        self.resources.read().contains_key(physical_id)
    }

    fn check_failures(&self, haystack: &str) -> ProviderResult<()> {
        let mut rules = self.failures.write();
        for rule in rules.iter_mut() {
            if rule.remaining > 0 && haystack.contains(&rule.needle) {
                rule.remaining = rule.remaining.saturating_sub(1);
                return Err(ProviderError::new(
                    rule.error,
                    format!("injected {} for '{}'", rule.error, rule.needle),
                ));
            }
        }
        Ok(())
    }

    /// The config attribute that addresses this kind by name, if any
    fn name_attr(kind: ResourceKind) -> Option<&'static str> {
        match kind {
            ResourceKind::Bucket => Some("bucket_name"),
            ResourceKind::Queue => Some("queue_name"),
            ResourceKind::Topic => Some("topic_name"),
            ResourceKind::Subscription | ResourceKind::Policy => None,
        }
    }

    fn display_name(kind: ResourceKind, config: &ConfigMap) -> String {
        Self::name_attr(kind)
            .and_then(|attr| config.get(attr))
            .and_then(|v| v.as_str())
            .map(|s| s.to_string())
            .unwrap_or_else(|| Uuid::new_v4().to_string())
    }

    fn haystack(kind: ResourceKind, config: &ConfigMap, physical_id: &str) -> String {
        format!(
            "{} {} {}",
            kind,
            physical_id,
            serde_json::to_string(config).unwrap_or_default()
        )
    }
}

#[async_trait]
impl Provider for SimProvider {
    async fn create(&self, kind: ResourceKind, config: &ConfigMap) -> ProviderResult<String> {
        self.check_failures(&Self::haystack(kind, config, ""))?;

        let name = Self::display_name(kind, config);
        let physical_id = format!("arn:sim:{}::{}", kind, name);

        let mut resources = self.resources.write();
        if resources.contains_key(&physical_id) {
            return Err(ProviderError::conflict(format!(
                "{} {} already exists",
                kind, name
            )));
        }
        resources.insert(
            physical_id.clone(),
            SimResource {
                kind,
                config: config.clone(),
            },
        );
        self.persist(&resources)?;

        debug!("sim: created {} {}", kind, physical_id);
        Ok(physical_id)
    }

    async fn update(
        &self,
        physical_id: &str,
        kind: ResourceKind,
        config: &ConfigMap,
    ) -> ProviderResult<()> {
        self.check_failures(&Self::haystack(kind, config, physical_id))?;

        let mut resources = self.resources.write();
        if let Some(resource) = resources.get_mut(physical_id) {
            resource.config = config.clone();
        } else {
            return Err(ProviderError::not_found(format!(
                "{} {} does not exist",
                kind, physical_id
            )));
        }
        self.persist(&resources)?;
        debug!("sim: updated {} {}", kind, physical_id);
        Ok(())
    }

    async fn delete(&self, physical_id: &str, kind: ResourceKind) -> ProviderResult<()> {
        self.check_failures(&Self::haystack(kind, &ConfigMap::new(), physical_id))?;

        let mut resources = self.resources.write();
        match resources.remove(physical_id) {
            Some(_) => {
                self.persist(&resources)?;
                debug!("sim: deleted {} {}", kind, physical_id);
                Ok(())
            }
            None => Err(ProviderError::not_found(format!(
                "{} {} does not exist",
                kind, physical_id
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn bucket_config(name: &str) -> ConfigMap {
        [("bucket_name".to_string(), json!(name))].into_iter().collect()
    }

    #[tokio::test]
    async fn create_assigns_arn_shaped_id() {
        let provider = SimProvider::new();
        let id = provider
            .create(ResourceKind::Bucket, &bucket_config("artifacts"))
            .await
            .unwrap();
        assert_eq!(id, "arn:sim:bucket::artifacts");
        assert!(provider.contains(&id));
    }

    #[tokio::test]
    async fn duplicate_name_conflicts() {
        let provider = SimProvider::new();
        let cfg = bucket_config("artifacts");
        provider.create(ResourceKind::Bucket, &cfg).await.unwrap();

        let err = provider.create(ResourceKind::Bucket, &cfg).await.unwrap_err();
        assert_eq!(err.kind, ProviderErrorKind::Conflict);
    }

    #[tokio::test]
    async fn update_and_delete_unknown_id_not_found() {
        let provider = SimProvider::new();
        let cfg = bucket_config("artifacts");

        let err = provider
            .update("arn:sim:bucket::missing", ResourceKind::Bucket, &cfg)
            .await
            .unwrap_err();
        assert_eq!(err.kind, ProviderErrorKind::NotFound);

        let err = provider
            .delete("arn:sim:bucket::missing", ResourceKind::Bucket)
            .await
            .unwrap_err();
        assert_eq!(err.kind, ProviderErrorKind::NotFound);
    }

    #[tokio::test]
    async fn persistent_backend_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("resources.json");

        let provider = SimProvider::persistent(&path).unwrap();
        let id = provider
            .create(ResourceKind::Bucket, &bucket_config("artifacts"))
            .await
            .unwrap();

        let reopened = SimProvider::persistent(&path).unwrap();
        assert!(reopened.contains(&id));
        reopened.delete(&id, ResourceKind::Bucket).await.unwrap();

        let reopened = SimProvider::persistent(&path).unwrap();
        assert!(reopened.is_empty());
    }

    #[tokio::test]
    async fn injected_failures_expire() {
        let provider = SimProvider::new();
        provider.inject_failures("artifacts", ProviderErrorKind::Throttled, 2);

        let cfg = bucket_config("artifacts");
        for _ in 0..2 {
            let err = provider.create(ResourceKind::Bucket, &cfg).await.unwrap_err();
            assert_eq!(err.kind, ProviderErrorKind::Throttled);
            assert!(err.is_retryable());
        }
        // Third call passes the expired rule
        provider.create(ResourceKind::Bucket, &cfg).await.unwrap();
    }
}
