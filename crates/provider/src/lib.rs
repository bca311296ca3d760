//! Driftwood Provider Abstraction
//!
//! The reconciler core talks to the cloud through the [`Provider`] trait;
//! vendor adapters implement it. The crate ships per-kind schemas (which
//! attributes are immutable, whether a kind tolerates two live instances
//! during replacement) and a simulated in-memory backend used by tests and
//! by `--provider sim`.

pub mod schema;
pub mod sim;

pub use schema::KindSchema;
pub use sim::SimProvider;

use async_trait::async_trait;
use driftwood_common::{ConfigMap, ProviderError, ResourceKind};

/// Result type for provider calls
pub type ProviderResult<T> = std::result::Result<T, ProviderError>;

/// Provisioning operations against a cloud API.
///
/// Config maps arrive fully resolved: reference tokens have been substituted
/// with physical identifiers or declared attribute values.
#[async_trait]
pub trait Provider: Send + Sync {
    /// Create a resource, returning its provider-assigned physical id
    async fn create(&self, kind: ResourceKind, config: &ConfigMap) -> ProviderResult<String>;

    /// Update a resource in place
    async fn update(
        &self,
        physical_id: &str,
        kind: ResourceKind,
        config: &ConfigMap,
    ) -> ProviderResult<()>;

    /// Delete a resource
    async fn delete(&self, physical_id: &str, kind: ResourceKind) -> ProviderResult<()>;
}
