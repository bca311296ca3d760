//! Error types for Driftwood

use thiserror::Error;

/// Result type alias using Driftwood Error
pub type Result<T> = std::result::Result<T, Error>;

/// Driftwood error types
#[derive(Error, Debug)]
pub enum Error {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Invalid declaration: {0}")]
    Validation(String),

    #[error("Resource {resource} references unknown resource {reference}")]
    UnresolvedReference { resource: String, reference: String },

    #[error("Cyclic dependency: {}", cycle.join(" -> "))]
    CyclicDependency { cycle: Vec<String> },

    #[error("State for stack {scope} is locked by {holder} (held {held_secs}s)")]
    StateLocked {
        scope: String,
        holder: String,
        held_secs: i64,
    },

    #[error("State schema version {found} is newer than supported version {supported}")]
    StateVersion { found: u32, supported: u32 },

    #[error("Resource {id} is marked retain and cannot be deleted (pass --allow-retained-delete to override)")]
    RetainedDelete { id: String },

    #[error("{action} {id} failed: {source}")]
    Provider {
        id: String,
        action: String,
        #[source]
        source: ProviderError,
    },

    #[error("Apply failed: {} applied, {} failed", applied.len(), failed.len())]
    PartialApply {
        applied: Vec<String>,
        failed: Vec<String>,
    },

    #[error("Internal error: {0}")]
    Internal(String),
}

/// Classified provider API error
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("{kind}: {message}")]
pub struct ProviderError {
    pub kind: ProviderErrorKind,
    pub message: String,
}

impl ProviderError {
    pub fn new(kind: ProviderErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    pub fn throttled(message: impl Into<String>) -> Self {
        Self::new(ProviderErrorKind::Throttled, message)
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(ProviderErrorKind::NotFound, message)
    }

    pub fn conflict(message: impl Into<String>) -> Self {
        Self::new(ProviderErrorKind::Conflict, message)
    }

    /// Whether the executor may retry the failed call.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self.kind,
            ProviderErrorKind::Throttled | ProviderErrorKind::Timeout
        )
    }
}

/// Provider error classification
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProviderErrorKind {
    Throttled,
    NotFound,
    Conflict,
    Unauthorized,
    Timeout,
    Unknown,
}

impl std::fmt::Display for ProviderErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ProviderErrorKind::Throttled => write!(f, "throttled"),
            ProviderErrorKind::NotFound => write!(f, "not found"),
            ProviderErrorKind::Conflict => write!(f, "conflict"),
            ProviderErrorKind::Unauthorized => write!(f, "unauthorized"),
            ProviderErrorKind::Timeout => write!(f, "timeout"),
            ProviderErrorKind::Unknown => write!(f, "unknown"),
        }
    }
}
