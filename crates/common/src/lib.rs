//! Driftwood Common Library
//!
//! Shared types, errors, and state persistence for the Driftwood reconciler.

pub mod db;
pub mod error;
pub mod hash;
pub mod types;

// Re-export commonly used types
pub use db::{Database, SCHEMA_VERSION};
pub use error::{Error, ProviderError, ProviderErrorKind, Result};
pub use hash::content_hash;
pub use types::*;

/// Driftwood version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Default store path
pub fn default_store_path() -> std::path::PathBuf {
    dirs::home_dir()
        .unwrap_or_else(|| std::path::PathBuf::from("."))
        .join(".driftwood")
}

/// Home directory helper
mod dirs {
    pub fn home_dir() -> Option<std::path::PathBuf> {
        std::env::var_os("HOME").map(std::path::PathBuf::from)
    }
}
