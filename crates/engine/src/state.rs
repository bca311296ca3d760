//! State store: persisted last-applied state plus the apply lock

use driftwood_common::{Database, Result, StateRecord};
use std::collections::BTreeMap;
use std::path::Path;
use tracing::{debug, warn};

/// Persisted state for one stack scope
#[derive(Clone)]
pub struct StateStore {
    db: Database,
    scope: String,
}

impl StateStore {
    /// Open or create the state database at path
    pub fn open(path: impl AsRef<Path>, scope: impl Into<String>) -> Result<Self> {
        Ok(Self {
            db: Database::open(path)?,
            scope: scope.into(),
        })
    }

    /// In-memory store (for testing)
    pub fn open_memory(scope: impl Into<String>) -> Result<Self> {
        Ok(Self {
            db: Database::open_memory()?,
            scope: scope.into(),
        })
    }

    pub fn scope(&self) -> &str {
        &self.scope
    }

    /// Acquire the exclusive lock for this scope.
    ///
    /// Fails fast with StateLocked if a concurrent apply holds it. The lock
    /// is released when the returned guard drops.
    pub fn lock(&self, holder: &str) -> Result<StateLock> {
        self.db.acquire_lock(&self.scope, holder)?;
        Ok(StateLock {
            db: self.db.clone(),
            scope: self.scope.clone(),
            holder: holder.to_string(),
        })
    }

    /// Remove the lock regardless of holder, for manual recovery
    pub fn force_unlock(&self) -> Result<bool> {
        self.db.force_unlock(&self.scope)
    }

    /// All records keyed by logical id
    pub fn load(&self) -> Result<BTreeMap<String, StateRecord>> {
        Ok(self
            .db
            .list_records()?
            .into_iter()
            .map(|r| (r.logical_id.clone(), r))
            .collect())
    }

    pub fn get(&self, logical_id: &str) -> Result<Option<StateRecord>> {
        self.db.get_record(logical_id)
    }

    pub fn save(&self, record: &StateRecord) -> Result<()> {
        self.db.save_record(record)
    }

    pub fn delete(&self, logical_id: &str) -> Result<bool> {
        self.db.delete_record(logical_id)
    }
}

/// Held apply lock; releases on drop
pub struct StateLock {
    db: Database,
    scope: String,
    holder: String,
}

impl Drop for StateLock {
    fn drop(&mut self) {
        match self.db.release_lock(&self.scope, &self.holder) {
            Ok(()) => debug!("Released apply lock on {}", self.scope),
            Err(e) => warn!("Failed to release apply lock on {}: {}", self.scope, e),
        }
    }
}
