//! SQLite database for Driftwood state persistence

use crate::types::StateRecord;
use crate::{Error, Result};
use parking_lot::Mutex;
use rusqlite::{params, Connection, OptionalExtension};
use std::path::Path;
use std::sync::Arc;
use tracing::{debug, info};

/// Current state schema version. Bumped on incompatible schema changes;
/// a store written by a newer version is refused on open.
pub const SCHEMA_VERSION: u32 = 1;

/// Database wrapper for state persistence
#[derive(Clone)]
pub struct Database {
    conn: Arc<Mutex<Connection>>,
}

impl Database {
    /// Open or create database at path
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        if let Some(parent) = path.as_ref().parent() {
            std::fs::create_dir_all(parent)?;
        }
        let conn = Connection::open(path.as_ref())?;

        // Enable WAL mode for better concurrency
        conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA synchronous=NORMAL;")?;

        let db = Self {
            conn: Arc::new(Mutex::new(conn)),
        };

        db.init_schema()?;

        info!("Opened state database at {:?}", path.as_ref());
        Ok(db)
    }

    /// Open in-memory database (for testing)
    pub fn open_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        let db = Self {
            conn: Arc::new(Mutex::new(conn)),
        };
        db.init_schema()?;
        Ok(db)
    }

    /// Initialize database schema and verify the schema version
    fn init_schema(&self) -> Result<()> {
        let conn = self.conn.lock();

        conn.execute_batch(
            r#"
            -- Last-applied state, one row per resource
            CREATE TABLE IF NOT EXISTS resources (
                logical_id TEXT PRIMARY KEY,
                kind TEXT NOT NULL,
                physical_id TEXT NOT NULL,
                config_hash TEXT NOT NULL,
                config TEXT NOT NULL DEFAULT '{}',
                depends_on TEXT NOT NULL DEFAULT '[]',
                retain INTEGER NOT NULL DEFAULT 0,
                applied_at INTEGER NOT NULL
            );

            -- Exclusive apply locks, one row per stack scope
            CREATE TABLE IF NOT EXISTS locks (
                scope TEXT PRIMARY KEY,
                holder TEXT NOT NULL,
                acquired_at INTEGER NOT NULL
            );

            -- Store metadata, including the mandatory schema version
            CREATE TABLE IF NOT EXISTS meta (
                key TEXT PRIMARY KEY,
                value TEXT NOT NULL
            );
            "#,
        )?;

        let stored: Option<String> = conn
            .query_row(
                "SELECT value FROM meta WHERE key = 'schema_version'",
                [],
                |row| row.get(0),
            )
            .optional()?;

        match stored.and_then(|v| v.parse::<u32>().ok()) {
            Some(found) if found > SCHEMA_VERSION => {
                return Err(Error::StateVersion {
                    found,
                    supported: SCHEMA_VERSION,
                });
            }
            Some(found) if found < SCHEMA_VERSION => {
                // Older stores upgrade in place; v1 is the first version,
                // so there is nothing to migrate yet.
                conn.execute(
                    "UPDATE meta SET value = ?1 WHERE key = 'schema_version'",
                    params![SCHEMA_VERSION.to_string()],
                )?;
            }
            Some(_) => {}
            None => {
                conn.execute(
                    "INSERT INTO meta (key, value) VALUES ('schema_version', ?1)",
                    params![SCHEMA_VERSION.to_string()],
                )?;
            }
        }

        debug!("State schema initialized (version {})", SCHEMA_VERSION);
        Ok(())
    }

    // ========================================================================
    // State records
    // ========================================================================

    /// Insert or replace a state record, all-or-nothing
    pub fn save_record(&self, record: &StateRecord) -> Result<()> {
        let mut conn = self.conn.lock();
        let tx = conn.transaction()?;
        tx.execute(
            "INSERT OR REPLACE INTO resources
             (logical_id, kind, physical_id, config_hash, config, depends_on, retain, applied_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
            params![
                record.logical_id,
                serde_json::to_string(&record.kind)?,
                record.physical_id,
                record.config_hash,
                serde_json::to_string(&record.config)?,
                serde_json::to_string(&record.depends_on)?,
                record.retain as i64,
                record.applied_at,
            ],
        )?;
        tx.commit()?;

        debug!("Saved state record for {}", record.logical_id);
        Ok(())
    }

    /// Get a state record by logical id
    pub fn get_record(&self, logical_id: &str) -> Result<Option<StateRecord>> {
        let conn = self.conn.lock();
        let row = conn
            .query_row(
                "SELECT logical_id, kind, physical_id, config_hash, config, depends_on, retain, applied_at
                 FROM resources WHERE logical_id = ?1",
                params![logical_id],
                Self::record_from_row,
            )
            .optional()?;

        match row {
            Some(raw) => Ok(Some(raw.parse()?)),
            None => Ok(None),
        }
    }

    /// List all state records, ordered by logical id
    pub fn list_records(&self) -> Result<Vec<StateRecord>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(
            "SELECT logical_id, kind, physical_id, config_hash, config, depends_on, retain, applied_at
             FROM resources ORDER BY logical_id",
        )?;

        let rows = stmt.query_map([], Self::record_from_row)?;

        let mut records = Vec::new();
        for row in rows {
            records.push(row?.parse()?);
        }
        Ok(records)
    }

    /// Delete a state record
    pub fn delete_record(&self, logical_id: &str) -> Result<bool> {
        let mut conn = self.conn.lock();
        let tx = conn.transaction()?;
        let rows = tx.execute(
            "DELETE FROM resources WHERE logical_id = ?1",
            params![logical_id],
        )?;
        tx.commit()?;

        if rows > 0 {
            debug!("Deleted state record for {}", logical_id);
        }
        Ok(rows > 0)
    }

    fn record_from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<RawRecord> {
        Ok(RawRecord {
            logical_id: row.get(0)?,
            kind: row.get(1)?,
            physical_id: row.get(2)?,
            config_hash: row.get(3)?,
            config: row.get(4)?,
            depends_on: row.get(5)?,
            retain: row.get::<_, i64>(6)? != 0,
            applied_at: row.get(7)?,
        })
    }

    // ========================================================================
    // Apply locks
    // ========================================================================

    /// Acquire the exclusive lock for a stack scope.
    ///
    /// Fails fast with StateLocked if another holder has the lock; never
    /// blocks waiting for it.
    pub fn acquire_lock(&self, scope: &str, holder: &str) -> Result<()> {
        let mut conn = self.conn.lock();
        let now = chrono::Utc::now().timestamp();

        let tx = conn.transaction_with_behavior(rusqlite::TransactionBehavior::Immediate)?;
        let existing: Option<(String, i64)> = tx
            .query_row(
                "SELECT holder, acquired_at FROM locks WHERE scope = ?1",
                params![scope],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .optional()?;

        if let Some((held_by, acquired_at)) = existing {
            return Err(Error::StateLocked {
                scope: scope.to_string(),
                holder: held_by,
                held_secs: now - acquired_at,
            });
        }

        tx.execute(
            "INSERT INTO locks (scope, holder, acquired_at) VALUES (?1, ?2, ?3)",
            params![scope, holder, now],
        )?;
        tx.commit()?;

        debug!("Acquired lock on {} as {}", scope, holder);
        Ok(())
    }

    /// Release a lock held by this holder
    pub fn release_lock(&self, scope: &str, holder: &str) -> Result<()> {
        let conn = self.conn.lock();
        conn.execute(
            "DELETE FROM locks WHERE scope = ?1 AND holder = ?2",
            params![scope, holder],
        )?;
        debug!("Released lock on {}", scope);
        Ok(())
    }

    /// Remove a lock regardless of holder, for manual recovery
    pub fn force_unlock(&self, scope: &str) -> Result<bool> {
        let conn = self.conn.lock();
        let rows = conn.execute("DELETE FROM locks WHERE scope = ?1", params![scope])?;
        Ok(rows > 0)
    }
}

/// Raw database row before parsing
struct RawRecord {
    logical_id: String,
    kind: String,
    physical_id: String,
    config_hash: String,
    config: String,
    depends_on: String,
    retain: bool,
    applied_at: i64,
}

impl RawRecord {
    fn parse(self) -> Result<StateRecord> {
        Ok(StateRecord {
            logical_id: self.logical_id,
            kind: serde_json::from_str(&self.kind)?,
            physical_id: self.physical_id,
            config_hash: self.config_hash,
            config: serde_json::from_str(&self.config)?,
            depends_on: serde_json::from_str(&self.depends_on)?,
            retain: self.retain,
            applied_at: self.applied_at,
        })
    }
}
