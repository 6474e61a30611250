//! Persistent process registry backed by `SQLite`
//!
//! The registry is the only shared mutable state between the
//! controller and the daemonized monitor processes. Every invocation
//! (start, stop, list) and every daemon opens the same database file
//! independently and relies on `SQLite`'s own locking to serialize
//! conflicting writes. The presence of a row is the sole signal a
//! monitor loop uses to decide whether its process should keep
//! running.

use crate::error::{CoreError, Result};
use async_trait::async_trait;
use rusqlite::{params, Connection, OptionalExtension};
use schema::{ProcessConfig, ProcessRecord};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, info};

/// SQL schema for the process registry.
///
/// `command` holds the command line as a JSON array of strings; the
/// optional termination signal gets its own column.
const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS processes (
    pid INTEGER PRIMARY KEY,
    command TEXT NOT NULL,
    signal INTEGER
);
";

/// Registry file format version, stored in `PRAGMA user_version`.
const SCHEMA_VERSION: i32 = 1;

/// Default registry file name, created in the current working directory.
const DEFAULT_STORE_FILE: &str = ".pids.db";

/// Trait for process registry operations.
#[async_trait]
pub trait StateStore: Send + Sync {
    /// Insert a record for a newly launched process. The pid is the
    /// primary key; adding a second record for a live pid is an error.
    async fn add(&self, record: ProcessRecord) -> Result<()>;

    /// Get the record for a pid, if any.
    async fn get(&self, pid: u32) -> Result<Option<ProcessRecord>>;

    /// Whether a record exists for a pid.
    async fn exists(&self, pid: u32) -> Result<bool>;

    /// Remove the record for a pid. No-op if absent; idempotent.
    async fn remove(&self, pid: u32) -> Result<()>;

    /// All records, in no particular order.
    async fn all(&self) -> Result<Vec<ProcessRecord>>;
}

/// SQLite-backed process registry.
#[derive(Clone)]
pub struct SqliteStore {
    conn: Arc<Mutex<Connection>>,
}

impl std::fmt::Debug for SqliteStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SqliteStore").finish()
    }
}

/// Default registry path: `<cwd>/.pids.db`.
pub fn default_store_path() -> Result<PathBuf> {
    let cwd = std::env::current_dir()
        .map_err(|e| CoreError::StoreUnavailable(format!("cannot resolve working directory: {e}")))?;
    Ok(cwd.join(DEFAULT_STORE_FILE))
}

impl SqliteStore {
    /// Opens or creates the registry in the current working directory.
    pub fn open_default() -> Result<Self> {
        Self::open(default_store_path()?)
    }

    /// Opens or creates the registry at the given path.
    ///
    /// Schema creation is idempotent, so concurrent opens by multiple
    /// processes are safe.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let conn = Connection::open(path).map_err(|e| {
            CoreError::StoreUnavailable(format!("{}: {}", path.display(), e))
        })?;
        let store = Self::init(conn)?;
        debug!("Process registry opened at {:?}", path);
        Ok(store)
    }

    /// Opens an in-memory registry for testing.
    pub fn open_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()
            .map_err(|e| CoreError::StoreUnavailable(e.to_string()))?;
        Self::init(conn)
    }

    fn init(conn: Connection) -> Result<Self> {
        // WAL mode keeps readers from blocking on the writing daemon;
        // the busy timeout bounds waits on a write lock.
        conn.pragma_update(None, "journal_mode", "WAL").ok();
        conn.busy_timeout(std::time::Duration::from_secs(5))
            .map_err(|e| CoreError::StoreUnavailable(format!("failed to set busy timeout: {e}")))?;

        let version: i32 = conn
            .query_row("PRAGMA user_version", [], |row| row.get(0))
            .map_err(|e| CoreError::StoreUnavailable(format!("failed to read version: {e}")))?;
        match version {
            0 => {
                conn.pragma_update(None, "user_version", SCHEMA_VERSION)
                    .map_err(|e| {
                        CoreError::StoreUnavailable(format!("failed to set version: {e}"))
                    })?;
            }
            v if v == SCHEMA_VERSION => {}
            v => {
                return Err(CoreError::StoreUnavailable(format!(
                    "unsupported registry version {v} (expected {SCHEMA_VERSION})"
                )));
            }
        }

        conn.execute_batch(SCHEMA)
            .map_err(|e| CoreError::StoreUnavailable(format!("failed to create schema: {e}")))?;

        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }
}

#[async_trait]
impl StateStore for SqliteStore {
    async fn add(&self, record: ProcessRecord) -> Result<()> {
        let conn = Arc::clone(&self.conn);
        tokio::task::spawn_blocking(move || {
            let conn = conn.blocking_lock();
            let command = serde_json::to_string(&record.config.command)?;
            conn.execute(
                "INSERT INTO processes (pid, command, signal) VALUES (?1, ?2, ?3)",
                params![record.pid, command, record.config.signal],
            )?;
            info!("Registered process {}", record.pid);
            Ok::<(), CoreError>(())
        })
        .await
        .map_err(|e| CoreError::StoreUnavailable(format!("task join error: {e}")))?
    }

    async fn get(&self, pid: u32) -> Result<Option<ProcessRecord>> {
        let conn = Arc::clone(&self.conn);
        tokio::task::spawn_blocking(move || {
            let conn = conn.blocking_lock();
            let mut stmt =
                conn.prepare("SELECT pid, command, signal FROM processes WHERE pid = ?1")?;
            let record = stmt
                .query_row(params![pid], row_to_record)
                .optional()?;
            Ok(record)
        })
        .await
        .map_err(|e| CoreError::StoreUnavailable(format!("task join error: {e}")))?
    }

    async fn exists(&self, pid: u32) -> Result<bool> {
        let conn = Arc::clone(&self.conn);
        tokio::task::spawn_blocking(move || {
            let conn = conn.blocking_lock();
            let count: i64 = conn.query_row(
                "SELECT COUNT(pid) FROM processes WHERE pid = ?1",
                params![pid],
                |row| row.get(0),
            )?;
            Ok(count > 0)
        })
        .await
        .map_err(|e| CoreError::StoreUnavailable(format!("task join error: {e}")))?
    }

    async fn remove(&self, pid: u32) -> Result<()> {
        let conn = Arc::clone(&self.conn);
        tokio::task::spawn_blocking(move || {
            let conn = conn.blocking_lock();
            let deleted = conn.execute("DELETE FROM processes WHERE pid = ?1", params![pid])?;
            if deleted > 0 {
                info!("Removed registry record for process {}", pid);
            } else {
                debug!("No registry record for process {}", pid);
            }
            Ok(())
        })
        .await
        .map_err(|e| CoreError::StoreUnavailable(format!("task join error: {e}")))?
    }

    async fn all(&self) -> Result<Vec<ProcessRecord>> {
        let conn = Arc::clone(&self.conn);
        tokio::task::spawn_blocking(move || {
            let conn = conn.blocking_lock();
            let mut stmt = conn.prepare("SELECT pid, command, signal FROM processes")?;
            let records = stmt
                .query_map([], row_to_record)?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            Ok(records)
        })
        .await
        .map_err(|e| CoreError::StoreUnavailable(format!("task join error: {e}")))?
    }
}

/// Helper function to convert a database row to a `ProcessRecord`.
fn row_to_record(row: &rusqlite::Row<'_>) -> rusqlite::Result<ProcessRecord> {
    let pid: u32 = row.get(0)?;
    let command_json: String = row.get(1)?;
    let signal: Option<i32> = row.get(2)?;

    let command: Vec<String> = serde_json::from_str(&command_json).map_err(|e| {
        rusqlite::Error::FromSqlConversionFailure(1, rusqlite::types::Type::Text, Box::new(e))
    })?;

    Ok(ProcessRecord {
        pid,
        config: ProcessConfig::new(command, signal),
    })
}
