//! SQLite connection pool with read/write separation and retry logic.
//!
//! Each federation database gets one **write mutex**: every mutation of a
//! federation (repo/server CRUD, index replacement) runs inside it, so two
//! partial replacements can never interleave. Reads open a fresh connection
//! per operation and never take the mutex; WAL mode gives each reader a
//! consistent snapshot while a writer is active.
//!
//! Connections are NOT pooled (opened fresh each time) so that a federation
//! directory can be deleted without dangling file handles.

use crate::core::db;
use crate::core::error::FederationError;
use rusqlite::Connection;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard, OnceLock};
use std::thread;
use std::time::Duration;

/// Maximum retry attempts for busy/locked errors.
const MAX_RETRIES: u32 = 5;
/// Base delay for exponential backoff (milliseconds).
const BASE_DELAY_MS: u64 = 50;
/// Maximum delay cap (milliseconds).
const MAX_DELAY_MS: u64 = 2_000;

/// Write connection busy_timeout in seconds.
const WRITE_BUSY_TIMEOUT_SECS: u32 = 5;
/// Read connection busy_timeout in seconds.
const READ_BUSY_TIMEOUT_SECS: u32 = 5;

/// Connection pool providing read/write separation per SQLite database.
pub struct SqlitePool {
    write_locks: Mutex<HashMap<PathBuf, Arc<Mutex<()>>>>,
}

impl SqlitePool {
    fn new() -> Self {
        Self {
            write_locks: Mutex::new(HashMap::new()),
        }
    }

    fn write_lock(&self, db_path: &Path) -> Result<Arc<Mutex<()>>, FederationError> {
        let mut locks = self.write_locks.lock().map_err(|_| {
            FederationError::ValidationError("SqlitePool lock table poisoned".to_string())
        })?;
        Ok(locks
            .entry(db_path.to_path_buf())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone())
    }

    /// Hold the per-database exclusive section.
    ///
    /// Mutations open their connection inside it with [`open_write`];
    /// operations on the database file itself (delete) open none.
    pub fn with_exclusive<F, R>(&self, db_path: &Path, f: F) -> Result<R, FederationError>
    where
        F: FnOnce() -> Result<R, FederationError>,
    {
        let lock = self.write_lock(db_path)?;
        let _guard = acquire(&lock)?;
        f()
    }

    /// Execute a closure with a read connection (no mutex serialization).
    pub fn with_read<F, R>(&self, db_path: &Path, f: F) -> Result<R, FederationError>
    where
        F: FnOnce(&Connection) -> Result<R, FederationError>,
    {
        let conn = retry_on_busy(|| db::db_connect(db_path, READ_BUSY_TIMEOUT_SECS))?;

        f(&conn)
    }
}

/// Open a write connection, retrying busy errors caused by other processes.
///
/// Callers must already hold the database's exclusive section.
pub fn open_write(db_path: &Path) -> Result<Connection, FederationError> {
    retry_on_busy(|| db::db_connect(db_path, WRITE_BUSY_TIMEOUT_SECS))
}

fn acquire(lock: &Mutex<()>) -> Result<MutexGuard<'_, ()>, FederationError> {
    lock.lock()
        .map_err(|_| FederationError::ValidationError("Pool write lock poisoned".to_string()))
}

/// Retry a closure on `SQLITE_BUSY` / `DatabaseBusy` with exponential backoff.
fn retry_on_busy<F, R>(mut f: F) -> Result<R, FederationError>
where
    F: FnMut() -> Result<R, FederationError>,
{
    let mut attempt = 0u32;
    loop {
        match f() {
            Ok(v) => return Ok(v),
            Err(e) if is_busy_error(&e) && attempt < MAX_RETRIES => {
                attempt += 1;
                let delay_ms = (BASE_DELAY_MS * 2u64.pow(attempt - 1)).min(MAX_DELAY_MS);
                thread::sleep(Duration::from_millis(delay_ms));
            }
            Err(e) => return Err(e),
        }
    }
}

/// Check if an error is a SQLite busy/locked error that is retryable.
fn is_busy_error(err: &FederationError) -> bool {
    match err {
        FederationError::StorageError(rusqlite::Error::SqliteFailure(code, _)) => matches!(
            code.code,
            rusqlite::ErrorCode::DatabaseBusy | rusqlite::ErrorCode::DatabaseLocked
        ),
        _ => false,
    }
}

/// Global pool instance (same lifetime as the process).
pub fn global_pool() -> &'static SqlitePool {
    static POOL: OnceLock<SqlitePool> = OnceLock::new();
    POOL.get_or_init(SqlitePool::new)
}
