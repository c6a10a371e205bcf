use crate::core::error::FederationError;
use crate::core::pool;
use crate::core::store::Store;
use crate::core::time;
use rusqlite::Connection;
use serde::{Deserialize, Serialize};
use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};
use tracing::warn;

/// The DB Broker is the single door into a federation database.
///
/// Mutations are serialized through the pool's per-database write lock and
/// recorded in the federation's append-only audit log. Reads bypass the lock.
#[derive(Debug, Clone)]
pub struct DbBroker {
    federation: String,
    db_path: PathBuf,
    audit_log_path: PathBuf,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct BrokerEvent {
    pub ts: String,
    pub event_id: String,
    pub actor: String,
    pub op: String,
    pub db_id: String,
    pub status: String,
}

impl DbBroker {
    pub fn new(store: &Store, federation: &str) -> Self {
        Self {
            federation: federation.to_string(),
            db_path: store.federation_db_path(federation),
            audit_log_path: store.federation_events_path(federation),
        }
    }

    pub fn federation(&self) -> &str {
        &self.federation
    }

    pub fn db_path(&self) -> &Path {
        &self.db_path
    }

    /// Run a mutation inside the federation's exclusive section.
    ///
    /// The audit line is appended before the section is released, so
    /// concurrent writers never interleave in the log. A failed append is
    /// reported but does not undo or fail a committed mutation.
    pub fn with_write<F, R>(&self, actor: &str, op: &str, f: F) -> Result<R, FederationError>
    where
        F: FnOnce(&Connection) -> Result<R, FederationError>,
    {
        pool::global_pool().with_exclusive(&self.db_path, || {
            let result = pool::open_write(&self.db_path).and_then(|conn| f(&conn));
            let status = if result.is_ok() { "success" } else { "error" };
            if let Err(e) = self.log_event(actor, op, status) {
                warn!(federation = %self.federation, op, error = %e, "failed to append audit event");
            }
            Ok(result)
        })?
    }

    /// Snapshot read; never waits on a writer.
    pub fn with_read<F, R>(&self, f: F) -> Result<R, FederationError>
    where
        F: FnOnce(&Connection) -> Result<R, FederationError>,
    {
        pool::global_pool().with_read(&self.db_path, f)
    }

    fn log_event(&self, actor: &str, op: &str, status: &str) -> Result<(), FederationError> {
        let ev = BrokerEvent {
            ts: time::now_epoch_z(),
            event_id: time::new_event_id(),
            actor: actor.to_string(),
            op: op.to_string(),
            db_id: self.federation.clone(),
            status: status.to_string(),
        };

        let line = format!("{}\n", serde_json::to_string(&ev)?);
        let mut f = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.audit_log_path)?;
        f.write_all(line.as_bytes())?;
        Ok(())
    }
}

/// Read back the audit log, oldest first. A missing log is empty.
pub fn read_audit_log(store: &Store, federation: &str) -> Result<Vec<BrokerEvent>, FederationError> {
    let path = store.federation_events_path(federation);
    if !path.exists() {
        return Ok(Vec::new());
    }
    let raw = std::fs::read_to_string(path)?;
    raw.lines()
        .filter(|l| !l.trim().is_empty())
        .map(|l| serde_json::from_str(l).map_err(FederationError::from))
        .collect()
}
