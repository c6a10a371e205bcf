//! Store abstraction: the home directory that holds every federation.
//!
//! Layout:
//!
//! ```text
//! <root>/config.toml                       engine configuration (optional)
//! <root>/federations/<name>/index.db       federation store (SQLite, WAL)
//! <root>/federations/<name>/federation.events.jsonl   mutation audit log
//! ```

use crate::core::schemas;
use std::path::PathBuf;

/// Store handle. Every core operation receives it explicitly; nothing in the
/// library resolves the home directory from the process environment.
#[derive(Debug, Clone)]
pub struct Store {
    /// Absolute path to the store root directory
    pub root: PathBuf,
}

impl Store {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn config_path(&self) -> PathBuf {
        self.root.join(schemas::CONFIG_FILE_NAME)
    }

    pub fn federations_dir(&self) -> PathBuf {
        self.root.join(schemas::FEDERATIONS_DIR_NAME)
    }

    pub fn federation_dir(&self, name: &str) -> PathBuf {
        self.federations_dir().join(name)
    }

    pub fn federation_db_path(&self, name: &str) -> PathBuf {
        self.federation_dir(name).join(schemas::FEDERATION_DB_NAME)
    }

    pub fn federation_events_path(&self, name: &str) -> PathBuf {
        self.federation_dir(name).join(schemas::FEDERATION_EVENTS_NAME)
    }

    pub fn federation_exists(&self, name: &str) -> bool {
        self.federation_db_path(name).is_file()
    }
}

