use rusqlite;
use std::io;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum FederationError {
    #[error("SQLite error: {0}")]
    StorageError(#[from] rusqlite::Error),
    #[error("I/O error: {0}")]
    IoError(#[from] io::Error),
    #[error("Serialization error: {0}")]
    SerdeError(#[from] serde_json::Error),
    #[error("Config error: {0}")]
    ConfigError(String),
    #[error("Not found: {0}")]
    NotFound(String),
    #[error("Duplicate identifier: {0}")]
    DuplicateId(String),
    #[error("Repository '{repo_id}' is incompatible: {message}")]
    Incompatible { repo_id: String, message: String },
    #[error("Repository '{repo_id}' needs migration: {message}")]
    NeedsMigration { repo_id: String, message: String },
    #[error("Remote server '{server}' unreachable: {message}")]
    ConnectivityError { server: String, message: String },
    #[error("Remote server '{server}' returned {status} ({code}): {message}")]
    RemoteError {
        server: String,
        status: u16,
        code: String,
        message: String,
    },
    #[error("Environment variable '{0}' referenced by credential is not set")]
    MissingEnvVar(String),
    #[error("Validation error: {0}")]
    ValidationError(String),
    #[error("Cancelled: {0}")]
    Cancelled(String),
}

impl FederationError {
    pub fn not_found(kind: &str, name: &str) -> Self {
        FederationError::NotFound(format!("{} '{}'", kind, name))
    }

    pub fn duplicate(kind: &str, name: &str) -> Self {
        FederationError::DuplicateId(format!("{} '{}' already exists", kind, name))
    }
}

impl From<toml::de::Error> for FederationError {
    fn from(err: toml::de::Error) -> Self {
        FederationError::ConfigError(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, FederationError>;
