//! Federation subsystems.
//!
//! - `federation`: federation lifecycle, repository and remote server registry
//! - `index`: aggregated cross-repository index (atomic replace, filtered reads)
//! - `analysis`: per-repository analysis engine interface and SQLite reader
//! - `compat`: analysis schema compatibility checks
//! - `sync`: local repository sync engine
//! - `remote`: remote index server client and cache
//! - `hybrid`: federated queries over local and cached remote data
//! - `staleness`: freshness classification
//! - `contracts`: protobuf and OpenAPI contracts found during sync, and their consumers

pub mod analysis;
pub mod compat;
pub mod contracts;
pub mod federation;
pub mod hybrid;
pub mod index;
pub mod remote;
pub mod staleness;
pub mod sync;
