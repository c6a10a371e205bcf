//! fedindex: a cross-repository federation index for code intelligence.
//!
//! A **federation** is a named set of repositories queried as one unit. Each
//! local repository carries its own analysis database (modules, ownership,
//! hotspots, architectural decisions); fedindex pulls those summaries into a
//! single per-federation index, mirrors what remote index servers expose, and
//! answers structural queries over the combined data.
//!
//! # Architecture
//!
//! ```text
//! sync (local) ──▶ federation index ◀── hybrid queries
//!                        ▲
//! remote client ─────────┘  (remote-origin rows, cached with a TTL)
//! ```
//!
//! - All mutations of a federation go through the `DbBroker`, which serializes
//!   writers per database and appends to `federation.events.jsonl`.
//! - Reads open their own WAL snapshot and never wait on a writer.
//! - Batch operations (sync all repos, sync all remotes) isolate failures per
//!   source and report them in their results.
//!
//! # Crate Structure
//!
//! - [`core`]: store layout, storage primitives, errors, config, logging
//! - [`plugins`]: federation registry, index, sync, remote, hybrid queries
//! - [`cli`]: the `fedindex` command surface

pub mod cli;
pub mod core;
pub mod plugins;

pub use cli::run;
