//! Core modules shared by every fedindex subsystem.
//!
//! Storage primitives (connections, the write pool, the audit broker), the
//! error type, configuration and logging live here. Subsystems in
//! [`crate::plugins`] build on these and never open connections themselves.

pub mod broker;
pub mod config;
pub mod db;
pub mod error;
pub mod logging;
pub mod pool;
pub mod schemas;
pub mod store;
pub mod time;
