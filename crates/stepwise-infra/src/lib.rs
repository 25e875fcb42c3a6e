//! Infrastructure layer for Stepwise.
//!
//! Contains implementations of the repository traits defined in `stepwise-core`
//! (SQLite storage with WAL mode and migrations) and the config file loader.

pub mod config;
pub mod sqlite;
