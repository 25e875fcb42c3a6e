//! Shared domain types for Stepwise.
//!
//! Runs, step records, retry policies, duration literals, simple workflow
//! definitions, run events, configuration and repository errors.
//!
//! Zero infrastructure dependencies -- only serde, uuid, chrono, thiserror.

pub mod config;
pub mod duration;
pub mod error;
pub mod event;
pub mod simple;
pub mod workflow;
