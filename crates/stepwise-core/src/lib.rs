//! Durable workflow engine and repository trait definitions for Stepwise.
//!
//! This crate defines the "ports" (repository traits) that the infrastructure
//! layer implements, and the engine that runs on top of them. It depends only
//! on `stepwise-types` -- never on `stepwise-infra` or any database crate.

pub mod event;
pub mod repository;
pub mod workflow;
