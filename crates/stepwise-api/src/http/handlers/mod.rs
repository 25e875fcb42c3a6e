//! HTTP request handlers for the REST API.

pub mod trigger;
pub mod workflow;
