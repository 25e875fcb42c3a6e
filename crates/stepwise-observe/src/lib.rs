//! Observability setup for Stepwise: structured logging through
//! `tracing-subscriber`, with optional OpenTelemetry span export.

pub mod tracing_setup;

pub use tracing_setup::{TracingOptions, filter_for_verbosity, init_tracing, shutdown_tracing};
