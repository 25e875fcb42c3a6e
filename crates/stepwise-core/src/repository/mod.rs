//! Repository trait definitions (ports) and in-process implementations.
//!
//! The infrastructure layer (stepwise-infra) implements [`WorkflowRepository`]
//! against SQLite. The core crate never depends on any specific storage
//! technology.

pub mod boxed;
pub mod memory;
pub mod workflow;

pub use boxed::BoxWorkflowRepository;
pub use memory::InMemoryWorkflowRepository;
pub use workflow::WorkflowRepository;
