//! Durable workflow engine.
//!
//! - `executor` -- run controller: start, drive, resume, cancel, queries
//! - `context` -- step-invocation capability handed to workflow bodies
//! - `step_runner` -- memoized step execution with retries and durable sleeps
//! - `checkpoint` -- writes to the run registry and history store, plus events
//! - `retry` -- retry policy evaluator
//! - `target` -- named step targets
//! - `definition` -- workflow registry, simple-DSL parsing and loading
//! - `validator` -- registration-time checks for simple workflows
//! - `interpreter` -- executes simple workflows
//! - `expression` -- JEXL evaluator for simple-workflow expressions
//! - `poll` -- caller-side wait for a terminal run

pub mod checkpoint;
pub mod context;
pub mod definition;
pub mod executor;
pub mod expression;
mod interpreter;
pub mod poll;
pub mod retry;
mod step_runner;
pub mod target;
pub mod validator;

pub use context::{WorkflowContext, WorkflowInterrupt, join_all};
pub use definition::{WorkflowError, WorkflowRegistry};
pub use executor::{ExecutorError, RunController};
pub use poll::{PollError, PollOptions};
pub use step_runner::INTERRUPTED_ATTEMPT_MESSAGE;
pub use target::{StepInvocation, TargetError, TargetRegistry};
