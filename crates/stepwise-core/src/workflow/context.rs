//! The capability handed to a workflow body.
//!
//! `WorkflowContext` is how a body performs durable work: [`WorkflowContext::rpc`]
//! and [`WorkflowContext::step`] run memoized, retried steps,
//! [`WorkflowContext::sleep`] suspends durably and [`WorkflowContext::cancel`]
//! ends the run. Bodies are replayed from the top after a restart, so they
//! must not perform side effects outside these calls.

use std::collections::HashSet;
use std::convert::Infallible;
use std::future::Future;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use serde_json::Value;
use stepwise_types::duration::DurationLiteral;
use stepwise_types::workflow::{ErrorInfo, RetryPolicy, RunStatus, WorkflowRun};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use super::checkpoint::{CheckpointError, CheckpointManager};
use super::step_runner::{self, StepScope};
use super::target::{InlineTarget, TargetError, TargetRegistry};
use crate::repository::boxed::BoxWorkflowRepository;

/// Checkpoint manager over the type-erased store the engine runs on.
pub type EngineCheckpoints = CheckpointManager<BoxWorkflowRepository>;

// ---------------------------------------------------------------------------
// WorkflowInterrupt
// ---------------------------------------------------------------------------

/// Why a workflow body stopped before returning a value.
///
/// Bodies propagate these with `?`; the run controller maps each variant to
/// the run's terminal status.
#[derive(Debug, Clone, thiserror::Error)]
pub enum WorkflowInterrupt {
    /// A step exhausted its retry budget. `message` is the last attempt's error.
    #[error("{message}")]
    StepFailed {
        step_name: String,
        attempts: u32,
        message: String,
    },

    /// The body cancelled the run.
    #[error("{reason}")]
    Cancelled { reason: String },

    /// The run is already terminal (cancelled from outside, or finished by a
    /// sibling branch); nothing more may be recorded.
    #[error("run is already terminal")]
    RunTerminal,

    #[error("duplicate step name '{0}' in one run")]
    DuplicateStepName(String),

    #[error("unknown step target '{0}'")]
    UnknownTarget(String),

    #[error("invalid duration for step '{step_name}': {message}")]
    InvalidDuration { step_name: String, message: String },

    #[error(transparent)]
    Checkpoint(#[from] CheckpointError),

    /// Any other failure raised by the body itself.
    #[error("{0}")]
    Body(String),
}

impl WorkflowInterrupt {
    pub fn body(message: impl Into<String>) -> Self {
        Self::Body(message.into())
    }
}

// ---------------------------------------------------------------------------
// WorkflowContext
// ---------------------------------------------------------------------------

/// Step-invocation capability for one execution pass of one run.
///
/// Cheap to clone; clones share the run, the stores and the set of step
/// names already used in this pass.
#[derive(Clone)]
pub struct WorkflowContext {
    inner: Arc<ContextInner>,
}

struct ContextInner {
    run_id: Uuid,
    workflow_name: String,
    checkpoints: Arc<EngineCheckpoints>,
    targets: Arc<TargetRegistry>,
    cancel: CancellationToken,
    seen: Mutex<HashSet<String>>,
}

impl WorkflowContext {
    pub(crate) fn new(
        run: &WorkflowRun,
        checkpoints: Arc<EngineCheckpoints>,
        targets: Arc<TargetRegistry>,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            inner: Arc::new(ContextInner {
                run_id: run.id,
                workflow_name: run.workflow_name.clone(),
                checkpoints,
                targets,
                cancel,
                seen: Mutex::new(HashSet::new()),
            }),
        }
    }

    pub fn run_id(&self) -> Uuid {
        self.inner.run_id
    }

    pub fn workflow_name(&self) -> &str {
        &self.inner.workflow_name
    }

    /// True once the run has been cancelled or otherwise finished.
    pub fn is_cancelled(&self) -> bool {
        self.inner.cancel.is_cancelled()
    }

    /// Whether `name` resolves to a registered target.
    pub fn has_target(&self, name: &str) -> bool {
        self.inner.targets.contains(name)
    }

    /// Invoke the registered target `target` as step `step_name`.
    pub async fn rpc(
        &self,
        step_name: impl Into<String>,
        target: &str,
        args: Value,
        retry: Option<RetryPolicy>,
    ) -> Result<Value, WorkflowInterrupt> {
        let step_name = step_name.into();
        self.claim(&step_name)?;

        let handler = self
            .inner
            .targets
            .get(target)
            .ok_or_else(|| WorkflowInterrupt::UnknownTarget(target.to_string()))?;

        step_runner::run_step(&self.scope(), &step_name, handler.as_ref(), args, retry.as_ref())
            .await
    }

    /// Run an inline closure as step `step_name`.
    ///
    /// The closure may be called once per attempt.
    pub async fn step<F, Fut>(
        &self,
        step_name: impl Into<String>,
        f: F,
        retry: Option<RetryPolicy>,
    ) -> Result<Value, WorkflowInterrupt>
    where
        F: Fn() -> Fut + Send + Sync,
        Fut: Future<Output = Result<Value, TargetError>> + Send,
    {
        let step_name = step_name.into();
        self.claim(&step_name)?;

        let target = InlineTarget::new(f);
        step_runner::run_step(&self.scope(), &step_name, &target, Value::Null, retry.as_ref())
            .await
    }

    /// Durable sleep for a duration literal such as `"5s"` or `"250ms"`.
    pub async fn sleep(
        &self,
        step_name: impl Into<String>,
        duration: &str,
    ) -> Result<(), WorkflowInterrupt> {
        let step_name = step_name.into();
        let literal: DurationLiteral =
            duration
                .parse()
                .map_err(|e: stepwise_types::duration::DurationParseError| {
                    WorkflowInterrupt::InvalidDuration {
                        step_name: step_name.clone(),
                        message: e.to_string(),
                    }
                })?;
        self.claim(&step_name)?;

        step_runner::run_sleep(&self.scope(), &step_name, literal.to_duration(), &literal.to_string())
            .await
    }

    /// Durable sleep for a `std::time::Duration`.
    pub async fn sleep_for(
        &self,
        step_name: impl Into<String>,
        duration: Duration,
    ) -> Result<(), WorkflowInterrupt> {
        let step_name = step_name.into();
        self.claim(&step_name)?;

        let literal = format!("{}ms", duration.as_millis());
        step_runner::run_sleep(&self.scope(), &step_name, duration, &literal).await
    }

    /// Cancel the run. Never returns control to the body.
    ///
    /// The run becomes `cancelled` with `reason` as its error. If the run was
    /// already terminal, the earlier outcome stands and `RunTerminal` is
    /// returned instead.
    pub async fn cancel(&self, reason: impl Into<String>) -> Result<Infallible, WorkflowInterrupt> {
        let reason = reason.into();
        let error = ErrorInfo::new(reason.clone());
        let changed = self
            .inner
            .checkpoints
            .finish_run(self.inner.run_id, RunStatus::Cancelled, None, Some(&error))
            .await?;
        self.inner.cancel.cancel();

        if changed {
            tracing::info!(run_id = %self.inner.run_id, reason = %reason, "run cancelled by workflow");
            Err(WorkflowInterrupt::Cancelled { reason })
        } else {
            Err(WorkflowInterrupt::RunTerminal)
        }
    }

    fn scope(&self) -> StepScope<'_, BoxWorkflowRepository> {
        StepScope {
            run_id: self.inner.run_id,
            checkpoints: &self.inner.checkpoints,
            cancel: &self.inner.cancel,
        }
    }

    /// Reserve a step name for this pass.
    fn claim(&self, step_name: &str) -> Result<(), WorkflowInterrupt> {
        let mut seen = self
            .inner
            .seen
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        if seen.insert(step_name.to_string()) {
            Ok(())
        } else {
            Err(WorkflowInterrupt::DuplicateStepName(step_name.to_string()))
        }
    }
}

impl std::fmt::Debug for WorkflowContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkflowContext")
            .field("run_id", &self.inner.run_id)
            .field("workflow_name", &self.inner.workflow_name)
            .finish()
    }
}

// ---------------------------------------------------------------------------
// Structured fan-out
// ---------------------------------------------------------------------------

/// Await every branch, then return all results in input order.
///
/// A failing branch does not stop its siblings; once all have settled the
/// first error (in input order) is returned.
pub async fn join_all<T, I, Fut>(branches: I) -> Result<Vec<T>, WorkflowInterrupt>
where
    I: IntoIterator<Item = Fut>,
    Fut: Future<Output = Result<T, WorkflowInterrupt>>,
{
    futures_util::future::join_all(branches)
        .await
        .into_iter()
        .collect()
}
