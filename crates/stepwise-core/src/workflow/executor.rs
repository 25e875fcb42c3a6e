//! Run controller: starts, drives, resumes and cancels workflow runs.
//!
//! Each run is driven on its own tokio task. A pass calls the workflow body
//! with a fresh [`WorkflowContext`]; steps that already succeeded in an earlier
//! pass are served from the history store, so resuming a run after a restart
//! is simply another pass over the same run id.
//!
//! # Run lifecycle
//!
//! 1. `start` persists the run as `pending` and spawns the driver.
//! 2. The driver marks the run `running` and calls the body.
//! 3. The body's result decides the terminal status:
//!    `Ok` -> `completed`, exhausted retries -> `failed`, `cancel` -> `cancelled`.
//! 4. Terminal guards in the store make the first terminal write win.

use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use futures_util::FutureExt;
use serde_json::Value;
use stepwise_types::error::RepositoryError;
use stepwise_types::event::RunEvent;
use stepwise_types::workflow::{ErrorInfo, RunReport, RunStatus, StepRecord, WorkflowRun};
use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use super::checkpoint::{CheckpointError, CheckpointManager};
use super::context::{EngineCheckpoints, WorkflowContext, WorkflowInterrupt};
use super::definition::{WorkflowBody, WorkflowRegistry};
use super::target::TargetRegistry;
use crate::event::EventBus;
use crate::repository::boxed::BoxWorkflowRepository;
use crate::repository::workflow::WorkflowRepository;

/// Error recorded when a workflow body panics.
pub const PANIC_MESSAGE: &str = "workflow body panicked";

// ---------------------------------------------------------------------------
// Error type
// ---------------------------------------------------------------------------

#[derive(Debug, thiserror::Error)]
pub enum ExecutorError {
    #[error("workflow not found: {0}")]
    UnknownWorkflow(String),

    /// Distinct from every run status: the id was never recorded.
    #[error("workflow run not found: {0}")]
    RunNotFound(Uuid),

    #[error("workflow run {0} is already terminal")]
    RunTerminal(Uuid),

    #[error("repository error: {0}")]
    Repository(String),
}

impl From<CheckpointError> for ExecutorError {
    fn from(e: CheckpointError) -> Self {
        match e {
            CheckpointError::RunNotFound(id) => Self::RunNotFound(id),
            CheckpointError::RunTerminal(id) => Self::RunTerminal(id),
            CheckpointError::Repository(msg) => Self::Repository(msg),
        }
    }
}

impl From<RepositoryError> for ExecutorError {
    fn from(e: RepositoryError) -> Self {
        Self::Repository(e.to_string())
    }
}

// ---------------------------------------------------------------------------
// RunController
// ---------------------------------------------------------------------------

/// Entry point for running workflows. Cheap to clone.
#[derive(Clone)]
pub struct RunController {
    inner: Arc<ControllerInner>,
}

struct ControllerInner {
    checkpoints: Arc<EngineCheckpoints>,
    workflows: Arc<WorkflowRegistry>,
    targets: Arc<TargetRegistry>,
    /// Cancellation tokens of runs currently driven by this process.
    active: DashMap<Uuid, CancellationToken>,
}

impl RunController {
    pub fn new(
        repo: BoxWorkflowRepository,
        workflows: WorkflowRegistry,
        targets: TargetRegistry,
        events: EventBus,
    ) -> Self {
        Self {
            inner: Arc::new(ControllerInner {
                checkpoints: Arc::new(CheckpointManager::new(repo, events)),
                workflows: Arc::new(workflows),
                targets: Arc::new(targets),
                active: DashMap::new(),
            }),
        }
    }

    pub fn workflows(&self) -> &WorkflowRegistry {
        &self.inner.workflows
    }

    pub fn targets(&self) -> &TargetRegistry {
        &self.inner.targets
    }

    /// Receive lifecycle events for every run.
    pub fn subscribe(&self) -> broadcast::Receiver<RunEvent> {
        self.inner.checkpoints.events().subscribe()
    }

    /// Whether this process is currently driving `run_id`.
    pub fn is_active(&self, run_id: Uuid) -> bool {
        self.inner.active.contains_key(&run_id)
    }

    /// Start a new run of `workflow_name` and return its id immediately.
    pub async fn start(&self, workflow_name: &str, input: Value) -> Result<Uuid, ExecutorError> {
        let body = self.body_for(workflow_name)?;

        let run = WorkflowRun::pending(workflow_name, input);
        self.inner.checkpoints.create_run(&run).await?;
        tracing::info!(run_id = %run.id, workflow = workflow_name, "workflow run started");

        let run_id = run.id;
        if let Some(token) = self.claim(run_id) {
            self.spawn(run, body, token);
        }
        Ok(run_id)
    }

    /// Drive a non-terminal run again from the top of its body.
    pub async fn resume(&self, run_id: Uuid) -> Result<(), ExecutorError> {
        let run = self.inner.checkpoints.load_run(run_id).await?;
        if run.status.is_terminal() {
            return Err(ExecutorError::RunTerminal(run_id));
        }

        let body = self.body_for(&run.workflow_name)?;
        let Some(token) = self.claim(run_id) else {
            tracing::debug!(run_id = %run_id, "run already driven, resume ignored");
            return Ok(());
        };
        tracing::info!(run_id = %run_id, workflow = %run.workflow_name, status = %run.status, "resuming workflow run");
        self.inner.checkpoints.events().publish(RunEvent::RunResumed {
            run_id,
            workflow_name: run.workflow_name.clone(),
        });
        self.spawn(run, body, token);
        Ok(())
    }

    /// Resume every pending or running run found in the store.
    ///
    /// Returns how many runs were resumed. Runs whose workflow is no longer
    /// registered are marked failed.
    pub async fn recover_unfinished(&self) -> Result<usize, ExecutorError> {
        let runs = self.inner.checkpoints.repo().list_unfinished_runs().await?;
        let mut resumed = 0;

        for run in runs {
            match self.resume(run.id).await {
                Ok(()) => resumed += 1,
                Err(ExecutorError::UnknownWorkflow(name)) => {
                    tracing::warn!(run_id = %run.id, workflow = %name, "workflow no longer registered, failing run");
                    let error = ErrorInfo::new(format!("workflow not found: {name}"));
                    self.inner
                        .checkpoints
                        .finish_run(run.id, RunStatus::Failed, None, Some(&error))
                        .await?;
                }
                Err(e) => tracing::warn!(run_id = %run.id, error = %e, "failed to resume run"),
            }
        }

        if resumed > 0 {
            tracing::info!(count = resumed, "recovered unfinished workflow runs");
        }
        Ok(resumed)
    }

    /// Cancel a run from outside its body.
    ///
    /// Steps already dispatched may finish; nothing new starts. Fails with
    /// `RunTerminal` if the run had already finished.
    pub async fn cancel(&self, run_id: Uuid, reason: &str) -> Result<WorkflowRun, ExecutorError> {
        self.inner.checkpoints.load_run(run_id).await?;

        let error = ErrorInfo::new(reason);
        let changed = self
            .inner
            .checkpoints
            .finish_run(run_id, RunStatus::Cancelled, None, Some(&error))
            .await?;
        if !changed {
            return Err(ExecutorError::RunTerminal(run_id));
        }

        if let Some(token) = self.inner.active.get(&run_id) {
            token.cancel();
        }
        tracing::info!(run_id = %run_id, reason, "workflow run cancelled");
        Ok(self.inner.checkpoints.load_run(run_id).await?)
    }

    // -----------------------------------------------------------------------
    // Queries
    // -----------------------------------------------------------------------

    pub async fn get_run(&self, run_id: Uuid) -> Result<WorkflowRun, ExecutorError> {
        Ok(self.inner.checkpoints.load_run(run_id).await?)
    }

    /// Every step attempt of the run, in the order they were recorded.
    pub async fn get_run_history(&self, run_id: Uuid) -> Result<Vec<StepRecord>, ExecutorError> {
        self.inner.checkpoints.load_run(run_id).await?;
        Ok(self.inner.checkpoints.repo().list_steps(&run_id).await?)
    }

    /// Run plus step history in the caller-facing report shape.
    pub async fn report(&self, run_id: Uuid) -> Result<RunReport, ExecutorError> {
        let run = self.get_run(run_id).await?;
        let steps = self.inner.checkpoints.repo().list_steps(&run_id).await?;
        Ok(RunReport::new(run, &steps))
    }

    /// Most recent runs first.
    pub async fn list_runs(
        &self,
        workflow_name: Option<&str>,
        limit: u32,
    ) -> Result<Vec<WorkflowRun>, ExecutorError> {
        Ok(self
            .inner
            .checkpoints
            .repo()
            .list_runs(workflow_name, limit)
            .await?)
    }

    // -----------------------------------------------------------------------
    // Driving
    // -----------------------------------------------------------------------

    fn body_for(&self, workflow_name: &str) -> Result<WorkflowBody, ExecutorError> {
        self.inner
            .workflows
            .get(workflow_name)
            .map(|entry| Arc::clone(&entry.body))
            .ok_or_else(|| ExecutorError::UnknownWorkflow(workflow_name.to_string()))
    }

    /// Reserve the driver slot for `run_id`. `None` if another task holds it.
    fn claim(&self, run_id: Uuid) -> Option<CancellationToken> {
        match self.inner.active.entry(run_id) {
            Entry::Occupied(_) => None,
            Entry::Vacant(slot) => {
                let token = CancellationToken::new();
                slot.insert(token.clone());
                Some(token)
            }
        }
    }

    fn spawn(&self, run: WorkflowRun, body: WorkflowBody, token: CancellationToken) {
        let controller = self.clone();
        tokio::spawn(async move {
            let run_id = run.id;
            controller.drive(run, body, token).await;
            controller.inner.active.remove(&run_id);
        });
    }

    async fn drive(&self, run: WorkflowRun, body: WorkflowBody, token: CancellationToken) {
        let checkpoints = &self.inner.checkpoints;

        if run.status == RunStatus::Pending {
            match checkpoints.mark_running(&run).await {
                Ok(true) => {}
                Ok(false) => {
                    tracing::debug!(run_id = %run.id, "run left pending before it started");
                    return;
                }
                Err(e) => {
                    tracing::error!(run_id = %run.id, error = %e, "failed to mark run running");
                    return;
                }
            }
        }

        let ctx = WorkflowContext::new(
            &run,
            Arc::clone(checkpoints),
            Arc::clone(&self.inner.targets),
            token,
        );
        let outcome = AssertUnwindSafe(body(ctx, run.input.clone()))
            .catch_unwind()
            .await;

        let (status, output, error) = match outcome {
            Ok(Ok(output)) => (RunStatus::Completed, Some(output), None),
            Ok(Err(WorkflowInterrupt::StepFailed {
                step_name,
                attempts,
                message,
            })) => {
                tracing::warn!(run_id = %run.id, step = %step_name, attempts, error = %message, "step exhausted its retries");
                (RunStatus::Failed, None, Some(message))
            }
            Ok(Err(WorkflowInterrupt::Cancelled { reason })) => {
                (RunStatus::Cancelled, None, Some(reason))
            }
            Ok(Err(WorkflowInterrupt::RunTerminal)) => {
                tracing::debug!(run_id = %run.id, "run finished elsewhere, pass stopped");
                return;
            }
            Ok(Err(other)) => {
                tracing::warn!(run_id = %run.id, error = %other, "workflow body failed");
                (RunStatus::Failed, None, Some(other.to_string()))
            }
            Err(_) => {
                tracing::error!(run_id = %run.id, "workflow body panicked");
                (RunStatus::Failed, None, Some(PANIC_MESSAGE.to_string()))
            }
        };

        let error = error.map(ErrorInfo::new);
        match checkpoints
            .finish_run(run.id, status, output.as_ref(), error.as_ref())
            .await
        {
            Ok(true) => tracing::info!(run_id = %run.id, status = %status, "workflow run finished"),
            Ok(false) => {}
            Err(e) => tracing::error!(run_id = %run.id, error = %e, "failed to record run outcome"),
        }
    }
}

impl std::fmt::Debug for RunController {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RunController")
            .field("workflows", &self.inner.workflows)
            .field("targets", &self.inner.targets)
            .field("active_runs", &self.inner.active.len())
            .finish()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
