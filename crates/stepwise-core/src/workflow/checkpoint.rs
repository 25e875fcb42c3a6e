//! Durable checkpoint manager for workflow runs.
//!
//! Wraps `WorkflowRepository` with the transitions the engine performs: run
//! creation, pending -> running, step attempt start/success/failure, and the
//! single terminal transition of a run. Every transition is persisted before
//! the engine moves forward and is published on the run event bus.
//!
//! A refused write (the store reports the run is already terminal) surfaces
//! as [`CheckpointError::RunTerminal`] so callers stop driving the run.

use serde_json::Value;
use stepwise_types::event::RunEvent;
use stepwise_types::workflow::{
    ErrorInfo, RunStatus, StepKind, StepRecord, StepStatus, WorkflowRun,
};
use uuid::Uuid;

use crate::event::EventBus;
use crate::repository::workflow::WorkflowRepository;

// ---------------------------------------------------------------------------
// CheckpointManager
// ---------------------------------------------------------------------------

/// Manages durable execution checkpoints for workflow runs.
///
/// Generic over `R: WorkflowRepository` so it works with any storage backend.
pub struct CheckpointManager<R: WorkflowRepository> {
    repo: R,
    events: EventBus,
}

impl<R: WorkflowRepository> CheckpointManager<R> {
    pub fn new(repo: R, events: EventBus) -> Self {
        Self { repo, events }
    }

    /// Access the underlying repository.
    pub fn repo(&self) -> &R {
        &self.repo
    }

    pub fn events(&self) -> &EventBus {
        &self.events
    }

    // -----------------------------------------------------------------------
    // Run-level checkpoints
    // -----------------------------------------------------------------------

    /// Persist a new pending run.
    pub async fn create_run(&self, run: &WorkflowRun) -> Result<(), CheckpointError> {
        self.repo.create_run(run).await.map_err(repo_err)?;
        tracing::debug!(run_id = %run.id, workflow = %run.workflow_name, "checkpointed run created");
        Ok(())
    }

    /// Transition pending -> running. Returns `false` if the run was not pending.
    pub async fn mark_running(&self, run: &WorkflowRun) -> Result<bool, CheckpointError> {
        let changed = self.repo.mark_running(&run.id).await.map_err(repo_err)?;
        if changed {
            tracing::debug!(run_id = %run.id, "checkpointed run running");
            self.events.publish(RunEvent::RunStarted {
                run_id: run.id,
                workflow_name: run.workflow_name.clone(),
            });
        }
        Ok(changed)
    }

    /// Move the run to a terminal status.
    ///
    /// Returns `false` if another writer already finished the run; the
    /// earlier terminal state stands.
    pub async fn finish_run(
        &self,
        run_id: Uuid,
        status: RunStatus,
        output: Option<&Value>,
        error: Option<&ErrorInfo>,
    ) -> Result<bool, CheckpointError> {
        let changed = self
            .repo
            .finish_run(&run_id, status, output, error)
            .await
            .map_err(repo_err)?;

        if changed {
            tracing::debug!(run_id = %run_id, status = %status, "checkpointed run finished");
            self.events.publish(RunEvent::RunFinished {
                run_id,
                status,
                error: error.map(|e| e.message.clone()),
            });
        } else {
            tracing::debug!(run_id = %run_id, status = %status, "run already terminal, finish ignored");
        }
        Ok(changed)
    }

    /// Load a run, failing with `RunNotFound` if it does not exist.
    pub async fn load_run(&self, run_id: Uuid) -> Result<WorkflowRun, CheckpointError> {
        self.repo
            .get_run(&run_id)
            .await
            .map_err(repo_err)?
            .ok_or(CheckpointError::RunNotFound(run_id))
    }

    // -----------------------------------------------------------------------
    // Step-level checkpoints
    // -----------------------------------------------------------------------

    /// Previous attempts recorded under `step_name`, oldest first.
    pub async fn attempts(
        &self,
        run_id: Uuid,
        step_name: &str,
    ) -> Result<Vec<StepRecord>, CheckpointError> {
        self.repo
            .list_step_attempts(&run_id, step_name)
            .await
            .map_err(repo_err)
    }

    /// Record a new attempt as running.
    pub async fn step_started(
        &self,
        run_id: Uuid,
        step_name: &str,
        kind: StepKind,
        attempt: u32,
        input: Option<Value>,
    ) -> Result<StepRecord, CheckpointError> {
        let record = StepRecord::running(run_id, step_name, kind, attempt, input);
        let appended = self.repo.append_step(&record).await.map_err(repo_err)?;
        if !appended {
            return Err(CheckpointError::RunTerminal(run_id));
        }

        tracing::debug!(
            run_id = %run_id,
            step = step_name,
            attempt,
            record_id = %record.id,
            "checkpointed step start"
        );
        self.events.publish(RunEvent::StepAttemptStarted {
            run_id,
            step_name: step_name.to_string(),
            kind,
            attempt,
        });
        Ok(record)
    }

    /// Close an attempt as succeeded.
    pub async fn step_succeeded(
        &self,
        record: &StepRecord,
        result: Option<&Value>,
    ) -> Result<(), CheckpointError> {
        self.close_step(record, StepStatus::Succeeded, result, None)
            .await
    }

    /// Close an attempt as failed with `message`.
    pub async fn step_failed(
        &self,
        record: &StepRecord,
        message: &str,
    ) -> Result<(), CheckpointError> {
        let error = ErrorInfo::new(message);
        self.close_step(record, StepStatus::Failed, None, Some(&error))
            .await
    }

    async fn close_step(
        &self,
        record: &StepRecord,
        status: StepStatus,
        result: Option<&Value>,
        error: Option<&ErrorInfo>,
    ) -> Result<(), CheckpointError> {
        let closed = self
            .repo
            .complete_step(&record.id, status, result, error)
            .await
            .map_err(repo_err)?;
        if !closed {
            return Err(CheckpointError::RunTerminal(record.run_id));
        }

        tracing::debug!(
            run_id = %record.run_id,
            step = %record.step_name,
            attempt = record.attempt_count,
            status = %status,
            "checkpointed step finished"
        );
        self.events.publish(RunEvent::StepAttemptFinished {
            run_id: record.run_id,
            step_name: record.step_name.clone(),
            attempt: record.attempt_count,
            status,
            error: error.map(|e| e.message.clone()),
        });
        Ok(())
    }
}

fn repo_err(e: stepwise_types::error::RepositoryError) -> CheckpointError {
    CheckpointError::Repository(e.to_string())
}

// ---------------------------------------------------------------------------
// Error type
// ---------------------------------------------------------------------------

/// Errors that can occur during checkpoint operations.
#[derive(Debug, Clone, thiserror::Error)]
pub enum CheckpointError {
    /// Underlying repository operation failed.
    #[error("checkpoint repository error: {0}")]
    Repository(String),

    #[error("workflow run not found: {0}")]
    RunNotFound(Uuid),

    /// The run reached a terminal status; no further writes are accepted.
    #[error("workflow run {0} is already terminal")]
    RunTerminal(Uuid),
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
