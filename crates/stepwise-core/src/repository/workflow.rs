//! Workflow repository trait definition.
//!
//! Defines the storage interface for the Run Registry (one row per run) and
//! the Run History Store (one record per step attempt). The infrastructure
//! layer (stepwise-infra) implements this trait with SQLite persistence;
//! [`super::memory::InMemoryWorkflowRepository`] is the in-process version.
//!
//! Terminal-state guards live in the store so that concurrent writers for the
//! same run resolve to exactly one outcome. The terminal write also closes any
//! step record still `running`, and after it the run row and its step records
//! never change again.

use stepwise_types::error::RepositoryError;
use stepwise_types::workflow::{ErrorInfo, RunStatus, StepRecord, StepStatus, WorkflowRun};
use uuid::Uuid;

/// Error message recorded on a step that was still running when its run
/// reached a terminal status.
pub fn unfinished_step_reason(run_error: Option<&ErrorInfo>) -> &str {
    run_error.map_or("run finished while step was running", |e| e.message.as_str())
}

/// Repository trait for run and step-history persistence.
///
/// Uses native async fn in traits (Rust 2024 edition, no async_trait macro).
pub trait WorkflowRepository: Send + Sync {
    // -----------------------------------------------------------------------
    // Runs
    // -----------------------------------------------------------------------

    /// Insert a new run. Fails with `Conflict` if the id already exists.
    fn create_run(
        &self,
        run: &WorkflowRun,
    ) -> impl std::future::Future<Output = Result<(), RepositoryError>> + Send;

    /// Transition a `pending` run to `running`. Returns `false` if the run was
    /// not pending.
    fn mark_running(
        &self,
        run_id: &Uuid,
    ) -> impl std::future::Future<Output = Result<bool, RepositoryError>> + Send;

    /// Move a non-terminal run to a terminal status, stamping `finished_at`.
    ///
    /// In the same atomic write, every `running` step record of the run is
    /// closed as `failed` with [`unfinished_step_reason`].
    ///
    /// Returns `false` (and changes nothing) if the run was already terminal.
    /// Returns `NotFound` if the run does not exist.
    fn finish_run(
        &self,
        run_id: &Uuid,
        status: RunStatus,
        output: Option<&serde_json::Value>,
        error: Option<&ErrorInfo>,
    ) -> impl std::future::Future<Output = Result<bool, RepositoryError>> + Send;

    /// Get a run by its UUID.
    fn get_run(
        &self,
        run_id: &Uuid,
    ) -> impl std::future::Future<Output = Result<Option<WorkflowRun>, RepositoryError>> + Send;

    /// List runs, newest first, optionally filtered by workflow name.
    fn list_runs(
        &self,
        workflow_name: Option<&str>,
        limit: u32,
    ) -> impl std::future::Future<Output = Result<Vec<WorkflowRun>, RepositoryError>> + Send;

    /// List `pending` and `running` runs, oldest first (for recovery).
    fn list_unfinished_runs(
        &self,
    ) -> impl std::future::Future<Output = Result<Vec<WorkflowRun>, RepositoryError>> + Send;

    // -----------------------------------------------------------------------
    // Step history
    // -----------------------------------------------------------------------

    /// Append a step record. Returns `false` (and appends nothing) if the run
    /// is terminal. Returns `NotFound` if the run does not exist.
    fn append_step(
        &self,
        step: &StepRecord,
    ) -> impl std::future::Future<Output = Result<bool, RepositoryError>> + Send;

    /// Close a `running` step record as succeeded or failed.
    ///
    /// Returns `false` if the record was not running or its run is terminal.
    fn complete_step(
        &self,
        step_id: &Uuid,
        status: StepStatus,
        result: Option<&serde_json::Value>,
        error: Option<&ErrorInfo>,
    ) -> impl std::future::Future<Output = Result<bool, RepositoryError>> + Send;

    /// All step records of a run in start order.
    fn list_steps(
        &self,
        run_id: &Uuid,
    ) -> impl std::future::Future<Output = Result<Vec<StepRecord>, RepositoryError>> + Send;

    /// All attempts recorded under one step name, oldest first.
    fn list_step_attempts(
        &self,
        run_id: &Uuid,
        step_name: &str,
    ) -> impl std::future::Future<Output = Result<Vec<StepRecord>, RepositoryError>> + Send;
}
