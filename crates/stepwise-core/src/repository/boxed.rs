//! BoxWorkflowRepository -- object-safe dynamic dispatch wrapper for
//! WorkflowRepository.
//!
//! 1. Define an object-safe `WorkflowRepositoryDyn` trait with boxed futures
//! 2. Blanket-impl `WorkflowRepositoryDyn` for all `T: WorkflowRepository`
//! 3. `BoxWorkflowRepository` wraps `Box<dyn WorkflowRepositoryDyn>` and delegates

use std::future::Future;
use std::pin::Pin;

use stepwise_types::error::RepositoryError;
use stepwise_types::workflow::{ErrorInfo, RunStatus, StepRecord, StepStatus, WorkflowRun};
use uuid::Uuid;

use super::workflow::WorkflowRepository;

type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = Result<T, RepositoryError>> + Send + 'a>>;

/// Object-safe version of [`WorkflowRepository`] with boxed futures.
pub trait WorkflowRepositoryDyn: Send + Sync {
    fn create_run_boxed<'a>(&'a self, run: &'a WorkflowRun) -> BoxFuture<'a, ()>;

    fn mark_running_boxed<'a>(&'a self, run_id: &'a Uuid) -> BoxFuture<'a, bool>;

    fn finish_run_boxed<'a>(
        &'a self,
        run_id: &'a Uuid,
        status: RunStatus,
        output: Option<&'a serde_json::Value>,
        error: Option<&'a ErrorInfo>,
    ) -> BoxFuture<'a, bool>;

    fn get_run_boxed<'a>(&'a self, run_id: &'a Uuid) -> BoxFuture<'a, Option<WorkflowRun>>;

    fn list_runs_boxed<'a>(
        &'a self,
        workflow_name: Option<&'a str>,
        limit: u32,
    ) -> BoxFuture<'a, Vec<WorkflowRun>>;

    fn list_unfinished_runs_boxed(&self) -> BoxFuture<'_, Vec<WorkflowRun>>;

    fn append_step_boxed<'a>(&'a self, step: &'a StepRecord) -> BoxFuture<'a, bool>;

    fn complete_step_boxed<'a>(
        &'a self,
        step_id: &'a Uuid,
        status: StepStatus,
        result: Option<&'a serde_json::Value>,
        error: Option<&'a ErrorInfo>,
    ) -> BoxFuture<'a, bool>;

    fn list_steps_boxed<'a>(&'a self, run_id: &'a Uuid) -> BoxFuture<'a, Vec<StepRecord>>;

    fn list_step_attempts_boxed<'a>(
        &'a self,
        run_id: &'a Uuid,
        step_name: &'a str,
    ) -> BoxFuture<'a, Vec<StepRecord>>;
}

impl<T: WorkflowRepository> WorkflowRepositoryDyn for T {
    fn create_run_boxed<'a>(&'a self, run: &'a WorkflowRun) -> BoxFuture<'a, ()> {
        Box::pin(self.create_run(run))
    }

    fn mark_running_boxed<'a>(&'a self, run_id: &'a Uuid) -> BoxFuture<'a, bool> {
        Box::pin(self.mark_running(run_id))
    }

    fn finish_run_boxed<'a>(
        &'a self,
        run_id: &'a Uuid,
        status: RunStatus,
        output: Option<&'a serde_json::Value>,
        error: Option<&'a ErrorInfo>,
    ) -> BoxFuture<'a, bool> {
        Box::pin(self.finish_run(run_id, status, output, error))
    }

    fn get_run_boxed<'a>(&'a self, run_id: &'a Uuid) -> BoxFuture<'a, Option<WorkflowRun>> {
        Box::pin(self.get_run(run_id))
    }

    fn list_runs_boxed<'a>(
        &'a self,
        workflow_name: Option<&'a str>,
        limit: u32,
    ) -> BoxFuture<'a, Vec<WorkflowRun>> {
        Box::pin(self.list_runs(workflow_name, limit))
    }

    fn list_unfinished_runs_boxed(&self) -> BoxFuture<'_, Vec<WorkflowRun>> {
        Box::pin(self.list_unfinished_runs())
    }

    fn append_step_boxed<'a>(&'a self, step: &'a StepRecord) -> BoxFuture<'a, bool> {
        Box::pin(self.append_step(step))
    }

    fn complete_step_boxed<'a>(
        &'a self,
        step_id: &'a Uuid,
        status: StepStatus,
        result: Option<&'a serde_json::Value>,
        error: Option<&'a ErrorInfo>,
    ) -> BoxFuture<'a, bool> {
        Box::pin(self.complete_step(step_id, status, result, error))
    }

    fn list_steps_boxed<'a>(&'a self, run_id: &'a Uuid) -> BoxFuture<'a, Vec<StepRecord>> {
        Box::pin(self.list_steps(run_id))
    }

    fn list_step_attempts_boxed<'a>(
        &'a self,
        run_id: &'a Uuid,
        step_name: &'a str,
    ) -> BoxFuture<'a, Vec<StepRecord>> {
        Box::pin(self.list_step_attempts(run_id, step_name))
    }
}

/// Type-erased workflow repository for runtime backend selection.
///
/// Since `WorkflowRepository` uses RPITIT, it cannot be used as a trait object
/// directly. The run controller holds one of these so that SQLite and
/// in-memory stores are interchangeable.
pub struct BoxWorkflowRepository {
    inner: Box<dyn WorkflowRepositoryDyn>,
}

impl BoxWorkflowRepository {
    pub fn new<T: WorkflowRepository + 'static>(repo: T) -> Self {
        Self {
            inner: Box::new(repo),
        }
    }
}

impl std::fmt::Debug for BoxWorkflowRepository {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BoxWorkflowRepository").finish_non_exhaustive()
    }
}

impl WorkflowRepository for BoxWorkflowRepository {
    async fn create_run(&self, run: &WorkflowRun) -> Result<(), RepositoryError> {
        self.inner.create_run_boxed(run).await
    }

    async fn mark_running(&self, run_id: &Uuid) -> Result<bool, RepositoryError> {
        self.inner.mark_running_boxed(run_id).await
    }

    async fn finish_run(
        &self,
        run_id: &Uuid,
        status: RunStatus,
        output: Option<&serde_json::Value>,
        error: Option<&ErrorInfo>,
    ) -> Result<bool, RepositoryError> {
        self.inner.finish_run_boxed(run_id, status, output, error).await
    }

    async fn get_run(&self, run_id: &Uuid) -> Result<Option<WorkflowRun>, RepositoryError> {
        self.inner.get_run_boxed(run_id).await
    }

    async fn list_runs(
        &self,
        workflow_name: Option<&str>,
        limit: u32,
    ) -> Result<Vec<WorkflowRun>, RepositoryError> {
        self.inner.list_runs_boxed(workflow_name, limit).await
    }

    async fn list_unfinished_runs(&self) -> Result<Vec<WorkflowRun>, RepositoryError> {
        self.inner.list_unfinished_runs_boxed().await
    }

    async fn append_step(&self, step: &StepRecord) -> Result<bool, RepositoryError> {
        self.inner.append_step_boxed(step).await
    }

    async fn complete_step(
        &self,
        step_id: &Uuid,
        status: StepStatus,
        result: Option<&serde_json::Value>,
        error: Option<&ErrorInfo>,
    ) -> Result<bool, RepositoryError> {
        self.inner
            .complete_step_boxed(step_id, status, result, error)
            .await
    }

    async fn list_steps(&self, run_id: &Uuid) -> Result<Vec<StepRecord>, RepositoryError> {
        self.inner.list_steps_boxed(run_id).await
    }

    async fn list_step_attempts(
        &self,
        run_id: &Uuid,
        step_name: &str,
    ) -> Result<Vec<StepRecord>, RepositoryError> {
        self.inner.list_step_attempts_boxed(run_id, step_name).await
    }
}
