//! In-process `WorkflowRepository` backed by `DashMap`.
//!
//! Each run owns an entry behind its own `tokio::sync::Mutex`, so the
//! terminal-state check and the write it guards happen under one lock while
//! unrelated runs never contend. Nothing is ever evicted: runs, step records
//! and the step index live as long as the repository, so this store is for
//! engine and API tests, not long-lived processes.

use std::sync::Arc;

use chrono::Utc;
use dashmap::DashMap;
use stepwise_types::error::RepositoryError;
use stepwise_types::workflow::{ErrorInfo, RunStatus, StepRecord, StepStatus, WorkflowRun};
use tokio::sync::Mutex;
use uuid::Uuid;

use super::workflow::{WorkflowRepository, unfinished_step_reason};

#[derive(Debug)]
struct RunEntry {
    run: WorkflowRun,
    steps: Vec<StepRecord>,
}

/// `DashMap`-backed run registry and history store.
#[derive(Debug, Default)]
pub struct InMemoryWorkflowRepository {
    runs: DashMap<Uuid, Arc<Mutex<RunEntry>>>,
    /// step record id -> run id. Kept for terminal runs too so late
    /// completions are refused rather than reported missing.
    step_index: DashMap<Uuid, Uuid>,
}

impl InMemoryWorkflowRepository {
    pub fn new() -> Self {
        Self::default()
    }

    fn entry(&self, run_id: &Uuid) -> Option<Arc<Mutex<RunEntry>>> {
        self.runs.get(run_id).map(|e| Arc::clone(e.value()))
    }

    fn entries(&self) -> Vec<Arc<Mutex<RunEntry>>> {
        self.runs.iter().map(|e| Arc::clone(e.value())).collect()
    }
}

impl WorkflowRepository for InMemoryWorkflowRepository {
    async fn create_run(&self, run: &WorkflowRun) -> Result<(), RepositoryError> {
        match self.runs.entry(run.id) {
            dashmap::mapref::entry::Entry::Occupied(_) => Err(RepositoryError::Conflict(format!(
                "run {} already exists",
                run.id
            ))),
            dashmap::mapref::entry::Entry::Vacant(slot) => {
                slot.insert(Arc::new(Mutex::new(RunEntry {
                    run: run.clone(),
                    steps: Vec::new(),
                })));
                Ok(())
            }
        }
    }

    async fn mark_running(&self, run_id: &Uuid) -> Result<bool, RepositoryError> {
        let entry = self.entry(run_id).ok_or(RepositoryError::NotFound)?;
        let mut entry = entry.lock().await;
        if entry.run.status != RunStatus::Pending {
            return Ok(false);
        }
        entry.run.status = RunStatus::Running;
        Ok(true)
    }

    async fn finish_run(
        &self,
        run_id: &Uuid,
        status: RunStatus,
        output: Option<&serde_json::Value>,
        error: Option<&ErrorInfo>,
    ) -> Result<bool, RepositoryError> {
        let entry = self.entry(run_id).ok_or(RepositoryError::NotFound)?;
        let mut entry = entry.lock().await;
        if entry.run.status.is_terminal() {
            return Ok(false);
        }
        let now = Utc::now();
        entry.run.status = status;
        entry.run.output = output.cloned();
        entry.run.error = error.cloned();
        entry.run.finished_at = Some(now);

        let reason = ErrorInfo::new(unfinished_step_reason(error));
        for step in entry.steps.iter_mut() {
            if step.status == StepStatus::Running {
                step.status = StepStatus::Failed;
                step.error = Some(reason.clone());
                step.finished_at = Some(now);
            }
        }
        Ok(true)
    }

    async fn get_run(&self, run_id: &Uuid) -> Result<Option<WorkflowRun>, RepositoryError> {
        match self.entry(run_id) {
            Some(entry) => Ok(Some(entry.lock().await.run.clone())),
            None => Ok(None),
        }
    }

    async fn list_runs(
        &self,
        workflow_name: Option<&str>,
        limit: u32,
    ) -> Result<Vec<WorkflowRun>, RepositoryError> {
        let mut runs = Vec::new();
        for entry in self.entries() {
            let entry = entry.lock().await;
            if workflow_name.is_none_or(|name| entry.run.workflow_name == name) {
                runs.push(entry.run.clone());
            }
        }
        runs.sort_by(|a, b| (b.started_at, b.id).cmp(&(a.started_at, a.id)));
        runs.truncate(limit as usize);
        Ok(runs)
    }

    async fn list_unfinished_runs(&self) -> Result<Vec<WorkflowRun>, RepositoryError> {
        let mut runs = Vec::new();
        for entry in self.entries() {
            let entry = entry.lock().await;
            if !entry.run.status.is_terminal() {
                runs.push(entry.run.clone());
            }
        }
        runs.sort_by(|a, b| (a.started_at, a.id).cmp(&(b.started_at, b.id)));
        Ok(runs)
    }

    async fn append_step(&self, step: &StepRecord) -> Result<bool, RepositoryError> {
        let entry = self.entry(&step.run_id).ok_or(RepositoryError::NotFound)?;
        let mut entry = entry.lock().await;
        if entry.run.status.is_terminal() {
            return Ok(false);
        }
        if entry.steps.iter().any(|s| s.id == step.id) {
            return Err(RepositoryError::Conflict(format!(
                "step record {} already exists",
                step.id
            )));
        }
        entry.steps.push(step.clone());
        self.step_index.insert(step.id, step.run_id);
        Ok(true)
    }

    async fn complete_step(
        &self,
        step_id: &Uuid,
        status: StepStatus,
        result: Option<&serde_json::Value>,
        error: Option<&ErrorInfo>,
    ) -> Result<bool, RepositoryError> {
        let run_id = self
            .step_index
            .get(step_id)
            .map(|r| *r.value())
            .ok_or(RepositoryError::NotFound)?;
        let entry = self.entry(&run_id).ok_or(RepositoryError::NotFound)?;
        let mut entry = entry.lock().await;
        if entry.run.status.is_terminal() {
            return Ok(false);
        }
        let Some(record) = entry.steps.iter_mut().find(|s| s.id == *step_id) else {
            return Err(RepositoryError::NotFound);
        };
        if record.status != StepStatus::Running {
            return Ok(false);
        }
        record.status = status;
        record.result = result.cloned();
        record.error = error.cloned();
        record.finished_at = Some(Utc::now());
        Ok(true)
    }

    async fn list_steps(&self, run_id: &Uuid) -> Result<Vec<StepRecord>, RepositoryError> {
        match self.entry(run_id) {
            Some(entry) => Ok(entry.lock().await.steps.clone()),
            None => Ok(Vec::new()),
        }
    }

    async fn list_step_attempts(
        &self,
        run_id: &Uuid,
        step_name: &str,
    ) -> Result<Vec<StepRecord>, RepositoryError> {
        match self.entry(run_id) {
            Some(entry) => Ok(entry
                .lock()
                .await
                .steps
                .iter()
                .filter(|s| s.step_name == step_name)
                .cloned()
                .collect()),
            None => Ok(Vec::new()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use stepwise_types::workflow::StepKind;

    async fn running_run(repo: &InMemoryWorkflowRepository) -> WorkflowRun {
        let run = WorkflowRun::pending("demo", json!({ "value": 5 }));
        repo.create_run(&run).await.unwrap();
        assert!(repo.mark_running(&run.id).await.unwrap());
        run
    }

    #[tokio::test]
    async fn test_create_and_get_run() {
        let repo = InMemoryWorkflowRepository::new();
        let run = WorkflowRun::pending("demo", json!({}));
        repo.create_run(&run).await.unwrap();

        let fetched = repo.get_run(&run.id).await.unwrap().unwrap();
        assert_eq!(fetched.status, RunStatus::Pending);
        assert!(repo.get_run(&Uuid::now_v7()).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_duplicate_run_conflicts() {
        let repo = InMemoryWorkflowRepository::new();
        let run = WorkflowRun::pending("demo", json!({}));
        repo.create_run(&run).await.unwrap();
        assert!(matches!(
            repo.create_run(&run).await,
            Err(RepositoryError::Conflict(_))
        ));
    }

    #[tokio::test]
    async fn test_mark_running_only_from_pending() {
        let repo = InMemoryWorkflowRepository::new();
        let run = running_run(&repo).await;
        assert!(!repo.mark_running(&run.id).await.unwrap());
    }

    #[tokio::test]
    async fn test_finish_run_is_final() {
        let repo = InMemoryWorkflowRepository::new();
        let run = running_run(&repo).await;

        let err = ErrorInfo::new("value -5 is negative");
        assert!(repo
            .finish_run(&run.id, RunStatus::Cancelled, None, Some(&err))
            .await
            .unwrap());
        assert!(!repo
            .finish_run(&run.id, RunStatus::Failed, None, Some(&ErrorInfo::new("late")))
            .await
            .unwrap());

        let fetched = repo.get_run(&run.id).await.unwrap().unwrap();
        assert_eq!(fetched.status, RunStatus::Cancelled);
        assert_eq!(fetched.error.unwrap().message, "value -5 is negative");
        assert!(fetched.finished_at.is_some());
    }

    #[tokio::test]
    async fn test_finish_unknown_run_not_found() {
        let repo = InMemoryWorkflowRepository::new();
        let result = repo
            .finish_run(&Uuid::now_v7(), RunStatus::Completed, None, None)
            .await;
        assert!(matches!(result, Err(RepositoryError::NotFound)));
    }

    #[tokio::test]
    async fn test_steps_rejected_after_terminal() {
        let repo = InMemoryWorkflowRepository::new();
        let run = running_run(&repo).await;

        let step = StepRecord::running(run.id, "a", StepKind::Invoke, 1, None);
        assert!(repo.append_step(&step).await.unwrap());

        repo.finish_run(&run.id, RunStatus::Cancelled, None, None)
            .await
            .unwrap();

        // The terminal write closed the in-flight record; later writes are refused.
        assert!(!repo
            .complete_step(&step.id, StepStatus::Succeeded, Some(&json!(1)), None)
            .await
            .unwrap());
        let late = StepRecord::running(run.id, "b", StepKind::Invoke, 1, None);
        assert!(!repo.append_step(&late).await.unwrap());

        let steps = repo.list_steps(&run.id).await.unwrap();
        assert_eq!(steps.len(), 1);
        assert_eq!(steps[0].status, StepStatus::Failed);
        assert_eq!(
            steps[0].error.as_ref().unwrap().message,
            "run finished while step was running"
        );
        assert!(steps[0].finished_at.is_some());
        assert!(steps[0].result.is_none());
    }

    #[tokio::test]
    async fn test_complete_step_only_once() {
        let repo = InMemoryWorkflowRepository::new();
        let run = running_run(&repo).await;

        let step = StepRecord::running(run.id, "a", StepKind::Invoke, 1, None);
        repo.append_step(&step).await.unwrap();
        assert!(repo
            .complete_step(&step.id, StepStatus::Succeeded, Some(&json!(10)), None)
            .await
            .unwrap());
        assert!(!repo
            .complete_step(&step.id, StepStatus::Failed, None, None)
            .await
            .unwrap());

        let attempts = repo.list_step_attempts(&run.id, "a").await.unwrap();
        assert_eq!(attempts[0].status, StepStatus::Succeeded);
        assert_eq!(attempts[0].result, Some(json!(10)));
    }

    #[tokio::test]
    async fn test_steps_listed_in_start_order() {
        let repo = InMemoryWorkflowRepository::new();
        let run = running_run(&repo).await;

        for (name, attempt) in [("a", 1), ("b", 1), ("a", 2)] {
            let step = StepRecord::running(run.id, name, StepKind::Invoke, attempt, None);
            repo.append_step(&step).await.unwrap();
        }

        let names: Vec<_> = repo
            .list_steps(&run.id)
            .await
            .unwrap()
            .into_iter()
            .map(|s| (s.step_name, s.attempt_count))
            .collect();
        assert_eq!(
            names,
            vec![("a".to_string(), 1), ("b".to_string(), 1), ("a".to_string(), 2)]
        );
        assert_eq!(repo.list_step_attempts(&run.id, "a").await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_list_runs_filters_and_limits() {
        let repo = InMemoryWorkflowRepository::new();
        for name in ["a", "b", "a"] {
            repo.create_run(&WorkflowRun::pending(name, json!({})))
                .await
                .unwrap();
        }

        assert_eq!(repo.list_runs(None, 10).await.unwrap().len(), 3);
        assert_eq!(repo.list_runs(Some("a"), 10).await.unwrap().len(), 2);
        assert_eq!(repo.list_runs(None, 1).await.unwrap().len(), 1);
        assert_eq!(repo.list_unfinished_runs().await.unwrap().len(), 3);
    }
}
