//! SQLite workflow repository implementation.
//!
//! Implements `WorkflowRepository` from `stepwise-core` using sqlx with split
//! read/write pools. Runs live in `workflow_runs`, step attempts in
//! `workflow_steps`. Terminal guards are part of each write statement, and
//! all writes go through the single-connection writer pool, so the first
//! terminal write for a run wins.

use chrono::{DateTime, SecondsFormat, Utc};
use sqlx::Row;
use stepwise_core::repository::workflow::{WorkflowRepository, unfinished_step_reason};
use stepwise_types::error::RepositoryError;
use stepwise_types::workflow::{
    ErrorInfo, RunStatus, StepKind, StepRecord, StepStatus, WorkflowRun,
};
use uuid::Uuid;

use super::pool::DatabasePool;

/// SQL fragment matching non-terminal run statuses.
const OPEN_STATUSES: &str = "('pending', 'running')";

/// SQLite-backed implementation of `WorkflowRepository`.
pub struct SqliteWorkflowRepository {
    pool: DatabasePool,
}

impl SqliteWorkflowRepository {
    /// Create a new repository backed by the given database pool.
    pub fn new(pool: DatabasePool) -> Self {
        Self { pool }
    }

    async fn run_exists(&self, run_id: &Uuid) -> Result<bool, RepositoryError> {
        let row = sqlx::query("SELECT 1 FROM workflow_runs WHERE id = ?")
            .bind(run_id.to_string())
            .fetch_optional(&self.pool.writer)
            .await
            .map_err(|e| RepositoryError::Query(e.to_string()))?;
        Ok(row.is_some())
    }

    async fn step_exists(&self, step_id: &Uuid) -> Result<bool, RepositoryError> {
        let row = sqlx::query("SELECT 1 FROM workflow_steps WHERE id = ?")
            .bind(step_id.to_string())
            .fetch_optional(&self.pool.writer)
            .await
            .map_err(|e| RepositoryError::Query(e.to_string()))?;
        Ok(row.is_some())
    }

    /// `Ok(false)` when the guarded write was refused, `NotFound` when the
    /// run does not exist at all.
    async fn refused_or_missing(&self, run_id: &Uuid) -> Result<bool, RepositoryError> {
        if self.run_exists(run_id).await? {
            Ok(false)
        } else {
            Err(RepositoryError::NotFound)
        }
    }
}

// ---------------------------------------------------------------------------
// Internal row types
// ---------------------------------------------------------------------------

struct WorkflowRunRow {
    id: String,
    workflow_name: String,
    input: String,
    output: Option<String>,
    status: String,
    error: Option<String>,
    started_at: String,
    finished_at: Option<String>,
}

impl WorkflowRunRow {
    fn from_row(row: &sqlx::sqlite::SqliteRow) -> Result<Self, sqlx::Error> {
        Ok(Self {
            id: row.try_get("id")?,
            workflow_name: row.try_get("workflow_name")?,
            input: row.try_get("input")?,
            output: row.try_get("output")?,
            status: row.try_get("status")?,
            error: row.try_get("error")?,
            started_at: row.try_get("started_at")?,
            finished_at: row.try_get("finished_at")?,
        })
    }

    fn into_run(self) -> Result<WorkflowRun, RepositoryError> {
        let status: RunStatus = self.status.parse().map_err(RepositoryError::Query)?;

        Ok(WorkflowRun {
            id: parse_uuid(&self.id)?,
            workflow_name: self.workflow_name,
            input: parse_json(&self.input, "run input")?,
            output: self
                .output
                .as_deref()
                .map(|s| parse_json(s, "run output"))
                .transpose()?,
            status,
            error: self.error.map(ErrorInfo::new),
            started_at: parse_datetime(&self.started_at)?,
            finished_at: self
                .finished_at
                .as_deref()
                .map(parse_datetime)
                .transpose()?,
        })
    }
}

struct WorkflowStepRow {
    id: String,
    run_id: String,
    step_name: String,
    kind: String,
    attempt_count: i64,
    status: String,
    input: Option<String>,
    result: Option<String>,
    error: Option<String>,
    started_at: String,
    finished_at: Option<String>,
}

impl WorkflowStepRow {
    fn from_row(row: &sqlx::sqlite::SqliteRow) -> Result<Self, sqlx::Error> {
        Ok(Self {
            id: row.try_get("id")?,
            run_id: row.try_get("run_id")?,
            step_name: row.try_get("step_name")?,
            kind: row.try_get("kind")?,
            attempt_count: row.try_get("attempt_count")?,
            status: row.try_get("status")?,
            input: row.try_get("input")?,
            result: row.try_get("result")?,
            error: row.try_get("error")?,
            started_at: row.try_get("started_at")?,
            finished_at: row.try_get("finished_at")?,
        })
    }

    fn into_record(self) -> Result<StepRecord, RepositoryError> {
        let kind: StepKind = self.kind.parse().map_err(RepositoryError::Query)?;
        let status: StepStatus = self.status.parse().map_err(RepositoryError::Query)?;
        let attempt_count = u32::try_from(self.attempt_count).map_err(|_| {
            RepositoryError::Query(format!("invalid attempt count: {}", self.attempt_count))
        })?;

        Ok(StepRecord {
            id: parse_uuid(&self.id)?,
            run_id: parse_uuid(&self.run_id)?,
            step_name: self.step_name,
            kind,
            attempt_count,
            status,
            input: self
                .input
                .as_deref()
                .map(|s| parse_json(s, "step input"))
                .transpose()?,
            result: self
                .result
                .as_deref()
                .map(|s| parse_json(s, "step result"))
                .transpose()?,
            error: self.error.map(ErrorInfo::new),
            started_at: parse_datetime(&self.started_at)?,
            finished_at: self
                .finished_at
                .as_deref()
                .map(parse_datetime)
                .transpose()?,
        })
    }
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn parse_uuid(s: &str) -> Result<Uuid, RepositoryError> {
    s.parse::<Uuid>()
        .map_err(|e| RepositoryError::Query(format!("invalid UUID: {e}")))
}

fn parse_datetime(s: &str) -> Result<DateTime<Utc>, RepositoryError> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| RepositoryError::Query(format!("invalid datetime: {e}")))
}

/// Fixed-width UTC timestamps, so text order matches time order.
fn format_datetime(dt: &DateTime<Utc>) -> String {
    dt.to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn parse_json(s: &str, what: &str) -> Result<serde_json::Value, RepositoryError> {
    serde_json::from_str(s).map_err(|e| RepositoryError::Query(format!("invalid {what} JSON: {e}")))
}

fn to_json(value: &serde_json::Value) -> Result<String, RepositoryError> {
    serde_json::to_string(value).map_err(|e| RepositoryError::Query(e.to_string()))
}

fn to_json_opt(value: Option<&serde_json::Value>) -> Result<Option<String>, RepositoryError> {
    value.map(to_json).transpose()
}

fn collect_runs(rows: &[sqlx::sqlite::SqliteRow]) -> Result<Vec<WorkflowRun>, RepositoryError> {
    let mut runs = Vec::with_capacity(rows.len());
    for row in rows {
        let r = WorkflowRunRow::from_row(row).map_err(|e| RepositoryError::Query(e.to_string()))?;
        runs.push(r.into_run()?);
    }
    Ok(runs)
}

fn collect_steps(rows: &[sqlx::sqlite::SqliteRow]) -> Result<Vec<StepRecord>, RepositoryError> {
    let mut steps = Vec::with_capacity(rows.len());
    for row in rows {
        let r = WorkflowStepRow::from_row(row).map_err(|e| RepositoryError::Query(e.to_string()))?;
        steps.push(r.into_record()?);
    }
    Ok(steps)
}

// ---------------------------------------------------------------------------
// WorkflowRepository impl
// ---------------------------------------------------------------------------

impl WorkflowRepository for SqliteWorkflowRepository {
    async fn create_run(&self, run: &WorkflowRun) -> Result<(), RepositoryError> {
        let input = to_json(&run.input)?;
        let output = to_json_opt(run.output.as_ref())?;

        sqlx::query(
            r#"INSERT INTO workflow_runs
               (id, workflow_name, input, output, status, error, started_at, finished_at)
               VALUES (?, ?, ?, ?, ?, ?, ?, ?)"#,
        )
        .bind(run.id.to_string())
        .bind(&run.workflow_name)
        .bind(&input)
        .bind(&output)
        .bind(run.status.as_str())
        .bind(run.error.as_ref().map(|e| e.message.as_str()))
        .bind(format_datetime(&run.started_at))
        .bind(run.finished_at.as_ref().map(format_datetime))
        .execute(&self.pool.writer)
        .await
        .map_err(|e| match e {
            sqlx::Error::Database(db) if db.is_unique_violation() => {
                RepositoryError::Conflict(format!("run {} already exists", run.id))
            }
            other => RepositoryError::Query(other.to_string()),
        })?;

        Ok(())
    }

    async fn mark_running(&self, run_id: &Uuid) -> Result<bool, RepositoryError> {
        let result = sqlx::query(
            "UPDATE workflow_runs SET status = 'running' WHERE id = ? AND status = 'pending'",
        )
        .bind(run_id.to_string())
        .execute(&self.pool.writer)
        .await
        .map_err(|e| RepositoryError::Query(e.to_string()))?;

        if result.rows_affected() == 0 {
            return self.refused_or_missing(run_id).await;
        }
        Ok(true)
    }

    async fn finish_run(
        &self,
        run_id: &Uuid,
        status: RunStatus,
        output: Option<&serde_json::Value>,
        error: Option<&ErrorInfo>,
    ) -> Result<bool, RepositoryError> {
        let output = to_json_opt(output)?;
        let finished_at = format_datetime(&Utc::now());

        // Run transition and closing of in-flight steps commit together
        let mut tx = self
            .pool
            .writer
            .begin()
            .await
            .map_err(|e| RepositoryError::Query(e.to_string()))?;

        let result = sqlx::query(&format!(
            "UPDATE workflow_runs SET status = ?, output = ?, error = ?, finished_at = ? \
             WHERE id = ? AND status IN {OPEN_STATUSES}"
        ))
        .bind(status.as_str())
        .bind(&output)
        .bind(error.map(|e| e.message.as_str()))
        .bind(&finished_at)
        .bind(run_id.to_string())
        .execute(&mut *tx)
        .await
        .map_err(|e| RepositoryError::Query(e.to_string()))?;

        if result.rows_affected() == 0 {
            tx.rollback()
                .await
                .map_err(|e| RepositoryError::Query(e.to_string()))?;
            return self.refused_or_missing(run_id).await;
        }

        sqlx::query(
            "UPDATE workflow_steps SET status = 'failed', error = ?, finished_at = ? \
             WHERE run_id = ? AND status = 'running'",
        )
        .bind(unfinished_step_reason(error))
        .bind(&finished_at)
        .bind(run_id.to_string())
        .execute(&mut *tx)
        .await
        .map_err(|e| RepositoryError::Query(e.to_string()))?;

        tx.commit()
            .await
            .map_err(|e| RepositoryError::Query(e.to_string()))?;
        Ok(true)
    }

    async fn get_run(&self, run_id: &Uuid) -> Result<Option<WorkflowRun>, RepositoryError> {
        let row = sqlx::query("SELECT * FROM workflow_runs WHERE id = ?")
            .bind(run_id.to_string())
            .fetch_optional(&self.pool.reader)
            .await
            .map_err(|e| RepositoryError::Query(e.to_string()))?;

        match row {
            Some(row) => {
                let r = WorkflowRunRow::from_row(&row)
                    .map_err(|e| RepositoryError::Query(e.to_string()))?;
                Ok(Some(r.into_run()?))
            }
            None => Ok(None),
        }
    }

    async fn list_runs(
        &self,
        workflow_name: Option<&str>,
        limit: u32,
    ) -> Result<Vec<WorkflowRun>, RepositoryError> {
        let rows = sqlx::query(
            "SELECT * FROM workflow_runs WHERE (?1 IS NULL OR workflow_name = ?1) \
             ORDER BY started_at DESC, id DESC LIMIT ?2",
        )
        .bind(workflow_name)
        .bind(i64::from(limit))
        .fetch_all(&self.pool.reader)
        .await
        .map_err(|e| RepositoryError::Query(e.to_string()))?;

        collect_runs(&rows)
    }

    async fn list_unfinished_runs(&self) -> Result<Vec<WorkflowRun>, RepositoryError> {
        let rows = sqlx::query(&format!(
            "SELECT * FROM workflow_runs WHERE status IN {OPEN_STATUSES} ORDER BY started_at ASC, id ASC"
        ))
        .fetch_all(&self.pool.reader)
        .await
        .map_err(|e| RepositoryError::Query(e.to_string()))?;

        collect_runs(&rows)
    }

    async fn append_step(&self, step: &StepRecord) -> Result<bool, RepositoryError> {
        let input = to_json_opt(step.input.as_ref())?;
        let result = to_json_opt(step.result.as_ref())?;

        let inserted = sqlx::query(&format!(
            r#"INSERT INTO workflow_steps
               (id, run_id, step_name, kind, attempt_count, status, input, result, error, started_at, finished_at)
               SELECT ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?
               WHERE EXISTS (SELECT 1 FROM workflow_runs WHERE id = ? AND status IN {OPEN_STATUSES})"#
        ))
        .bind(step.id.to_string())
        .bind(step.run_id.to_string())
        .bind(&step.step_name)
        .bind(step.kind.as_str())
        .bind(i64::from(step.attempt_count))
        .bind(step.status.as_str())
        .bind(&input)
        .bind(&result)
        .bind(step.error.as_ref().map(|e| e.message.as_str()))
        .bind(format_datetime(&step.started_at))
        .bind(step.finished_at.as_ref().map(format_datetime))
        .bind(step.run_id.to_string())
        .execute(&self.pool.writer)
        .await
        .map_err(|e| match e {
            sqlx::Error::Database(db) if db.is_unique_violation() => {
                RepositoryError::Conflict(format!("step record {} already exists", step.id))
            }
            other => RepositoryError::Query(other.to_string()),
        })?;

        if inserted.rows_affected() == 0 {
            return self.refused_or_missing(&step.run_id).await;
        }
        Ok(true)
    }

    async fn complete_step(
        &self,
        step_id: &Uuid,
        status: StepStatus,
        result: Option<&serde_json::Value>,
        error: Option<&ErrorInfo>,
    ) -> Result<bool, RepositoryError> {
        let result_json = to_json_opt(result)?;

        let updated = sqlx::query(&format!(
            r#"UPDATE workflow_steps
               SET status = ?, result = ?, error = ?, finished_at = ?
               WHERE id = ? AND status = 'running'
                 AND EXISTS (SELECT 1 FROM workflow_runs r
                             WHERE r.id = workflow_steps.run_id AND r.status IN {OPEN_STATUSES})"#
        ))
        .bind(status.as_str())
        .bind(&result_json)
        .bind(error.map(|e| e.message.as_str()))
        .bind(format_datetime(&Utc::now()))
        .bind(step_id.to_string())
        .execute(&self.pool.writer)
        .await
        .map_err(|e| RepositoryError::Query(e.to_string()))?;

        if updated.rows_affected() == 0 {
            if self.step_exists(step_id).await? {
                return Ok(false);
            }
            return Err(RepositoryError::NotFound);
        }
        Ok(true)
    }

    async fn list_steps(&self, run_id: &Uuid) -> Result<Vec<StepRecord>, RepositoryError> {
        let rows = sqlx::query("SELECT * FROM workflow_steps WHERE run_id = ? ORDER BY seq ASC")
            .bind(run_id.to_string())
            .fetch_all(&self.pool.reader)
            .await
            .map_err(|e| RepositoryError::Query(e.to_string()))?;

        collect_steps(&rows)
    }

    async fn list_step_attempts(
        &self,
        run_id: &Uuid,
        step_name: &str,
    ) -> Result<Vec<StepRecord>, RepositoryError> {
        let rows = sqlx::query(
            "SELECT * FROM workflow_steps WHERE run_id = ? AND step_name = ? ORDER BY seq ASC",
        )
        .bind(run_id.to_string())
        .bind(step_name)
        .fetch_all(&self.pool.reader)
        .await
        .map_err(|e| RepositoryError::Query(e.to_string()))?;

        collect_steps(&rows)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
