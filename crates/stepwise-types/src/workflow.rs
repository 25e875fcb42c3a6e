//! Durable workflow run and step history types.
//!
//! A run is one execution instance of a named workflow. Every unit of work a
//! run performs is recorded as a [`StepRecord`], one record per attempt, in
//! start order. Wire shapes use camelCase field names (`runId`, `stepName`,
//! `attemptCount`).

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::duration::DurationLiteral;

// ---------------------------------------------------------------------------
// Statuses
// ---------------------------------------------------------------------------

/// Overall status of a workflow run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Pending,
    Running,
    Completed,
    Failed,
    Cancelled,
}

impl RunStatus {
    /// Terminal statuses never change again.
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Cancelled)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Running => "running",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Cancelled => "cancelled",
        }
    }
}

impl std::fmt::Display for RunStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for RunStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(Self::Pending),
            "running" => Ok(Self::Running),
            "completed" => Ok(Self::Completed),
            "failed" => Ok(Self::Failed),
            "cancelled" => Ok(Self::Cancelled),
            other => Err(format!("invalid run status: {other}")),
        }
    }
}

/// Status of a single step attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepStatus {
    Running,
    Succeeded,
    Failed,
}

impl StepStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Running => "running",
            Self::Succeeded => "succeeded",
            Self::Failed => "failed",
        }
    }
}

impl std::fmt::Display for StepStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for StepStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "running" => Ok(Self::Running),
            "succeeded" => Ok(Self::Succeeded),
            "failed" => Ok(Self::Failed),
            other => Err(format!("invalid step status: {other}")),
        }
    }
}

/// What kind of work a step record represents.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepKind {
    /// A call to a named target or an inline closure.
    Invoke,
    /// A durable sleep.
    Sleep,
}

impl StepKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Invoke => "invoke",
            Self::Sleep => "sleep",
        }
    }
}

impl std::str::FromStr for StepKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "invoke" => Ok(Self::Invoke),
            "sleep" => Ok(Self::Sleep),
            other => Err(format!("invalid step kind: {other}")),
        }
    }
}

// ---------------------------------------------------------------------------
// Retry policy
// ---------------------------------------------------------------------------

/// Per-step retry configuration. Fixed delay, no backoff.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RetryPolicy {
    /// Additional attempts after the first one fails.
    #[serde(default)]
    pub retries: u32,
    /// Delay between a failed attempt and the next one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub retry_delay: Option<DurationLiteral>,
}

impl RetryPolicy {
    pub fn new(retries: u32, retry_delay: DurationLiteral) -> Self {
        Self {
            retries,
            retry_delay: Some(retry_delay),
        }
    }

    /// Policy with no retries.
    pub fn none() -> Self {
        Self::default()
    }
}

// ---------------------------------------------------------------------------
// Run registry record
// ---------------------------------------------------------------------------

/// Error attached to a failed or cancelled run, or to a failed step attempt.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorInfo {
    pub message: String,
}

impl ErrorInfo {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

/// A single execution instance of a workflow.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkflowRun {
    /// UUIDv7 run ID.
    #[serde(rename = "runId")]
    pub id: Uuid,
    pub workflow_name: String,
    pub input: serde_json::Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output: Option<serde_json::Value>,
    pub status: RunStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<ErrorInfo>,
    pub started_at: DateTime<Utc>,
    /// Set when the run reaches a terminal status.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub finished_at: Option<DateTime<Utc>>,
}

impl WorkflowRun {
    /// A freshly created run in `pending` status.
    pub fn pending(workflow_name: impl Into<String>, input: serde_json::Value) -> Self {
        Self {
            id: Uuid::now_v7(),
            workflow_name: workflow_name.into(),
            input,
            output: None,
            status: RunStatus::Pending,
            error: None,
            started_at: Utc::now(),
            finished_at: None,
        }
    }
}

// ---------------------------------------------------------------------------
// Run history record
// ---------------------------------------------------------------------------

/// One attempt of one step within a run.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StepRecord {
    pub id: Uuid,
    pub run_id: Uuid,
    pub step_name: String,
    pub kind: StepKind,
    /// 1-based attempt number for this step name.
    pub attempt_count: u32,
    pub status: StepStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub input: Option<serde_json::Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<serde_json::Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<ErrorInfo>,
    pub started_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub finished_at: Option<DateTime<Utc>>,
}

impl StepRecord {
    /// A new attempt in `running` status, started now.
    pub fn running(
        run_id: Uuid,
        step_name: impl Into<String>,
        kind: StepKind,
        attempt_count: u32,
        input: Option<serde_json::Value>,
    ) -> Self {
        Self {
            id: Uuid::now_v7(),
            run_id,
            step_name: step_name.into(),
            kind,
            attempt_count,
            status: StepStatus::Running,
            input,
            result: None,
            error: None,
            started_at: Utc::now(),
            finished_at: None,
        }
    }
}

// ---------------------------------------------------------------------------
// Query views
// ---------------------------------------------------------------------------

/// Step history entry as exposed to callers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StepView {
    pub step_name: String,
    pub status: StepStatus,
    pub attempt_count: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<ErrorInfo>,
}

impl From<&StepRecord> for StepView {
    fn from(record: &StepRecord) -> Self {
        Self {
            step_name: record.step_name.clone(),
            status: record.status,
            attempt_count: record.attempt_count,
            error: record.error.clone(),
        }
    }
}

/// Final report of a run: status, output or error, and its step history.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RunReport {
    pub run_id: Uuid,
    pub workflow_name: String,
    pub status: RunStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output: Option<serde_json::Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<ErrorInfo>,
    pub steps: Vec<StepView>,
}

impl RunReport {
    pub fn new(run: WorkflowRun, steps: &[StepRecord]) -> Self {
        Self {
            run_id: run.id,
            workflow_name: run.workflow_name,
            status: run.status,
            output: run.output,
            error: run.error,
            steps: steps.iter().map(StepView::from).collect(),
        }
    }
}
