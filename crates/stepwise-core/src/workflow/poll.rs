//! Caller-side polling until a run reaches a terminal status.
//!
//! The timeout belongs to the caller: when it elapses the run keeps going
//! and nothing is written to its state.

use std::time::Duration;

use serde_json::Value;
use stepwise_types::config::PollConfig;
use stepwise_types::workflow::{RunReport, WorkflowRun};
use tokio::time::Instant;
use uuid::Uuid;

use super::executor::{ExecutorError, RunController};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollOptions {
    pub interval: Duration,
    pub timeout: Duration,
}

impl Default for PollOptions {
    fn default() -> Self {
        Self::from(&PollConfig::default())
    }
}

impl From<&PollConfig> for PollOptions {
    fn from(config: &PollConfig) -> Self {
        Self {
            interval: Duration::from_millis(config.interval_ms.max(1)),
            timeout: Duration::from_millis(config.timeout_ms),
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum PollError {
    /// The run did not finish in time. It may still finish later.
    #[error("run {run_id} did not finish within {}ms", .waited.as_millis())]
    TimedOut { run_id: Uuid, waited: Duration },

    #[error(transparent)]
    Executor(#[from] ExecutorError),
}

/// Read the run every `interval` until it is terminal or `timeout` elapses.
pub async fn wait_for_terminal(
    controller: &RunController,
    run_id: Uuid,
    options: &PollOptions,
) -> Result<WorkflowRun, PollError> {
    let started = Instant::now();
    let deadline = started + options.timeout;

    loop {
        let run = controller.get_run(run_id).await?;
        if run.status.is_terminal() {
            return Ok(run);
        }

        let now = Instant::now();
        if now >= deadline {
            tracing::debug!(run_id = %run_id, status = %run.status, "poll timed out");
            return Err(PollError::TimedOut {
                run_id,
                waited: now - started,
            });
        }
        tokio::time::sleep(options.interval.min(deadline - now)).await;
    }
}

/// Start `workflow_name` and wait for its outcome.
pub async fn run_and_wait(
    controller: &RunController,
    workflow_name: &str,
    input: Value,
    options: &PollOptions,
) -> Result<RunReport, PollError> {
    let run_id = controller.start(workflow_name, input).await?;
    wait_for_terminal(controller, run_id, options).await?;
    Ok(controller.report(run_id).await?)
}
