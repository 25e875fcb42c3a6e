//! Step execution with memoization, retry and history recording.
//!
//! Both entry points are replay-safe: they first consult the run's history
//! for the step name and only perform work the history does not already
//! record as done. Waits (retry delays, sleeps) are computed from persisted
//! timestamps, so a restarted process waits only for the remaining time.

use std::time::Duration;

use chrono::{DateTime, Utc};
use serde_json::{Value, json};
use stepwise_types::workflow::{RetryPolicy, StepKind, StepRecord, StepStatus};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use super::checkpoint::{CheckpointError, CheckpointManager};
use super::context::WorkflowInterrupt;
use super::retry::RetryHandler;
use super::target::{StepInvocation, StepTargetDyn};
use crate::repository::workflow::WorkflowRepository;

/// Message recorded for an attempt that was running when its process stopped.
pub const INTERRUPTED_ATTEMPT_MESSAGE: &str = "attempt interrupted before completion";

/// Everything a step needs to know about the run it belongs to.
pub(crate) struct StepScope<'a, R: WorkflowRepository> {
    pub run_id: Uuid,
    pub checkpoints: &'a CheckpointManager<R>,
    pub cancel: &'a CancellationToken,
}

// ---------------------------------------------------------------------------
// Invoke steps
// ---------------------------------------------------------------------------

/// Execute one named unit of work.
///
/// - A succeeded record for `step_name` short-circuits with its stored result.
/// - Otherwise attempts continue numbering from the last recorded attempt.
///   Each attempt is appended as `running` and closed as `succeeded` or
///   `failed`.
/// - After a failure with budget left, the next attempt starts once
///   `retry_delay` has passed since the failed attempt finished.
/// - When the budget is spent the last attempt's message is returned as
///   [`WorkflowInterrupt::StepFailed`].
pub(crate) async fn run_step<R: WorkflowRepository>(
    scope: &StepScope<'_, R>,
    step_name: &str,
    target: &dyn StepTargetDyn,
    args: Value,
    retry: Option<&RetryPolicy>,
) -> Result<Value, WorkflowInterrupt> {
    if scope.cancel.is_cancelled() {
        return Err(WorkflowInterrupt::RunTerminal);
    }

    let history = scope
        .checkpoints
        .attempts(scope.run_id, step_name)
        .await
        .map_err(interrupt)?;

    if let Some(done) = history.iter().find(|r| r.status == StepStatus::Succeeded) {
        tracing::debug!(run_id = %scope.run_id, step = step_name, "step memoized");
        return Ok(done.result.clone().unwrap_or(Value::Null));
    }

    let plan = RetryHandler::plan(retry);
    let mut last_failure = match history.last() {
        Some(record) if record.status == StepStatus::Running => {
            close_interrupted(scope, record).await?;
            Some((record.attempt_count, INTERRUPTED_ATTEMPT_MESSAGE.to_string(), Utc::now()))
        }
        Some(record) => Some((
            record.attempt_count,
            record
                .error
                .as_ref()
                .map(|e| e.message.clone())
                .unwrap_or_default(),
            record.finished_at.unwrap_or(record.started_at),
        )),
        None => None,
    };

    loop {
        let attempt = match &last_failure {
            Some((attempt, message, finished_at)) => {
                if !RetryHandler::should_retry(&plan, *attempt) {
                    return Err(WorkflowInterrupt::StepFailed {
                        step_name: step_name.to_string(),
                        attempts: *attempt,
                        message: message.clone(),
                    });
                }
                wait_until_elapsed(*finished_at, plan.delay, scope.cancel).await?;
                attempt + 1
            }
            None => 1,
        };

        let record = scope
            .checkpoints
            .step_started(scope.run_id, step_name, StepKind::Invoke, attempt, Some(args.clone()))
            .await
            .map_err(interrupt)?;

        let invocation = StepInvocation {
            run_id: scope.run_id,
            step_name: step_name.to_string(),
            attempt_count: attempt,
        };

        match target.invoke_boxed(args.clone(), invocation).await {
            Ok(result) => {
                scope
                    .checkpoints
                    .step_succeeded(&record, Some(&result))
                    .await
                    .map_err(interrupt)?;
                return Ok(result);
            }
            Err(e) => {
                tracing::warn!(
                    run_id = %scope.run_id,
                    step = step_name,
                    attempt,
                    max_attempts = plan.max_attempts,
                    error = %e,
                    "step attempt failed"
                );
                scope
                    .checkpoints
                    .step_failed(&record, &e.message)
                    .await
                    .map_err(interrupt)?;
                last_failure = Some((attempt, e.message, Utc::now()));
            }
        }
    }
}

async fn close_interrupted<R: WorkflowRepository>(
    scope: &StepScope<'_, R>,
    record: &StepRecord,
) -> Result<(), WorkflowInterrupt> {
    tracing::warn!(
        run_id = %scope.run_id,
        step = %record.step_name,
        attempt = record.attempt_count,
        "closing attempt left running by a previous process"
    );
    scope
        .checkpoints
        .step_failed(record, INTERRUPTED_ATTEMPT_MESSAGE)
        .await
        .map_err(interrupt)
}

// ---------------------------------------------------------------------------
// Sleep steps
// ---------------------------------------------------------------------------

/// Durable sleep: completes once `now >= started_at + duration`.
///
/// The first call records a `running` sleep record; a replay after restart
/// reuses that record's `started_at` and waits only the remainder.
pub(crate) async fn run_sleep<R: WorkflowRepository>(
    scope: &StepScope<'_, R>,
    step_name: &str,
    duration: Duration,
    literal: &str,
) -> Result<(), WorkflowInterrupt> {
    if scope.cancel.is_cancelled() {
        return Err(WorkflowInterrupt::RunTerminal);
    }

    let history = scope
        .checkpoints
        .attempts(scope.run_id, step_name)
        .await
        .map_err(interrupt)?;

    if history.iter().any(|r| r.status == StepStatus::Succeeded) {
        return Ok(());
    }

    let record = match history.last() {
        Some(record) if record.status == StepStatus::Running => record.clone(),
        last => {
            let attempt = last.map(|r| r.attempt_count + 1).unwrap_or(1);
            scope
                .checkpoints
                .step_started(
                    scope.run_id,
                    step_name,
                    StepKind::Sleep,
                    attempt,
                    Some(json!({ "duration": literal })),
                )
                .await
                .map_err(interrupt)?
        }
    };

    tracing::debug!(run_id = %scope.run_id, step = step_name, duration = literal, "sleeping");
    wait_until_elapsed(record.started_at, duration, scope.cancel).await?;

    scope
        .checkpoints
        .step_succeeded(&record, None)
        .await
        .map_err(interrupt)
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

/// Time left until `since + duration`, zero if already past.
pub(crate) fn remaining(since: DateTime<Utc>, duration: Duration) -> Duration {
    let elapsed = (Utc::now() - since).to_std().unwrap_or(Duration::ZERO);
    duration.saturating_sub(elapsed)
}

/// Wait until `duration` has elapsed since `since`, or fail with
/// `RunTerminal` if the run is cancelled first.
async fn wait_until_elapsed(
    since: DateTime<Utc>,
    duration: Duration,
    cancel: &CancellationToken,
) -> Result<(), WorkflowInterrupt> {
    let wait = remaining(since, duration);
    if wait.is_zero() {
        return Ok(());
    }

    tokio::select! {
        _ = tokio::time::sleep(wait) => Ok(()),
        _ = cancel.cancelled() => Err(WorkflowInterrupt::RunTerminal),
    }
}

fn interrupt(e: CheckpointError) -> WorkflowInterrupt {
    match e {
        CheckpointError::RunTerminal(_) => WorkflowInterrupt::RunTerminal,
        other => WorkflowInterrupt::Checkpoint(other),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::EventBus;
    use crate::repository::memory::InMemoryWorkflowRepository;
    use crate::workflow::target::{FnTarget, TargetError};
    use std::sync::Arc;
    use std::sync::atomic::{AtomicU32, Ordering};
    use stepwise_types::duration::DurationLiteral;
    use stepwise_types::workflow::{RunStatus, WorkflowRun};

    async fn setup() -> (CheckpointManager<InMemoryWorkflowRepository>, WorkflowRun) {
        let cp = CheckpointManager::new(InMemoryWorkflowRepository::new(), EventBus::new(64));
        let run = WorkflowRun::pending("demo", json!({}));
        cp.create_run(&run).await.unwrap();
        cp.mark_running(&run).await.unwrap();
        (cp, run)
    }

    fn counting_target(
        calls: Arc<AtomicU32>,
        fail_until: u32,
    ) -> FnTarget<impl Fn(Value, StepInvocation) -> std::future::Ready<Result<Value, TargetError>> + Send + Sync>
    {
        FnTarget::new(move |args: Value, step: StepInvocation| {
            calls.fetch_add(1, Ordering::SeqCst);
            std::future::ready(if step.attempt_count <= fail_until {
                Err(TargetError::new(format!("attempt {} failed", step.attempt_count)))
            } else {
                Ok(json!({ "echo": args, "attempt": step.attempt_count }))
            })
        })
    }

    #[tokio::test]
    async fn memoized_step_invokes_target_once() {
        let (cp, run) = setup().await;
        let token = CancellationToken::new();
        let scope = StepScope { run_id: run.id, checkpoints: &cp, cancel: &token };
        let calls = Arc::new(AtomicU32::new(0));
        let target = counting_target(Arc::clone(&calls), 0);

        let first = run_step(&scope, "fetch", &target, json!(1), None).await.unwrap();
        let second = run_step(&scope, "fetch", &target, json!(1), None).await.unwrap();

        assert_eq!(first, second);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(cp.attempts(run.id, "fetch").await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn exhausted_retries_record_every_attempt() {
        let (cp, run) = setup().await;
        let token = CancellationToken::new();
        let scope = StepScope { run_id: run.id, checkpoints: &cp, cancel: &token };
        let target = counting_target(Arc::new(AtomicU32::new(0)), u32::MAX);
        let policy = RetryPolicy::new(2, DurationLiteral::millis(10));

        let err = run_step(&scope, "charge", &target, json!({}), Some(&policy))
            .await
            .unwrap_err();
        match err {
            WorkflowInterrupt::StepFailed { attempts, message, .. } => {
                assert_eq!(attempts, 3);
                assert_eq!(message, "attempt 3 failed");
            }
            other => panic!("expected StepFailed, got {other:?}"),
        }

        let attempts = cp.attempts(run.id, "charge").await.unwrap();
        let summary: Vec<_> = attempts.iter().map(|r| (r.attempt_count, r.status)).collect();
        assert_eq!(
            summary,
            vec![(1, StepStatus::Failed), (2, StepStatus::Failed), (3, StepStatus::Failed)]
        );
    }

    #[tokio::test]
    async fn retry_waits_the_fixed_delay() {
        let (cp, run) = setup().await;
        let token = CancellationToken::new();
        let scope = StepScope { run_id: run.id, checkpoints: &cp, cancel: &token };
        let target = counting_target(Arc::new(AtomicU32::new(0)), 1);
        let policy = RetryPolicy::new(1, DurationLiteral::millis(150));

        let started = std::time::Instant::now();
        let result = run_step(&scope, "flaky", &target, json!(7), Some(&policy))
            .await
            .unwrap();

        assert!(started.elapsed() >= Duration::from_millis(150));
        assert_eq!(result["attempt"], 2);
    }

    #[tokio::test]
    async fn interrupted_attempt_counts_toward_budget() {
        let (cp, run) = setup().await;
        // Simulate a crash: attempt 1 left running.
        cp.step_started(run.id, "charge", StepKind::Invoke, 1, None)
            .await
            .unwrap();

        let token = CancellationToken::new();
        let scope = StepScope { run_id: run.id, checkpoints: &cp, cancel: &token };
        let target = counting_target(Arc::new(AtomicU32::new(0)), 0);
        let policy = RetryPolicy::new(1, DurationLiteral::millis(0));

        let result = run_step(&scope, "charge", &target, json!(null), Some(&policy))
            .await
            .unwrap();
        assert_eq!(result["attempt"], 2);

        let attempts = cp.attempts(run.id, "charge").await.unwrap();
        assert_eq!(attempts[0].status, StepStatus::Failed);
        assert_eq!(
            attempts[0].error.as_ref().unwrap().message,
            INTERRUPTED_ATTEMPT_MESSAGE
        );
        assert_eq!(attempts[1].status, StepStatus::Succeeded);
    }

    #[tokio::test]
    async fn cancelled_run_stops_retry_wait() {
        let (cp, run) = setup().await;
        let token = CancellationToken::new();
        let target = counting_target(Arc::new(AtomicU32::new(0)), u32::MAX);
        let policy = RetryPolicy::new(5, DurationLiteral::seconds(30));

        let canceller = token.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(50)).await;
            canceller.cancel();
        });

        let scope = StepScope { run_id: run.id, checkpoints: &cp, cancel: &token };
        let err = run_step(&scope, "doomed", &target, json!(null), Some(&policy))
            .await
            .unwrap_err();
        assert!(matches!(err, WorkflowInterrupt::RunTerminal));
        assert_eq!(cp.attempts(run.id, "doomed").await.unwrap().len(), 1);
    }

    #[test]
    fn remaining_is_zero_once_elapsed() {
        let past = Utc::now() - chrono::Duration::milliseconds(500);
        assert_eq!(remaining(past, Duration::from_millis(100)), Duration::ZERO);
        assert!(remaining(Utc::now(), Duration::from_secs(10)) > Duration::from_secs(9));
    }

    #[tokio::test]
    async fn sleep_reuses_running_record() {
        let (cp, run) = setup().await;
        let token = CancellationToken::new();
        let scope = StepScope { run_id: run.id, checkpoints: &cp, cancel: &token };

        // A previous process recorded the sleep and stopped.
        cp.step_started(run.id, "nap", StepKind::Sleep, 1, None)
            .await
            .unwrap();
        tokio::time::sleep(Duration::from_millis(40)).await;

        run_sleep(&scope, "nap", Duration::from_millis(100), "100ms")
            .await
            .unwrap();

        let attempts = cp.attempts(run.id, "nap").await.unwrap();
        assert_eq!(attempts.len(), 1);
        assert_eq!(attempts[0].attempt_count, 1);
        assert_eq!(attempts[0].status, StepStatus::Succeeded);
        assert_eq!(attempts[0].kind, StepKind::Sleep);
        let slept = attempts[0].finished_at.unwrap() - attempts[0].started_at;
        assert!(slept >= chrono::Duration::milliseconds(100));

        // Replaying a finished sleep returns immediately.
        let started = std::time::Instant::now();
        run_sleep(&scope, "nap", Duration::from_secs(60), "60s").await.unwrap();
        assert!(started.elapsed() < Duration::from_secs(1));
    }

    #[tokio::test]
    async fn steps_refused_after_run_finished() {
        let (cp, run) = setup().await;
        cp.finish_run(run.id, RunStatus::Cancelled, None, None)
            .await
            .unwrap();

        let token = CancellationToken::new();
        let scope = StepScope { run_id: run.id, checkpoints: &cp, cancel: &token };
        let target = counting_target(Arc::new(AtomicU32::new(0)), 0);
        let err = run_step(&scope, "late", &target, json!(null), None)
            .await
            .unwrap_err();
        assert!(matches!(err, WorkflowInterrupt::RunTerminal));
    }
}
