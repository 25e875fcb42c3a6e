//! Demo trigger endpoints.
//!
//! Each endpoint starts one of the bundled workflows, waits for it and shapes
//! the outcome for the caller. They sit outside `/api/v1` at the paths the
//! demo clients already use.

use std::time::Duration;

use axum::extract::State;
use axum::routing::post;
use axum::{Json, Router};
use serde_json::{Map, Value, json};

use stepwise_core::workflow::PollOptions;
use stepwise_core::workflow::poll::run_and_wait;
use stepwise_types::workflow::{RunReport, RunStatus};

use crate::http::error::AppError;
use crate::http::response::{ApiResponse, RequestTimer};
use crate::state::AppState;

/// Sequential invites may sleep between members, so they get a longer wait.
const SEQUENTIAL_INVITE_TIMEOUT: Duration = Duration::from_secs(60);

pub fn trigger_routes() -> Router<AppState> {
    Router::new()
        .route("/workflow/start", post(start_onboarding))
        .route("/workflow/test/happy-retry", post(happy_retry))
        .route("/workflow/test/unhappy-retry", post(unhappy_retry))
        .route("/workflow/simple/org-onboarding", post(org_onboarding))
        .route("/workflow/simple/sequential-invite", post(sequential_invite))
}

/// POST /workflow/start - Run `onboarding`; respond with its output and steps.
pub async fn start_onboarding(
    State(state): State<AppState>,
    Json(input): Json<Value>,
) -> Result<Json<ApiResponse<Value>>, AppError> {
    let timer = RequestTimer::start();
    let report = run_and_wait(&state.controller, "onboarding", input, &state.poll).await?;
    Ok(Json(timer.finish(completed_with_steps(report)?)))
}

/// POST /workflow/test/happy-retry - Run `happy-retry`; expect success.
pub async fn happy_retry(
    State(state): State<AppState>,
    Json(input): Json<Value>,
) -> Result<Json<ApiResponse<Value>>, AppError> {
    let timer = RequestTimer::start();
    let report = run_and_wait(&state.controller, "happy-retry", input, &state.poll).await?;
    Ok(Json(timer.finish(completed_with_steps(report)?)))
}

/// POST /workflow/test/unhappy-retry - Run `unhappy-retry`; failure and
/// cancellation are the expected outcomes and are reported with the attempt
/// count. Success is an error.
pub async fn unhappy_retry(
    State(state): State<AppState>,
    Json(input): Json<Value>,
) -> Result<Json<ApiResponse<Value>>, AppError> {
    let timer = RequestTimer::start();
    let report = run_and_wait(&state.controller, "unhappy-retry", input, &state.poll).await?;

    match report.status {
        RunStatus::Failed | RunStatus::Cancelled => {
            let body = json!({
                "error": error_message(&report),
                "attempts": report.steps.len(),
                "steps": report.steps,
            });
            Ok(Json(timer.finish(body)))
        }
        _ => Err(AppError::RunFailed(format!(
            "run {} was expected to fail but finished {}",
            report.run_id, report.status
        ))),
    }
}

/// POST /workflow/simple/org-onboarding - Run `org-onboarding`.
pub async fn org_onboarding(
    State(state): State<AppState>,
    Json(input): Json<Value>,
) -> Result<Json<ApiResponse<Value>>, AppError> {
    let timer = RequestTimer::start();
    let report = run_and_wait(&state.controller, "org-onboarding", input, &state.poll).await?;
    Ok(Json(timer.finish(completed_with_run_id(report)?)))
}

/// POST /workflow/simple/sequential-invite - Run `sequential-invite`.
pub async fn sequential_invite(
    State(state): State<AppState>,
    Json(input): Json<Value>,
) -> Result<Json<ApiResponse<Value>>, AppError> {
    let timer = RequestTimer::start();
    let options = PollOptions {
        timeout: state.poll.timeout.max(SEQUENTIAL_INVITE_TIMEOUT),
        ..state.poll
    };
    let report = run_and_wait(&state.controller, "sequential-invite", input, &options).await?;
    Ok(Json(timer.finish(completed_with_run_id(report)?)))
}

// ---------------------------------------------------------------------------
// Shaping
// ---------------------------------------------------------------------------

fn error_message(report: &RunReport) -> String {
    report
        .error
        .as_ref()
        .map(|e| e.message.clone())
        .unwrap_or_else(|| format!("run finished {}", report.status))
}

/// The run's output object extended with `extra`, or an error unless the run
/// completed.
fn completed_output(report: &RunReport, extra: Vec<(&str, Value)>) -> Result<Value, AppError> {
    if report.status != RunStatus::Completed {
        return Err(AppError::RunFailed(error_message(report)));
    }

    let mut body = match &report.output {
        Some(Value::Object(map)) => map.clone(),
        Some(other) => {
            let mut map = Map::new();
            map.insert("output".to_string(), other.clone());
            map
        }
        None => Map::new(),
    };
    for (key, value) in extra {
        body.insert(key.to_string(), value);
    }
    Ok(Value::Object(body))
}

fn completed_with_steps(report: RunReport) -> Result<Value, AppError> {
    let steps = serde_json::to_value(&report.steps).map_err(|e| AppError::Internal(e.to_string()))?;
    completed_output(&report, vec![("steps", steps)])
}

fn completed_with_run_id(report: RunReport) -> Result<Value, AppError> {
    completed_output(&report, vec![("runId", json!(report.run_id))])
}
