//! Workflow and run handlers for the REST API.
//!
//! Endpoints for listing registered workflows, starting runs (fire-and-forget
//! or wait-for-result), and inspecting, cancelling and listing runs.

use std::time::Duration;

use axum::body::Bytes;
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::Deserialize;
use serde_json::{Value, json};
use uuid::Uuid;

use stepwise_core::workflow::definition::WorkflowSummary;
use stepwise_core::workflow::poll::run_and_wait;
use stepwise_core::workflow::PollOptions;
use stepwise_types::workflow::{RunReport, StepRecord, WorkflowRun};

use crate::http::error::AppError;
use crate::http::response::{ApiResponse, RequestTimer};
use crate::state::AppState;

/// Reason recorded when a cancel request carries none.
pub const DEFAULT_CANCEL_REASON: &str = "cancelled by request";

// ---------------------------------------------------------------------------
// Query parameters
// ---------------------------------------------------------------------------

/// Query parameters for listing workflow runs.
#[derive(Debug, Deserialize)]
pub struct ListRunsQuery {
    /// Only runs of this workflow.
    pub workflow: Option<String>,
    /// Maximum number of runs to return (default 20).
    #[serde(default = "default_run_limit")]
    pub limit: u32,
}

fn default_run_limit() -> u32 {
    20
}

/// Query parameters for the blocking execute endpoint.
#[derive(Debug, Default, Deserialize)]
pub struct ExecuteQuery {
    /// Overrides the configured poll timeout.
    pub timeout_ms: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
pub struct CancelRequest {
    pub reason: Option<String>,
}

// ---------------------------------------------------------------------------
// Router
// ---------------------------------------------------------------------------

/// Build the workflow sub-router. Mounted at `/api/v1` by the main router.
pub fn workflow_routes() -> Router<AppState> {
    Router::new()
        .route("/workflows", get(list_workflows))
        .route("/workflows/{name}", get(get_workflow))
        .route("/workflows/{name}/runs", post(start_run))
        .route("/workflows/{name}/execute", post(execute_run))
        .route("/runs", get(list_runs))
        .route("/runs/{run_id}", get(get_run))
        .route("/runs/{run_id}/history", get(get_run_history))
        .route("/runs/{run_id}/report", get(get_run_report))
        .route("/runs/{run_id}/cancel", post(cancel_run))
}

// ---------------------------------------------------------------------------
// Workflow handlers
// ---------------------------------------------------------------------------

/// GET /api/v1/workflows - List registered workflows.
pub async fn list_workflows(
    State(state): State<AppState>,
) -> Result<Json<ApiResponse<Vec<WorkflowSummary>>>, AppError> {
    let timer = RequestTimer::start();
    let workflows = state.controller.workflows().list();
    Ok(Json(timer.finish(workflows)))
}

/// GET /api/v1/workflows/{name} - Describe one workflow. Simple workflows
/// include their full definition.
pub async fn get_workflow(
    State(state): State<AppState>,
    Path(name): Path<String>,
) -> Result<Json<ApiResponse<Value>>, AppError> {
    let timer = RequestTimer::start();
    let entry = state
        .controller
        .workflows()
        .get(&name)
        .ok_or_else(|| AppError::WorkflowNotFound(name.clone()))?;

    let body = json!({
        "name": entry.name,
        "description": entry.description,
        "tags": entry.tags,
        "kind": entry.kind,
        "definition": entry.definition.as_deref(),
    });
    Ok(Json(timer.finish(body).with_link(
        "runs",
        &format!("/api/v1/workflows/{name}/runs"),
    )))
}

// ---------------------------------------------------------------------------
// Run handlers
// ---------------------------------------------------------------------------

/// POST /api/v1/workflows/{name}/runs - Start a run and return its id.
pub async fn start_run(
    State(state): State<AppState>,
    Path(name): Path<String>,
    Json(input): Json<Value>,
) -> Result<(StatusCode, Json<ApiResponse<Value>>), AppError> {
    let timer = RequestTimer::start();
    let run_id = state.controller.start(&name, input).await?;

    let response = timer
        .finish(json!({ "runId": run_id, "status": "pending" }))
        .with_link("self", &format!("/api/v1/runs/{run_id}"));
    Ok((StatusCode::ACCEPTED, Json(response)))
}

/// POST /api/v1/workflows/{name}/execute - Start a run and wait for it to
/// finish. Returns the run report whatever the terminal status.
pub async fn execute_run(
    State(state): State<AppState>,
    Path(name): Path<String>,
    Query(query): Query<ExecuteQuery>,
    Json(input): Json<Value>,
) -> Result<Json<ApiResponse<RunReport>>, AppError> {
    let timer = RequestTimer::start();
    let options = PollOptions {
        timeout: query
            .timeout_ms
            .map(Duration::from_millis)
            .unwrap_or(state.poll.timeout),
        ..state.poll
    };

    let report = run_and_wait(&state.controller, &name, input, &options).await?;
    let link = format!("/api/v1/runs/{}", report.run_id);
    Ok(Json(timer.finish(report).with_link("run", &link)))
}

/// GET /api/v1/runs - List recent runs, newest first.
pub async fn list_runs(
    State(state): State<AppState>,
    Query(query): Query<ListRunsQuery>,
) -> Result<Json<ApiResponse<Vec<WorkflowRun>>>, AppError> {
    let timer = RequestTimer::start();
    let runs = state
        .controller
        .list_runs(query.workflow.as_deref(), query.limit)
        .await?;
    Ok(Json(timer.finish(runs)))
}

/// GET /api/v1/runs/{run_id} - Current state of one run.
pub async fn get_run(
    State(state): State<AppState>,
    Path(run_id): Path<Uuid>,
) -> Result<Json<ApiResponse<WorkflowRun>>, AppError> {
    let timer = RequestTimer::start();
    let run = state.controller.get_run(run_id).await?;
    Ok(Json(
        timer
            .finish(run)
            .with_link("history", &format!("/api/v1/runs/{run_id}/history")),
    ))
}

/// GET /api/v1/runs/{run_id}/history - Every step attempt, in start order.
pub async fn get_run_history(
    State(state): State<AppState>,
    Path(run_id): Path<Uuid>,
) -> Result<Json<ApiResponse<Vec<StepRecord>>>, AppError> {
    let timer = RequestTimer::start();
    let steps = state.controller.get_run_history(run_id).await?;
    Ok(Json(timer.finish(steps)))
}

/// GET /api/v1/runs/{run_id}/report - Status, output or error, and step views.
pub async fn get_run_report(
    State(state): State<AppState>,
    Path(run_id): Path<Uuid>,
) -> Result<Json<ApiResponse<RunReport>>, AppError> {
    let timer = RequestTimer::start();
    let report = state.controller.report(run_id).await?;
    Ok(Json(timer.finish(report)))
}

/// POST /api/v1/runs/{run_id}/cancel - Cancel a pending or running run.
///
/// The body is optional: `{"reason": "..."}`.
pub async fn cancel_run(
    State(state): State<AppState>,
    Path(run_id): Path<Uuid>,
    body: Bytes,
) -> Result<Json<ApiResponse<WorkflowRun>>, AppError> {
    let timer = RequestTimer::start();
    let request: CancelRequest = if body.is_empty() {
        CancelRequest::default()
    } else {
        serde_json::from_slice(&body)
            .map_err(|e| AppError::Validation(format!("invalid cancel request: {e}")))?
    };
    let reason = request
        .reason
        .unwrap_or_else(|| DEFAULT_CANCEL_REASON.to_string());

    let run = state.controller.cancel(run_id, &reason).await?;
    Ok(Json(timer.finish(run)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::test_support::in_memory_state;
    use stepwise_core::workflow::poll::wait_for_terminal;
    use stepwise_types::workflow::RunStatus;

    #[tokio::test]
    async fn list_workflows_includes_builtins() {
        let state = in_memory_state();
        let Json(response) = list_workflows(State(state)).await.unwrap();
        let names: Vec<String> = response.data.unwrap().into_iter().map(|w| w.name).collect();
        assert!(names.contains(&"org-onboarding".to_string()));
        assert!(names.contains(&"happy-retry".to_string()));
    }

    #[tokio::test]
    async fn get_workflow_exposes_simple_definition() {
        let state = in_memory_state();
        let Json(response) = get_workflow(State(state.clone()), Path("sequential-invite".into()))
            .await
            .unwrap();
        let data = response.data.unwrap();
        assert_eq!(data["kind"], "simple");
        assert_eq!(data["definition"]["steps"][0]["type"], "for_each");

        let Json(code) = get_workflow(State(state.clone()), Path("onboarding".into()))
            .await
            .unwrap();
        assert!(code.data.unwrap()["definition"].is_null());

        let err = get_workflow(State(state), Path("missing".into())).await.unwrap_err();
        assert!(matches!(err, AppError::WorkflowNotFound(_)));
    }

    #[tokio::test]
    async fn start_run_returns_accepted_and_run_finishes() {
        let state = in_memory_state();
        let (status, Json(response)) = start_run(
            State(state.clone()),
            Path("sequential-invite".into()),
            Json(json!({ "orgId": "org-1", "memberEmails": ["a@x.test"] })),
        )
        .await
        .unwrap();
        assert_eq!(status, StatusCode::ACCEPTED);

        let run_id: Uuid = serde_json::from_value(response.data.unwrap()["runId"].clone()).unwrap();
        let run = wait_for_terminal(&state.controller, run_id, &state.poll).await.unwrap();
        assert_eq!(run.status, RunStatus::Completed);

        let Json(history) = get_run_history(State(state), Path(run_id)).await.unwrap();
        assert_eq!(history.data.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn start_unknown_workflow_is_not_found() {
        let state = in_memory_state();
        let err = start_run(State(state), Path("nope".into()), Json(json!({})))
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::WorkflowNotFound(name) if name == "nope"));
    }

    #[tokio::test]
    async fn execute_returns_failed_report() {
        let state = in_memory_state();
        let Json(response) = execute_run(
            State(state),
            Path("unhappy-retry".into()),
            Query(ExecuteQuery::default()),
            Json(json!({ "value": -1 })),
        )
        .await
        .unwrap();
        let report = response.data.unwrap();
        assert_eq!(report.status, RunStatus::Cancelled);
        assert!(report.steps.is_empty());
    }

    #[tokio::test]
    async fn execute_times_out_without_touching_run() {
        let state = in_memory_state();
        let err = execute_run(
            State(state.clone()),
            Path("onboarding".into()),
            Query(ExecuteQuery { timeout_ms: Some(50) }),
            Json(json!({ "email": "slow@example.com" })),
        )
        .await
        .unwrap_err();
        assert!(matches!(err, AppError::PollTimeout(_)));

        let Json(runs) = list_runs(
            State(state),
            Query(ListRunsQuery {
                workflow: Some("onboarding".into()),
                limit: 5,
            }),
        )
        .await
        .unwrap();
        let runs = runs.data.unwrap();
        assert_eq!(runs.len(), 1);
        assert!(!runs[0].status.is_terminal());
    }

    #[tokio::test]
    async fn cancel_run_with_and_without_reason() {
        let state = in_memory_state();
        let run_id = state
            .controller
            .start("onboarding", json!({ "email": "c@example.com" }))
            .await
            .unwrap();

        let Json(response) = cancel_run(
            State(state.clone()),
            Path(run_id),
            Bytes::from_static(br#"{"reason":"operator stop"}"#),
        )
        .await
        .unwrap();
        let run = response.data.unwrap();
        assert_eq!(run.status, RunStatus::Cancelled);
        assert_eq!(run.error.unwrap().message, "operator stop");

        let err = cancel_run(State(state.clone()), Path(run_id), Bytes::new())
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::RunTerminal(id) if id == run_id));

        let err = cancel_run(State(state), Path(Uuid::now_v7()), Bytes::new())
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::RunNotFound(_)));
    }

    #[tokio::test]
    async fn invalid_cancel_body_is_validation_error() {
        let state = in_memory_state();
        let err = cancel_run(State(state), Path(Uuid::now_v7()), Bytes::from_static(b"{"))
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::Validation(_)));
    }
}
