//! Application error type mapping to HTTP status codes and envelope format.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde_json::json;
use uuid::Uuid;

use stepwise_core::workflow::{ExecutorError, PollError};

/// Application-level error that maps to HTTP responses.
#[derive(Debug)]
pub enum AppError {
    /// No workflow is registered under this name.
    WorkflowNotFound(String),
    /// The run id was never recorded.
    RunNotFound(Uuid),
    /// The run already reached a terminal status.
    RunTerminal(Uuid),
    /// The caller stopped waiting; the run may still finish.
    PollTimeout(String),
    /// A run finished in a status the endpoint treats as a failure.
    RunFailed(String),
    /// Validation error.
    Validation(String),
    /// Generic internal error.
    Internal(String),
}

impl From<ExecutorError> for AppError {
    fn from(e: ExecutorError) -> Self {
        match e {
            ExecutorError::UnknownWorkflow(name) => AppError::WorkflowNotFound(name),
            ExecutorError::RunNotFound(id) => AppError::RunNotFound(id),
            ExecutorError::RunTerminal(id) => AppError::RunTerminal(id),
            ExecutorError::Repository(msg) => AppError::Internal(msg),
        }
    }
}

impl From<PollError> for AppError {
    fn from(e: PollError) -> Self {
        match e {
            PollError::TimedOut { .. } => AppError::PollTimeout(e.to_string()),
            PollError::Executor(inner) => inner.into(),
        }
    }
}

impl AppError {
    /// HTTP status, machine-readable code and message for this error.
    pub fn parts(&self) -> (StatusCode, &'static str, String) {
        match self {
            AppError::WorkflowNotFound(name) => (
                StatusCode::NOT_FOUND,
                "WORKFLOW_NOT_FOUND",
                format!("Workflow '{name}' not found"),
            ),
            AppError::RunNotFound(id) => (
                StatusCode::NOT_FOUND,
                "RUN_NOT_FOUND",
                format!("Workflow run {id} not found"),
            ),
            AppError::RunTerminal(id) => (
                StatusCode::CONFLICT,
                "RUN_TERMINAL",
                format!("Workflow run {id} is already terminal"),
            ),
            AppError::PollTimeout(msg) => {
                (StatusCode::GATEWAY_TIMEOUT, "POLL_TIMEOUT", msg.clone())
            }
            AppError::RunFailed(msg) => {
                (StatusCode::INTERNAL_SERVER_ERROR, "RUN_FAILED", msg.clone())
            }
            AppError::Validation(msg) => {
                (StatusCode::BAD_REQUEST, "VALIDATION_ERROR", msg.clone())
            }
            AppError::Internal(msg) => {
                (StatusCode::INTERNAL_SERVER_ERROR, "INTERNAL_ERROR", msg.clone())
            }
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, code, message) = self.parts();
        if status.is_server_error() {
            tracing::warn!(code, "{message}");
        }

        let body = json!({
            "data": null,
            "meta": {
                "request_id": "",
                "timestamp": chrono::Utc::now().to_rfc3339(),
                "response_time_ms": 0
            },
            "errors": [{
                "code": code,
                "message": message,
            }]
        });

        (
            status,
            [(axum::http::header::CONTENT_TYPE, "application/json")],
            body.to_string(),
        )
            .into_response()
    }
}
