//! Event types for the Stepwise run event bus.
//!
//! `RunEvent` is broadcast as runs progress. All variants are Clone + Send +
//! Sync for use with tokio broadcast channels.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::workflow::{RunStatus, StepKind, StepStatus};

/// Events emitted while driving workflow runs.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum RunEvent {
    /// A run was created and its body is about to be driven.
    RunStarted { run_id: Uuid, workflow_name: String },

    /// A non-terminal run is being re-driven by replay.
    RunResumed { run_id: Uuid, workflow_name: String },

    /// A step attempt was recorded as running.
    StepAttemptStarted {
        run_id: Uuid,
        step_name: String,
        kind: StepKind,
        attempt: u32,
    },

    /// A step attempt finished.
    StepAttemptFinished {
        run_id: Uuid,
        step_name: String,
        attempt: u32,
        status: StepStatus,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        error: Option<String>,
    },

    /// A run reached a terminal status.
    RunFinished {
        run_id: Uuid,
        status: RunStatus,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        error: Option<String>,
    },
}

impl RunEvent {
    pub fn run_id(&self) -> Uuid {
        match self {
            Self::RunStarted { run_id, .. }
            | Self::RunResumed { run_id, .. }
            | Self::StepAttemptStarted { run_id, .. }
            | Self::StepAttemptFinished { run_id, .. }
            | Self::RunFinished { run_id, .. } => *run_id,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_tagging() {
        let event = RunEvent::RunFinished {
            run_id: Uuid::nil(),
            status: RunStatus::Cancelled,
            error: Some("value -5 is negative".to_string()),
        };
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["type"], "run_finished");
        assert_eq!(json["status"], "cancelled");
        assert_eq!(event.run_id(), Uuid::nil());
    }
}
