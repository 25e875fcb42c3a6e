//! Built-in demo workflows and the targets they call, plus loading of
//! simple workflows from the configured directory.

pub mod code;
pub mod targets;

use std::path::Path;

use stepwise_core::workflow::definition::{
    discover_workflow_files, load_simple_workflow, parse_simple_workflow_yaml,
};
use stepwise_core::workflow::{TargetRegistry, WorkflowError, WorkflowRegistry};

pub const ORG_ONBOARDING_YAML: &str = include_str!("../../workflows/org-onboarding.yaml");
pub const SEQUENTIAL_INVITE_YAML: &str = include_str!("../../workflows/sequential-invite.yaml");

/// Registry holding every demo target.
pub fn builtin_targets() -> TargetRegistry {
    let mut registry = TargetRegistry::new();
    targets::register(&mut registry);
    registry
}

/// Registry holding the demo code workflows and the bundled simple workflows.
pub fn builtin_workflows(targets: &TargetRegistry) -> Result<WorkflowRegistry, WorkflowError> {
    let mut registry = WorkflowRegistry::new();

    registry.register_fn(
        "onboarding",
        Some("Create a user profile, wait, then send a welcome email"),
        code::onboarding,
    )?;
    registry.register_fn(
        "happy-retry",
        Some("A step that fails once and succeeds on retry"),
        code::happy_retry,
    )?;
    registry.register_fn(
        "unhappy-retry",
        Some("A step that exhausts its retries, or a cancel on negative input"),
        code::unhappy_retry,
    )?;

    for yaml in [ORG_ONBOARDING_YAML, SEQUENTIAL_INVITE_YAML] {
        registry.register_simple(parse_simple_workflow_yaml(yaml)?, targets)?;
    }

    Ok(registry)
}

/// Register every simple workflow file in `dir`. Files that fail to parse or
/// validate are logged and skipped. Returns the number registered.
pub fn load_workflow_dir(
    registry: &mut WorkflowRegistry,
    targets: &TargetRegistry,
    dir: &Path,
) -> usize {
    let files = match discover_workflow_files(dir) {
        Ok(files) => files,
        Err(e) => {
            tracing::warn!(dir = %dir.display(), "failed to scan workflow directory: {e}");
            return 0;
        }
    };

    let mut loaded = 0;
    for path in files {
        let result = load_simple_workflow(&path)
            .and_then(|definition| registry.register_simple(definition, targets));
        match result {
            Ok(()) => loaded += 1,
            Err(e) => tracing::warn!(file = %path.display(), "skipping workflow: {e}"),
        }
    }

    if loaded > 0 {
        tracing::info!(dir = %dir.display(), count = loaded, "loaded workflow files");
    }
    loaded
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    use serde_json::{Value, json};
    use stepwise_core::event::EventBus;
    use stepwise_core::repository::{BoxWorkflowRepository, InMemoryWorkflowRepository};
    use stepwise_core::workflow::{PollOptions, RunController};
    use stepwise_core::workflow::poll::run_and_wait;
    use stepwise_types::workflow::{RunStatus, StepStatus};

    fn controller() -> RunController {
        let targets = builtin_targets();
        let workflows = builtin_workflows(&targets).unwrap();
        RunController::new(
            BoxWorkflowRepository::new(InMemoryWorkflowRepository::new()),
            workflows,
            targets,
            EventBus::default(),
        )
    }

    fn poll() -> PollOptions {
        PollOptions {
            interval: Duration::from_millis(10),
            timeout: Duration::from_secs(15),
        }
    }

    #[test]
    fn builtin_workflows_register() {
        let targets = builtin_targets();
        let registry = builtin_workflows(&targets).unwrap();
        let names: Vec<String> = registry.list().into_iter().map(|s| s.name).collect();
        assert_eq!(
            names,
            vec![
                "happy-retry",
                "onboarding",
                "org-onboarding",
                "sequential-invite",
                "unhappy-retry"
            ]
        );
    }

    #[tokio::test]
    async fn happy_retry_succeeds_on_second_attempt() {
        let report = run_and_wait(&controller(), "happy-retry", json!({ "value": 21 }), &poll())
            .await
            .unwrap();

        assert_eq!(report.status, RunStatus::Completed);
        let output = report.output.unwrap();
        assert_eq!(output["result"], 42);
        assert_eq!(output["finalAttempt"], 2);
        assert_eq!(output["message"], "Workflow succeeded after 2 attempts");
        assert_eq!(report.steps.len(), 2);
        assert_eq!(report.steps[0].status, StepStatus::Failed);
        assert_eq!(report.steps[1].status, StepStatus::Succeeded);
    }

    #[tokio::test]
    async fn unhappy_retry_exhausts_three_attempts() {
        let report = run_and_wait(&controller(), "unhappy-retry", json!({ "value": 1 }), &poll())
            .await
            .unwrap();

        assert_eq!(report.status, RunStatus::Failed);
        assert_eq!(
            report.error.unwrap().message,
            "[UNHAPPY] Attempt 3 failed - will exhaust retries"
        );
        assert_eq!(report.steps.len(), 3);
        assert!(report.steps.iter().all(|s| s.status == StepStatus::Failed));
    }

    #[tokio::test]
    async fn unhappy_retry_cancels_negative_value() {
        let report = run_and_wait(&controller(), "unhappy-retry", json!({ "value": -5 }), &poll())
            .await
            .unwrap();

        assert_eq!(report.status, RunStatus::Cancelled);
        assert_eq!(
            report.error.unwrap().message,
            "Workflow cancelled: value -5 is negative"
        );
        assert!(report.steps.is_empty());
    }

    #[tokio::test]
    async fn org_onboarding_enterprise_creates_owner() {
        let input = json!({
            "name": "Acme",
            "email": "owner@acme.test",
            "plan": "enterprise",
            "memberEmails": ["a@acme.test", "b@acme.test"],
        });
        let report = run_and_wait(&controller(), "org-onboarding", input, &poll())
            .await
            .unwrap();

        assert_eq!(report.status, RunStatus::Completed);
        let output = report.output.unwrap();
        assert!(output["orgId"].as_str().unwrap().starts_with("org-"));
        assert!(output["ownerId"].as_str().unwrap().starts_with("owner-"));

        let names: Vec<&str> = report.steps.iter().map(|s| s.step_name.as_str()).collect();
        assert_eq!(names.first(), Some(&"Create organization"));
        assert!(names.contains(&"Create owner"));
        assert!(names.contains(&"Invite member a@acme.test"));
        assert!(names.contains(&"Invite member b@acme.test"));
        assert_eq!(names.last(), Some(&"Send welcome email"));
    }

    #[tokio::test]
    async fn org_onboarding_free_plan_skips_owner() {
        let input = json!({
            "name": "Tiny",
            "email": "solo@tiny.test",
            "plan": "free",
            "memberEmails": [],
        });
        let report = run_and_wait(&controller(), "org-onboarding", input, &poll())
            .await
            .unwrap();

        assert_eq!(report.status, RunStatus::Completed);
        assert!(report.output.unwrap()["ownerId"].is_null());
        assert!(report.steps.iter().all(|s| s.step_name != "Create owner"));
    }

    #[tokio::test]
    async fn sequential_invite_sleeps_between_members() {
        let input = json!({
            "orgId": "org-1",
            "memberEmails": ["a@x.test", "b@x.test"],
            "delayMs": 20,
        });
        let report = run_and_wait(&controller(), "sequential-invite", input, &poll())
            .await
            .unwrap();

        assert_eq!(report.status, RunStatus::Completed);
        assert_eq!(report.output.unwrap()["invitedCount"].as_f64(), Some(2.0));
        let names: Vec<&str> = report.steps.iter().map(|s| s.step_name.as_str()).collect();
        assert_eq!(
            names,
            vec![
                "Invite member a@x.test",
                "Wait after invitation for member a@x.test",
                "Invite member b@x.test",
                "Wait after invitation for member b@x.test",
            ]
        );
    }

    #[tokio::test]
    async fn sequential_invite_skips_sleep_without_positive_delay() {
        for delay in [json!(-5), json!(0), Value::Null] {
            let input = json!({
                "orgId": "org-1",
                "memberEmails": ["a@x.test", "b@x.test"],
                "delayMs": delay,
            });
            let report = run_and_wait(&controller(), "sequential-invite", input, &poll())
                .await
                .unwrap();

            assert_eq!(report.status, RunStatus::Completed, "delayMs {delay}");
            let names: Vec<&str> = report.steps.iter().map(|s| s.step_name.as_str()).collect();
            assert_eq!(names, vec!["Invite member a@x.test", "Invite member b@x.test"]);
        }
    }

    #[tokio::test]
    async fn onboarding_sends_welcome_after_sleep() {
        let report = run_and_wait(
            &controller(),
            "onboarding",
            json!({ "email": "ada@example.com" }),
            &poll(),
        )
        .await
        .unwrap();

        assert_eq!(report.status, RunStatus::Completed);
        assert_eq!(report.output.unwrap()["email"], "ada@example.com");
        let names: Vec<&str> = report.steps.iter().map(|s| s.step_name.as_str()).collect();
        assert_eq!(
            names,
            vec![
                "Create user profile in database for ada@example.com",
                "Generate personalized welcome message",
                "Sleeping for 5 seconds",
                "Send welcome email to user",
            ]
        );
    }

    #[test]
    fn load_workflow_dir_skips_invalid_files() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(
            dir.path().join("notify.yaml"),
            "name: notify\nsteps:\n  - type: step\n    name: Send\n    rpc: sendEmail\n    input:\n      to: input.to\n",
        )
        .unwrap();
        std::fs::write(
            dir.path().join("broken.yaml"),
            "name: broken\nsteps:\n  - type: step\n    name: Nope\n    rpc: missingTarget\n",
        )
        .unwrap();

        let targets = builtin_targets();
        let mut registry = WorkflowRegistry::new();
        let loaded = load_workflow_dir(&mut registry, &targets, dir.path());

        assert_eq!(loaded, 1);
        assert!(registry.contains("notify"));
        assert!(!registry.contains("broken"));
    }
}
