//! Executes simple-workflow definitions on top of a [`WorkflowContext`].
//!
//! Variables live in a flat scope: `input` holds the run input and every
//! declared `bind` starts out as `null`, so expressions may read a binding
//! from a branch that was not taken. Loop bodies run on a copy of the scope
//! with the loop variable added; bindings made inside a `for_each` are
//! written back, bindings inside a `parallel` branch stay local to it.

use std::collections::HashSet;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use serde_json::{Map, Value};
use stepwise_types::simple::{SimpleNode, SimpleStep, SimpleWorkflowDefinition};

use super::context::{WorkflowContext, WorkflowInterrupt, join_all};
use super::expression::WorkflowEvaluator;
use super::validator::{INPUT_VARIABLE, collect_binds};

type Scope = Map<String, Value>;

type NodesFuture<'a> = Pin<Box<dyn Future<Output = Result<(), WorkflowInterrupt>> + Send + 'a>>;

/// Run one pass of a simple workflow body.
pub(crate) async fn run_simple(
    def: Arc<SimpleWorkflowDefinition>,
    ctx: WorkflowContext,
    input: Value,
) -> Result<Value, WorkflowInterrupt> {
    let mut binds = HashSet::new();
    collect_binds(&def.steps, &mut binds);

    let mut scope: Scope = binds.into_iter().map(|b| (b, Value::Null)).collect();
    scope.insert(INPUT_VARIABLE.to_string(), input);

    run_nodes(&ctx, &def.steps, &mut scope).await?;

    match &def.output {
        Some(fields) => {
            let mut output = Map::new();
            for (field, expr) in fields {
                output.insert(field.clone(), evaluate(expr, &scope)?);
            }
            Ok(Value::Object(output))
        }
        None => {
            scope.remove(INPUT_VARIABLE);
            Ok(Value::Object(scope))
        }
    }
}

fn run_nodes<'a>(ctx: &'a WorkflowContext, nodes: &'a [SimpleNode], scope: &'a mut Scope) -> NodesFuture<'a> {
    Box::pin(async move {
        for node in nodes {
            run_node(ctx, node, scope).await?;
        }
        Ok(())
    })
}

async fn run_node(ctx: &WorkflowContext, node: &SimpleNode, scope: &mut Scope) -> Result<(), WorkflowInterrupt> {
    match node {
        SimpleNode::Step(step) => {
            let result = run_step(ctx, step, scope).await?;
            if let Some(bind) = &step.bind {
                scope.insert(bind.clone(), result);
            }
        }
        SimpleNode::If {
            condition,
            then,
            otherwise,
        } => {
            let branch = if evaluate_bool(condition, scope)? { then } else { otherwise };
            run_nodes(ctx, branch, scope).await?;
        }
        SimpleNode::ForEach { items, item, steps } => {
            let shadowed = scope.get(item).cloned();
            for value in evaluate_items(items, scope)? {
                let mut inner = scope.clone();
                inner.insert(item.clone(), value);
                run_nodes(ctx, steps, &mut inner).await?;
                match &shadowed {
                    Some(previous) => inner.insert(item.clone(), previous.clone()),
                    None => inner.remove(item),
                };
                *scope = inner;
            }
        }
        SimpleNode::Parallel {
            items,
            item,
            step,
            bind,
        } => {
            let branches = evaluate_items(items, scope)?.into_iter().map(|value| {
                let mut branch = scope.clone();
                branch.insert(item.clone(), value);
                async move { run_step(ctx, step, &branch).await }
            });
            let results = join_all(branches).await?;
            if let Some(bind) = bind {
                scope.insert(bind.clone(), Value::Array(results));
            }
        }
        SimpleNode::Sleep { name, duration } => {
            let name = render(name, scope)?;
            let duration = render(duration, scope)?;
            ctx.sleep(name, &duration).await?;
        }
    }
    Ok(())
}

async fn run_step(ctx: &WorkflowContext, step: &SimpleStep, scope: &Scope) -> Result<Value, WorkflowInterrupt> {
    let name = render(&step.name, scope)?;
    let mut args = Map::new();
    for (field, expr) in &step.input {
        args.insert(field.clone(), evaluate(expr, scope)?);
    }
    ctx.rpc(name, &step.rpc, Value::Object(args), step.retry).await
}

// ---------------------------------------------------------------------------
// Expression helpers
// ---------------------------------------------------------------------------

// The evaluator is built per call and never held across an await.

fn evaluate(expr: &str, scope: &Scope) -> Result<Value, WorkflowInterrupt> {
    WorkflowEvaluator::new()
        .evaluate_value(expr, &Value::Object(scope.clone()))
        .map_err(|e| WorkflowInterrupt::body(e.to_string()))
}

fn evaluate_bool(expr: &str, scope: &Scope) -> Result<bool, WorkflowInterrupt> {
    WorkflowEvaluator::new()
        .evaluate_bool(expr, &Value::Object(scope.clone()))
        .map_err(|e| WorkflowInterrupt::body(e.to_string()))
}

fn render(template: &str, scope: &Scope) -> Result<String, WorkflowInterrupt> {
    WorkflowEvaluator::new()
        .render_template(template, &Value::Object(scope.clone()))
        .map_err(|e| WorkflowInterrupt::body(e.to_string()))
}

/// Evaluate a collection expression. `null` iterates as empty.
fn evaluate_items(expr: &str, scope: &Scope) -> Result<Vec<Value>, WorkflowInterrupt> {
    match evaluate(expr, scope)? {
        Value::Array(items) => Ok(items),
        Value::Null => Ok(Vec::new()),
        other => Err(WorkflowInterrupt::body(format!(
            "items expression '{expr}' must evaluate to an array, got {other}"
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::EventBus;
    use crate::repository::boxed::BoxWorkflowRepository;
    use crate::repository::memory::InMemoryWorkflowRepository;
    use crate::repository::workflow::WorkflowRepository;
    use crate::workflow::checkpoint::CheckpointManager;
    use crate::workflow::context::EngineCheckpoints;
    use crate::workflow::definition::parse_simple_workflow_yaml;
    use crate::workflow::target::{TargetError, TargetRegistry};
    use serde_json::json;
    use stepwise_types::workflow::{StepStatus, WorkflowRun};
    use tokio_util::sync::CancellationToken;

    fn targets() -> TargetRegistry {
        let mut targets = TargetRegistry::new();
        targets.register_fn("createOrg", |args: Value, _| async move {
            Ok(json!({ "id": format!("org-{}", args["name"].as_str().unwrap_or("?")) }))
        });
        targets.register_fn("createOwner", |_, _| async { Ok(json!({ "id": "owner-1" })) });
        targets.register_fn("inviteMember", |args: Value, _| async move {
            let email = args["email"].as_str().unwrap_or_default().to_string();
            if email.starts_with("bad") {
                return Err(TargetError::new(format!("cannot invite {email}")));
            }
            Ok(json!({ "invited": email }))
        });
        targets
    }

    async fn run(yaml: &str, input: Value) -> (Result<Value, WorkflowInterrupt>, Vec<(String, StepStatus)>) {
        let def = parse_simple_workflow_yaml(yaml).unwrap();
        let checkpoints: Arc<EngineCheckpoints> = Arc::new(CheckpointManager::new(
            BoxWorkflowRepository::new(InMemoryWorkflowRepository::new()),
            EventBus::new(64),
        ));
        let run = WorkflowRun::pending(&def.name, input.clone());
        checkpoints.create_run(&run).await.unwrap();
        checkpoints.mark_running(&run).await.unwrap();

        let ctx = WorkflowContext::new(
            &run,
            Arc::clone(&checkpoints),
            Arc::new(targets()),
            CancellationToken::new(),
        );
        let result = run_simple(Arc::new(def), ctx, input).await;
        let steps = checkpoints
            .repo()
            .list_steps(&run.id)
            .await
            .unwrap()
            .into_iter()
            .map(|s| (s.step_name, s.status))
            .collect();
        (result, steps)
    }

    const ORG_ONBOARDING: &str = r#"
name: org-onboarding
steps:
  - type: step
    name: Create organization
    rpc: createOrg
    input: { name: input.orgName }
    bind: org
  - type: if
    condition: input.plan == 'enterprise'
    then:
      - type: step
        name: Create owner
        rpc: createOwner
        input: { orgId: org.id }
        bind: owner
  - type: parallel
    items: input.memberEmails
    as: email
    step:
      name: "Invite member {{ email }}"
      rpc: inviteMember
      input: { orgId: org.id, email: email }
    bind: invites
output:
  orgId: org.id
  ownerId: owner.id
  invites: invites
"#;

    #[tokio::test]
    async fn branch_and_fan_out_produce_output() {
        let input = json!({ "orgName": "acme", "plan": "enterprise", "memberEmails": ["a@x.io", "b@x.io"] });
        let (result, steps) = run(ORG_ONBOARDING, input).await;

        assert_eq!(
            result.unwrap(),
            json!({
                "orgId": "org-acme",
                "ownerId": "owner-1",
                "invites": [{ "invited": "a@x.io" }, { "invited": "b@x.io" }]
            })
        );
        assert_eq!(steps.len(), 4);
        assert!(steps.iter().all(|(_, status)| *status == StepStatus::Succeeded));
        assert_eq!(steps[0].0, "Create organization");
        assert_eq!(steps[1].0, "Create owner");
    }

    #[tokio::test]
    async fn untaken_branch_leaves_binding_null() {
        let input = json!({ "orgName": "acme", "plan": "free", "memberEmails": [] });
        let (result, steps) = run(ORG_ONBOARDING, input).await;

        let output = result.unwrap();
        assert_eq!(output["ownerId"], Value::Null);
        assert_eq!(output["invites"], json!([]));
        assert_eq!(steps.len(), 1);
    }

    #[tokio::test]
    async fn failing_branch_lets_siblings_finish() {
        let input = json!({ "orgName": "acme", "plan": "free", "memberEmails": ["bad@x.io", "ok@x.io"] });
        let (result, steps) = run(ORG_ONBOARDING, input).await;

        match result.unwrap_err() {
            WorkflowInterrupt::StepFailed { step_name, message, .. } => {
                assert_eq!(step_name, "Invite member bad@x.io");
                assert_eq!(message, "cannot invite bad@x.io");
            }
            other => panic!("unexpected interrupt: {other:?}"),
        }
        assert!(steps.contains(&("Invite member ok@x.io".to_string(), StepStatus::Succeeded)));
        assert!(steps.contains(&("Invite member bad@x.io".to_string(), StepStatus::Failed)));
    }

    #[tokio::test]
    async fn for_each_runs_in_order_and_writes_back_binds() {
        let yaml = r#"
name: sequential-invite
steps:
  - type: for_each
    items: input.emails
    as: email
    steps:
      - type: step
        name: "Invite {{ email }}"
        rpc: inviteMember
        input: { email: email }
        bind: last
"#;
        let (result, steps) = run(yaml, json!({ "emails": ["a@x.io", "b@x.io", "c@x.io"] })).await;

        assert_eq!(result.unwrap(), json!({ "last": { "invited": "c@x.io" } }));
        let names: Vec<&str> = steps.iter().map(|(n, _)| n.as_str()).collect();
        assert_eq!(names, vec!["Invite a@x.io", "Invite b@x.io", "Invite c@x.io"]);
    }

    #[tokio::test]
    async fn non_array_items_fail_the_body() {
        let yaml = r#"
name: wf
steps:
  - type: for_each
    items: input.emails
    as: email
    steps:
      - { type: step, name: "Invite {{ email }}", rpc: inviteMember }
"#;
        let (result, steps) = run(yaml, json!({ "emails": "a@x.io" })).await;

        assert!(matches!(result, Err(WorkflowInterrupt::Body(msg)) if msg.contains("must evaluate to an array")));
        assert!(steps.is_empty());
    }

    #[tokio::test]
    async fn templated_sleep_is_recorded() {
        let yaml = r#"
name: wf
steps:
  - { type: sleep, name: pause, duration: "{{ input.delayMs }}ms" }
"#;
        let (result, steps) = run(yaml, json!({ "delayMs": 5 })).await;

        assert_eq!(result.unwrap(), json!({}));
        assert_eq!(steps, vec![("pause".to_string(), StepStatus::Succeeded)]);
    }
}
