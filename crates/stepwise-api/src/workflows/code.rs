//! Workflows written as ordinary async functions over a [`WorkflowContext`].

use serde_json::{Value, json};

use stepwise_core::workflow::{WorkflowContext, WorkflowInterrupt};
use stepwise_types::duration::DurationLiteral;
use stepwise_types::workflow::RetryPolicy;

/// Create a profile, pause, then send a welcome email.
pub async fn onboarding(ctx: WorkflowContext, input: Value) -> Result<Value, WorkflowInterrupt> {
    let email = input
        .get("email")
        .and_then(Value::as_str)
        .ok_or_else(|| WorkflowInterrupt::body("input.email is required"))?
        .to_string();

    let profile = ctx
        .rpc(
            format!("Create user profile in database for {email}"),
            "createUserProfile",
            json!({ "email": email }),
            None,
        )
        .await?;

    let address = &email;
    let welcome = ctx
        .step(
            "Generate personalized welcome message",
            move || async move {
                Ok(json!(format!(
                    "Welcome {address}! Your onboarding is in progress."
                )))
            },
            None,
        )
        .await?;

    ctx.sleep("Sleeping for 5 seconds", "5s").await?;

    ctx.rpc(
        "Send welcome email to user",
        "sendEmail",
        json!({ "to": email, "subject": "Welcome!", "body": welcome }),
        None,
    )
    .await?;

    Ok(json!({ "userId": profile["id"], "email": email }))
}

/// One step that fails once and succeeds on its first retry.
pub async fn happy_retry(ctx: WorkflowContext, input: Value) -> Result<Value, WorkflowInterrupt> {
    let value = input.get("value").and_then(Value::as_i64).unwrap_or(0);

    let result = ctx
        .rpc(
            "Step that fails once then succeeds",
            "flakyHappyRPC",
            json!({ "value": value }),
            Some(RetryPolicy::new(2, DurationLiteral::seconds(1))),
        )
        .await?;

    let attempt = result["attempt"].as_u64().unwrap_or(1);
    Ok(json!({
        "result": result["result"],
        "finalAttempt": attempt,
        "message": format!("Workflow succeeded after {attempt} attempts"),
    }))
}

/// Cancels on a negative `value`; otherwise runs a step that exhausts its retries.
pub async fn unhappy_retry(ctx: WorkflowContext, input: Value) -> Result<Value, WorkflowInterrupt> {
    let value = input.get("value").and_then(Value::as_i64).unwrap_or(0);

    if value < 0 {
        match ctx
            .cancel(format!("Workflow cancelled: value {value} is negative"))
            .await?
        {}
    }

    let result = ctx
        .rpc(
            "Step that always fails",
            "alwaysFailsRPC",
            json!({ "value": value }),
            Some(RetryPolicy::new(2, DurationLiteral::seconds(1))),
        )
        .await?;

    Ok(json!({ "result": result }))
}
