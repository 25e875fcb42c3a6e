//! Demo step targets.
//!
//! Stand-ins for the services a real deployment would call (user store, mail
//! relay, organization service). Each returns a plausible record and logs the
//! call; the retry demos fail on purpose.

use chrono::Utc;
use serde_json::{Value, json};
use uuid::Uuid;

use stepwise_core::workflow::{StepInvocation, TargetError, TargetRegistry};

/// Register every demo target.
pub fn register(targets: &mut TargetRegistry) {
    targets.register_fn("createUserProfile", create_user_profile);
    targets.register_fn("sendEmail", send_email);
    targets.register_fn("flakyHappyRPC", flaky_happy);
    targets.register_fn("alwaysFailsRPC", always_fails);
    targets.register_fn("createOrg", create_org);
    targets.register_fn("createOwner", create_owner);
    targets.register_fn("inviteMember", invite_member);
    targets.register_fn("sendWelcomeEmail", send_welcome_email);
}

fn required_str<'a>(args: &'a Value, field: &str) -> Result<&'a str, TargetError> {
    args.get(field)
        .and_then(Value::as_str)
        .ok_or_else(|| TargetError::new(format!("missing string argument '{field}'")))
}

fn short_id(prefix: &str) -> String {
    format!("{prefix}-{}", Uuid::now_v7().simple())
}

async fn create_user_profile(args: Value, _step: StepInvocation) -> Result<Value, TargetError> {
    let email = required_str(&args, "email")?;
    let name = email.split('@').next().unwrap_or(email);

    tracing::info!(email, "creating user profile");
    Ok(json!({
        "id": short_id("user"),
        "email": email,
        "name": name,
        "createdAt": Utc::now().to_rfc3339(),
    }))
}

async fn send_email(args: Value, _step: StepInvocation) -> Result<Value, TargetError> {
    let to = required_str(&args, "to")?;
    let subject = args.get("subject").and_then(Value::as_str).unwrap_or("");

    tracing::info!(to, subject, "sending email");
    Ok(json!({
        "sent": true,
        "messageId": short_id("msg"),
        "to": to,
    }))
}

/// Fails its first attempt, then doubles `value`.
async fn flaky_happy(args: Value, step: StepInvocation) -> Result<Value, TargetError> {
    if step.attempt_count == 1 {
        return Err(TargetError::new(
            "[HAPPY] First attempt fails - will retry and succeed",
        ));
    }

    let value = args.get("value").and_then(Value::as_i64).unwrap_or(0);
    Ok(json!({
        "result": value * 2,
        "attempt": step.attempt_count,
    }))
}

/// Fails every attempt.
async fn always_fails(_args: Value, step: StepInvocation) -> Result<Value, TargetError> {
    Err(TargetError::new(format!(
        "[UNHAPPY] Attempt {} failed - will exhaust retries",
        step.attempt_count
    )))
}

async fn create_org(args: Value, _step: StepInvocation) -> Result<Value, TargetError> {
    let name = required_str(&args, "name")?;

    tracing::info!(name, "creating organization");
    Ok(json!({
        "id": short_id("org"),
        "name": name,
        "createdAt": Utc::now().to_rfc3339(),
    }))
}

async fn create_owner(args: Value, _step: StepInvocation) -> Result<Value, TargetError> {
    let org_id = required_str(&args, "orgId")?;
    let email = required_str(&args, "email")?;

    Ok(json!({
        "id": short_id("owner"),
        "orgId": org_id,
        "email": email,
    }))
}

async fn invite_member(args: Value, _step: StepInvocation) -> Result<Value, TargetError> {
    let org_id = required_str(&args, "orgId")?;
    let email = required_str(&args, "email")?;

    tracing::info!(org_id, email, "inviting member");
    Ok(json!({
        "id": short_id("invite"),
        "orgId": org_id,
        "email": email,
        "status": "invited",
    }))
}

async fn send_welcome_email(args: Value, _step: StepInvocation) -> Result<Value, TargetError> {
    let to = required_str(&args, "to")?;

    tracing::info!(to, "sending welcome email");
    Ok(json!({
        "sent": true,
        "messageId": short_id("msg"),
    }))
}
