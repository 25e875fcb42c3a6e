//! Retry policy evaluation for step execution.
//!
//! Pure mapping from a [`RetryPolicy`] to an attempt budget and a fixed delay.
//! There is no backoff: every retry waits the same `retry_delay`.

use std::time::Duration;

use stepwise_types::workflow::RetryPolicy;

/// Attempt budget derived from a retry policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPlan {
    /// Total attempts allowed (`retries + 1`).
    pub max_attempts: u32,
    /// Wait between a failed attempt and the next one.
    pub delay: Duration,
}

// ---------------------------------------------------------------------------
// RetryHandler
// ---------------------------------------------------------------------------

/// Stateless retry evaluator. All logic lives in associated functions that
/// take the policy as a parameter.
pub struct RetryHandler;

impl RetryHandler {
    /// Derive the attempt budget and delay. A missing policy means no retries.
    pub fn plan(policy: Option<&RetryPolicy>) -> RetryPlan {
        let policy = policy.copied().unwrap_or_default();
        RetryPlan {
            max_attempts: policy.retries.saturating_add(1),
            delay: policy
                .retry_delay
                .map(|d| d.to_duration())
                .unwrap_or(Duration::ZERO),
        }
    }

    /// Whether another attempt is allowed after `attempt` (1-based) failed.
    pub fn should_retry(plan: &RetryPlan, attempt: u32) -> bool {
        attempt < plan.max_attempts
    }
}
