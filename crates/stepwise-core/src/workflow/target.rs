//! Step targets and the name-indexed target registry.
//!
//! A step target is the unit of work behind `do`: a named handler that takes
//! JSON arguments plus the [`StepInvocation`] describing which run, step and
//! attempt is calling it. Targets are registered once at startup and resolved
//! by string name; there is no reflection.

use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

/// Which run, step and attempt a target is being invoked for.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StepInvocation {
    pub run_id: Uuid,
    pub step_name: String,
    pub attempt_count: u32,
}

/// Failure reported by a step target. The message is what the step history
/// records and what a run's error becomes once retries are exhausted.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{message}")]
pub struct TargetError {
    pub message: String,
}

impl TargetError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

impl From<String> for TargetError {
    fn from(message: String) -> Self {
        Self { message }
    }
}

impl From<&str> for TargetError {
    fn from(message: &str) -> Self {
        Self::new(message)
    }
}

// ---------------------------------------------------------------------------
// StepTarget
// ---------------------------------------------------------------------------

/// A unit of work a step can invoke.
pub trait StepTarget: Send + Sync {
    fn invoke(
        &self,
        args: Value,
        step: StepInvocation,
    ) -> impl Future<Output = Result<Value, TargetError>> + Send;
}

/// Object-safe version of [`StepTarget`] with a boxed future.
pub trait StepTargetDyn: Send + Sync {
    fn invoke_boxed(
        &self,
        args: Value,
        step: StepInvocation,
    ) -> Pin<Box<dyn Future<Output = Result<Value, TargetError>> + Send + '_>>;
}

impl<T: StepTarget> StepTargetDyn for T {
    fn invoke_boxed(
        &self,
        args: Value,
        step: StepInvocation,
    ) -> Pin<Box<dyn Future<Output = Result<Value, TargetError>> + Send + '_>> {
        Box::pin(self.invoke(args, step))
    }
}

/// Adapts an async closure `Fn(args, invocation) -> Result<Value, TargetError>`.
pub struct FnTarget<F> {
    f: F,
}

impl<F> FnTarget<F> {
    pub fn new(f: F) -> Self {
        Self { f }
    }
}

impl<F, Fut> StepTarget for FnTarget<F>
where
    F: Fn(Value, StepInvocation) -> Fut + Send + Sync,
    Fut: Future<Output = Result<Value, TargetError>> + Send,
{
    fn invoke(
        &self,
        args: Value,
        step: StepInvocation,
    ) -> impl Future<Output = Result<Value, TargetError>> + Send {
        (self.f)(args, step)
    }
}

/// Adapts an inline, argument-less async closure used directly in a body.
pub(crate) struct InlineTarget<F> {
    f: F,
}

impl<F> InlineTarget<F> {
    pub(crate) fn new(f: F) -> Self {
        Self { f }
    }
}

impl<F, Fut> StepTarget for InlineTarget<F>
where
    F: Fn() -> Fut + Send + Sync,
    Fut: Future<Output = Result<Value, TargetError>> + Send,
{
    fn invoke(
        &self,
        _args: Value,
        _step: StepInvocation,
    ) -> impl Future<Output = Result<Value, TargetError>> + Send {
        (self.f)()
    }
}

// ---------------------------------------------------------------------------
// TargetRegistry
// ---------------------------------------------------------------------------

/// Shared handle to a registered target.
pub type SharedTarget = Arc<dyn StepTargetDyn>;

/// Registry of step targets, indexed by name.
#[derive(Clone, Default)]
pub struct TargetRegistry {
    targets: HashMap<String, SharedTarget>,
}

impl TargetRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a target under the given name, replacing any previous one.
    pub fn register<T: StepTarget + 'static>(&mut self, name: impl Into<String>, target: T) {
        self.targets.insert(name.into(), Arc::new(target));
    }

    /// Register an async closure as a target.
    pub fn register_fn<F, Fut>(&mut self, name: impl Into<String>, f: F)
    where
        F: Fn(Value, StepInvocation) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Value, TargetError>> + Send + 'static,
    {
        self.register(name, FnTarget::new(f));
    }

    pub fn get(&self, name: &str) -> Option<SharedTarget> {
        self.targets.get(name).cloned()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.targets.contains_key(name)
    }

    /// Registered target names, sorted.
    pub fn list_names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.targets.keys().map(|s| s.as_str()).collect();
        names.sort_unstable();
        names
    }
}

impl std::fmt::Debug for TargetRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TargetRegistry")
            .field("targets", &self.list_names())
            .finish()
    }
}
