//! Workflow registration: code-defined bodies and simple-DSL definitions.
//!
//! Every workflow a run controller can start lives in a [`WorkflowRegistry`]
//! under a unique name. Code workflows are async closures over a
//! [`WorkflowContext`]; simple workflows are parsed from YAML, validated
//! against the target registry at registration time and executed by the
//! interpreter.

use std::collections::HashMap;
use std::future::Future;
use std::path::{Path, PathBuf};
use std::pin::Pin;
use std::sync::Arc;

use serde::Serialize;
use serde_json::Value;
use stepwise_types::simple::SimpleWorkflowDefinition;
use thiserror::Error;

use super::context::{WorkflowContext, WorkflowInterrupt};
use super::interpreter;
use super::target::TargetRegistry;
use super::validator::validate_simple_workflow;

// ---------------------------------------------------------------------------
// Error type
// ---------------------------------------------------------------------------

/// Errors raised while parsing or registering workflows.
#[derive(Debug, Error)]
pub enum WorkflowError {
    /// YAML/JSON parse failure.
    #[error("parse error: {0}")]
    ParseError(String),

    /// Simple-DSL rules violated. Reported at registration, never at run time.
    #[error("workflow '{name}' is invalid: {}", .issues.join("; "))]
    ValidationError { name: String, issues: Vec<String> },

    #[error("workflow '{0}' is already registered")]
    DuplicateWorkflow(String),

    #[error("workflow name '{0}' contains invalid characters (only alphanumeric, hyphens and underscores allowed)")]
    InvalidName(String),

    /// Filesystem I/O failure.
    #[error("I/O error: {0}")]
    IoError(#[from] std::io::Error),
}

// ---------------------------------------------------------------------------
// Bodies and entries
// ---------------------------------------------------------------------------

/// Future returned by a workflow body.
pub type WorkflowFuture = Pin<Box<dyn Future<Output = Result<Value, WorkflowInterrupt>> + Send>>;

/// A workflow body: called with the run's context and input on every pass.
pub type WorkflowBody = Arc<dyn Fn(WorkflowContext, Value) -> WorkflowFuture + Send + Sync>;

/// How a workflow was defined.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkflowKind {
    Code,
    Simple,
}

/// A registered workflow.
#[derive(Clone)]
pub struct WorkflowEntry {
    pub name: String,
    pub description: Option<String>,
    pub tags: Vec<String>,
    pub kind: WorkflowKind,
    pub body: WorkflowBody,
    /// Present for simple workflows, so the graph can be inspected.
    pub definition: Option<Arc<SimpleWorkflowDefinition>>,
}

/// Listing view of a registered workflow.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkflowSummary {
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    pub tags: Vec<String>,
    pub kind: WorkflowKind,
}

// ---------------------------------------------------------------------------
// WorkflowRegistry
// ---------------------------------------------------------------------------

/// Name-indexed registry of startable workflows.
#[derive(Clone, Default)]
pub struct WorkflowRegistry {
    entries: HashMap<String, WorkflowEntry>,
}

impl WorkflowRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a code workflow.
    pub fn register_fn<F, Fut>(
        &mut self,
        name: impl Into<String>,
        description: Option<&str>,
        body: F,
    ) -> Result<(), WorkflowError>
    where
        F: Fn(WorkflowContext, Value) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Value, WorkflowInterrupt>> + Send + 'static,
    {
        let name = name.into();
        self.ensure_available(&name)?;

        let body: WorkflowBody = Arc::new(move |ctx, input| Box::pin(body(ctx, input)));
        self.entries.insert(
            name.clone(),
            WorkflowEntry {
                name,
                description: description.map(str::to_string),
                tags: Vec::new(),
                kind: WorkflowKind::Code,
                body,
                definition: None,
            },
        );
        Ok(())
    }

    /// Validate and register a simple workflow.
    pub fn register_simple(
        &mut self,
        definition: SimpleWorkflowDefinition,
        targets: &TargetRegistry,
    ) -> Result<(), WorkflowError> {
        self.ensure_available(&definition.name)?;

        let issues = validate_simple_workflow(&definition, targets);
        if !issues.is_empty() {
            return Err(WorkflowError::ValidationError {
                name: definition.name.clone(),
                issues: issues.into_iter().map(|i| i.to_string()).collect(),
            });
        }

        let definition = Arc::new(definition);
        let shared = Arc::clone(&definition);
        let body: WorkflowBody = Arc::new(move |ctx, input| {
            Box::pin(interpreter::run_simple(Arc::clone(&shared), ctx, input))
        });

        tracing::debug!(workflow = %definition.name, "registered simple workflow");
        self.entries.insert(
            definition.name.clone(),
            WorkflowEntry {
                name: definition.name.clone(),
                description: definition.description.clone(),
                tags: definition.tags.clone(),
                kind: WorkflowKind::Simple,
                body,
                definition: Some(definition),
            },
        );
        Ok(())
    }

    pub fn get(&self, name: &str) -> Option<&WorkflowEntry> {
        self.entries.get(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.entries.contains_key(name)
    }

    /// All workflows, sorted by name.
    pub fn list(&self) -> Vec<WorkflowSummary> {
        let mut summaries: Vec<WorkflowSummary> = self
            .entries
            .values()
            .map(|e| WorkflowSummary {
                name: e.name.clone(),
                description: e.description.clone(),
                tags: e.tags.clone(),
                kind: e.kind,
            })
            .collect();
        summaries.sort_by(|a, b| a.name.cmp(&b.name));
        summaries
    }

    fn ensure_available(&self, name: &str) -> Result<(), WorkflowError> {
        if !is_valid_workflow_name(name) {
            return Err(WorkflowError::InvalidName(name.to_string()));
        }
        if self.entries.contains_key(name) {
            return Err(WorkflowError::DuplicateWorkflow(name.to_string()));
        }
        Ok(())
    }
}

impl std::fmt::Debug for WorkflowRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut names: Vec<&str> = self.entries.keys().map(String::as_str).collect();
        names.sort_unstable();
        f.debug_struct("WorkflowRegistry").field("workflows", &names).finish()
    }
}

/// Non-empty, alphanumeric plus `-` and `_`.
pub fn is_valid_workflow_name(name: &str) -> bool {
    !name.is_empty() && name.chars().all(|c| c.is_alphanumeric() || c == '-' || c == '_')
}

// ---------------------------------------------------------------------------
// Parsing and discovery
// ---------------------------------------------------------------------------

/// Parse a YAML (or JSON) document into a simple workflow definition.
///
/// Only the document shape is checked here; DSL rules that depend on the
/// target registry are checked by [`WorkflowRegistry::register_simple`].
pub fn parse_simple_workflow_yaml(yaml: &str) -> Result<SimpleWorkflowDefinition, WorkflowError> {
    serde_yaml_ng::from_str(yaml).map_err(|e| WorkflowError::ParseError(e.to_string()))
}

/// Serialize a simple workflow definition back to YAML.
pub fn serialize_simple_workflow_yaml(
    def: &SimpleWorkflowDefinition,
) -> Result<String, WorkflowError> {
    serde_yaml_ng::to_string(def).map_err(|e| WorkflowError::ParseError(e.to_string()))
}

/// Find `*.yaml` / `*.yml` files directly under `dir`, sorted by path.
///
/// A missing directory yields an empty list.
pub fn discover_workflow_files(dir: &Path) -> Result<Vec<PathBuf>, WorkflowError> {
    if !dir.exists() {
        return Ok(Vec::new());
    }

    let mut files = Vec::new();
    for entry in std::fs::read_dir(dir)? {
        let path = entry?.path();
        let is_yaml = path
            .extension()
            .and_then(|e| e.to_str())
            .is_some_and(|e| e == "yaml" || e == "yml");
        if path.is_file() && is_yaml {
            files.push(path);
        }
    }
    files.sort();
    Ok(files)
}

/// Read and parse one simple workflow file.
pub fn load_simple_workflow(path: &Path) -> Result<SimpleWorkflowDefinition, WorkflowError> {
    let yaml = std::fs::read_to_string(path)?;
    parse_simple_workflow_yaml(&yaml)
        .map_err(|e| WorkflowError::ParseError(format!("{}: {e}", path.display())))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn targets() -> TargetRegistry {
        let mut targets = TargetRegistry::new();
        targets.register_fn("inviteMember", |args, _| async move { Ok(args) });
        targets
    }

    const VALID: &str = r#"
name: invite-all
description: Invite everyone
tags: [simple, demo]
steps:
  - type: for_each
    items: input.emails
    as: email
    steps:
      - type: step
        name: "Invite {{ email }}"
        rpc: inviteMember
        input:
          email: email
"#;

    #[test]
    fn test_register_code_workflow() {
        let mut registry = WorkflowRegistry::new();
        registry
            .register_fn("echo", Some("Echo input"), |_ctx, input| async move { Ok(input) })
            .unwrap();

        let entry = registry.get("echo").unwrap();
        assert_eq!(entry.kind, WorkflowKind::Code);
        assert_eq!(entry.description.as_deref(), Some("Echo input"));
    }

    #[test]
    fn test_duplicate_and_invalid_names_rejected() {
        let mut registry = WorkflowRegistry::new();
        registry
            .register_fn("echo", None, |_ctx, input| async move { Ok(input) })
            .unwrap();

        assert!(matches!(
            registry.register_fn("echo", None, |_ctx, input| async move { Ok(input) }),
            Err(WorkflowError::DuplicateWorkflow(_))
        ));
        assert!(matches!(
            registry.register_fn("bad name!", None, |_ctx, input| async move { Ok(input) }),
            Err(WorkflowError::InvalidName(_))
        ));
    }

    #[test]
    fn test_register_simple_workflow() {
        let mut registry = WorkflowRegistry::new();
        let def = parse_simple_workflow_yaml(VALID).unwrap();
        registry.register_simple(def, &targets()).unwrap();

        let summaries = registry.list();
        assert_eq!(summaries.len(), 1);
        assert_eq!(summaries[0].kind, WorkflowKind::Simple);
        assert_eq!(summaries[0].tags, vec!["simple", "demo"]);
        assert!(registry.get("invite-all").unwrap().definition.is_some());
    }

    #[test]
    fn test_register_simple_reports_violations() {
        let mut registry = WorkflowRegistry::new();
        let def = parse_simple_workflow_yaml(VALID).unwrap();

        let err = registry.register_simple(def, &TargetRegistry::new()).unwrap_err();
        match err {
            WorkflowError::ValidationError { name, issues } => {
                assert_eq!(name, "invite-all");
                assert!(issues.iter().any(|i| i.contains("inviteMember")));
            }
            other => panic!("expected ValidationError, got {other:?}"),
        }
        assert!(!registry.contains("invite-all"));
    }

    #[test]
    fn test_parse_error() {
        assert!(matches!(
            parse_simple_workflow_yaml("name: [unclosed"),
            Err(WorkflowError::ParseError(_))
        ));
    }

    #[test]
    fn test_yaml_roundtrip_preserves_definition() {
        let def = parse_simple_workflow_yaml(VALID).unwrap();
        let yaml = serialize_simple_workflow_yaml(&def).unwrap();
        assert_eq!(parse_simple_workflow_yaml(&yaml).unwrap(), def);
    }

    #[test]
    fn test_discover_workflow_files() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("b.yaml"), VALID).unwrap();
        std::fs::write(dir.path().join("a.yml"), VALID).unwrap();
        std::fs::write(dir.path().join("notes.txt"), "ignore").unwrap();

        let files = discover_workflow_files(dir.path()).unwrap();
        let names: Vec<_> = files
            .iter()
            .map(|p| p.file_name().unwrap().to_string_lossy().to_string())
            .collect();
        assert_eq!(names, vec!["a.yml", "b.yaml"]);

        let def = load_simple_workflow(&files[1]).unwrap();
        assert_eq!(def.name, "invite-all");

        assert!(discover_workflow_files(&dir.path().join("missing")).unwrap().is_empty());
    }
}
