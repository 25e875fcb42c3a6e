//! Registration-time checks for simple workflows.
//!
//! A simple workflow is accepted only if its whole step graph can be read off
//! the definition: every step calls a registered target, step names are
//! unique within a run (except across the two branches of an `if`), names of
//! steps inside loops vary with the loop variable, every expression reads
//! only variables that exist, and literal sleep durations parse.

use std::collections::HashSet;
use std::fmt;

use stepwise_types::duration::DurationLiteral;
use stepwise_types::simple::{SimpleNode, SimpleStep, SimpleWorkflowDefinition};

use super::definition::is_valid_workflow_name;
use super::expression::{is_identifier, is_template, root_identifiers, template_expressions};
use super::target::TargetRegistry;

/// Name of the variable holding the run input.
pub const INPUT_VARIABLE: &str = "input";

/// One rule violation, located by its path in the definition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationIssue {
    pub path: String,
    pub message: String,
}

impl fmt::Display for ValidationIssue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.path, self.message)
    }
}

/// Check `def` against the simple-DSL rules. Returns every violation found;
/// an empty list means the workflow may be registered.
pub fn validate_simple_workflow(
    def: &SimpleWorkflowDefinition,
    targets: &TargetRegistry,
) -> Vec<ValidationIssue> {
    let mut v = Validator {
        targets,
        issues: Vec::new(),
        variables: HashSet::from([INPUT_VARIABLE.to_string()]),
    };

    if !is_valid_workflow_name(&def.name) {
        v.issue(
            "name",
            format!(
                "workflow name '{}' must be non-empty and contain only alphanumeric characters, hyphens or underscores",
                def.name
            ),
        );
    }
    if def.steps.is_empty() {
        v.issue("steps", "workflow must have at least one step");
    }

    collect_binds(&def.steps, &mut v.variables);
    v.nodes(&def.steps, "steps", &mut Vec::new());

    if let Some(output) = &def.output {
        for (field, expr) in output {
            v.expression(expr, &format!("output.{field}"), &[]);
        }
    }

    v.issues
}

/// Declared `bind` names, anywhere in the body.
pub(super) fn collect_binds(nodes: &[SimpleNode], out: &mut HashSet<String>) {
    for node in nodes {
        match node {
            SimpleNode::Step(step) => out.extend(step.bind.clone()),
            SimpleNode::If { then, otherwise, .. } => {
                collect_binds(then, out);
                collect_binds(otherwise, out);
            }
            SimpleNode::ForEach { steps, .. } => collect_binds(steps, out),
            SimpleNode::Parallel { step, bind, .. } => {
                out.extend(step.bind.clone());
                out.extend(bind.clone());
            }
            SimpleNode::Sleep { .. } => {}
        }
    }
}

struct Validator<'a> {
    targets: &'a TargetRegistry,
    issues: Vec<ValidationIssue>,
    variables: HashSet<String>,
}

impl Validator<'_> {
    fn issue(&mut self, path: &str, message: impl Into<String>) {
        self.issues.push(ValidationIssue {
            path: path.to_string(),
            message: message.into(),
        });
    }

    /// Validate a node list and return the step names it can produce.
    fn nodes(&mut self, nodes: &[SimpleNode], path: &str, loops: &mut Vec<String>) -> HashSet<String> {
        let mut names = HashSet::new();

        for (i, node) in nodes.iter().enumerate() {
            let node_path = format!("{path}[{i}]");
            let produced = self.node(node, &node_path, loops);
            for name in produced {
                if !names.insert(name.clone()) {
                    self.issue(&node_path, format!("duplicate step name '{name}'"));
                }
            }
        }

        names
    }

    fn node(&mut self, node: &SimpleNode, path: &str, loops: &mut Vec<String>) -> HashSet<String> {
        match node {
            SimpleNode::Step(step) => {
                self.step(step, path, loops);
                HashSet::from([step.name.clone()])
            }
            SimpleNode::If {
                condition,
                then,
                otherwise,
            } => {
                self.expression(condition, &format!("{path}.condition"), loops);
                if then.is_empty() && otherwise.is_empty() {
                    self.issue(path, "if must have at least one branch");
                }
                // Branches are mutually exclusive: names may repeat across them.
                let mut names = self.nodes(then, &format!("{path}.then"), loops);
                names.extend(self.nodes(otherwise, &format!("{path}.else"), loops));
                names
            }
            SimpleNode::ForEach { items, item, steps } => {
                self.expression(items, &format!("{path}.items"), loops);
                self.loop_variable(item, path, loops);
                if steps.is_empty() {
                    self.issue(path, "for_each must contain at least one step");
                }
                loops.push(item.clone());
                let names = self.nodes(steps, &format!("{path}.steps"), loops);
                loops.pop();
                names
            }
            SimpleNode::Parallel {
                items,
                item,
                step,
                bind,
            } => {
                self.expression(items, &format!("{path}.items"), loops);
                self.loop_variable(item, path, loops);
                if let Some(bind) = bind {
                    self.bind_name(bind, &format!("{path}.bind"));
                }
                loops.push(item.clone());
                self.step(step, &format!("{path}.step"), loops);
                loops.pop();
                HashSet::from([step.name.clone()])
            }
            SimpleNode::Sleep { name, duration } => {
                self.step_name(name, path, loops);
                if is_template(duration) {
                    self.template(duration, &format!("{path}.duration"), loops);
                } else if let Err(e) = duration.parse::<DurationLiteral>() {
                    self.issue(&format!("{path}.duration"), e.to_string());
                }
                HashSet::from([name.clone()])
            }
        }
    }

    fn step(&mut self, step: &SimpleStep, path: &str, loops: &[String]) {
        self.step_name(&step.name, path, loops);

        if !self.targets.contains(&step.rpc) {
            self.issue(
                &format!("{path}.rpc"),
                format!("unknown step target '{}'", step.rpc),
            );
        }
        for (field, expr) in &step.input {
            self.expression(expr, &format!("{path}.input.{field}"), loops);
        }
        if let Some(bind) = &step.bind {
            self.bind_name(bind, &format!("{path}.bind"));
        }
    }

    fn step_name(&mut self, name: &str, path: &str, loops: &[String]) {
        let name_path = format!("{path}.name");
        if name.trim().is_empty() {
            self.issue(&name_path, "step name must not be empty");
            return;
        }
        if name.contains("{{") && !is_template(name) {
            self.issue(&name_path, format!("unterminated template in '{name}'"));
            return;
        }
        self.template(name, &name_path, loops);

        let referenced: HashSet<&str> = template_expressions(name)
            .into_iter()
            .flat_map(root_identifiers)
            .collect();
        for var in loops {
            if !referenced.contains(var.as_str()) {
                self.issue(
                    &name_path,
                    format!("step name '{name}' inside a loop must reference the loop variable '{var}'"),
                );
            }
        }
    }

    fn loop_variable(&mut self, item: &str, path: &str, loops: &[String]) {
        let as_path = format!("{path}.as");
        if !is_identifier(item) || item == INPUT_VARIABLE {
            self.issue(&as_path, format!("'{item}' is not a usable variable name"));
        } else if loops.iter().any(|l| l == item) {
            self.issue(&as_path, format!("loop variable '{item}' shadows an enclosing loop"));
        }
    }

    fn bind_name(&mut self, bind: &str, path: &str) {
        if !is_identifier(bind) || bind == INPUT_VARIABLE {
            self.issue(path, format!("'{bind}' is not a usable variable name"));
        }
    }

    fn template(&mut self, template: &str, path: &str, loops: &[String]) {
        for expr in template_expressions(template) {
            self.expression(expr, path, loops);
        }
    }

    fn expression(&mut self, expr: &str, path: &str, loops: &[String]) {
        if expr.trim().is_empty() {
            self.issue(path, "expression must not be empty");
            return;
        }
        for root in root_identifiers(expr) {
            if !self.variables.contains(root) && !loops.iter().any(|l| l == root) {
                self.issue(path, format!("unknown variable '{root}' in '{expr}'"));
            }
        }
    }
}
