//! Declarative "simple" workflow definitions.
//!
//! A simple workflow is a YAML (or JSON) document whose body is limited to
//! named-target step calls, `if` branches, sequential `for_each` loops,
//! `parallel` fan-out of a single step, and durable sleeps. Because every node
//! is data, the full step graph can be inspected without running anything.
//!
//! Expressions (`condition`, `items`, `input` values, `output` values) are
//! JEXL evaluated against a scope holding `input` plus every bound variable.
//! Step names and sleep durations may contain `{{ expr }}` templates.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::workflow::RetryPolicy;

/// A complete simple workflow document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SimpleWorkflowDefinition {
    /// Unique workflow name (alphanumeric, hyphens, underscores).
    pub name: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tags: Vec<String>,

    /// Body, executed in order.
    pub steps: Vec<SimpleNode>,

    /// Output object: field name to expression. When absent the run output is
    /// the final scope minus `input`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output: Option<BTreeMap<String, String>>,
}

/// One node of a simple workflow body.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SimpleNode {
    /// Invoke a registered target.
    Step(SimpleStep),

    /// Conditional branch. Step names may repeat across `then` and `else`.
    If {
        condition: String,
        #[serde(default)]
        then: Vec<SimpleNode>,
        #[serde(default, rename = "else")]
        otherwise: Vec<SimpleNode>,
    },

    /// Sequential iteration over a collection.
    ForEach {
        items: String,
        #[serde(rename = "as")]
        item: String,
        steps: Vec<SimpleNode>,
    },

    /// Run one step per collection element concurrently, then join.
    Parallel {
        items: String,
        #[serde(rename = "as")]
        item: String,
        step: SimpleStep,
        /// Variable receiving the array of results in collection order.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        bind: Option<String>,
    },

    /// Durable sleep. `duration` is a literal such as `"5s"` or a template
    /// such as `"{{ input.delayMs }}ms"`.
    Sleep { name: String, duration: String },
}

/// A named-target invocation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SimpleStep {
    /// Step name, unique within the run. May be a template.
    pub name: String,

    /// Registered target name.
    pub rpc: String,

    /// Argument object: field name to expression.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub input: BTreeMap<String, String>,

    /// Variable receiving the step result.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bind: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub retry: Option<RetryPolicy>,
}
