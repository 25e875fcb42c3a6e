//! JEXL expression evaluator for simple-workflow conditions, arguments and
//! `{{ expr }}` templates.
//!
//! Wraps `jexl_eval::Evaluator` with pre-registered standard transforms.
//! Plain dotted paths (`input.plan`, `org.id`) are resolved directly with
//! null propagation, so reading a field of an unset variable yields `null`
//! instead of an error.
//!
//! **Security note:** Inputs are always passed as context objects, NEVER
//! interpolated into expression strings.

use serde_json::{Value, json};

// ---------------------------------------------------------------------------
// Error type
// ---------------------------------------------------------------------------

/// Errors that can occur during expression evaluation.
#[derive(Debug, thiserror::Error)]
pub enum ExpressionError {
    #[error("expression '{expression}' failed: {message}")]
    EvalFailed { expression: String, message: String },

    #[error("invalid context: {0}")]
    InvalidContext(String),

    #[error("unterminated template in '{0}'")]
    UnterminatedTemplate(String),
}

// ---------------------------------------------------------------------------
// WorkflowEvaluator
// ---------------------------------------------------------------------------

/// JEXL expression evaluator with standard transforms pre-registered.
pub struct WorkflowEvaluator {
    evaluator: jexl_eval::Evaluator<'static>,
}

impl WorkflowEvaluator {
    /// Create a new evaluator with all standard transforms registered.
    pub fn new() -> Self {
        let evaluator = jexl_eval::Evaluator::new()
            .with_transform("lower", |args: &[Value]| {
                let s = args.first().and_then(|v| v.as_str()).unwrap_or("");
                Ok(json!(s.to_lowercase()))
            })
            .with_transform("upper", |args: &[Value]| {
                let s = args.first().and_then(|v| v.as_str()).unwrap_or("");
                Ok(json!(s.to_uppercase()))
            })
            .with_transform("trim", |args: &[Value]| {
                let s = args.first().and_then(|v| v.as_str()).unwrap_or("");
                Ok(json!(s.trim()))
            })
            .with_transform("split", |args: &[Value]| {
                let s = args.first().and_then(|v| v.as_str()).unwrap_or("");
                let delimiter = args.get(1).and_then(|v| v.as_str()).unwrap_or(",");
                let parts: Vec<&str> = s.split(delimiter).collect();
                Ok(json!(parts))
            })
            .with_transform("not", |args: &[Value]| {
                let val = args.first().cloned().unwrap_or(Value::Null);
                Ok(json!(!truthy(&val)))
            })
            .with_transform("contains", |args: &[Value]| {
                let subject = args.first().and_then(|v| v.as_str()).unwrap_or("");
                let search = args.get(1).and_then(|v| v.as_str()).unwrap_or("");
                Ok(json!(subject.contains(search)))
            })
            .with_transform("startsWith", |args: &[Value]| {
                let subject = args.first().and_then(|v| v.as_str()).unwrap_or("");
                let prefix = args.get(1).and_then(|v| v.as_str()).unwrap_or("");
                Ok(json!(subject.starts_with(prefix)))
            })
            .with_transform("endsWith", |args: &[Value]| {
                let subject = args.first().and_then(|v| v.as_str()).unwrap_or("");
                let suffix = args.get(1).and_then(|v| v.as_str()).unwrap_or("");
                Ok(json!(subject.ends_with(suffix)))
            })
            // Works on strings, arrays and objects; null has length 0.
            .with_transform("length", |args: &[Value]| {
                let len = match args.first() {
                    Some(Value::String(s)) => s.chars().count(),
                    Some(Value::Array(a)) => a.len(),
                    Some(Value::Object(o)) => o.len(),
                    _ => 0,
                };
                Ok(json!(len))
            });

        Self { evaluator }
    }

    /// Evaluate an expression and coerce the result with JavaScript-like
    /// truthiness.
    pub fn evaluate_bool(&self, expression: &str, context: &Value) -> Result<bool, ExpressionError> {
        let result = self.evaluate_value(expression, context)?;
        Ok(truthy(&result))
    }

    /// Evaluate an expression and return the raw JSON value.
    pub fn evaluate_value(&self, expression: &str, context: &Value) -> Result<Value, ExpressionError> {
        if !context.is_object() {
            return Err(ExpressionError::InvalidContext(
                "context must be a JSON object".to_string(),
            ));
        }

        let expression = expression.trim();
        if is_path(expression) {
            return Ok(lookup_path(context, expression));
        }

        self.evaluator
            .eval_in_context(expression, context)
            .map_err(|e| ExpressionError::EvalFailed {
                expression: expression.to_string(),
                message: e.to_string(),
            })
    }

    /// Replace every `{{ expr }}` in `template` with the rendered value of
    /// `expr`. Strings render without quotes; other values render as JSON.
    pub fn render_template(&self, template: &str, context: &Value) -> Result<String, ExpressionError> {
        let mut out = String::with_capacity(template.len());
        let mut rest = template;

        while let Some(start) = rest.find("{{") {
            out.push_str(&rest[..start]);
            let after = &rest[start + 2..];
            let end = after
                .find("}}")
                .ok_or_else(|| ExpressionError::UnterminatedTemplate(template.to_string()))?;
            let value = self.evaluate_value(&after[..end], context)?;
            out.push_str(&value_to_string(&value));
            rest = &after[end + 2..];
        }

        out.push_str(rest);
        Ok(out)
    }
}

impl Default for WorkflowEvaluator {
    fn default() -> Self {
        Self::new()
    }
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

/// Coerce a JSON value to boolean using JavaScript-like truthiness.
pub fn truthy(value: &Value) -> bool {
    match value {
        Value::Bool(b) => *b,
        Value::Null => false,
        Value::Number(n) => n.as_f64().unwrap_or(0.0) != 0.0,
        Value::String(s) => !s.is_empty(),
        Value::Array(_) | Value::Object(_) => true,
    }
}

/// Render a value for string interpolation.
///
/// Whole floats render without a fraction so that `{{ input.delayMs }}ms`
/// stays a valid duration literal when the input arrived as `1000.0`.
pub fn value_to_string(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Null => String::new(),
        Value::Number(n) => match (n.as_i64(), n.as_u64(), n.as_f64()) {
            (Some(i), _, _) => i.to_string(),
            (_, Some(u), _) => u.to_string(),
            (_, _, Some(f)) if f.fract() == 0.0 && f.abs() < 9.0e15 => format!("{}", f as i64),
            _ => n.to_string(),
        },
        other => other.to_string(),
    }
}

/// Whether `template` contains at least one `{{ ... }}` placeholder.
pub fn is_template(template: &str) -> bool {
    template
        .find("{{")
        .is_some_and(|start| template[start..].contains("}}"))
}

/// The raw expressions inside every `{{ ... }}` placeholder of `template`.
pub fn template_expressions(template: &str) -> Vec<&str> {
    let mut found = Vec::new();
    let mut rest = template;
    while let Some(start) = rest.find("{{") {
        let after = &rest[start + 2..];
        let Some(end) = after.find("}}") else {
            break;
        };
        found.push(after[..end].trim());
        rest = &after[end + 2..];
    }
    found
}

/// Root identifiers an expression reads: `org.id == input.x` -> `["org", "input"]`.
///
/// Property names after a `.`, transform names after `|`, quoted strings and
/// keyword literals are skipped.
pub fn root_identifiers(expression: &str) -> Vec<&str> {
    let bytes = expression.as_bytes();
    let mut roots = Vec::new();
    let mut i = 0;

    while i < bytes.len() {
        let c = bytes[i];
        if c == b'\'' || c == b'"' {
            i += 1;
            while i < bytes.len() && bytes[i] != c {
                i += 1;
            }
            i += 1;
            continue;
        }
        if c.is_ascii_alphabetic() || c == b'_' || c == b'$' {
            let start = i;
            while i < bytes.len() && (bytes[i].is_ascii_alphanumeric() || bytes[i] == b'_' || bytes[i] == b'$') {
                i += 1;
            }
            let preceded = expression[..start]
                .trim_end()
                .chars()
                .last()
                .is_some_and(|p| p == '.' || p == '|');
            let word = &expression[start..i];
            if !preceded && !matches!(word, "true" | "false" | "null" | "in") {
                roots.push(word);
            }
            continue;
        }
        i += 1;
    }
    roots
}

/// A valid variable name: `[A-Za-z_][A-Za-z0-9_]*`, not a keyword.
pub fn is_identifier(name: &str) -> bool {
    let mut chars = name.chars();
    let Some(first) = chars.next() else {
        return false;
    };
    (first.is_ascii_alphabetic() || first == '_')
        && chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
        && !matches!(name, "true" | "false" | "null" | "in")
}

fn is_path(expression: &str) -> bool {
    !expression.is_empty() && expression.split('.').all(is_identifier)
}

fn lookup_path(context: &Value, path: &str) -> Value {
    let mut current = context;
    for segment in path.split('.') {
        match current.get(segment) {
            Some(next) => current = next,
            None => return Value::Null,
        }
    }
    current.clone()
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn evaluator() -> WorkflowEvaluator {
        WorkflowEvaluator::new()
    }

    #[test]
    fn test_dot_notation_nested() {
        let ctx = json!({ "input": { "user": { "name": "Alice" } } });
        let result = evaluator().evaluate_value("input.user.name", &ctx).unwrap();
        assert_eq!(result, json!("Alice"));
    }

    #[test]
    fn test_path_through_null_is_null() {
        let ctx = json!({ "owner": null, "input": {} });
        let eval = evaluator();
        assert_eq!(eval.evaluate_value("owner.id", &ctx).unwrap(), Value::Null);
        assert_eq!(eval.evaluate_value("input.missing.deep", &ctx).unwrap(), Value::Null);
    }

    #[test]
    fn test_string_comparison() {
        let ctx = json!({ "input": { "plan": "enterprise" } });
        let eval = evaluator();
        assert!(eval.evaluate_bool("input.plan == 'enterprise'", &ctx).unwrap());
        assert!(!eval.evaluate_bool("input.plan == 'free'", &ctx).unwrap());
    }

    #[test]
    fn test_numeric_comparison() {
        let ctx = json!({ "input": { "delayMs": 250.0 } });
        let eval = evaluator();
        assert!(eval.evaluate_bool("input.delayMs > 0", &ctx).unwrap());

        let ctx_zero = json!({ "input": { "delayMs": 0.0 } });
        assert!(!eval.evaluate_bool("input.delayMs > 0", &ctx_zero).unwrap());
    }

    #[test]
    fn test_boolean_operators() {
        let ctx = json!({ "event": { "type": "push", "branch": "main" } });
        let eval = evaluator();
        assert!(eval
            .evaluate_bool("event.type == 'push' && event.branch == 'main'", &ctx)
            .unwrap());
        assert!(eval
            .evaluate_bool("event.branch == 'dev' || event.branch == 'main'", &ctx)
            .unwrap());
    }

    #[test]
    fn test_transforms() {
        let ctx = json!({ "name": "  Hello  ", "items": ["a", "b", "c"], "csv": "a,b" });
        let eval = evaluator();
        assert_eq!(eval.evaluate_value("name|trim|lower", &ctx).unwrap(), json!("hello"));
        assert_eq!(eval.evaluate_value("items|length", &ctx).unwrap(), json!(3));
        assert_eq!(eval.evaluate_value("csv|split(',')", &ctx).unwrap(), json!(["a", "b"]));
        assert!(eval.evaluate_bool("name|contains('ell')", &ctx).unwrap());
    }

    #[test]
    fn test_in_operator_array() {
        let ctx = json!({ "roles": ["admin", "user"] });
        let eval = evaluator();
        assert!(eval.evaluate_bool("'admin' in roles", &ctx).unwrap());
        assert!(!eval.evaluate_bool("'root' in roles", &ctx).unwrap());
    }

    #[test]
    fn test_invalid_context_not_object() {
        let ctx = json!("not an object");
        assert!(evaluator().evaluate_bool("true", &ctx).is_err());
    }

    #[test]
    fn test_truthiness() {
        assert!(!truthy(&json!(null)));
        assert!(!truthy(&json!("")));
        assert!(!truthy(&json!(0.0)));
        assert!(truthy(&json!(42)));
        assert!(truthy(&json!([])));
    }

    #[test]
    fn test_render_template() {
        let ctx = json!({ "email": "a@b.c", "input": { "delayMs": 1000.0, "n": 3 } });
        let eval = evaluator();
        assert_eq!(
            eval.render_template("Invite member {{ email }}", &ctx).unwrap(),
            "Invite member a@b.c"
        );
        assert_eq!(
            eval.render_template("{{ input.delayMs }}ms", &ctx).unwrap(),
            "1000ms"
        );
        assert_eq!(eval.render_template("no placeholders", &ctx).unwrap(), "no placeholders");
        assert!(matches!(
            eval.render_template("broken {{ email", &ctx),
            Err(ExpressionError::UnterminatedTemplate(_))
        ));
    }

    #[test]
    fn test_template_helpers() {
        assert!(is_template("Invite {{ email }}"));
        assert!(!is_template("Invite"));
        assert_eq!(
            template_expressions("{{ a }} and {{ b.c }}"),
            vec!["a", "b.c"]
        );
    }

    #[test]
    fn test_root_identifiers() {
        assert_eq!(
            root_identifiers("org.id == input.plan|lower"),
            vec!["org", "input"]
        );
        assert_eq!(root_identifiers("'email' in roles"), vec!["roles"]);
        assert_eq!(root_identifiers("x == true"), vec!["x"]);
    }

    #[test]
    fn test_identifiers() {
        assert!(is_identifier("email"));
        assert!(is_identifier("_tmp1"));
        assert!(!is_identifier("1x"));
        assert!(!is_identifier("a-b"));
        assert!(!is_identifier("null"));
        assert!(!is_identifier(""));
    }
}
