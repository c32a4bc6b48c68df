//! Expression evaluation boundary
//!
//! The engine treats the expression language as a pure
//! `evaluate(raw, env)` function over a flat environment of values and
//! accessor closures. A raw value containing `{{…}}` is a template;
//! otherwise it is evaluated as a bare expression. The default dialect
//! lives in [`simple`]; anything implementing [`Evaluator`] can be
//! plugged in instead.

mod simple;

pub use simple::SimpleEvaluator;

use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use thiserror::Error;

/// Errors produced at the evaluation boundary
#[derive(Error, Debug, Clone)]
pub enum EvalError {
    /// The raw text could not be parsed as an expression
    #[error("parse error: {0}")]
    Parse(String),
    /// Evaluation failed (bad call, disallowed lookup, type mismatch)
    #[error("eval error: {0}")]
    Eval(String),
}

/// Accessor closure callable from expressions
pub type EnvFn = Arc<dyn Fn(&[Value]) -> Result<Value, EvalError> + Send + Sync>;

/// One environment entry: a plain value or a function
#[derive(Clone)]
pub enum EnvValue {
    /// Literal value resolved by name/path
    Value(Value),
    /// Function-valued entry invoked with positional arguments
    Function(EnvFn),
}

impl std::fmt::Debug for EnvValue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EnvValue::Value(v) => write!(f, "Value({})", v),
            EnvValue::Function(_) => write!(f, "Function(..)"),
        }
    }
}

/// Flat per-call environment handed to the evaluator
pub type Env = HashMap<String, EnvValue>;

/// Pure expression evaluator boundary
pub trait Evaluator: Send + Sync {
    /// Evaluate raw expression or template text against an environment
    fn evaluate(&self, raw: &str, env: &Env) -> Result<Value, EvalError>;
}

/// Expression-language truthiness: null, false, 0, "" and empty
/// collections are falsy
pub fn truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().map(|f| f != 0.0).unwrap_or(true),
        Value::String(s) => !s.is_empty(),
        Value::Array(a) => !a.is_empty(),
        Value::Object(o) => !o.is_empty(),
    }
}

/// Render a value into template output: strings unquoted, everything
/// else compact JSON
pub fn value_to_string(value: &Value) -> String {
    match value {
        Value::Null => String::new(),
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// Resolve `{{…}}` placeholders inside raw text. Text without
/// placeholders passes through as a string; a raw value that is exactly
/// one placeholder returns the evaluated value untouched.
pub fn resolve_template(
    evaluator: &dyn Evaluator,
    raw: &str,
    env: &Env,
) -> Result<Value, EvalError> {
    if !raw.contains("{{") {
        return Ok(Value::String(raw.to_string()));
    }

    let segments = split_template(raw)?;
    if segments.len() == 1 {
        if let TemplateSegment::Placeholder(expr) = &segments[0] {
            return evaluator.evaluate(expr, env);
        }
    }

    let mut out = String::new();
    for segment in segments {
        match segment {
            TemplateSegment::Text(text) => out.push_str(&text),
            TemplateSegment::Placeholder(expr) => {
                let value = evaluator.evaluate(&expr, env)?;
                out.push_str(&value_to_string(&value));
            }
        }
    }
    Ok(Value::String(out))
}

/// Recursively materialize a value: string leaves resolve as
/// templates, maps and arrays are walked. Shared by apiResponse
/// materialization, fallback evaluation and onError binding.
pub fn walk_value(
    evaluator: &dyn Evaluator,
    value: &Value,
    env: &Env,
) -> Result<Value, EvalError> {
    match value {
        Value::String(s) => resolve_template(evaluator, s, env),
        Value::Array(items) => {
            let mut out = Vec::with_capacity(items.len());
            for item in items {
                out.push(walk_value(evaluator, item, env)?);
            }
            Ok(Value::Array(out))
        }
        Value::Object(map) => {
            let mut out = serde_json::Map::with_capacity(map.len());
            for (k, v) in map {
                out.insert(k.clone(), walk_value(evaluator, v, env)?);
            }
            Ok(Value::Object(out))
        }
        other => Ok(other.clone()),
    }
}

enum TemplateSegment {
    Text(String),
    Placeholder(String),
}

fn split_template(raw: &str) -> Result<Vec<TemplateSegment>, EvalError> {
    let mut segments = Vec::new();
    let mut rest = raw;
    while let Some(open) = rest.find("{{") {
        if open > 0 {
            segments.push(TemplateSegment::Text(rest[..open].to_string()));
        }
        let after = &rest[open + 2..];
        let close = after
            .find("}}")
            .ok_or_else(|| EvalError::Parse(format!("unterminated placeholder in '{}'", raw)))?;
        segments.push(TemplateSegment::Placeholder(after[..close].trim().to_string()));
        rest = &after[close + 2..];
    }
    if !rest.is_empty() {
        segments.push(TemplateSegment::Text(rest.to_string()));
    }
    Ok(segments)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn truthiness_matches_dialect() {
        assert!(!truthy(&Value::Null));
        assert!(!truthy(&json!(false)));
        assert!(!truthy(&json!(0)));
        assert!(!truthy(&json!("")));
        assert!(!truthy(&json!([])));
        assert!(truthy(&json!("x")));
        assert!(truthy(&json!(1.5)));
        assert!(truthy(&json!({"k": 1})));
    }

    #[test]
    fn sole_placeholder_preserves_value_type() {
        let evaluator = SimpleEvaluator::new();
        let mut env = Env::new();
        env.insert("count".to_string(), EnvValue::Value(json!(3)));
        let out = resolve_template(&evaluator, "{{count}}", &env).unwrap();
        assert_eq!(out, json!(3));
    }

    #[test]
    fn mixed_template_stringifies() {
        let evaluator = SimpleEvaluator::new();
        let mut env = Env::new();
        env.insert("name".to_string(), EnvValue::Value(json!("world")));
        let out = resolve_template(&evaluator, "hello {{name}}!", &env).unwrap();
        assert_eq!(out, json!("hello world!"));
    }

    #[test]
    fn walk_value_resolves_nested_leaves() {
        let evaluator = SimpleEvaluator::new();
        let mut env = Env::new();
        env.insert("id".to_string(), EnvValue::Value(json!("r-7")));
        let shaped = json!({"outer": {"id": "{{id}}"}, "list": ["{{id}}", 4]});
        let out = walk_value(&evaluator, &shaped, &env).unwrap();
        assert_eq!(out, json!({"outer": {"id": "r-7"}, "list": ["r-7", 4]}));
    }

    #[test]
    fn unterminated_placeholder_is_a_parse_error() {
        let evaluator = SimpleEvaluator::new();
        let env = Env::new();
        assert!(resolve_template(&evaluator, "{{oops", &env).is_err());
    }
}
