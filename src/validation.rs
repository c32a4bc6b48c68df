//! Request validation gate
//!
//! Typed field rules applied against the merged request data once per
//! resource, before its executor is dispatched. Failure lists every
//! failing field in a single error and is never recoverable by the
//! resource's own onError policy.

use regex::Regex;
use serde_json::Value;
use uuid::Uuid;

use crate::error::{EngineError, EngineResult};
use crate::eval::{truthy, Env, Evaluator};
use crate::workflow::{FieldRule, FieldType, ValidationSpec};

/// Validate the merged request data against a validation block.
/// Every failing field is collected; the error message lists them all.
pub fn validate_request(
    spec: &ValidationSpec,
    data: &serde_json::Map<String, Value>,
    evaluator: &dyn Evaluator,
    env: &Env,
) -> EngineResult<()> {
    let mut failures = Vec::new();

    for field in &spec.required {
        match data.get(field) {
            None | Some(Value::Null) => {
                failures.push(format!("field '{}' is required", field));
            }
            Some(_) => {}
        }
    }

    for rule in &spec.rules {
        check_rule(rule, data, evaluator, env, &mut failures);
    }

    if failures.is_empty() {
        Ok(())
    } else {
        Err(EngineError::Validation(failures.join("; ")))
    }
}

fn check_rule(
    rule: &FieldRule,
    data: &serde_json::Map<String, Value>,
    evaluator: &dyn Evaluator,
    env: &Env,
    failures: &mut Vec<String>,
) {
    let field = rule.field.as_str();
    let value = data.get(field).filter(|v| !v.is_null());

    if let Some(value) = value {
        if let Some(expected) = rule.field_type {
            if !type_matches(expected, value) {
                failures.push(format!(
                    "field '{}' must be of type {:?}",
                    field, expected
                ));
            }
        }

        if rule.min.is_some() || rule.max.is_some() {
            match numeric_value(value) {
                Some(n) => {
                    if let Some(min) = rule.min {
                        if n < min {
                            failures.push(format!("field '{}' must be >= {}", field, min));
                        }
                    }
                    if let Some(max) = rule.max {
                        if n > max {
                            failures.push(format!("field '{}' must be <= {}", field, max));
                        }
                    }
                }
                None => failures.push(format!("field '{}' must be numeric", field)),
            }
        }

        if rule.min_length.is_some() || rule.max_length.is_some() {
            match value.as_str() {
                Some(s) => {
                    let runes = s.chars().count();
                    if let Some(min) = rule.min_length {
                        if runes < min {
                            failures.push(format!(
                                "field '{}' must be at least {} characters",
                                field, min
                            ));
                        }
                    }
                    if let Some(max) = rule.max_length {
                        if runes > max {
                            failures.push(format!(
                                "field '{}' must be at most {} characters",
                                field, max
                            ));
                        }
                    }
                }
                None => failures.push(format!("field '{}' must be a string", field)),
            }
        }

        if let Some(pattern) = &rule.pattern {
            match Regex::new(pattern) {
                Ok(re) => {
                    let text = match value.as_str() {
                        Some(s) => s.to_string(),
                        None => value.to_string(),
                    };
                    if !re.is_match(&text) {
                        failures.push(format!(
                            "field '{}' does not match pattern '{}'",
                            field, pattern
                        ));
                    }
                }
                Err(_) => failures.push(format!(
                    "field '{}' has an invalid pattern '{}'",
                    field, pattern
                )),
            }
        }

        if let Some(allowed) = &rule.allowed {
            if !allowed.iter().any(|candidate| loose_equal(candidate, value)) {
                failures.push(format!("field '{}' is not one of the allowed values", field));
            }
        }

        if rule.min_items.is_some() || rule.max_items.is_some() {
            match value.as_array() {
                Some(items) => {
                    if let Some(min) = rule.min_items {
                        if items.len() < min {
                            failures.push(format!(
                                "field '{}' must have at least {} items",
                                field, min
                            ));
                        }
                    }
                    if let Some(max) = rule.max_items {
                        if items.len() > max {
                            failures.push(format!(
                                "field '{}' must have at most {} items",
                                field, max
                            ));
                        }
                    }
                }
                None => failures.push(format!("field '{}' must be an array", field)),
            }
        }
    }

    for custom in &rule.custom_rules {
        match evaluator.evaluate(&custom.expr.raw, env) {
            Ok(result) if truthy(&result) => {}
            Ok(_) => failures.push(
                custom
                    .message
                    .clone()
                    .unwrap_or_else(|| format!("custom rule failed for field '{}'", field)),
            ),
            Err(e) => failures.push(format!(
                "custom rule for field '{}' failed to evaluate: {}",
                field, e
            )),
        }
    }
}

/// Type check with string coercion for the numeric kinds
fn type_matches(expected: FieldType, value: &Value) -> bool {
    match expected {
        FieldType::String => value.is_string(),
        FieldType::Integer => match value {
            Value::Number(n) => n.is_i64() || n.is_u64(),
            Value::String(s) => s.trim().parse::<i64>().is_ok(),
            _ => false,
        },
        FieldType::Number => match value {
            Value::Number(_) => true,
            Value::String(s) => s.trim().parse::<f64>().is_ok(),
            _ => false,
        },
        FieldType::Boolean => value.is_boolean(),
        FieldType::Array => value.is_array(),
        FieldType::Object => value.is_object(),
        FieldType::Email => value
            .as_str()
            .map(|s| {
                let mut parts = s.splitn(2, '@');
                let local = parts.next().unwrap_or("");
                let domain = parts.next().unwrap_or("");
                !local.is_empty()
                    && !domain.is_empty()
                    && domain.contains('.')
                    && !domain.starts_with('.')
                    && !domain.ends_with('.')
                    && !s.contains(char::is_whitespace)
            })
            .unwrap_or(false),
        FieldType::Url => value
            .as_str()
            .map(|s| {
                (s.starts_with("http://") || s.starts_with("https://"))
                    && s.len() > "https://".len()
                    && !s.contains(char::is_whitespace)
            })
            .unwrap_or(false),
        FieldType::Uuid => value
            .as_str()
            .map(|s| Uuid::parse_str(s).is_ok())
            .unwrap_or(false),
    }
}

fn numeric_value(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse::<f64>().ok(),
        _ => None,
    }
}

/// Literal equality with numeric widening so `3` matches `3.0`
fn loose_equal(a: &Value, b: &Value) -> bool {
    match (a, b) {
        (Value::Number(x), Value::Number(y)) => match (x.as_f64(), y.as_f64()) {
            (Some(fx), Some(fy)) => fx == fy,
            _ => x == y,
        },
        _ => a == b,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::eval::SimpleEvaluator;
    use crate::workflow::CustomRule;
    use serde_json::json;

    fn data(pairs: Value) -> serde_json::Map<String, Value> {
        pairs.as_object().cloned().unwrap_or_default()
    }

    fn run(spec: &ValidationSpec, payload: Value) -> EngineResult<()> {
        let evaluator = SimpleEvaluator::new();
        let env = Env::new();
        validate_request(spec, &data(payload), &evaluator, &env)
    }

    #[test]
    fn required_field_missing_is_reported() {
        let spec = ValidationSpec {
            required: vec!["email".to_string()],
            rules: Vec::new(),
        };
        let err = run(&spec, json!({"name": "x"})).unwrap_err();
        let msg = err.to_string();
        assert!(msg.contains("VALIDATION_ERROR"));
        assert!(msg.contains("email"));
    }

    #[test]
    fn all_failures_are_listed_together() {
        let spec = ValidationSpec {
            required: vec!["email".to_string(), "age".to_string()],
            rules: Vec::new(),
        };
        let err = run(&spec, json!({})).unwrap_err();
        let msg = err.to_string();
        assert!(msg.contains("email") && msg.contains("age"));
    }

    #[test]
    fn numeric_strings_coerce_for_integer_and_number() {
        let spec = ValidationSpec {
            required: Vec::new(),
            rules: vec![FieldRule {
                field: "age".to_string(),
                field_type: Some(FieldType::Integer),
                min: Some(18.0),
                ..Default::default()
            }],
        };
        assert!(run(&spec, json!({"age": "21"})).is_ok());
        assert!(run(&spec, json!({"age": "seven"})).is_err());
        assert!(run(&spec, json!({"age": "12"})).is_err());
    }

    #[test]
    fn length_pattern_and_enum_rules() {
        let spec = ValidationSpec {
            required: Vec::new(),
            rules: vec![FieldRule {
                field: "code".to_string(),
                min_length: Some(2),
                max_length: Some(4),
                pattern: Some("^[A-Z]+$".to_string()),
                allowed: Some(vec![json!("AB"), json!("XYZ")]),
                ..Default::default()
            }],
        };
        assert!(run(&spec, json!({"code": "AB"})).is_ok());
        assert!(run(&spec, json!({"code": "A"})).is_err());
        assert!(run(&spec, json!({"code": "ab"})).is_err());
        assert!(run(&spec, json!({"code": "ABC"})).is_err());
    }

    #[test]
    fn array_bounds() {
        let spec = ValidationSpec {
            required: Vec::new(),
            rules: vec![FieldRule {
                field: "tags".to_string(),
                field_type: Some(FieldType::Array),
                min_items: Some(1),
                max_items: Some(2),
                ..Default::default()
            }],
        };
        assert!(run(&spec, json!({"tags": ["a"]})).is_ok());
        assert!(run(&spec, json!({"tags": []})).is_err());
        assert!(run(&spec, json!({"tags": ["a", "b", "c"]})).is_err());
    }

    #[test]
    fn email_url_uuid_types() {
        let mut rule = FieldRule {
            field: "v".to_string(),
            field_type: Some(FieldType::Email),
            ..Default::default()
        };
        let spec_for = |rule: FieldRule| ValidationSpec {
            required: Vec::new(),
            rules: vec![rule],
        };

        assert!(run(&spec_for(rule.clone()), json!({"v": "a@b.io"})).is_ok());
        assert!(run(&spec_for(rule.clone()), json!({"v": "not-an-email"})).is_err());

        rule.field_type = Some(FieldType::Url);
        assert!(run(&spec_for(rule.clone()), json!({"v": "https://x.dev/p"})).is_ok());
        assert!(run(&spec_for(rule.clone()), json!({"v": "ftp://x"})).is_err());

        rule.field_type = Some(FieldType::Uuid);
        assert!(run(
            &spec_for(rule.clone()),
            json!({"v": "6f7b4a10-9b1d-4f6e-8a3c-2d1e5b7c9a00"})
        )
        .is_ok());
        assert!(run(&spec_for(rule), json!({"v": "nope"})).is_err());
    }

    #[test]
    fn custom_rules_use_the_evaluator() {
        let spec = ValidationSpec {
            required: Vec::new(),
            rules: vec![FieldRule {
                field: "age".to_string(),
                custom_rules: vec![CustomRule {
                    expr: "input.age >= 18".into(),
                    message: Some("must be an adult".to_string()),
                }],
                ..Default::default()
            }],
        };
        let evaluator = SimpleEvaluator::new();
        let mut env = Env::new();
        env.insert(
            "input".to_string(),
            crate::eval::EnvValue::Value(json!({"age": 15})),
        );
        let err = validate_request(&spec, &data(json!({"age": 15})), &evaluator, &env).unwrap_err();
        assert!(err.to_string().contains("must be an adult"));
    }
}
