//! Evaluator environment assembly
//!
//! Builds the flat per-call environment handed to the expression
//! evaluator: literal keys (`request`, `input`, iteration state) plus
//! accessor closures bridging back into the execution context. The
//! evaluator never reaches context internals directly; every call goes
//! through these closures.

use serde_json::Value;
use std::sync::Arc;

use crate::eval::{Env, EnvValue, EvalError};

use super::{KvStore, SharedContext};

/// Assemble the full environment for one evaluator call
pub fn build_env(ctx: &SharedContext) -> Env {
    let mut env = Env::new();

    {
        let guard = ctx.read();
        match guard.request.as_ref() {
            Some(request) => {
                let headers: serde_json::Map<String, Value> = request
                    .headers
                    .iter()
                    .map(|(k, v)| (k.to_ascii_lowercase(), Value::String(v.clone())))
                    .collect();
                let query: serde_json::Map<String, Value> = request
                    .query
                    .iter()
                    .map(|(k, v)| (k.clone(), Value::String(v.clone())))
                    .collect();
                env.insert(
                    "request".to_string(),
                    EnvValue::Value(serde_json::json!({
                        "method": request.method,
                        "path": request.path,
                        "headers": headers,
                        "query": query,
                        "body": request.body,
                    })),
                );
                env.insert(
                    "input".to_string(),
                    EnvValue::Value(Value::Object(request.body.clone())),
                );
            }
            None => {
                env.insert("request".to_string(), EnvValue::Value(Value::Null));
                env.insert(
                    "input".to_string(),
                    EnvValue::Value(Value::Object(serde_json::Map::new())),
                );
            }
        }

        if let Some(scope) = guard.item_scope() {
            env.insert("item".to_string(), EnvValue::Value(scope.current.clone()));
            env.insert(
                "items".to_string(),
                EnvValue::Value(Value::Array(scope.items.clone())),
            );
            if let Some(var) = scope.var_name.as_deref() {
                env.insert(var.to_string(), EnvValue::Value(scope.current.clone()));
            }
        }
    }

    let session = ctx.read().session_store();
    let memory = ctx.read().memory_store();

    insert_fn(&mut env, "get", {
        let ctx = ctx.clone();
        move |args: &[Value]| {
            let name = require_str(args, 0, "get")?;
            let hint = args.get(1).and_then(Value::as_str);
            ctx.read()
                .get(&name, hint)
                .map_err(|e| EvalError::Eval(e.to_string()))
        }
    });

    insert_fn(&mut env, "set", {
        let session = session.clone();
        let memory = memory.clone();
        move |args: &[Value]| {
            let key = require_str(args, 0, "set")?;
            let value = args.get(1).cloned().unwrap_or(Value::Null);
            let scope = args.get(2).and_then(Value::as_str).unwrap_or("memory");
            let store: &Arc<KvStore> = match scope {
                "session" => &session,
                "memory" => &memory,
                other => {
                    return Err(EvalError::Eval(format!("unknown set scope '{}'", other)))
                }
            };
            store.set(key, value);
            Ok(Value::Null)
        }
    });

    insert_fn(&mut env, "info", {
        let ctx = ctx.clone();
        move |args: &[Value]| {
            let key = require_str(args, 0, "info")?;
            Ok(ctx.read().info(&key))
        }
    });

    insert_fn(&mut env, "item", {
        let ctx = ctx.clone();
        move |args: &[Value]| {
            let which = args.first().and_then(Value::as_str);
            Ok(ctx.read().item(which))
        }
    });

    insert_fn(&mut env, "output", {
        let ctx = ctx.clone();
        move |args: &[Value]| {
            let id = require_str(args, 0, "output")?;
            Ok(ctx.read().output(&id).unwrap_or(Value::Null))
        }
    });

    insert_fn(&mut env, "param", {
        let ctx = ctx.clone();
        move |args: &[Value]| {
            let name = require_str(args, 0, "param")?;
            ctx.read()
                .get_param(&name)
                .map_err(|e| EvalError::Eval(e.to_string()))
        }
    });

    insert_fn(&mut env, "header", {
        let ctx = ctx.clone();
        move |args: &[Value]| {
            let name = require_str(args, 0, "header")?;
            ctx.read()
                .get_header(&name)
                .map_err(|e| EvalError::Eval(e.to_string()))
        }
    });

    insert_fn(&mut env, "session", {
        let session = session.clone();
        move |args: &[Value]| match args.first().and_then(Value::as_str) {
            Some(key) => Ok(session.get(key).unwrap_or(Value::Null)),
            None => Ok(Value::Object(session.snapshot())),
        }
    });

    insert_fn(&mut env, "memory", {
        let memory = memory.clone();
        move |args: &[Value]| match args.first().and_then(Value::as_str) {
            Some(key) => Ok(memory.get(key).unwrap_or(Value::Null)),
            None => Ok(Value::Object(memory.snapshot())),
        }
    });

    insert_fn(&mut env, "file", {
        let ctx = ctx.clone();
        move |args: &[Value]| {
            let pattern = require_str(args, 0, "file")?;
            let selectors: Vec<String> = args[1..]
                .iter()
                .filter_map(Value::as_str)
                .map(|s| s.to_string())
                .collect();
            ctx.read()
                .file(&pattern, &selectors)
                .map_err(|e| EvalError::Eval(e.to_string()))
        }
    });

    insert_output_field(&mut env, ctx, "llm.response", "response", Value::String(String::new()));
    insert_output_field(&mut env, ctx, "llm.prompt", "prompt", Value::String(String::new()));
    insert_output_field(&mut env, ctx, "python.stdout", "stdout", Value::String(String::new()));
    insert_output_field(&mut env, ctx, "python.stderr", "stderr", Value::String(String::new()));
    insert_output_field(&mut env, ctx, "python.exitCode", "exitCode", Value::from(0));
    insert_output_field(&mut env, ctx, "exec.stdout", "stdout", Value::String(String::new()));
    insert_output_field(&mut env, ctx, "exec.stderr", "stderr", Value::String(String::new()));
    insert_output_field(&mut env, ctx, "exec.exitCode", "exitCode", Value::from(0));
    insert_output_field(&mut env, ctx, "http.responseBody", "body", Value::Null);

    insert_fn(&mut env, "http.responseHeader", {
        let ctx = ctx.clone();
        move |args: &[Value]| {
            let id = require_str(args, 0, "http.responseHeader")?;
            let name = require_str(args, 1, "http.responseHeader")?;
            let output = ctx.read().output(&id);
            let header = output
                .as_ref()
                .and_then(|o| o.get("headers"))
                .and_then(|h| h.as_object())
                .and_then(|map| {
                    map.iter()
                        .find(|(k, _)| k.eq_ignore_ascii_case(&name))
                        .map(|(_, v)| v.clone())
                });
            Ok(header.unwrap_or_else(|| Value::String(String::new())))
        }
    });

    insert_fn(&mut env, "item.values", {
        let ctx = ctx.clone();
        move |args: &[Value]| {
            let id = require_str(args, 0, "item.values")?;
            Ok(Value::Array(ctx.read().item_values_for(&id)))
        }
    });

    env
}

fn insert_fn<F>(env: &mut Env, name: &str, f: F)
where
    F: Fn(&[Value]) -> Result<Value, EvalError> + Send + Sync + 'static,
{
    env.insert(name.to_string(), EnvValue::Function(Arc::new(f)));
}

/// Register an accessor reading one field out of a stored output.
/// Missing outputs and missing fields yield the default, never error.
fn insert_output_field(
    env: &mut Env,
    ctx: &SharedContext,
    name: &str,
    field: &'static str,
    default: Value,
) {
    let ctx = ctx.clone();
    insert_fn(env, name, move |args: &[Value]| {
        let Some(id) = args.first().and_then(Value::as_str) else {
            return Ok(default.clone());
        };
        let value = match ctx.read().output(id) {
            Some(Value::Object(map)) => map.get(field).cloned(),
            Some(Value::String(s)) if field == "response" => Some(Value::String(s)),
            _ => None,
        };
        Ok(value.unwrap_or_else(|| default.clone()))
    });
}

fn require_str(args: &[Value], index: usize, name: &str) -> Result<String, EvalError> {
    args.get(index)
        .and_then(Value::as_str)
        .map(|s| s.to_string())
        .ok_or_else(|| {
            EvalError::Eval(format!(
                "{}: argument {} must be a string",
                name,
                index + 1
            ))
        })
}
