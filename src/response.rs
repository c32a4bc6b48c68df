//! Response envelope
//!
//! apiResponse resources produce a `{success, data, _meta?}` envelope.
//! Downstream expressions read the envelope; the engine unwraps it
//! back to the `data` payload only for the final target output.

use serde_json::Value;

use crate::error::{ActionError, EngineError};

/// Build the apiResponse envelope
pub fn make_envelope(success: bool, data: Value, meta: Option<Value>) -> Value {
    let mut envelope = serde_json::Map::new();
    envelope.insert("success".to_string(), Value::Bool(success));
    envelope.insert("data".to_string(), data);
    if let Some(meta) = meta {
        envelope.insert("_meta".to_string(), meta);
    }
    Value::Object(envelope)
}

/// Whether a value carries the `{success, data}` envelope shape
pub fn is_envelope(value: &Value) -> bool {
    value
        .as_object()
        .map(|map| map.get("success").map(Value::is_boolean).unwrap_or(false) && map.contains_key("data"))
        .unwrap_or(false)
}

/// Strip the envelope down to its `data` payload; non-envelopes pass
/// through untouched
pub fn unwrap_envelope(value: Value) -> Value {
    if is_envelope(&value) {
        match value {
            Value::Object(mut map) => map.remove("data").unwrap_or(Value::Null),
            other => other,
        }
    } else {
        value
    }
}

/// The `{_error: {message, handled: true}}` output substituted when a
/// continue policy has no fallback
pub fn handled_error_output(message: &str) -> Value {
    serde_json::json!({
        "_error": {
            "message": message,
            "handled": true,
        }
    })
}

/// Failure envelope for callers surfacing an engine error over an
/// API boundary: `{success: false, _error: {message, handled, …}}`
pub fn failure_envelope(err: &EngineError) -> Value {
    let mut error = match error_binding(err) {
        Value::Object(map) => map,
        other => {
            let mut map = serde_json::Map::new();
            map.insert("message".to_string(), other);
            map
        }
    };
    error.insert("handled".to_string(), Value::Bool(false));
    if let EngineError::Validation(_) = err {
        error.insert(
            "code".to_string(),
            Value::String("VALIDATION_ERROR".to_string()),
        );
    }
    if let EngineError::Preflight(preflight) = err {
        error.insert("statusCode".to_string(), Value::from(preflight.code));
    }

    serde_json::json!({
        "success": false,
        "_error": error,
    })
}

/// The error object bound as `error` for onError `when`/`expr`
/// evaluation; structured fields appear only when known
pub fn error_binding(err: &EngineError) -> Value {
    let mut object = serde_json::Map::new();
    match err {
        EngineError::Action(ActionError {
            message,
            code,
            error_type,
            status_code,
        }) => {
            object.insert("message".to_string(), Value::String(message.clone()));
            if let Some(code) = code {
                object.insert("code".to_string(), Value::String(code.clone()));
            }
            if let Some(error_type) = error_type {
                object.insert("type".to_string(), Value::String(error_type.clone()));
            }
            if let Some(status) = status_code {
                object.insert("statusCode".to_string(), Value::from(*status));
            }
        }
        other => {
            object.insert("message".to_string(), Value::String(other.to_string()));
        }
    }
    Value::Object(object)
}
