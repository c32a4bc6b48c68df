//! SQL query executor

use async_trait::async_trait;
use rusqlite::types::ValueRef;
use rusqlite::Connection;
use serde_json::{Number, Value};

use crate::error::{ActionError, EngineError, EngineResult};
use crate::workflow::{RunKind, RunSpec};

use super::{ActionExecutor, ExecCall};

/// Executor for `sql` resources backed by SQLite
pub struct SqlExecutor;

impl SqlExecutor {
    /// Create the executor
    pub fn new() -> Self {
        Self
    }
}

impl Default for SqlExecutor {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ActionExecutor for SqlExecutor {
    fn kind(&self) -> RunKind {
        RunKind::Sql
    }

    async fn execute(&self, call: &ExecCall, run: &RunSpec) -> EngineResult<Value> {
        let config = run
            .sql
            .as_ref()
            .ok_or_else(|| EngineError::InvalidContext("sql config missing".to_string()))?;

        let connection = call.render(&config.connection)?;
        let query = call.render(&config.query)?;
        let mut params = Vec::with_capacity(config.params.len());
        for param in &config.params {
            params.push(call.render_raw(&param.raw)?);
        }

        call.cancel.check()?;

        let result = tokio::task::spawn_blocking(move || run_query(&connection, &query, &params))
            .await
            .map_err(|e| EngineError::Panic(format!("sql worker: {}", e)))?;
        result
    }
}

fn run_query(connection: &str, query: &str, params: &[Value]) -> EngineResult<Value> {
    let conn = open_connection(connection)
        .map_err(|e| sql_error(format!("failed to open '{}': {}", connection, e)))?;

    let mut stmt = conn
        .prepare(query)
        .map_err(|e| sql_error(format!("failed to prepare query: {}", e)))?;

    let bound = params.iter().map(bind_value).collect::<Vec<_>>();
    let param_refs: Vec<&dyn rusqlite::ToSql> =
        bound.iter().map(|v| v as &dyn rusqlite::ToSql).collect();

    if stmt.column_count() == 0 {
        let affected = stmt
            .execute(param_refs.as_slice())
            .map_err(|e| sql_error(format!("query failed: {}", e)))?;
        return Ok(serde_json::json!({
            "rows": [],
            "rowCount": 0,
            "rowsAffected": affected,
        }));
    }

    let columns: Vec<String> = stmt.column_names().iter().map(|c| c.to_string()).collect();
    let mut rows = stmt
        .query(param_refs.as_slice())
        .map_err(|e| sql_error(format!("query failed: {}", e)))?;

    let mut out = Vec::new();
    while let Some(row) = rows
        .next()
        .map_err(|e| sql_error(format!("row fetch failed: {}", e)))?
    {
        let mut object = serde_json::Map::with_capacity(columns.len());
        for (i, column) in columns.iter().enumerate() {
            let value = row
                .get_ref(i)
                .map(column_value)
                .map_err(|e| sql_error(format!("column decode failed: {}", e)))?;
            object.insert(column.clone(), value);
        }
        out.push(Value::Object(object));
    }

    let count = out.len();
    Ok(serde_json::json!({
        "rows": out,
        "rowCount": count,
    }))
}

fn open_connection(connection: &str) -> rusqlite::Result<Connection> {
    if connection == ":memory:" {
        Connection::open_in_memory()
    } else {
        Connection::open(connection)
    }
}

fn bind_value(value: &Value) -> rusqlite::types::Value {
    use rusqlite::types::Value as Sql;
    match value {
        Value::Null => Sql::Null,
        Value::Bool(b) => Sql::Integer(i64::from(*b)),
        Value::Number(n) => {
            if let Some(i) = n.as_i64() {
                Sql::Integer(i)
            } else {
                Sql::Real(n.as_f64().unwrap_or(0.0))
            }
        }
        Value::String(s) => Sql::Text(s.clone()),
        other => Sql::Text(other.to_string()),
    }
}

fn column_value(value: ValueRef<'_>) -> Value {
    match value {
        ValueRef::Null => Value::Null,
        ValueRef::Integer(i) => Value::Number(Number::from(i)),
        ValueRef::Real(f) => Number::from_f64(f).map(Value::Number).unwrap_or(Value::Null),
        ValueRef::Text(t) => Value::String(String::from_utf8_lossy(t).to_string()),
        ValueRef::Blob(b) => Value::String(format!("<blob {} bytes>", b.len())),
    }
}

fn sql_error(message: String) -> EngineError {
    ActionError::new(message).with_type("sql").into()
}
