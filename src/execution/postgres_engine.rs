//! PostgreSQL Execution Adapter
//!
//! Wraps the generated query so every row decodes to a JSON array of `[column, value]`
//! pairs regardless of column types. `json` (unlike `jsonb`) keeps duplicate keys, so
//! joins returning two columns with the same name lose nothing.

use crate::error::Result;
use crate::execution::result::ExecutionOutcome;
use crate::execution::ExecutionAdapter;
use async_trait::async_trait;
use sqlx::postgres::{PgPool, PgPoolOptions};
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

/// Initialize the connection pool and check connectivity
pub async fn init_pool(database_url: &str) -> Result<PgPool> {
    let pool = PgPoolOptions::new()
        .max_connections(10)
        .acquire_timeout(Duration::from_secs(30))
        .connect(database_url)
        .await?;

    sqlx::query("SELECT 1").execute(&pool).await?;

    Ok(pool)
}

/// Wrap a SELECT so each row comes back as ordered `[column, value]` pairs.
/// The inner query sits on its own lines so a trailing `--` comment cannot swallow the wrapper.
pub fn wrap_as_json(sql: &str) -> String {
    let inner = sql.trim().trim_end_matches(';').trim_end();
    format!(
        "SELECT (SELECT json_agg(json_build_array(e.key, e.value) ORDER BY e.n) \
         FROM json_each(row_to_json(q)) WITH ORDINALITY AS e(key, value, n)) \
         FROM (\n{}\n) AS q",
        inner
    )
}

/// Build one row object from `[column, value]` pairs.
///
/// Repeated column names get a numeric suffix (`id`, `id_2`) so every value is kept.
pub fn decode_row(pairs: serde_json::Value) -> serde_json::Map<String, serde_json::Value> {
    let mut row = serde_json::Map::new();
    let serde_json::Value::Array(pairs) = pairs else {
        return row;
    };

    for pair in pairs {
        let (name, value) = match pair {
            serde_json::Value::Array(mut items) if items.len() == 2 => {
                let value = items.pop().unwrap_or_default();
                let name = match items.pop() {
                    Some(serde_json::Value::String(name)) => name,
                    Some(other) => other.to_string(),
                    None => continue,
                };
                (name, value)
            }
            other => {
                warn!("Unexpected column pair in result row: {}", other);
                continue;
            }
        };

        let mut key = name.clone();
        let mut suffix = 2;
        while row.contains_key(&key) {
            key = format!("{}_{}", name, suffix);
            suffix += 1;
        }
        if key != name {
            debug!("Duplicate column {} renamed to {}", name, key);
        }
        row.insert(key, value);
    }
    row
}

pub struct PostgresExecutor {
    pool: PgPool,
}

impl PostgresExecutor {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl ExecutionAdapter for PostgresExecutor {
    fn name(&self) -> &'static str {
        "postgres"
    }

    async fn execute(&self, sql: &str) -> Result<ExecutionOutcome> {
        let start_time = Instant::now();
        let wrapped = wrap_as_json(sql);

        let fetched: std::result::Result<Vec<serde_json::Value>, sqlx::Error> =
            sqlx::query_scalar(&wrapped).fetch_all(&self.pool).await;
        let elapsed_ms = start_time.elapsed().as_millis() as u64;

        match fetched {
            Ok(values) => {
                let rows = values.into_iter().map(decode_row).collect::<Vec<_>>();
                info!("✅ Query executed in {}ms, {} rows", elapsed_ms, rows.len());
                Ok(ExecutionOutcome::success(rows, elapsed_ms))
            }
            Err(e) => {
                let message = match &e {
                    sqlx::Error::Database(db) => db.message().to_string(),
                    other => other.to_string(),
                };
                warn!("Query execution failed: {}", message);
                Ok(ExecutionOutcome::failure(message, elapsed_ms))
            }
        }
    }
}
