//! Execution Outcome - standardized result of running a validated query

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Result of running one validated query.
///
/// `success = true` with `row_count = 0` means the query ran and matched nothing;
/// `success = false` always carries `error`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionOutcome {
    pub success: bool,

    /// Wall-clock execution time in milliseconds
    pub execution_time_ms: u64,

    pub row_count: usize,
    pub column_count: usize,
    pub executed_at: DateTime<Utc>,

    /// One JSON object per row, keys in column order
    pub rows: Option<Vec<serde_json::Map<String, serde_json::Value>>>,
    pub columns: Option<Vec<String>>,
    pub error: Option<String>,
}

impl ExecutionOutcome {
    /// Create a successful outcome; counts are derived from the rows.
    pub fn success(
        rows: Vec<serde_json::Map<String, serde_json::Value>>,
        execution_time_ms: u64,
    ) -> Self {
        let columns: Vec<String> = rows
            .first()
            .map(|row| row.keys().cloned().collect())
            .unwrap_or_default();

        Self {
            success: true,
            execution_time_ms,
            row_count: rows.len(),
            column_count: columns.len(),
            executed_at: Utc::now(),
            rows: Some(rows),
            columns: Some(columns),
            error: None,
        }
    }

    /// Create a failed outcome
    pub fn failure(error: impl Into<String>, execution_time_ms: u64) -> Self {
        Self {
            success: false,
            execution_time_ms,
            row_count: 0,
            column_count: 0,
            executed_at: Utc::now(),
            rows: None,
            columns: None,
            error: Some(error.into()),
        }
    }
}
