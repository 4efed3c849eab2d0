//! Query execution behind a pluggable adapter.

pub mod postgres_engine;
pub mod result;

pub use postgres_engine::{init_pool, PostgresExecutor};
pub use result::ExecutionOutcome;

use crate::error::Result;
use async_trait::async_trait;

/// Runs a validated SELECT query.
///
/// Database-level failures should come back as `Ok` with `success = false`; `Err` is
/// reserved for the adapter itself being unusable.
#[async_trait]
pub trait ExecutionAdapter: Send + Sync {
    /// Adapter name (e.g., "postgres")
    fn name(&self) -> &'static str;

    async fn execute(&self, sql: &str) -> Result<ExecutionOutcome>;
}
