//! Query Generator
//!
//! Builds the system prompt for one request, calls the generation capability and
//! enforces the SELECT-only and domain-table rules through a bounded retry loop.

pub mod prompt;
pub mod state_machine;
pub mod validation;

pub use prompt::build_system_prompt;
pub use state_machine::{GenerationOutcome, GenerationState, QueryGenerator, Transition};
pub use validation::{clean_sql, validate_output, Verdict};

use crate::error::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// Output of one generation: a query or the model's own refusal
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum PolicyQueryResult {
    Success {
        sql_query: String,
        #[serde(default)]
        explanation: String,
        #[serde(default)]
        business_context: String,
    },
    Failure {
        error_message: String,
        #[serde(default)]
        suggestion: String,
    },
}

impl PolicyQueryResult {
    pub fn success(
        sql_query: impl Into<String>,
        explanation: impl Into<String>,
        business_context: impl Into<String>,
    ) -> Self {
        PolicyQueryResult::Success {
            sql_query: sql_query.into(),
            explanation: explanation.into(),
            business_context: business_context.into(),
        }
    }

    pub fn failure(error_message: impl Into<String>, suggestion: impl Into<String>) -> Self {
        PolicyQueryResult::Failure {
            error_message: error_message.into(),
            suggestion: suggestion.into(),
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, PolicyQueryResult::Success { .. })
    }

    pub fn sql_query(&self) -> Option<&str> {
        match self {
            PolicyQueryResult::Success { sql_query, .. } => Some(sql_query),
            PolicyQueryResult::Failure { .. } => None,
        }
    }
}

/// Per-call input assembled by the generator
#[derive(Debug, Clone)]
pub struct GenerationRequest {
    pub prompt: String,
    /// Extracted tables widened with the lookup table; empty means "all tables"
    pub focus_tables: Vec<String>,
    /// Filtered schema text
    pub schema: String,
}

/// Black-box text-to-query capability (an LLM call in production).
///
/// Output that cannot be decoded into a [`PolicyQueryResult`] must be reported as
/// [`crate::error::Nl2SqlError::FormatViolation`] so the generator can retry it.
#[async_trait]
pub trait GenerationCapability: Send + Sync {
    async fn generate(&self, instructions: &str, prompt: &str) -> Result<PolicyQueryResult>;

    fn name(&self) -> &str {
        "generation"
    }
}
