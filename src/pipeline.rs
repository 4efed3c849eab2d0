//! Pipeline Orchestrator
//!
//! context retrieval → table extraction → schema filtering + generation → optional
//! execution. Each stage is failure-isolated and the result is always a fully
//! populated [`ResultEnvelope`].

use crate::chat_service::{ChatServiceClient, ContextRetriever};
use crate::config::Config;
use crate::error::{Nl2SqlError, Result};
use crate::execution::{init_pool, ExecutionAdapter, ExecutionOutcome, PostgresExecutor};
use crate::extractor::extract_tables;
use crate::generator::{PolicyQueryResult, QueryGenerator};
use crate::llm::GeminiClient;
use crate::schema::SchemaDocument;
use crate::tables::KnownTableSet;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, info_span, warn, Instrument};
use uuid::Uuid;

pub const DEFAULT_CONTEXT_TIMEOUT: Duration = Duration::from_secs(60);
pub const DEFAULT_EXECUTION_TIMEOUT: Duration = Duration::from_secs(30);

/// Complete response for one request. Fields that do not apply are `null`, never absent.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResultEnvelope {
    pub request_id: String,
    pub user_query: String,
    pub context_response: String,
    pub relevant_tables: Vec<String>,

    pub sql_query: Option<String>,
    pub explanation: Option<String>,
    pub business_context: Option<String>,
    pub error: Option<String>,
    pub suggestion: Option<String>,
    pub generation_attempts: Option<u8>,

    pub execution_success: Option<bool>,
    pub execution_time_ms: Option<u64>,
    pub row_count: Option<usize>,
    pub column_count: Option<usize>,
    pub executed_at: Option<DateTime<Utc>>,
    pub columns: Option<Vec<String>>,
    pub rows: Option<Vec<serde_json::Map<String, serde_json::Value>>>,
    pub execution_error: Option<String>,
}

impl ResultEnvelope {
    fn new(request_id: String, prompt: &str, context_response: String, relevant_tables: Vec<String>) -> Self {
        Self {
            request_id,
            user_query: prompt.to_string(),
            context_response,
            relevant_tables,
            sql_query: None,
            explanation: None,
            business_context: None,
            error: None,
            suggestion: None,
            generation_attempts: None,
            execution_success: None,
            execution_time_ms: None,
            row_count: None,
            column_count: None,
            executed_at: None,
            columns: None,
            rows: None,
            execution_error: None,
        }
    }

    fn apply_generation(&mut self, result: PolicyQueryResult) {
        match result {
            PolicyQueryResult::Success {
                sql_query,
                explanation,
                business_context,
            } => {
                self.sql_query = Some(sql_query);
                self.explanation = Some(explanation);
                self.business_context = Some(business_context);
            }
            PolicyQueryResult::Failure {
                error_message,
                suggestion,
            } => {
                self.error = Some(error_message);
                self.suggestion = Some(suggestion).filter(|s| !s.is_empty());
            }
        }
    }

    fn apply_execution(&mut self, outcome: ExecutionOutcome) {
        self.execution_success = Some(outcome.success);
        self.execution_time_ms = Some(outcome.execution_time_ms);
        self.executed_at = Some(outcome.executed_at);
        if outcome.success {
            self.row_count = Some(outcome.row_count);
            self.column_count = Some(outcome.column_count);
            self.columns = outcome.columns;
            self.rows = outcome.rows;
        } else {
            self.execution_error = Some(
                outcome
                    .error
                    .unwrap_or_else(|| "Query execution failed".to_string()),
            );
        }
    }

    fn apply_execution_error(&mut self, message: String) {
        self.execution_success = Some(false);
        self.executed_at = Some(Utc::now());
        self.execution_error = Some(message);
    }

    pub fn is_success(&self) -> bool {
        self.error.is_none() && self.sql_query.is_some()
    }
}

/// Placeholder context used when retrieval fails
pub fn context_placeholder(reason: &str) -> String {
    format!("Context unavailable: {}", reason)
}

/// The NL→SQL pipeline. Cheap to clone; all shared parts are read-only.
#[derive(Clone)]
pub struct Nl2SqlPipeline {
    context: Arc<dyn ContextRetriever>,
    generator: QueryGenerator,
    executor: Option<Arc<dyn ExecutionAdapter>>,
    known_tables: Arc<KnownTableSet>,
    context_timeout: Duration,
    execution_timeout: Duration,
}

impl Nl2SqlPipeline {
    pub fn new(
        context: Arc<dyn ContextRetriever>,
        generator: QueryGenerator,
        known_tables: Arc<KnownTableSet>,
    ) -> Self {
        Self {
            context,
            generator,
            executor: None,
            known_tables,
            context_timeout: DEFAULT_CONTEXT_TIMEOUT,
            execution_timeout: DEFAULT_EXECUTION_TIMEOUT,
        }
    }

    /// Wire the production clients from `config`.
    ///
    /// A schema that cannot be loaded or a database that cannot be reached is logged and
    /// left for each request to report, so the service still starts.
    pub async fn from_config(config: &Config) -> Self {
        let schema = match SchemaDocument::load(&config.schema_path) {
            Ok(schema) => schema,
            Err(e) => {
                error!("❌ {}", e);
                SchemaDocument::default()
            }
        };

        let generator = QueryGenerator::new(Arc::new(GeminiClient::from_config(config)), schema)
            .with_max_attempts(config.max_generation_attempts)
            .with_attempt_timeout(config.generation_timeout);

        let mut pipeline = Self::new(
            Arc::new(ChatServiceClient::from_config(config)),
            generator,
            Arc::new(KnownTableSet::policy_catalog()),
        )
        .with_timeouts(config.context_timeout, config.execution_timeout);

        match &config.database_url {
            Some(url) => match init_pool(url).await {
                Ok(pool) => {
                    info!("✅ Database connection pool ready");
                    pipeline = pipeline.with_executor(Arc::new(PostgresExecutor::new(pool)));
                }
                Err(e) => warn!("⚠️  Database unavailable, execution disabled: {}", e),
            },
            None => info!("DATABASE_URL not set, execution disabled"),
        }
        pipeline
    }

    pub fn with_executor(mut self, executor: Arc<dyn ExecutionAdapter>) -> Self {
        self.executor = Some(executor);
        self
    }

    pub fn with_timeouts(mut self, context_timeout: Duration, execution_timeout: Duration) -> Self {
        self.context_timeout = context_timeout;
        self.execution_timeout = execution_timeout;
        self
    }

    pub fn has_executor(&self) -> bool {
        self.executor.is_some()
    }

    /// Run the whole pipeline for one question.
    pub async fn run(&self, prompt: &str, assistant_hint: &str, execute: bool) -> ResultEnvelope {
        let request_id = Uuid::new_v4().to_string();
        let span = info_span!("nl2sql", request_id = %request_id);
        self.run_inner(request_id, prompt, assistant_hint, execute)
            .instrument(span)
            .await
    }

    async fn run_inner(
        &self,
        request_id: String,
        prompt: &str,
        assistant_hint: &str,
        execute: bool,
    ) -> ResultEnvelope {
        info!("🔍 NL2SQL request: {}", prompt);

        if prompt.trim().is_empty() {
            let mut envelope = ResultEnvelope::new(
                request_id,
                prompt,
                context_placeholder("prompt is empty"),
                Vec::new(),
            );
            envelope.error = Some("Prompt cannot be empty.".to_string());
            return envelope;
        }

        // Step 1: context from the chat service, degrading on failure
        let context_response = match self.retrieve_context(prompt, assistant_hint).await {
            Ok(text) => text,
            Err(e) if e.is_configuration() => {
                error!("❌ {}", e);
                let mut envelope =
                    ResultEnvelope::new(request_id, prompt, context_placeholder(&e.to_string()), Vec::new());
                envelope.error = Some(e.to_string());
                return envelope;
            }
            Err(e) => {
                warn!("⚠️  Context retrieval failed, using full schema: {}", e);
                return self
                    .finish(request_id, prompt, context_placeholder(&e.to_string()), Vec::new(), execute)
                    .await;
            }
        };

        // Step 2: table hint
        let relevant_tables = extract_tables(&context_response, &self.known_tables);

        self.finish(request_id, prompt, context_response, relevant_tables, execute)
            .await
    }

    async fn finish(
        &self,
        request_id: String,
        prompt: &str,
        context_response: String,
        relevant_tables: Vec<String>,
        execute: bool,
    ) -> ResultEnvelope {
        // Step 3: generation
        let outcome = self.generator.generate(prompt, &relevant_tables).await;
        let mut envelope = ResultEnvelope::new(request_id, prompt, context_response, relevant_tables);
        envelope.generation_attempts = Some(outcome.attempts);
        let sql = outcome.result.sql_query().map(str::to_string);
        envelope.apply_generation(outcome.result);

        // Steps 4 and 5: failed generation or no execution requested
        let Some(sql) = sql else {
            info!("Generation failed: {:?}", envelope.error);
            return envelope;
        };
        if !execute {
            return envelope;
        }

        // Step 6: execution never discards the generated query
        match self.execute(&sql).await {
            Ok(outcome) => envelope.apply_execution(outcome),
            Err(e) => {
                error!("❌ Execution failed: {}", e);
                envelope.apply_execution_error(e.to_string());
            }
        }
        envelope
    }

    async fn retrieve_context(&self, prompt: &str, assistant_hint: &str) -> Result<String> {
        match tokio::time::timeout(self.context_timeout, self.context.create_session(prompt, assistant_hint)).await {
            Ok(result) => result,
            Err(_) => Err(Nl2SqlError::Timeout(self.context_timeout, "context retrieval")),
        }
    }

    async fn execute(&self, sql: &str) -> Result<ExecutionOutcome> {
        let executor = self.executor.as_ref().ok_or_else(|| {
            Nl2SqlError::Execution("No database configured; set DATABASE_URL to execute queries".to_string())
        })?;
        info!("Executing query with {} adapter", executor.name());
        match tokio::time::timeout(self.execution_timeout, executor.execute(sql)).await {
            Ok(result) => result,
            Err(_) => Err(Nl2SqlError::Timeout(self.execution_timeout, "query execution")),
        }
    }
}
