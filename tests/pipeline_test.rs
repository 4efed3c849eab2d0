use async_trait::async_trait;
use policy_nl2sql::chat_service::ContextRetriever;
use policy_nl2sql::config::DEFAULT_SCHEMA_PATH;
use policy_nl2sql::error::{Nl2SqlError, Result};
use policy_nl2sql::execution::{ExecutionAdapter, ExecutionOutcome};
use policy_nl2sql::generator::validation::SELECT_CORRECTION;
use policy_nl2sql::generator::{GenerationCapability, PolicyQueryResult, QueryGenerator};
use policy_nl2sql::pipeline::Nl2SqlPipeline;
use policy_nl2sql::schema::SchemaDocument;
use policy_nl2sql::tables::{KnownTableSet, POLICY_TABLES};
use std::collections::VecDeque;
use std::path::Path;
use std::sync::{Arc, Mutex};

/// Small schema with no cross references so filtering is easy to observe
const SCHEMA: &str = "\
Table: policy
  id BIGINT
  status_lid BIGINT
  premium_at_inception NUMERIC

Table: opportunity
  id BIGINT
  expected_brokerage NUMERIC

Table: lookup_data
  id BIGINT
  value VARCHAR
";

struct StaticContext(std::result::Result<String, String>);

#[async_trait]
impl ContextRetriever for StaticContext {
    async fn create_session(&self, _prompt: &str, _assistant_hint: &str) -> Result<String> {
        self.0.clone().map_err(Nl2SqlError::UpstreamContext)
    }
}

/// Replays scripted replies and records the instructions it was given
struct ScriptedModel {
    replies: Mutex<VecDeque<PolicyQueryResult>>,
    instructions: Mutex<Vec<String>>,
}

impl ScriptedModel {
    fn new(replies: Vec<PolicyQueryResult>) -> Arc<Self> {
        Arc::new(Self {
            replies: Mutex::new(replies.into()),
            instructions: Mutex::new(Vec::new()),
        })
    }

    fn seen(&self) -> Vec<String> {
        self.instructions.lock().unwrap().clone()
    }
}

#[async_trait]
impl GenerationCapability for ScriptedModel {
    async fn generate(&self, instructions: &str, _prompt: &str) -> Result<PolicyQueryResult> {
        self.instructions.lock().unwrap().push(instructions.to_string());
        self.replies
            .lock()
            .unwrap()
            .pop_front()
            .ok_or_else(|| Nl2SqlError::Llm("script exhausted".to_string()))
    }
}

struct FixedExecutor(ExecutionOutcome);

#[async_trait]
impl ExecutionAdapter for FixedExecutor {
    fn name(&self) -> &'static str {
        "fixed"
    }

    async fn execute(&self, _sql: &str) -> Result<ExecutionOutcome> {
        Ok(self.0.clone())
    }
}

fn build(context: StaticContext, model: Arc<ScriptedModel>) -> Nl2SqlPipeline {
    let generator = QueryGenerator::new(model, SchemaDocument::new(SCHEMA));
    Nl2SqlPipeline::new(
        Arc::new(context),
        generator,
        Arc::new(KnownTableSet::policy_catalog()),
    )
}

fn count_row(count: i64) -> serde_json::Map<String, serde_json::Value> {
    let mut row = serde_json::Map::new();
    row.insert("active_policies".to_string(), count.into());
    row
}

#[tokio::test]
async fn test_end_to_end_with_execution() {
    let model = ScriptedModel::new(vec![PolicyQueryResult::success(
        "SELECT COUNT(*) AS active_policies FROM policy WHERE status_lid = 1",
        "Counts active policies",
        "Portfolio size",
    )]);
    let pipeline = build(
        StaticContext(Ok("Relevant tables: 1. policy (core)".to_string())),
        model.clone(),
    )
    .with_executor(Arc::new(FixedExecutor(ExecutionOutcome::success(
        vec![count_row(42)],
        7,
    ))));

    let envelope = pipeline
        .run("How many active policies do we have?", "16", true)
        .await;

    assert_eq!(envelope.user_query, "How many active policies do we have?");
    assert_eq!(envelope.relevant_tables, vec!["policy"]);
    assert_eq!(envelope.generation_attempts, Some(1));
    assert!(envelope.error.is_none());
    assert_eq!(envelope.execution_success, Some(true));
    assert_eq!(envelope.row_count, Some(1));
    assert_eq!(envelope.columns, Some(vec!["active_policies".to_string()]));
    assert!(!envelope.request_id.is_empty());

    // Focus list is widened with the lookup table and the schema is filtered to match
    let instructions = &model.seen()[0];
    assert!(instructions.contains("**Primary Analysis Focus**: policy, lookup_data"));
    assert!(instructions.contains("Table: policy"));
    assert!(instructions.contains("Table: lookup_data"));
    assert!(!instructions.contains("expected_brokerage"));
}

#[tokio::test]
async fn test_update_is_retried_until_select() {
    let model = ScriptedModel::new(vec![
        PolicyQueryResult::success("UPDATE policy SET status_lid = 0", "", ""),
        PolicyQueryResult::success("SELECT * FROM policy LIMIT 100", "Lists policies", ""),
    ]);
    let pipeline = build(StaticContext(Ok("policy".to_string())), model.clone());

    let envelope = pipeline.run("Show me policy rows", "16", false).await;

    assert_eq!(envelope.sql_query.as_deref(), Some("SELECT * FROM policy LIMIT 100"));
    assert_eq!(envelope.generation_attempts, Some(2));
    assert!(envelope.execution_success.is_none());

    let seen = model.seen();
    assert_eq!(seen.len(), 2);
    assert!(!seen[0].contains(SELECT_CORRECTION));
    assert!(seen[1].contains(SELECT_CORRECTION));
}

#[tokio::test]
async fn test_refusal_is_returned_without_retry() {
    let model = ScriptedModel::new(vec![PolicyQueryResult::failure(
        "This request is not about policy data",
        "Ask about policies, premiums or endorsements",
    )]);
    let pipeline = build(StaticContext(Ok(String::new())), model.clone());

    let envelope = pipeline.run("What's the weather today?", "16", true).await;

    assert_eq!(envelope.error.as_deref(), Some("This request is not about policy data"));
    assert_eq!(
        envelope.suggestion.as_deref(),
        Some("Ask about policies, premiums or endorsements")
    );
    assert!(envelope.sql_query.is_none());
    assert_eq!(envelope.generation_attempts, Some(1));
    assert_eq!(model.seen().len(), 1);
    // Nothing is executed without a query
    assert!(envelope.execution_success.is_none());
}

#[tokio::test]
async fn test_execution_failure_keeps_sql() {
    let model = ScriptedModel::new(vec![PolicyQueryResult::success(
        "SELECT premium_at_inception FROM policy",
        "",
        "",
    )]);
    let pipeline = build(StaticContext(Ok("policy".to_string())), model)
        .with_executor(Arc::new(FixedExecutor(ExecutionOutcome::failure(
            "syntax error at or near \"FROM\"",
            2,
        ))));

    let envelope = pipeline.run("Total premium per policy", "16", true).await;

    assert_eq!(
        envelope.sql_query.as_deref(),
        Some("SELECT premium_at_inception FROM policy")
    );
    assert_eq!(envelope.execution_success, Some(false));
    assert!(envelope
        .execution_error
        .as_deref()
        .unwrap_or_default()
        .contains("syntax error"));
    assert!(envelope.rows.is_none());
    assert!(envelope.error.is_none());
}

#[tokio::test]
async fn test_context_failure_degrades_to_full_schema() {
    let model = ScriptedModel::new(vec![PolicyQueryResult::success(
        "SELECT SUM(expected_brokerage) FROM opportunity",
        "",
        "",
    )]);
    let pipeline = build(StaticContext(Err("connection refused".to_string())), model.clone());

    let envelope = pipeline.run("Total expected brokerage", "16", false).await;

    assert!(envelope.context_response.starts_with("Context unavailable"));
    assert!(envelope.relevant_tables.is_empty());
    assert!(envelope.sql_query.is_some());

    let instructions = &model.seen()[0];
    assert!(instructions.contains("All available tables"));
    assert!(instructions.contains("expected_brokerage"));
}

#[tokio::test]
async fn test_envelope_json_has_every_field() {
    let model = ScriptedModel::new(vec![PolicyQueryResult::success("SELECT 1 FROM policy", "", "")]);
    let envelope = build(StaticContext(Ok("policy".to_string())), model)
        .run("policy count", "16", false)
        .await;

    let json = serde_json::to_value(&envelope).unwrap();
    for field in [
        "request_id",
        "user_query",
        "context_response",
        "relevant_tables",
        "sql_query",
        "explanation",
        "business_context",
        "error",
        "suggestion",
        "execution_success",
        "execution_time_ms",
        "row_count",
        "column_count",
        "executed_at",
        "columns",
        "rows",
        "execution_error",
    ] {
        assert!(json.get(field).is_some(), "missing field {}", field);
    }
    assert!(json["execution_error"].is_null());
}

#[test]
fn test_bundled_schema_covers_catalog() {
    let path = Path::new(env!("CARGO_MANIFEST_DIR")).join(DEFAULT_SCHEMA_PATH);
    let schema = SchemaDocument::load(&path).unwrap();
    for table in POLICY_TABLES {
        assert!(
            schema.as_str().contains(&format!("Table: {}\n", table)),
            "schema is missing {}",
            table
        );
    }
}
