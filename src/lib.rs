pub mod chat_service;
pub mod config;
pub mod error;
pub mod execution;
pub mod extractor;
pub mod generator;
pub mod llm;
pub mod logging;
pub mod pipeline;
pub mod schema;
pub mod tables;

pub use chat_service::{ChatServiceClient, ContextRetriever};
pub use config::Config;
pub use error::{Nl2SqlError, Result};
pub use execution::{ExecutionAdapter, ExecutionOutcome, PostgresExecutor};
pub use extractor::extract_tables;
pub use generator::{GenerationCapability, PolicyQueryResult, QueryGenerator};
pub use llm::GeminiClient;
pub use pipeline::{Nl2SqlPipeline, ResultEnvelope};
pub use schema::SchemaDocument;
pub use tables::KnownTableSet;
