use thiserror::Error;

#[derive(Error, Debug)]
pub enum Nl2SqlError {
    /// Chat service could not provide context. The pipeline degrades instead of failing.
    #[error("Upstream context error: {0}")]
    UpstreamContext(String),

    /// Model output that could not be decoded. Retried by the generator.
    #[error("Format violation: {0}")]
    FormatViolation(String),

    #[error("Execution error: {0}")]
    Execution(String),

    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("LLM error: {0}")]
    Llm(String),

    #[error("Timed out after {0:?} during {1}")]
    Timeout(std::time::Duration, &'static str),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl Nl2SqlError {
    pub fn is_configuration(&self) -> bool {
        matches!(self, Nl2SqlError::Configuration(_))
    }
}

pub type Result<T> = std::result::Result<T, Nl2SqlError>;
