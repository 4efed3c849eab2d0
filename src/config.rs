//! Runtime configuration read from environment variables (optionally via `.env`).

use crate::error::{Nl2SqlError, Result};
use std::path::PathBuf;
use std::time::Duration;

pub const DEFAULT_ASSISTANT_ID: &str = "16";
pub const DEFAULT_CHAT_BASE_URL: &str = "http://localhost:8080/api";
pub const DEFAULT_GEMINI_BASE_URL: &str = "https://generativelanguage.googleapis.com/v1beta";
pub const DEFAULT_GEMINI_MODEL: &str = "gemini-1.5-flash";
pub const DEFAULT_SCHEMA_PATH: &str = "data/iirm/tables-policy-detailed.txt";
pub const DEFAULT_BIND_ADDR: &str = "0.0.0.0:8000";

#[derive(Debug, Clone)]
pub struct Config {
    /// Bearer token for the chat service
    pub auth_token: Option<String>,
    pub chat_base_url: String,
    pub default_assistant_id: String,

    pub google_api_key: Option<String>,
    pub gemini_base_url: String,
    pub gemini_model: String,

    /// Forwarded to the chat service as `llm_override` when both are set
    pub llm_model_provider: Option<String>,
    pub llm_model_version: Option<String>,

    pub schema_path: PathBuf,
    pub database_url: Option<String>,

    pub max_generation_attempts: u8,
    pub context_timeout: Duration,
    pub generation_timeout: Duration,
    pub execution_timeout: Duration,

    pub bind_addr: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            auth_token: None,
            chat_base_url: DEFAULT_CHAT_BASE_URL.to_string(),
            default_assistant_id: DEFAULT_ASSISTANT_ID.to_string(),
            google_api_key: None,
            gemini_base_url: DEFAULT_GEMINI_BASE_URL.to_string(),
            gemini_model: DEFAULT_GEMINI_MODEL.to_string(),
            llm_model_provider: None,
            llm_model_version: None,
            schema_path: PathBuf::from(DEFAULT_SCHEMA_PATH),
            database_url: None,
            max_generation_attempts: 3,
            context_timeout: Duration::from_secs(60),
            generation_timeout: Duration::from_secs(60),
            execution_timeout: Duration::from_secs(30),
            bind_addr: DEFAULT_BIND_ADDR.to_string(),
        }
    }
}

impl Config {
    /// Load configuration from the process environment
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Load configuration from an arbitrary key lookup. Empty values count as unset.
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());
        let defaults = Self::default();

        let max_generation_attempts = match get("MAX_GENERATION_ATTEMPTS") {
            Some(raw) => {
                let attempts = parse_number::<u8>("MAX_GENERATION_ATTEMPTS", &raw)?;
                if attempts == 0 {
                    return Err(Nl2SqlError::Configuration(
                        "MAX_GENERATION_ATTEMPTS must be at least 1".to_string(),
                    ));
                }
                attempts
            }
            None => defaults.max_generation_attempts,
        };

        Ok(Self {
            auth_token: get("AUTH_TOKEN"),
            chat_base_url: get("ONYX_BASE_URL").unwrap_or(defaults.chat_base_url),
            default_assistant_id: get("DEFAULT_ASSISTANT_ID").unwrap_or(defaults.default_assistant_id),
            google_api_key: get("GOOGLE_API_KEY"),
            gemini_base_url: get("GEMINI_BASE_URL").unwrap_or(defaults.gemini_base_url),
            gemini_model: get("GEMINI_MODEL").unwrap_or(defaults.gemini_model),
            llm_model_provider: get("LLM_MODEL_PROVIDER"),
            llm_model_version: get("LLM_MODEL_VERSION"),
            schema_path: get("POLICY_SCHEMA_PATH").map(PathBuf::from).unwrap_or(defaults.schema_path),
            database_url: get("DATABASE_URL"),
            max_generation_attempts,
            context_timeout: seconds(&get, "CONTEXT_TIMEOUT_SECS", defaults.context_timeout)?,
            generation_timeout: seconds(&get, "GENERATION_TIMEOUT_SECS", defaults.generation_timeout)?,
            execution_timeout: seconds(&get, "EXECUTION_TIMEOUT_SECS", defaults.execution_timeout)?,
            bind_addr: get("BIND_ADDR").unwrap_or(defaults.bind_addr),
        })
    }
}

fn seconds<G>(get: &G, key: &str, default: Duration) -> Result<Duration>
where
    G: Fn(&str) -> Option<String>,
{
    match get(key) {
        Some(raw) => Ok(Duration::from_secs(parse_number::<u64>(key, &raw)?)),
        None => Ok(default),
    }
}

fn parse_number<T: std::str::FromStr>(key: &str, raw: &str) -> Result<T> {
    raw.parse::<T>()
        .map_err(|_| Nl2SqlError::Configuration(format!("{} has invalid value '{}'", key, raw)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_defaults_when_env_is_empty() {
        let config = Config::from_lookup(lookup(&[])).unwrap();
        assert_eq!(config.default_assistant_id, "16");
        assert_eq!(config.gemini_model, "gemini-1.5-flash");
        assert_eq!(config.max_generation_attempts, 3);
        assert_eq!(config.context_timeout, Duration::from_secs(60));
        assert!(config.auth_token.is_none());
        assert!(config.database_url.is_none());
    }

    #[test]
    fn test_reads_overrides() {
        let config = Config::from_lookup(lookup(&[
            ("AUTH_TOKEN", "secret"),
            ("GOOGLE_API_KEY", "key"),
            ("MAX_GENERATION_ATTEMPTS", "2"),
            ("EXECUTION_TIMEOUT_SECS", "5"),
            ("POLICY_SCHEMA_PATH", "/tmp/schema.txt"),
        ]))
        .unwrap();
        assert_eq!(config.auth_token.as_deref(), Some("secret"));
        assert_eq!(config.google_api_key.as_deref(), Some("key"));
        assert_eq!(config.max_generation_attempts, 2);
        assert_eq!(config.execution_timeout, Duration::from_secs(5));
        assert_eq!(config.schema_path, PathBuf::from("/tmp/schema.txt"));
    }

    #[test]
    fn test_blank_values_count_as_unset() {
        let config = Config::from_lookup(lookup(&[("AUTH_TOKEN", "   ")])).unwrap();
        assert!(config.auth_token.is_none());
    }

    #[test]
    fn test_invalid_numbers_are_configuration_errors() {
        let err = Config::from_lookup(lookup(&[("CONTEXT_TIMEOUT_SECS", "soon")])).unwrap_err();
        assert!(err.is_configuration());

        let err = Config::from_lookup(lookup(&[("MAX_GENERATION_ATTEMPTS", "0")])).unwrap_err();
        assert!(err.is_configuration());
    }
}
