use crate::config::{Config, DEFAULT_GEMINI_BASE_URL, DEFAULT_GEMINI_MODEL};
use crate::error::{Nl2SqlError, Result};
use crate::generator::{GenerationCapability, PolicyQueryResult};
use async_trait::async_trait;
use serde::Deserialize;
use tracing::debug;

/// Raw JSON object the model is instructed to return
#[derive(Debug, Deserialize)]
struct ModelReply {
    sql_query: Option<String>,
    #[serde(default)]
    explanation: Option<String>,
    #[serde(default)]
    business_context: Option<String>,
    error_message: Option<String>,
    #[serde(default)]
    suggestion: Option<String>,
}

/// Gemini `generateContent` client used as the generation capability
pub struct GeminiClient {
    http: reqwest::Client,
    api_key: Option<String>,
    base_url: String,
    model: String,
    temperature: f32,
}

impl GeminiClient {
    pub fn new(api_key: Option<String>) -> Self {
        Self {
            http: reqwest::Client::new(),
            api_key,
            base_url: DEFAULT_GEMINI_BASE_URL.to_string(),
            model: DEFAULT_GEMINI_MODEL.to_string(),
            temperature: 0.1,
        }
    }

    pub fn from_config(config: &Config) -> Self {
        Self::new(config.google_api_key.clone())
            .with_base_url(config.gemini_base_url.clone())
            .with_model(config.gemini_model.clone())
    }

    pub fn with_base_url(mut self, base_url: String) -> Self {
        self.base_url = base_url.trim_end_matches('/').to_string();
        self
    }

    pub fn with_model(mut self, model: String) -> Self {
        self.model = model;
        self
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    async fn call_llm(&self, instructions: &str, prompt: &str) -> Result<String> {
        let api_key = self.api_key.as_deref().ok_or_else(|| {
            Nl2SqlError::Configuration("GOOGLE_API_KEY must be set in environment variables.".to_string())
        })?;

        let body = serde_json::json!({
            "systemInstruction": {
                "parts": [{"text": instructions}]
            },
            "contents": [
                {"role": "user", "parts": [{"text": prompt}]}
            ],
            "generationConfig": {
                "temperature": self.temperature,
                "responseMimeType": "application/json"
            }
        });

        let response = self
            .http
            .post(format!("{}/models/{}:generateContent", self.base_url, self.model))
            .query(&[("key", api_key)])
            .json(&body)
            .send()
            .await
            .map_err(|e| Nl2SqlError::Llm(format!("LLM API call failed: {}", e)))?;

        let status = response.status();
        if status == reqwest::StatusCode::UNAUTHORIZED || status == reqwest::StatusCode::FORBIDDEN {
            return Err(Nl2SqlError::Configuration(format!(
                "LLM API rejected the configured key ({})",
                status
            )));
        }
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(Nl2SqlError::Llm(format!("LLM API returned {}: {}", status, text)));
        }

        let response_json: serde_json::Value = response
            .json()
            .await
            .map_err(|e| Nl2SqlError::Llm(format!("Failed to parse LLM response: {}", e)))?;

        extract_candidate_text(&response_json)
    }
}

/// Concatenate the text parts of the first candidate
fn extract_candidate_text(response_json: &serde_json::Value) -> Result<String> {
    let parts = response_json["candidates"][0]["content"]["parts"]
        .as_array()
        .ok_or_else(|| Nl2SqlError::FormatViolation("No content in LLM response".to_string()))?;

    let text: String = parts
        .iter()
        .filter_map(|p| p["text"].as_str())
        .collect::<Vec<_>>()
        .join("");
    if text.trim().is_empty() {
        return Err(Nl2SqlError::FormatViolation("Empty text in LLM response".to_string()));
    }
    Ok(text)
}

/// Decode the model's JSON answer, tolerating a surrounding markdown fence.
pub fn parse_model_reply(raw: &str) -> Result<PolicyQueryResult> {
    let trimmed = raw.trim();
    let inner = trimmed
        .strip_prefix("```json")
        .or_else(|| trimmed.strip_prefix("```"))
        .unwrap_or(trimmed);
    let inner = inner.strip_suffix("```").unwrap_or(inner).trim();

    let reply: ModelReply = serde_json::from_str(inner)
        .map_err(|e| Nl2SqlError::FormatViolation(format!("Model reply is not the expected JSON: {}", e)))?;

    if let Some(error_message) = reply.error_message.filter(|m| !m.trim().is_empty()) {
        return Ok(PolicyQueryResult::failure(
            error_message,
            reply.suggestion.unwrap_or_default(),
        ));
    }

    match reply.sql_query.filter(|q| !q.trim().is_empty()) {
        Some(sql_query) => Ok(PolicyQueryResult::success(
            sql_query,
            reply.explanation.unwrap_or_default(),
            reply.business_context.unwrap_or_default(),
        )),
        None => Err(Nl2SqlError::FormatViolation(
            "Model reply has neither sql_query nor error_message".to_string(),
        )),
    }
}

#[async_trait]
impl GenerationCapability for GeminiClient {
    async fn generate(&self, instructions: &str, prompt: &str) -> Result<PolicyQueryResult> {
        let raw = self.call_llm(instructions, prompt).await?;
        debug!("Model reply: {}", raw);
        parse_model_reply(&raw)
    }

    fn name(&self) -> &str {
        &self.model
    }
}
