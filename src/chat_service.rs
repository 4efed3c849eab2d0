//! Chat service client
//!
//! Opens a chat session with the configured assistant, sends the user's question and
//! collects the streamed answer. The answer is only used as a table-relevance hint.

use crate::config::Config;
use crate::error::{Nl2SqlError, Result};
use async_trait::async_trait;
use lazy_static::lazy_static;
use regex::Regex;
use serde::Deserialize;
use tracing::{debug, info, warn};

pub const CREATE_CHAT_SESSION_PATH: &str = "/chat/create-chat-session";
pub const SEND_MESSAGE_PATH: &str = "/chat/send-message";

/// Give up on a stream that produced this many chunks without any answer text
const MAX_EMPTY_CHUNKS: usize = 100;

lazy_static! {
    static ref THINK_BLOCK: Option<Regex> = Regex::new(r"<think>[\s\S]*?</think>").ok();
}

/// Context retrieval seam used by the pipeline
#[async_trait]
pub trait ContextRetriever: Send + Sync {
    /// Ask the assistant identified by `assistant_hint` about `prompt` and return its answer.
    async fn create_session(&self, prompt: &str, assistant_hint: &str) -> Result<String>;
}

#[derive(Debug, Deserialize)]
struct CreateSessionResponse {
    chat_session_id: Option<serde_json::Value>,
}

pub struct ChatServiceClient {
    http: reqwest::Client,
    base_url: String,
    auth_token: Option<String>,
    llm_override: Option<(String, String)>,
}

impl ChatServiceClient {
    pub fn new(base_url: impl Into<String>, auth_token: Option<String>) -> Self {
        Self {
            http: reqwest::Client::new(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
            auth_token,
            llm_override: None,
        }
    }

    pub fn from_config(config: &Config) -> Self {
        let mut client = Self::new(config.chat_base_url.clone(), config.auth_token.clone());
        if let (Some(provider), Some(version)) = (&config.llm_model_provider, &config.llm_model_version) {
            client.llm_override = Some((provider.clone(), version.clone()));
        }
        client
    }

    fn token(&self) -> Result<&str> {
        self.auth_token
            .as_deref()
            .ok_or_else(|| Nl2SqlError::Configuration("AUTH_TOKEN environment variable is not set".to_string()))
    }

    async fn post(&self, path: &str, payload: &serde_json::Value) -> Result<reqwest::Response> {
        let token = self.token()?;
        self.http
            .post(format!("{}{}", self.base_url, path))
            .bearer_auth(token)
            .json(payload)
            .send()
            .await
            .map_err(|e| Nl2SqlError::UpstreamContext(format!("HTTP request failed: {}", e)))
    }

    async fn create_chat_session_id(&self, assistant_id: &str) -> Result<String> {
        let persona_id: i64 = assistant_id.trim().parse().map_err(|_| {
            Nl2SqlError::UpstreamContext(format!("Assistant id '{}' is not numeric", assistant_id))
        })?;

        let response = self
            .post(
                CREATE_CHAT_SESSION_PATH,
                &serde_json::json!({"persona_id": persona_id, "description": null}),
            )
            .await?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(Nl2SqlError::UpstreamContext(format!(
                "Failed to create chat session ({}): {}",
                status, text
            )));
        }

        let body: CreateSessionResponse = response
            .json()
            .await
            .map_err(|e| Nl2SqlError::UpstreamContext(format!("Invalid chat session response: {}", e)))?;
        match body.chat_session_id {
            Some(serde_json::Value::String(id)) => Ok(id),
            Some(other) if !other.is_null() => Ok(other.to_string()),
            _ => Err(Nl2SqlError::UpstreamContext(
                "Missing chat_session_id in response".to_string(),
            )),
        }
    }

    fn message_payload(&self, prompt: &str, assistant_id: &str, chat_session_id: &str) -> serde_json::Value {
        let mut payload = serde_json::json!({
            "alternate_assistant_id": assistant_id,
            "chat_session_id": chat_session_id,
            "parent_message_id": null,
            "message": prompt,
            "prompt_id": null,
            "search_doc_ids": null,
            "file_descriptors": [],
            "user_file_ids": [],
            "user_folder_ids": [],
            "regenerate": false,
            "retrieval_options": {
                "run_search": "always",
                "real_time": true,
                "filters": {
                    "source_type": null,
                    "document_set": null,
                    "time_cutoff": null,
                    "tags": [],
                    "user_file_ids": null
                }
            },
            "use_agentic_search": false
        });
        if let Some((provider, version)) = &self.llm_override {
            payload["llm_override"] = serde_json::json!({
                "model_provider": provider,
                "model_version": version,
                "temperature": 0.5
            });
        }
        payload
    }

    async fn read_stream(&self, mut response: reqwest::Response) -> Result<String> {
        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(Nl2SqlError::UpstreamContext(format!(
                "Chat request failed with status {}: {}",
                status, text
            )));
        }

        let mut decoder = StreamDecoder::default();
        let mut chunk_count = 0usize;
        while let Some(chunk) = response
            .chunk()
            .await
            .map_err(|e| Nl2SqlError::UpstreamContext(format!("Error during streaming: {}", e)))?
        {
            chunk_count += 1;
            decoder.push(&chunk)?;
            if chunk_count > MAX_EMPTY_CHUNKS && decoder.text.is_empty() {
                warn!("Too many chunks without data, stopping stream");
                break;
            }
        }
        debug!("Processed {} chunks", chunk_count);
        let text = decoder.finish()?;
        Ok(strip_think_blocks(&text))
    }
}

#[async_trait]
impl ContextRetriever for ChatServiceClient {
    async fn create_session(&self, prompt: &str, assistant_hint: &str) -> Result<String> {
        info!("Creating chat session with assistant {}", assistant_hint);
        let chat_session_id = self.create_chat_session_id(assistant_hint).await?;
        debug!("Created chat session {}", chat_session_id);

        let payload = self.message_payload(prompt, assistant_hint, &chat_session_id);
        let response = self.post(SEND_MESSAGE_PATH, &payload).await?;
        self.read_stream(response).await
    }
}

/// Newline-delimited JSON decoder for the streamed answer.
///
/// Bytes are buffered and only complete lines are decoded, so lines and multi-byte
/// characters may span chunks.
#[derive(Debug, Default)]
pub struct StreamDecoder {
    buffer: Vec<u8>,
    text: String,
}

impl StreamDecoder {
    pub fn push(&mut self, chunk: &[u8]) -> Result<()> {
        self.buffer.extend_from_slice(chunk);
        while let Some(newline) = self.buffer.iter().position(|b| *b == b'\n') {
            let line: Vec<u8> = self.buffer.drain(..=newline).collect();
            self.handle_line(&String::from_utf8_lossy(&line))?;
        }
        Ok(())
    }

    /// Flush a trailing unterminated line and return the collected text
    pub fn finish(mut self) -> Result<String> {
        let rest = std::mem::take(&mut self.buffer);
        self.handle_line(&String::from_utf8_lossy(&rest))?;
        Ok(self.text)
    }

    fn handle_line(&mut self, line: &str) -> Result<()> {
        let line = line.trim();
        if !line.starts_with('{') {
            return Ok(());
        }
        let json: serde_json::Value = match serde_json::from_str(line) {
            Ok(json) => json,
            Err(e) => {
                debug!("Skipping unparseable stream line: {}", e);
                return Ok(());
            }
        };

        if let Some(error) = json.get("error").filter(|e| !e.is_null()) {
            let message = error.as_str().map(str::to_string).unwrap_or_else(|| error.to_string());
            return Err(Nl2SqlError::UpstreamContext(format!("API Error: {}", message)));
        }

        let obj = &json["obj"];
        if obj["type"].as_str() == Some("message_delta") {
            if let Some(content) = obj["content"].as_str() {
                self.text.push_str(content);
            }
        }
        if let Some(piece) = json["answer_piece"].as_str() {
            self.text.push_str(piece);
        }
        Ok(())
    }
}

/// Remove `<think>…</think>` reasoning blocks and trim
pub fn strip_think_blocks(text: &str) -> String {
    match THINK_BLOCK.as_ref() {
        Some(re) => re.replace_all(text, "").trim().to_string(),
        None => text.trim().to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decoder_collects_deltas_and_answer_pieces() {
        let mut decoder = StreamDecoder::default();
        decoder
            .push(b"{\"obj\": {\"type\": \"message_delta\", \"content\": \"Relevant \"}}\n{\"answer_pie")
            .unwrap();
        decoder.push(b"ce\": \"tables: 1. policy (core)\"}\nnot json\n").unwrap();
        decoder.push(b"{\"obj\": {\"type\": \"stop\"}}").unwrap();
        assert_eq!(decoder.finish().unwrap(), "Relevant tables: 1. policy (core)");
    }

    #[test]
    fn test_decoder_surfaces_stream_errors() {
        let mut decoder = StreamDecoder::default();
        let err = decoder.push(b"{\"error\": \"persona not found\"}\n").unwrap_err();
        assert!(err.to_string().contains("persona not found"));
    }

    #[test]
    fn test_decoder_keeps_characters_split_across_chunks() {
        let line = "{\"answer_piece\": \"Premium in \u{20b9} uses the policy table\"}\n".as_bytes();
        let rupee = line
            .windows(3)
            .position(|w| w == "\u{20b9}".as_bytes())
            .unwrap();

        let mut decoder = StreamDecoder::default();
        decoder.push(&line[..rupee + 1]).unwrap();
        decoder.push(&line[rupee + 1..]).unwrap();
        assert_eq!(
            decoder.finish().unwrap(),
            "Premium in \u{20b9} uses the policy table"
        );
    }

    #[test]
    fn test_strip_think_blocks() {
        assert_eq!(
            strip_think_blocks("<think>\nreasoning\n</think>  Use the policy table. "),
            "Use the policy table."
        );
    }

    #[test]
    fn test_llm_override_only_when_configured() {
        let plain = ChatServiceClient::new("http://localhost", Some("t".to_string()));
        assert!(plain.message_payload("q", "16", "abc").get("llm_override").is_none());

        let config = Config {
            llm_model_provider: Some("openai".to_string()),
            llm_model_version: Some("gpt-4".to_string()),
            ..Config::default()
        };
        let payload = ChatServiceClient::from_config(&config).message_payload("q", "16", "abc");
        assert_eq!(payload["llm_override"]["model_version"], "gpt-4");
        assert_eq!(payload["retrieval_options"]["run_search"], "always");
    }

    #[tokio::test]
    async fn test_missing_token_is_configuration_error() {
        let client = ChatServiceClient::new("http://localhost:1", None);
        let err = client.create_session("q", "16").await.unwrap_err();
        assert!(err.is_configuration());
    }
}
