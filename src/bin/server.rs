//! HTTP Server for the policy NL2SQL pipeline
//! Simple HTTP server using tokio and basic HTTP handling

use policy_nl2sql::config::Config;
use policy_nl2sql::logging::init_tracing;
use policy_nl2sql::pipeline::Nl2SqlPipeline;
use serde::Deserialize;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tracing::{error, info, warn};

/// Upper bound on accepted request size (headers + body)
const MAX_REQUEST_BYTES: usize = 1024 * 1024;

/// Time allowed for a client to deliver the full request
const READ_TIMEOUT: Duration = Duration::from_secs(30);

struct AppState {
    config: Config,
    pipeline: Nl2SqlPipeline,
}

#[derive(Debug, Deserialize)]
struct Nl2SqlRequest {
    #[serde(default)]
    prompt: String,
    assistant_id: Option<serde_json::Value>,
    #[serde(default)]
    execute: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load environment variables from .env file
    dotenv::dotenv().ok();
    init_tracing();

    info!("🚀 Starting Policy NL2SQL API Server...");
    let config = Config::from_env()?;

    if config.auth_token.is_some() {
        info!("✅ AUTH_TOKEN found - chat context enabled");
    } else {
        warn!("⚠️  AUTH_TOKEN not set - /nl2sql requests will fail");
    }
    if config.google_api_key.is_none() {
        warn!("⚠️  GOOGLE_API_KEY not set - SQL generation will fail");
    }

    let pipeline = Nl2SqlPipeline::from_config(&config).await;
    let state = Arc::new(AppState { config, pipeline });

    let listener = TcpListener::bind(&state.config.bind_addr).await?;
    info!("✅ Server listening on {}", state.config.bind_addr);

    loop {
        let (stream, addr) = listener.accept().await?;
        info!("📥 New connection from: {}", addr);
        tokio::spawn(handle_connection(stream, state.clone()));
    }
}

async fn handle_connection(mut stream: TcpStream, state: Arc<AppState>) {
    let response = match read_request_within(&mut stream, READ_TIMEOUT).await {
        Ok(request) => handle_request(&request, &state).await,
        Err(e) if e.kind() == std::io::ErrorKind::TimedOut => {
            warn!("Client did not send a full request within {:?}", READ_TIMEOUT);
            create_response(408, "Request Timeout", r#"{"error":"Request timeout"}"#)
        }
        Err(e) => {
            error!("Failed to read from stream: {}", e);
            create_response(400, "Bad Request", r#"{"error":"Malformed request"}"#)
        }
    };

    if let Err(e) = stream.write_all(response.as_bytes()).await {
        error!("Failed to write response: {}", e);
    }
}

async fn read_request_within<R>(stream: &mut R, limit: Duration) -> std::io::Result<String>
where
    R: AsyncRead + Unpin,
{
    match tokio::time::timeout(limit, read_request(stream)).await {
        Ok(result) => result,
        Err(_) => Err(std::io::Error::new(
            std::io::ErrorKind::TimedOut,
            "request read timed out",
        )),
    }
}

/// Read headers, then keep reading until `Content-Length` bytes of body have arrived.
async fn read_request<R>(stream: &mut R) -> std::io::Result<String>
where
    R: AsyncRead + Unpin,
{
    let mut data = Vec::new();
    let mut buffer = [0u8; 4096];

    loop {
        let size = stream.read(&mut buffer).await?;
        if size == 0 {
            break;
        }
        data.extend_from_slice(&buffer[..size]);
        if data.len() > MAX_REQUEST_BYTES {
            return Err(std::io::Error::new(
                std::io::ErrorKind::InvalidData,
                "request too large",
            ));
        }

        let text = String::from_utf8_lossy(&data);
        if let Some(header_end) = text.find("\r\n\r\n") {
            let expected = content_length(&text[..header_end]);
            if data.len() >= header_end + 4 + expected {
                break;
            }
        }
    }

    Ok(String::from_utf8_lossy(&data).into_owned())
}

fn content_length(head: &str) -> usize {
    parse_headers(head)
        .get("content-length")
        .and_then(|v| v.parse().ok())
        .unwrap_or(0)
}

fn parse_headers(head: &str) -> HashMap<String, String> {
    head.lines()
        .skip(1)
        .take_while(|line| !line.is_empty())
        .filter_map(|line| line.split_once(':'))
        .map(|(key, value)| (key.trim().to_lowercase(), value.trim().to_string()))
        .collect()
}

/// Method and normalized path from the request line
fn route(request: &str) -> Option<(&str, String)> {
    let request_line = request.lines().next()?;
    let mut parts = request_line.split_whitespace();
    let method = parts.next()?;
    let raw_path = parts.next()?;

    // Remove query parameters and trailing slash
    let path = raw_path.split('?').next().unwrap_or(raw_path).trim_end_matches('/');
    let path = if path.is_empty() { "/" } else { path };
    Some((method, path.to_string()))
}

fn request_body(request: &str) -> &str {
    request
        .find("\r\n\r\n")
        .map(|start| request[start + 4..].trim())
        .unwrap_or("")
}

async fn handle_request(request: &str, state: &AppState) -> String {
    let Some((method, path)) = route(request) else {
        return create_response(400, "Bad Request", "{}");
    };
    info!("🔍 Request: {} {}", method, path);

    match (method, path.as_str()) {
        ("GET", "/health") => {
            create_response(200, "OK", r#"{"status":"ok","service":"policy-nl2sql"}"#)
        }
        ("GET", "/config") => create_response(200, "OK", &config_json(state)),
        ("POST", "/nl2sql") => handle_nl2sql(request_body(request), state).await,
        ("OPTIONS", _) => create_response(204, "No Content", ""),
        _ => create_response(404, "Not Found", r#"{"error":"Not found"}"#),
    }
}

async fn handle_nl2sql(body: &str, state: &AppState) -> String {
    let request: Nl2SqlRequest = match serde_json::from_str(body) {
        Ok(request) => request,
        Err(e) => {
            warn!("Invalid /nl2sql body: {}", e);
            return create_response(400, "Bad Request", r#"{"error":"Invalid JSON body"}"#);
        }
    };
    if request.prompt.trim().is_empty() {
        return create_response(400, "Bad Request", r#"{"error":"prompt is required"}"#);
    }

    // Accept the assistant id as a number or a string
    let assistant_id = match request.assistant_id {
        Some(serde_json::Value::String(id)) => id,
        Some(serde_json::Value::Number(id)) => id.to_string(),
        _ => state.config.default_assistant_id.clone(),
    };

    let envelope = state
        .pipeline
        .run(&request.prompt, &assistant_id, request.execute)
        .await;
    match serde_json::to_string(&envelope) {
        Ok(json) => create_response(200, "OK", &json),
        Err(e) => {
            error!("❌ Failed to serialize response: {}", e);
            create_response(
                500,
                "Internal Server Error",
                r#"{"error":"Failed to serialize response"}"#,
            )
        }
    }
}

fn config_json(state: &AppState) -> String {
    let config = &state.config;
    serde_json::json!({
        "auth_token_set": config.auth_token.is_some(),
        "google_api_key_set": config.google_api_key.is_some(),
        "database_configured": state.pipeline.has_executor(),
        "llm_model_provider": config.llm_model_provider,
        "llm_model_version": config.llm_model_version,
        "generation_model": config.gemini_model,
        "default_assistant_id": config.default_assistant_id,
        "max_generation_attempts": config.max_generation_attempts,
        "endpoints": {
            "health": "GET /health",
            "config": "GET /config",
            "nl2sql": "POST /nl2sql - chat context + SQL generation (+ optional execution)"
        }
    })
    .to_string()
}

fn create_response(status: u16, status_text: &str, body: &str) -> String {
    format!(
        "HTTP/1.1 {} {}\r\n\
         Content-Type: application/json\r\n\
         Access-Control-Allow-Origin: *\r\n\
         Access-Control-Allow-Methods: GET, POST, OPTIONS\r\n\
         Access-Control-Allow-Headers: Content-Type\r\n\
         Content-Length: {}\r\n\
         Connection: close\r\n\
         \r\n\
         {}",
        status,
        status_text,
        body.len(),
        body
    )
}
