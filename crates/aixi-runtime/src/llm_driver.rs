//! [`LlmDriver`] – OpenAI-compatible inference backend.
//!
//! Talks to any server exposing `POST /v1/chat/completions`, such as
//! [Ollama](https://ollama.com) (`http://localhost:11434`), vLLM or a hosted
//! OpenAI-compatible gateway.
//!
//! # Example
//!
//! ```rust,no_run
//! use aixi_runtime::llm_driver::LlmDriver;
//! use aixi_types::{ChatMessage, InferenceBackend, InferenceRequest};
//!
//! # async fn demo() -> Result<(), aixi_types::InferenceError> {
//! let driver = LlmDriver::new("http://localhost:11434", "llama3");
//! let request = InferenceRequest::new(vec![ChatMessage::user("Say hi")]).temperature(0.2);
//! // Requires a running model server.
//! let reply = driver.complete(request).await?;
//! println!("{}", reply.text);
//! # Ok(())
//! # }
//! ```
//!
//! # Error mapping
//!
//! | Condition | [`InferenceError`] |
//! |---|---|
//! | transport failure, any other non-success status | `Unavailable` |
//! | client-side request timeout | `Timeout` |
//! | 400 / 413 mentioning the context window | `ContextOverflow` |
//! | 2xx with bad JSON or no content | `BadResponse` |
//!
//! A 404 for an unknown model or a 400 for a rejected `response_format` is a
//! configuration problem, not a bad reply, so it is `Unavailable` too.

use std::time::Duration;

use async_trait::async_trait;
use aixi_types::{ChatMessage, Completion, InferenceBackend, InferenceError, InferenceRequest};
use reqwest::StatusCode;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

/// Upper bound on a single HTTP exchange with the model server.
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(300);

const BODY_SNIPPET_CHARS: usize = 300;

// ─────────────────────────────────────────────────────────────────────────────
// Wire shapes
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Serialize)]
struct JsonSchemaFormat<'a> {
    name: &'static str,
    schema: &'a serde_json::Value,
}

/// `response_format` field that asks for structured JSON output.
#[derive(Serialize)]
struct ResponseFormat<'a> {
    #[serde(rename = "type")]
    kind: &'static str,
    json_schema: JsonSchemaFormat<'a>,
}

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: &'a [ChatMessage],
    stream: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_tokens: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    response_format: Option<ResponseFormat<'a>>,
}

#[derive(Deserialize)]
struct ChatResponse {
    #[serde(default)]
    choices: Vec<Choice>,
    #[serde(default)]
    usage: Option<Usage>,
}

#[derive(Deserialize)]
struct Choice {
    message: ResponseMessage,
}

#[derive(Deserialize)]
struct ResponseMessage {
    #[serde(default)]
    content: Option<String>,
}

#[derive(Deserialize)]
struct Usage {
    #[serde(default)]
    prompt_tokens: Option<u64>,
    #[serde(default)]
    completion_tokens: Option<u64>,
}

// ─────────────────────────────────────────────────────────────────────────────
// LlmDriver
// ─────────────────────────────────────────────────────────────────────────────

/// HTTP client for an OpenAI-compatible chat-completions endpoint.
///
/// Construct once and share; the underlying `reqwest::Client` pools
/// connections.
pub struct LlmDriver {
    base_url: String,
    model: String,
    api_key: Option<String>,
    request_timeout: Duration,
    client: reqwest::Client,
}

impl LlmDriver {
    /// Driver for `model` served at `base_url` (without the `/v1/...` path).
    pub fn new(base_url: impl Into<String>, model: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            model: model.into(),
            api_key: None,
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
            client: build_client(DEFAULT_REQUEST_TIMEOUT),
        }
    }

    /// Send `Authorization: Bearer <key>` with every request.  Blank keys
    /// are ignored.
    pub fn with_api_key(mut self, api_key: impl Into<String>) -> Self {
        let key = api_key.into();
        self.api_key = (!key.trim().is_empty()).then_some(key);
        self
    }

    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self.client = build_client(timeout);
        self
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    pub fn endpoint(&self) -> String {
        format!("{}/v1/chat/completions", self.base_url)
    }

    fn transport_error(&self, e: reqwest::Error) -> InferenceError {
        if e.is_timeout() {
            InferenceError::Timeout(self.request_timeout.as_millis() as u64)
        } else {
            InferenceError::Unavailable(e.to_string())
        }
    }
}

fn build_client(timeout: Duration) -> reqwest::Client {
    reqwest::Client::builder()
        .timeout(timeout)
        .build()
        .unwrap_or_else(|e| {
            warn!(error = %e, "falling back to default HTTP client");
            reqwest::Client::new()
        })
}

#[async_trait]
impl InferenceBackend for LlmDriver {
    async fn complete(&self, request: InferenceRequest) -> Result<Completion, InferenceError> {
        let body = ChatRequest {
            model: &self.model,
            messages: &request.messages,
            stream: false,
            temperature: request.temperature,
            max_tokens: request.max_tokens,
            response_format: request.response_schema.as_ref().map(|schema| ResponseFormat {
                kind: "json_schema",
                json_schema: JsonSchemaFormat {
                    name: "action_proposal",
                    schema,
                },
            }),
        };

        let mut builder = self.client.post(self.endpoint()).json(&body);
        if let Some(key) = &self.api_key {
            builder = builder.bearer_auth(key);
        }
        debug!(model = %self.model, messages = request.messages.len(), "sending chat completion");

        let response = builder.send().await.map_err(|e| self.transport_error(e))?;
        let status = response.status();
        let text = response.text().await.map_err(|e| self.transport_error(e))?;
        if !status.is_success() {
            let err = classify_status(status, &text);
            warn!(%status, error = %err, "chat completion rejected");
            return Err(err);
        }
        parse_chat_response(&text)
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Response handling
// ─────────────────────────────────────────────────────────────────────────────

/// Map a non-success HTTP status (plus its body) onto the error taxonomy.
///
/// Never returns `BadResponse`: that is reserved for a 2xx whose body is
/// unusable.
pub fn classify_status(status: StatusCode, body: &str) -> InferenceError {
    let snippet: String = body.chars().take(BODY_SNIPPET_CHARS).collect();
    let detail = format!("HTTP {status}: {snippet}");
    let code = status.as_u16();
    if (code == 400 || code == 413) && mentions_context_window(body) {
        return InferenceError::ContextOverflow(detail);
    }
    InferenceError::Unavailable(detail)
}

fn mentions_context_window(body: &str) -> bool {
    let lower = body.to_ascii_lowercase();
    lower.contains("context length")
        || lower.contains("context_length")
        || lower.contains("context window")
        || lower.contains("maximum context")
        || lower.contains("too many tokens")
}

/// Decode a successful chat-completions body.
pub fn parse_chat_response(body: &str) -> Result<Completion, InferenceError> {
    let response: ChatResponse = serde_json::from_str(body)
        .map_err(|e| InferenceError::BadResponse(format!("invalid completion JSON: {e}")))?;
    let text = response
        .choices
        .into_iter()
        .next()
        .and_then(|c| c.message.content)
        .ok_or_else(|| InferenceError::BadResponse("empty choices array".into()))?;
    if text.trim().is_empty() {
        return Err(InferenceError::BadResponse("empty completion".into()));
    }
    let (prompt_tokens, completion_tokens) = response
        .usage
        .map(|u| (u.prompt_tokens, u.completion_tokens))
        .unwrap_or((None, None));
    Ok(Completion {
        text,
        prompt_tokens,
        completion_tokens,
    })
}
