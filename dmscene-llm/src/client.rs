//! LLM client: unified interface for Gemini, OpenAI-compatible and Ollama backends.
//!
//! Every call is single-shot: one HTTP request, no session, no retry. Retry
//! and backoff are the caller's policy.

use std::time::{Duration, Instant};

use reqwest::{Client, StatusCode};
use serde_json::{json, Value};
use tracing::{debug, warn};

use crate::error::LlmError;
use crate::types::{LlmRequest, LlmResponse};

/// Public Gemini endpoint.
pub const GEMINI_BASE_URL: &str = "https://generativelanguage.googleapis.com";
/// Public OpenAI endpoint.
pub const OPENAI_BASE_URL: &str = "https://api.openai.com";
/// Default local Ollama endpoint.
pub const OLLAMA_BASE_URL: &str = "http://localhost:11434";

/// Provider backend for LLM inference.
#[derive(Debug, Clone)]
pub enum LlmProvider {
    /// Google Gemini `generateContent`.
    Gemini { base_url: String, api_key: String },
    /// OpenAI-compatible chat completions API.
    OpenAiCompatible { base_url: String, api_key: String },
    /// Ollama running locally.
    Ollama { base_url: String },
    /// No LLM available; all calls return [`LlmError::Unavailable`].
    None,
}

/// The main LLM client that routes requests to the configured backend.
pub struct LlmClient {
    provider: LlmProvider,
    http: Client,
    model: String,
}

impl std::fmt::Debug for LlmClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let provider = match &self.provider {
            LlmProvider::Gemini { .. } => "gemini",
            LlmProvider::OpenAiCompatible { .. } => "openai",
            LlmProvider::Ollama { .. } => "ollama",
            LlmProvider::None => "none",
        };
        f.debug_struct("LlmClient")
            .field("provider", &provider)
            .field("model", &self.model)
            .finish_non_exhaustive()
    }
}

impl LlmClient {
    /// Create a new LLM client.
    #[must_use]
    pub fn new(provider: LlmProvider, model: impl Into<String>) -> Self {
        Self {
            provider,
            http: Client::new(),
            model: model.into(),
        }
    }

    /// Create a client with no LLM backend.
    #[must_use]
    pub fn none() -> Self {
        Self::new(LlmProvider::None, String::new())
    }

    /// The model name sent to the provider.
    #[must_use]
    pub fn model(&self) -> &str {
        &self.model
    }

    /// Check if the LLM client has a backend configured.
    #[must_use]
    pub fn is_available(&self) -> bool {
        !matches!(self.provider, LlmProvider::None)
    }

    /// Generate a completion.
    ///
    /// # Errors
    /// Returns [`LlmError`] if the provider is unavailable, times out, refuses
    /// the request or returns an envelope that cannot be decoded.
    pub async fn generate(&self, request: &LlmRequest) -> Result<LlmResponse, LlmError> {
        let start = Instant::now();
        let (text, tokens_generated) = match &self.provider {
            LlmProvider::None => {
                return Err(LlmError::Unavailable("No LLM provider configured".into()));
            }
            LlmProvider::Gemini { base_url, api_key } => {
                self.generate_gemini(base_url, api_key, request).await?
            }
            LlmProvider::OpenAiCompatible { base_url, api_key } => {
                self.generate_openai(base_url, api_key, request).await?
            }
            LlmProvider::Ollama { base_url } => self.generate_ollama(base_url, request).await?,
        };
        let latency_ms = u64::try_from(start.elapsed().as_millis()).unwrap_or(u64::MAX);
        debug!(model = %self.model, latency_ms, tokens_generated, "LLM call completed");
        Ok(LlmResponse {
            text,
            tokens_generated,
            latency_ms,
            model: self.model.clone(),
        })
    }

    async fn generate_gemini(
        &self,
        base_url: &str,
        api_key: &str,
        request: &LlmRequest,
    ) -> Result<(String, u32), LlmError> {
        let url = format!(
            "{}/v1beta/models/{}:generateContent",
            base_url.trim_end_matches('/'),
            self.model
        );
        let mut generation = json!({
            "temperature": request.temperature,
            "maxOutputTokens": request.max_tokens,
        });
        if request.json_mode {
            generation["responseMimeType"] = json!("application/json");
        }
        let body = json!({
            "contents": [{ "role": "user", "parts": [{ "text": request.prompt }] }],
            "generationConfig": generation,
        });

        let builder = self.http.post(&url).header("x-goog-api-key", api_key);
        let envelope = self.send(builder, &body, request.timeout_ms).await?;
        gemini_text(&envelope)
    }

    async fn generate_openai(
        &self,
        base_url: &str,
        api_key: &str,
        request: &LlmRequest,
    ) -> Result<(String, u32), LlmError> {
        let url = format!("{}/v1/chat/completions", base_url.trim_end_matches('/'));
        let mut body = json!({
            "model": self.model,
            "messages": [{ "role": "user", "content": request.prompt }],
            "max_tokens": request.max_tokens,
            "temperature": request.temperature,
        });
        if request.json_mode {
            body["response_format"] = json!({ "type": "json_object" });
        }

        let builder = self
            .http
            .post(&url)
            .header("Authorization", format!("Bearer {api_key}"));
        let envelope = self.send(builder, &body, request.timeout_ms).await?;
        openai_text(&envelope)
    }

    async fn generate_ollama(
        &self,
        base_url: &str,
        request: &LlmRequest,
    ) -> Result<(String, u32), LlmError> {
        let url = format!("{}/api/generate", base_url.trim_end_matches('/'));
        let mut body = json!({
            "model": self.model,
            "prompt": request.prompt,
            "stream": false,
            "options": {
                "temperature": request.temperature,
                "num_predict": request.max_tokens,
            }
        });
        if request.json_mode {
            body["format"] = json!("json");
        }

        let builder = self.http.post(&url);
        let envelope = self.send(builder, &body, request.timeout_ms).await?;
        ollama_text(&envelope)
    }

    /// Send one request and decode the JSON envelope, classifying failures.
    async fn send(
        &self,
        builder: reqwest::RequestBuilder,
        body: &Value,
        timeout_ms: u64,
    ) -> Result<Value, LlmError> {
        let resp = builder
            .json(body)
            .timeout(Duration::from_millis(timeout_ms))
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    warn!(timeout_ms, "LLM request timed out");
                    LlmError::Timeout(timeout_ms)
                } else {
                    warn!(error = %e, "LLM request failed");
                    LlmError::from(e)
                }
            })?;

        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            warn!(status = status.as_u16(), "LLM provider returned error");
            return Err(status_error(status, body));
        }
        resp.json::<Value>()
            .await
            .map_err(|e| LlmError::ParseError(e.to_string()))
    }
}

/// Map a non-success HTTP status to an error class.
fn status_error(status: StatusCode, body: String) -> LlmError {
    match status {
        StatusCode::TOO_MANY_REQUESTS => LlmError::QuotaExceeded(body),
        StatusCode::SERVICE_UNAVAILABLE | StatusCode::BAD_GATEWAY | StatusCode::GATEWAY_TIMEOUT => {
            LlmError::Unavailable(format!("HTTP {status}"))
        }
        s if s.is_server_error() => LlmError::RequestFailed(format!("HTTP {status}: {body}")),
        s => LlmError::Rejected {
            status: s.as_u16(),
            body,
        },
    }
}

fn token_count(value: &Value) -> u32 {
    value
        .as_u64()
        .and_then(|n| u32::try_from(n).ok())
        .unwrap_or(0)
}

/// Extract the text and token count from a Gemini `generateContent` envelope.
///
/// # Errors
/// [`LlmError::ParseError`] if the envelope holds no candidate text.
pub fn gemini_text(envelope: &Value) -> Result<(String, u32), LlmError> {
    let parts = envelope["candidates"][0]["content"]["parts"]
        .as_array()
        .ok_or_else(|| LlmError::ParseError("Gemini response has no candidate parts".into()))?;
    let text: String = parts.iter().filter_map(|p| p["text"].as_str()).collect();
    if text.is_empty() {
        let reason = envelope["candidates"][0]["finishReason"]
            .as_str()
            .unwrap_or("unknown");
        return Err(LlmError::ParseError(format!(
            "Gemini candidate has no text (finish reason: {reason})"
        )));
    }
    Ok((text, token_count(&envelope["usageMetadata"]["candidatesTokenCount"])))
}

/// Extract the text and token count from an OpenAI chat completions envelope.
///
/// # Errors
/// [`LlmError::ParseError`] if the envelope holds no message content.
pub fn openai_text(envelope: &Value) -> Result<(String, u32), LlmError> {
    let text = envelope["choices"][0]["message"]["content"]
        .as_str()
        .ok_or_else(|| LlmError::ParseError("OpenAI response has no message content".into()))?;
    Ok((
        text.to_string(),
        token_count(&envelope["usage"]["completion_tokens"]),
    ))
}

/// Extract the text and token count from an Ollama `/api/generate` envelope.
///
/// # Errors
/// [`LlmError::ParseError`] if the envelope has no `response` field.
pub fn ollama_text(envelope: &Value) -> Result<(String, u32), LlmError> {
    let text = envelope["response"]
        .as_str()
        .ok_or_else(|| LlmError::ParseError("Ollama response has no 'response' field".into()))?;
    Ok((text.to_string(), token_count(&envelope["eval_count"])))
}
