//! The text-completion oracle seen from the turn engine.
//!
//! [`Oracle`] is the one seam between the engine and the model. Two
//! implementations ship here:
//! - [`LlmOracle`]: wraps [`dmscene_llm::LlmClient`] with the configured
//!   sampling settings
//! - [`ScriptedOracle`]: replays canned responses and records the prompts it
//!   received; used by tests and offline runs

use std::collections::VecDeque;

use async_trait::async_trait;
use parking_lot::Mutex;
use thiserror::Error;

use dmscene_core::config::{OracleConfig, OracleProvider};
use dmscene_core::error::ConfigError;
use dmscene_core::prompt::PromptPayload;
use dmscene_llm::client::{GEMINI_BASE_URL, OLLAMA_BASE_URL, OPENAI_BASE_URL};
use dmscene_llm::{LlmClient, LlmError, LlmProvider, LlmRequest};

/// Why the oracle produced no text.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum OracleError {
    /// The call did not finish within the configured timeout.
    #[error("Oracle timed out after {after_ms}ms")]
    Timeout {
        /// Timeout that expired.
        after_ms: u64,
    },

    /// The backend is down or not configured.
    #[error("Oracle unavailable: {0}")]
    Unavailable(String),

    /// Rate limit or quota hit.
    #[error("Oracle quota exhausted: {0}")]
    Quota(String),

    /// The backend refused the request outright.
    #[error("Oracle rejected the request: {0}")]
    Rejected(String),

    /// Any other transport failure.
    #[error("Oracle transport failure: {0}")]
    Transport(String),
}

impl OracleError {
    /// Whether the caller may retry with backoff.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        !matches!(self, Self::Rejected(_))
    }
}

impl From<LlmError> for OracleError {
    fn from(err: LlmError) -> Self {
        match err {
            LlmError::Timeout(ms) => Self::Timeout { after_ms: ms },
            LlmError::Unavailable(msg) => Self::Unavailable(msg),
            LlmError::QuotaExceeded(msg) => Self::Quota(msg),
            LlmError::Rejected { status, body } => {
                Self::Rejected(format!("HTTP {status}: {body}"))
            }
            e @ (LlmError::RequestFailed(_) | LlmError::ParseError(_)) => {
                Self::Transport(e.to_string())
            }
        }
    }
}

/// A black-box function from prompt to text.
///
/// Implementations keep no state between calls that influences the output.
#[async_trait]
pub trait Oracle: Send + Sync {
    /// Complete one prompt.
    ///
    /// # Errors
    /// Returns [`OracleError`] when no text could be obtained.
    async fn complete(&self, payload: &PromptPayload) -> Result<String, OracleError>;
}

// ---------------------------------------------------------------------------
// LLM-backed oracle
// ---------------------------------------------------------------------------

/// [`Oracle`] backed by a real LLM provider.
#[derive(Debug)]
pub struct LlmOracle {
    client: LlmClient,
    max_tokens: u32,
    temperature: f32,
    timeout_ms: u64,
}

impl LlmOracle {
    /// Wrap an existing client with sampling settings from `config`.
    #[must_use]
    pub fn new(client: LlmClient, config: &OracleConfig) -> Self {
        Self {
            client,
            max_tokens: config.max_tokens,
            temperature: config.temperature,
            timeout_ms: config.timeout_ms,
        }
    }

    /// Build the client described by `config`, resolving its API key.
    ///
    /// # Errors
    /// Returns [`ConfigError::MissingCredential`] when the provider needs a key
    /// that is not set. Callers treat this as fatal at startup.
    pub fn from_config(config: &OracleConfig) -> Result<Self, ConfigError> {
        let api_key = config.resolve_api_key()?;
        Ok(Self::new(client_for(config, api_key), config))
    }
}

/// Build an [`LlmClient`] for `config` with an already-resolved key.
#[must_use]
pub fn client_for(config: &OracleConfig, api_key: Option<String>) -> LlmClient {
    let base_url = |default: &str| {
        if config.base_url.trim().is_empty() {
            default.to_string()
        } else {
            config.base_url.clone()
        }
    };
    let api_key = api_key.unwrap_or_default();
    let provider = match config.provider {
        OracleProvider::Gemini => LlmProvider::Gemini {
            base_url: base_url(GEMINI_BASE_URL),
            api_key,
        },
        OracleProvider::OpenAi => LlmProvider::OpenAiCompatible {
            base_url: base_url(OPENAI_BASE_URL),
            api_key,
        },
        OracleProvider::Ollama => LlmProvider::Ollama {
            base_url: base_url(OLLAMA_BASE_URL),
        },
        OracleProvider::None => LlmProvider::None,
    };
    LlmClient::new(provider, config.model.clone())
}

#[async_trait]
impl Oracle for LlmOracle {
    async fn complete(&self, payload: &PromptPayload) -> Result<String, OracleError> {
        let request = LlmRequest::new(payload.text.clone())
            .with_max_tokens(self.max_tokens)
            .with_temperature(self.temperature)
            .with_timeout(self.timeout_ms);
        let response = self.client.generate(&request).await?;
        Ok(response.text)
    }
}

// ---------------------------------------------------------------------------
// Scripted oracle
// ---------------------------------------------------------------------------

/// Replays canned results in order and records every prompt it receives.
///
/// When the script runs out, further calls fail with
/// [`OracleError::Unavailable`].
#[derive(Debug, Default)]
pub struct ScriptedOracle {
    script: Mutex<VecDeque<Result<String, OracleError>>>,
    prompts: Mutex<Vec<String>>,
}

impl ScriptedOracle {
    /// An oracle that returns `responses` in order.
    #[must_use]
    pub fn new<I, S>(responses: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            script: Mutex::new(responses.into_iter().map(|r| Ok(r.into())).collect()),
            prompts: Mutex::new(Vec::new()),
        }
    }

    /// Append one result (text or failure) to the script.
    pub fn push(&self, result: Result<String, OracleError>) {
        self.script.lock().push_back(result);
    }

    /// Prompts received so far.
    #[must_use]
    pub fn prompts(&self) -> Vec<String> {
        self.prompts.lock().clone()
    }

    /// Number of calls made so far.
    #[must_use]
    pub fn calls(&self) -> usize {
        self.prompts.lock().len()
    }
}

#[async_trait]
impl Oracle for ScriptedOracle {
    async fn complete(&self, payload: &PromptPayload) -> Result<String, OracleError> {
        self.prompts.lock().push(payload.text.clone());
        self.script
            .lock()
            .pop_front()
            .unwrap_or_else(|| Err(OracleError::Unavailable("script exhausted".into())))
    }
}
