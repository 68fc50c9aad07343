//! Configuration for the scene assembler and its collaborators.
//!
//! Maps directly to `dmscene.toml`. Built once at process start and passed
//! by reference; nothing in the workspace reads configuration from globals.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use crate::error::ConfigError;

/// Top-level configuration, loadable from TOML.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DmConfig {
    /// Text-completion oracle settings.
    #[serde(default)]
    pub oracle: OracleConfig,
    /// What gets logged per turn.
    #[serde(default)]
    pub logging: LoggingConfig,
    /// Where entity data files live.
    #[serde(default)]
    pub data: DataConfig,
    /// Caller-side retry policy.
    #[serde(default)]
    pub retry: RetryConfig,
}

impl DmConfig {
    /// Load configuration from a TOML string.
    ///
    /// # Errors
    /// Returns [`ConfigError::Parse`] if the TOML is invalid, or
    /// [`ConfigError::InvalidValue`] if a value is out of range.
    pub fn from_toml(toml_str: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(toml_str)?;
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from a TOML file.
    ///
    /// # Errors
    /// Returns an error if the file cannot be read or parsed.
    pub fn from_file(path: &std::path::Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml(&content)
    }

    /// Check value ranges that serde cannot express.
    ///
    /// # Errors
    /// Returns [`ConfigError::InvalidValue`] naming the first bad key.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.oracle.timeout_ms == 0 {
            return Err(ConfigError::InvalidValue {
                key: "oracle.timeout_ms",
                reason: "must be greater than zero".into(),
            });
        }
        if !(0.0..=2.0).contains(&self.oracle.temperature) {
            return Err(ConfigError::InvalidValue {
                key: "oracle.temperature",
                reason: format!("{} is outside 0.0..=2.0", self.oracle.temperature),
            });
        }
        if !(0.0..=1.0).contains(&self.retry.jitter_factor) {
            return Err(ConfigError::InvalidValue {
                key: "retry.jitter_factor",
                reason: format!("{} is outside 0.0..=1.0", self.retry.jitter_factor),
            });
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Sub-configs
// ---------------------------------------------------------------------------

/// Which text-completion backend to call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OracleProvider {
    /// Google Gemini `generateContent`.
    #[default]
    Gemini,
    /// Any OpenAI-compatible chat completions endpoint.
    OpenAi,
    /// A local Ollama server.
    Ollama,
    /// No backend; every call fails as unavailable.
    None,
}

impl OracleProvider {
    /// Whether this provider needs an API key.
    #[must_use]
    pub fn needs_api_key(self) -> bool {
        matches!(self, Self::Gemini | Self::OpenAi)
    }
}

/// Oracle connection settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OracleConfig {
    /// Backend provider.
    #[serde(default)]
    pub provider: OracleProvider,
    /// Model name passed to the provider.
    #[serde(default = "default_model")]
    pub model: String,
    /// Base URL; empty means the provider's public default.
    #[serde(default)]
    pub base_url: String,
    /// Environment variable holding the API key.
    #[serde(default = "default_api_key_env")]
    pub api_key_env: String,
    /// Hard timeout for one oracle call in milliseconds.
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,
    /// Sampling temperature.
    #[serde(default = "default_temperature")]
    pub temperature: f32,
    /// Maximum output tokens.
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,
}

impl Default for OracleConfig {
    fn default() -> Self {
        Self {
            provider: OracleProvider::Gemini,
            model: default_model(),
            base_url: String::new(),
            api_key_env: default_api_key_env(),
            timeout_ms: default_timeout_ms(),
            temperature: default_temperature(),
            max_tokens: default_max_tokens(),
        }
    }
}

impl OracleConfig {
    /// Read the API key from the process environment.
    ///
    /// Returns `Ok(None)` for providers that need no key.
    ///
    /// # Errors
    /// Returns [`ConfigError::MissingCredential`] when the provider needs a key
    /// and the variable is unset or empty. This is fatal at startup.
    pub fn resolve_api_key(&self) -> Result<Option<String>, ConfigError> {
        self.resolve_api_key_with(|name| std::env::var(name).ok())
    }

    /// Like [`Self::resolve_api_key`], reading variables through `lookup`.
    ///
    /// # Errors
    /// Returns [`ConfigError::MissingCredential`] when a needed key is absent.
    pub fn resolve_api_key_with<F>(&self, lookup: F) -> Result<Option<String>, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        if !self.provider.needs_api_key() {
            return Ok(None);
        }
        match lookup(&self.api_key_env) {
            Some(key) if !key.trim().is_empty() => Ok(Some(key)),
            _ => Err(ConfigError::MissingCredential(self.api_key_env.clone())),
        }
    }
}

/// Per-turn logging switches.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Default filter for the tracing subscriber: trace, debug, info, warn, error.
    #[serde(default = "default_log_level")]
    pub level: String,
    /// Log each incoming turn request.
    #[serde(default = "default_true")]
    pub log_requests: bool,
    /// Log the full prompt sent to the oracle.
    #[serde(default)]
    pub log_prompt: bool,
    /// Log the raw oracle response.
    #[serde(default)]
    pub log_response: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            log_requests: true,
            log_prompt: false,
            log_response: false,
        }
    }
}

/// Entity data directories for the JSON-directory store.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DataConfig {
    /// Directory of character documents.
    #[serde(default = "default_npcs_dir")]
    pub npcs_dir: PathBuf,
    /// Directory of location documents.
    #[serde(default = "default_locations_dir")]
    pub locations_dir: PathBuf,
    /// Directory of lore documents.
    #[serde(default = "default_lore_dir")]
    pub lore_dir: PathBuf,
}

impl Default for DataConfig {
    fn default() -> Self {
        Self {
            npcs_dir: default_npcs_dir(),
            locations_dir: default_locations_dir(),
            lore_dir: default_lore_dir(),
        }
    }
}

/// Retry behavior applied by callers of the turn API. The orchestrator
/// itself never retries.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryConfig {
    /// Extra attempts after a retryable oracle failure (0 = none).
    #[serde(default = "default_2")]
    pub max_oracle_retries: u32,
    /// Delay before the first retry.
    #[serde(default = "default_base_delay")]
    pub base_delay_ms: u64,
    /// Cap on exponential growth.
    #[serde(default = "default_max_delay")]
    pub max_delay_ms: u64,
    /// ± fraction of the delay added as random jitter.
    #[serde(default = "default_jitter")]
    pub jitter_factor: f64,
    /// Retry a malformed response once with the same request.
    #[serde(default = "default_true")]
    pub retry_malformed_once: bool,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_oracle_retries: 2,
            base_delay_ms: default_base_delay(),
            max_delay_ms: default_max_delay(),
            jitter_factor: default_jitter(),
            retry_malformed_once: true,
        }
    }
}

// ---------------------------------------------------------------------------
// Serde default helpers
// ---------------------------------------------------------------------------

fn default_true() -> bool { true }
fn default_model() -> String { "gemini-1.5-flash".to_string() }
fn default_api_key_env() -> String { "GEMINI_API_KEY".to_string() }
fn default_timeout_ms() -> u64 { 30_000 }
fn default_temperature() -> f32 { 0.8 }
fn default_max_tokens() -> u32 { 1024 }
fn default_log_level() -> String { "info".to_string() }
fn default_npcs_dir() -> PathBuf { PathBuf::from("data/npcs") }
fn default_locations_dir() -> PathBuf { PathBuf::from("data/locations") }
fn default_lore_dir() -> PathBuf { PathBuf::from("data/lore") }
fn default_2() -> u32 { 2 }
fn default_base_delay() -> u64 { 500 }
fn default_max_delay() -> u64 { 8_000 }
fn default_jitter() -> f64 { 0.2 }

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_toml_yields_defaults() {
        let config = DmConfig::from_toml("").expect("empty config is valid");
        assert_eq!(config.oracle.provider, OracleProvider::Gemini);
        assert_eq!(config.oracle.model, "gemini-1.5-flash");
        assert_eq!(config.oracle.api_key_env, "GEMINI_API_KEY");
        assert!(config.logging.log_requests);
        assert!(!config.logging.log_prompt);
    }

    #[test]
    fn sections_override_defaults() {
        let config = DmConfig::from_toml(
            r#"
            [oracle]
            provider = "ollama"
            model = "llama3.2"
            base_url = "http://localhost:11434"
            timeout_ms = 1500

            [logging]
            log_prompt = true

            [data]
            npcs_dir = "world/npcs"
            "#,
        )
        .expect("valid config");
        assert_eq!(config.oracle.provider, OracleProvider::Ollama);
        assert_eq!(config.oracle.timeout_ms, 1500);
        assert!(config.logging.log_prompt);
        assert_eq!(config.data.npcs_dir, PathBuf::from("world/npcs"));
        assert_eq!(config.data.lore_dir, PathBuf::from("data/lore"));
    }

    #[test]
    fn zero_timeout_is_rejected() {
        let err = DmConfig::from_toml("[oracle]\ntimeout_ms = 0").unwrap_err();
        assert!(matches!(
            err,
            ConfigError::InvalidValue { key: "oracle.timeout_ms", .. }
        ));
    }

    #[test]
    fn missing_api_key_is_a_configuration_error() {
        let oracle = OracleConfig::default();
        let err = oracle.resolve_api_key_with(|_| None).unwrap_err();
        assert!(matches!(err, ConfigError::MissingCredential(ref v) if v == "GEMINI_API_KEY"));

        let blank = oracle.resolve_api_key_with(|_| Some("  ".into()));
        assert!(blank.is_err());

        let key = oracle
            .resolve_api_key_with(|_| Some("secret".into()))
            .expect("key present");
        assert_eq!(key.as_deref(), Some("secret"));
    }

    #[test]
    fn local_providers_need_no_key() {
        let oracle = OracleConfig {
            provider: OracleProvider::Ollama,
            ..OracleConfig::default()
        };
        assert_eq!(oracle.resolve_api_key_with(|_| None).expect("no key needed"), None);
    }
}
