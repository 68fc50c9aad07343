//! # dmscene-llm: Text-Completion Transport
//!
//! Provides one client for the text-completion backends the Dungeon Master
//! can narrate with:
//!   - **Gemini** (`generateContent`, the default)
//!   - **OpenAI-compatible API** (also works with Together, vLLM, etc.)
//!   - **Ollama** (local)
//!
//! The client is deliberately dumb: one prompt in, one text out. It knows
//! nothing about scenes, dossiers or schemas. Every call:
//!   - asks the provider for JSON output where a JSON mode exists
//!   - carries an explicit per-request timeout
//!   - classifies failures so callers can tell retryable from fatal

pub mod client;
pub mod error;
pub mod types;

pub use client::{LlmClient, LlmProvider};
pub use error::LlmError;
pub use types::{LlmRequest, LlmResponse};
