//! # dmscene-engine: Turn Orchestration
//!
//! Wires the pure assembler in `dmscene-core` to a text-completion oracle:
//!
//! - [`oracle`]: the async [`Oracle`] seam, an LLM-backed implementation and
//!   a scripted one for tests and offline runs
//! - [`turn`]: [`TurnOrchestrator`], the five-stage pipeline with a hard
//!   oracle timeout
//! - [`service`]: [`TurnService`], the request/response surface and its
//!   error classification
//! - [`retry`]: caller-side backoff policy
//!
//! Every turn runs in a `turn` tracing span carrying a fresh `turn_id`.

#![deny(clippy::unwrap_used)]
#![deny(missing_docs)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod oracle;
pub mod retry;
pub mod service;
pub mod turn;

pub use oracle::{LlmOracle, Oracle, OracleError, ScriptedOracle};
pub use retry::RetryPolicy;
pub use service::{TurnApiError, TurnRequest, TurnService};
pub use turn::{StageError, TurnError, TurnOrchestrator, TurnSettings, TurnStage};
