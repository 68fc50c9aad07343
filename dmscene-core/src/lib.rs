//! # dmscene-core: Scene Context Assembler
//!
//! Turns scattered world records into a structured prompt/response contract
//! for an AI Dungeon Master:
//!
//! - **Entity store**: read-only lookups of characters, locations and lore
//! - **Knowledge partitioner**: public scene facts vs. one private dossier
//!   per present character
//! - **Prompt builder**: one deterministic instruction payload with the
//!   narrative rules and output schema
//! - **Response normalizer**: sanitizes, parses and allow-list-checks the
//!   oracle's reply into a [`SceneUpdate`]
//!
//! ```text
//! EntityStore ──► partition ──► prompt::build ──► (oracle) ──► ResponseNormalizer
//!                  SceneContext    PromptPayload      raw text     SceneUpdate
//! ```
//!
//! Everything in this crate is synchronous and free of I/O except the
//! JSON-directory loader. The oracle call and turn sequencing live in
//! `dmscene-engine`.

#![deny(clippy::unwrap_used)]
#![deny(missing_docs)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod config;
pub mod error;
pub mod normalize;
pub mod partition;
pub mod prompt;
pub mod sanitize;
pub mod store;
pub mod types;

pub use config::DmConfig;
pub use error::{ConfigError, MalformedReason, MalformedResponse, SceneError, StoreError};
pub use normalize::ResponseNormalizer;
pub use partition::partition;
pub use prompt::PromptPayload;
pub use store::{EntityStore, InMemoryStore, JsonDirectoryLoader};
pub use types::*;
