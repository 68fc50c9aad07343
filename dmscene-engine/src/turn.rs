//! Turn orchestration: resolve, partition, build, invoke, normalize.
//!
//! A turn is strictly sequential and short-circuits on the first failing
//! stage. The orchestrator never retries; that is a caller policy (see
//! [`crate::service::TurnService::generate_turn_with_retry`]).

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;
use tokio::time::timeout;
use tracing::{debug, error, info, info_span, warn, Instrument};
use uuid::Uuid;

use dmscene_core::config::DmConfig;
use dmscene_core::partition::referenced_lore_ids;
use dmscene_core::prompt::{self, PromptPayload};
use dmscene_core::{
    partition, EntityStore, MalformedResponse, PlayerAction, ResponseNormalizer, SceneContext,
    SceneError, SceneUpdate, StoreError,
};

use crate::oracle::{Oracle, OracleError};

/// The pipeline stage a turn was in when it failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TurnStage {
    /// Fetching the location, characters and lore from the store.
    Resolve,
    /// Splitting knowledge into public facts and dossiers.
    Partition,
    /// Rendering the prompt payload.
    BuildPrompt,
    /// Waiting on the oracle.
    InvokeOracle,
    /// Parsing and validating the oracle's text.
    Normalize,
}

impl TurnStage {
    /// Stage name for logs.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Resolve => "resolve",
            Self::Partition => "partition",
            Self::BuildPrompt => "build_prompt",
            Self::InvokeOracle => "invoke_oracle",
            Self::Normalize => "normalize",
        }
    }
}

impl fmt::Display for TurnStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The underlying cause of a failed turn.
#[derive(Error, Debug)]
pub enum StageError {
    /// Something the caller named does not exist.
    #[error(transparent)]
    Scene(#[from] SceneError),

    /// The entity store failed.
    #[error(transparent)]
    Store(#[from] StoreError),

    /// The oracle produced no text.
    #[error(transparent)]
    Oracle(#[from] OracleError),

    /// The oracle's text broke the output contract.
    #[error(transparent)]
    Malformed(#[from] MalformedResponse),
}

/// A failed turn: which stage, and why.
#[derive(Error, Debug)]
#[error("Turn failed at {stage}: {source}")]
pub struct TurnError {
    /// Stage that failed.
    pub stage: TurnStage,
    /// What went wrong.
    #[source]
    pub source: StageError,
}

impl TurnError {
    /// Attach `source` to `stage`.
    pub fn new(stage: TurnStage, source: impl Into<StageError>) -> Self {
        Self {
            stage,
            source: source.into(),
        }
    }
}

/// Per-turn knobs taken from [`DmConfig`].
#[derive(Debug, Clone)]
pub struct TurnSettings {
    /// Hard limit on one oracle call.
    pub oracle_timeout: Duration,
    /// Log the full prompt text at `info`.
    pub log_prompt: bool,
    /// Log the raw oracle text at `info`.
    pub log_response: bool,
}

impl Default for TurnSettings {
    fn default() -> Self {
        Self {
            oracle_timeout: Duration::from_secs(30),
            log_prompt: false,
            log_response: false,
        }
    }
}

impl From<&DmConfig> for TurnSettings {
    fn from(config: &DmConfig) -> Self {
        Self {
            oracle_timeout: Duration::from_millis(config.oracle.timeout_ms),
            log_prompt: config.logging.log_prompt,
            log_response: config.logging.log_response,
        }
    }
}

/// Runs one turn end to end.
///
/// Holds only shared, read-only handles, so one orchestrator serves any
/// number of concurrent turns.
#[derive(Clone)]
pub struct TurnOrchestrator {
    store: Arc<dyn EntityStore>,
    oracle: Arc<dyn Oracle>,
    settings: TurnSettings,
}

impl fmt::Debug for TurnOrchestrator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TurnOrchestrator")
            .field("settings", &self.settings)
            .finish_non_exhaustive()
    }
}

impl TurnOrchestrator {
    /// Create an orchestrator over `store` and `oracle`.
    #[must_use]
    pub fn new(
        store: Arc<dyn EntityStore>,
        oracle: Arc<dyn Oracle>,
        settings: TurnSettings,
    ) -> Self {
        Self {
            store,
            oracle,
            settings,
        }
    }

    /// The store this orchestrator reads from.
    #[must_use]
    pub fn store(&self) -> &Arc<dyn EntityStore> {
        &self.store
    }

    /// Run the first three stages and return the scene with its prompt,
    /// without calling the oracle.
    ///
    /// # Errors
    /// [`TurnError`] at [`TurnStage::Resolve`] or [`TurnStage::Partition`].
    pub fn prepare(
        &self,
        action: &PlayerAction,
        present_names: &[String],
        location_name: &str,
        room_name: &str,
    ) -> Result<(SceneContext, PromptPayload), TurnError> {
        debug!(stage = %TurnStage::Resolve, "Resolving entities");
        let location = self
            .store
            .find_location_by_name(location_name)
            .map_err(|e| TurnError::new(TurnStage::Resolve, e))?
            .ok_or_else(|| {
                TurnError::new(
                    TurnStage::Resolve,
                    SceneError::LocationNotFound {
                        name: location_name.to_string(),
                    },
                )
            })?;
        let characters = if present_names.is_empty() {
            Vec::new()
        } else {
            self.store
                .find_characters_by_name(present_names)
                .map_err(|e| TurnError::new(TurnStage::Resolve, e))?
        };
        let lore_ids = referenced_lore_ids(&characters);
        let lore = if lore_ids.is_empty() {
            Vec::new()
        } else {
            self.store
                .find_lore_by_ids(&lore_ids)
                .map_err(|e| TurnError::new(TurnStage::Resolve, e))?
        };

        debug!(
            stage = %TurnStage::Partition,
            characters = characters.len(),
            lore = lore.len(),
            "Partitioning knowledge"
        );
        let scene = partition(&location, room_name, present_names, &characters, &lore)
            .map_err(|e| TurnError::new(TurnStage::Partition, e))?;

        debug!(stage = %TurnStage::BuildPrompt, "Building prompt");
        let payload = prompt::build(&scene, action);
        if self.settings.log_prompt {
            info!(prompt = %payload.text, "Turn prompt");
        }
        Ok((scene, payload))
    }

    /// Run one full turn.
    ///
    /// # Errors
    /// [`TurnError`] naming the first stage that failed.
    pub async fn run_turn(
        &self,
        action: &PlayerAction,
        present_names: &[String],
        location_name: &str,
        room_name: &str,
    ) -> Result<SceneUpdate, TurnError> {
        let span = info_span!(
            "turn",
            turn_id = %Uuid::new_v4(),
            location = %location_name,
            room = %room_name,
        );
        self.run_stages(action, present_names, location_name, room_name)
            .instrument(span)
            .await
    }

    async fn run_stages(
        &self,
        action: &PlayerAction,
        present_names: &[String],
        location_name: &str,
        room_name: &str,
    ) -> Result<SceneUpdate, TurnError> {
        info!(present = present_names.len(), "Turn started");
        let (scene, payload) = self.prepare(action, present_names, location_name, room_name)?;

        debug!(stage = %TurnStage::InvokeOracle, "Calling oracle");
        let call = timeout(self.settings.oracle_timeout, self.oracle.complete(&payload));
        let raw = match call.await {
            Ok(Ok(raw)) => raw,
            Ok(Err(e)) => {
                error!(error = %e, retryable = e.is_retryable(), "Oracle call failed");
                return Err(TurnError::new(TurnStage::InvokeOracle, e));
            }
            Err(_) => {
                let after_ms = u64::try_from(self.settings.oracle_timeout.as_millis())
                    .unwrap_or(u64::MAX);
                error!(after_ms, "Oracle call timed out");
                return Err(TurnError::new(
                    TurnStage::InvokeOracle,
                    OracleError::Timeout { after_ms },
                ));
            }
        };
        if self.settings.log_response {
            info!(raw = %raw, "Oracle response");
        }

        debug!(stage = %TurnStage::Normalize, "Normalizing response");
        let update = ResponseNormalizer::for_scene(&scene).parse(&raw).map_err(|e| {
            warn!(reason = %e.reason, raw = %e.raw, "Oracle output rejected");
            TurnError::new(TurnStage::Normalize, e)
        })?;

        info!(
            lines = update.dialogue.len(),
            focus = %update.follow_up.focus_character_name,
            "Turn finished"
        );
        Ok(update)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::oracle::ScriptedOracle;
    use dmscene_core::store::{InMemoryStore, Snapshot};
    use dmscene_core::{Character, Location, Room};

    fn store() -> Arc<dyn EntityStore> {
        let mut mira = Character::new("Mira", "Innkeeper of the Gilded Goose");
        mira.motivations = vec!["Keep the peace".into()];
        Arc::new(InMemoryStore::new(Snapshot {
            characters: vec![mira],
            locations: vec![Location {
                name: "Gilded Goose".into(),
                description: "A crowded inn.".into(),
                rooms: vec![Room {
                    name: "Taproom".into(),
                    description: "Smoke and song.".into(),
                    present_character_names: vec!["Mira".into()],
                }],
            }],
            lore: Vec::new(),
        }))
    }

    fn names() -> Vec<String> {
        vec!["Mira".to_string()]
    }

    const VALID: &str = r#"{
        "dialogue": [{"speaker": "Mira", "line": "Welcome!"}],
        "sceneChanges": "",
        "followUp": {"focusCharacterName": "Mira", "options": ["Ale", "Room", "Rumors"]}
    }"#;

    #[tokio::test]
    async fn prepare_stops_before_the_oracle() {
        let oracle = Arc::new(ScriptedOracle::default());
        let orch = TurnOrchestrator::new(store(), oracle.clone(), TurnSettings::default());
        let (scene, payload) = orch
            .prepare(&PlayerAction::say("Hello"), &names(), "Gilded Goose", "Taproom")
            .expect("scene resolves");
        assert_eq!(scene.present_names(), vec!["Mira"]);
        assert!(payload.text.contains("Hello"));
        assert_eq!(oracle.calls(), 0);
    }

    #[tokio::test]
    async fn stage_is_reported_for_each_failure() {
        let orch = TurnOrchestrator::new(
            store(),
            Arc::new(ScriptedOracle::new(["not json"])),
            TurnSettings::default(),
        );
        let action = PlayerAction::say("Hello");

        let err = orch.run_turn(&action, &names(), "Nowhere", "Taproom").await.unwrap_err();
        assert_eq!(err.stage, TurnStage::Resolve);

        let err = orch.run_turn(&action, &names(), "Gilded Goose", "Attic").await.unwrap_err();
        assert_eq!(err.stage, TurnStage::Partition);

        let err = orch.run_turn(&action, &names(), "Gilded Goose", "Taproom").await.unwrap_err();
        assert_eq!(err.stage, TurnStage::Normalize);
        assert!(matches!(err.source, StageError::Malformed(_)));

        let err = orch.run_turn(&action, &names(), "Gilded Goose", "Taproom").await.unwrap_err();
        assert_eq!(err.stage, TurnStage::InvokeOracle);
    }

    #[tokio::test]
    async fn valid_reply_becomes_a_scene_update() {
        let orch = TurnOrchestrator::new(
            store(),
            Arc::new(ScriptedOracle::new([VALID])),
            TurnSettings::default(),
        );
        let update = orch
            .run_turn(&PlayerAction::say("Hello"), &names(), "Gilded Goose", "Taproom")
            .await
            .expect("valid turn");
        assert_eq!(update.dialogue[0].speaker, "Mira");
        assert_eq!(update.follow_up.options.len(), 3);
    }

    #[test]
    fn settings_follow_config() {
        let mut config = DmConfig::default();
        config.oracle.timeout_ms = 1_500;
        config.logging.log_prompt = true;
        let settings = TurnSettings::from(&config);
        assert_eq!(settings.oracle_timeout, Duration::from_millis(1_500));
        assert!(settings.log_prompt);
        assert!(!settings.log_response);
    }
}
