//! The turn API: request in, scene update or classified error out.

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{info, warn};

use dmscene_core::{MalformedReason, PlayerAction, SceneError, SceneUpdate, StoreError};

use crate::oracle::OracleError;
use crate::retry::RetryPolicy;
use crate::turn::{StageError, TurnError, TurnOrchestrator};

/// One turn as submitted by a client.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TurnRequest {
    /// Who is in the room, in the order the scene should list them.
    #[serde(default)]
    pub present_character_names: Vec<String>,
    /// Location name.
    pub location_name: String,
    /// Room name within the location.
    pub room_name: String,
    /// What the player did.
    pub player_action: PlayerAction,
}

/// Errors surfaced by the turn API.
#[derive(Error, Debug)]
pub enum TurnApiError {
    /// A named location, room or character does not exist, or nobody is present.
    #[error("Not found: '{name}'")]
    NotFound {
        /// The unresolved name; empty when the present list was empty.
        name: String,
    },

    /// The oracle replied, but not in the required shape.
    #[error("Malformed oracle response: {reason}")]
    Malformed {
        /// Raw oracle text, for diagnosis.
        raw: String,
        /// Which check failed.
        reason: MalformedReason,
    },

    /// The oracle could not be reached or gave up.
    #[error("Oracle failure (retryable: {retryable}): {message}")]
    OracleFailure {
        /// Whether a later attempt could succeed.
        retryable: bool,
        /// Human-readable cause.
        message: String,
    },

    /// The entity store failed.
    #[error(transparent)]
    Store(StoreError),
}

impl From<SceneError> for TurnApiError {
    fn from(err: SceneError) -> Self {
        Self::NotFound {
            name: err.missing_name().to_string(),
        }
    }
}

impl From<OracleError> for TurnApiError {
    fn from(err: OracleError) -> Self {
        Self::OracleFailure {
            retryable: err.is_retryable(),
            message: err.to_string(),
        }
    }
}

impl From<TurnError> for TurnApiError {
    fn from(err: TurnError) -> Self {
        match err.source {
            StageError::Scene(e) => e.into(),
            StageError::Store(e) => Self::Store(e),
            StageError::Oracle(e) => e.into(),
            StageError::Malformed(e) => Self::Malformed {
                raw: e.raw,
                reason: e.reason,
            },
        }
    }
}

/// Front door for turn generation.
#[derive(Debug, Clone)]
pub struct TurnService {
    orchestrator: TurnOrchestrator,
    log_requests: bool,
}

impl TurnService {
    /// Wrap an orchestrator. `log_requests` logs every incoming request at `info`.
    #[must_use]
    pub fn new(orchestrator: TurnOrchestrator, log_requests: bool) -> Self {
        Self {
            orchestrator,
            log_requests,
        }
    }

    /// The orchestrator behind this service.
    #[must_use]
    pub fn orchestrator(&self) -> &TurnOrchestrator {
        &self.orchestrator
    }

    /// Run one turn.
    ///
    /// # Errors
    /// See [`TurnApiError`].
    pub async fn generate_turn(&self, request: &TurnRequest) -> Result<SceneUpdate, TurnApiError> {
        if self.log_requests {
            info!(
                location = %request.location_name,
                room = %request.room_name,
                present = ?request.present_character_names,
                action = %request.player_action.raw_text,
                "Turn request"
            );
        }
        self.orchestrator
            .run_turn(
                &request.player_action,
                &request.present_character_names,
                &request.location_name,
                &request.room_name,
            )
            .await
            .map_err(TurnApiError::from)
    }

    /// Run one turn under `policy`.
    ///
    /// A malformed reply is retried at most once with the same request.
    /// Retryable oracle failures back off exponentially with jitter.
    /// `NotFound`, store failures and fatal oracle failures return at once.
    ///
    /// # Errors
    /// The last [`TurnApiError`] once the policy gives up.
    pub async fn generate_turn_with_retry(
        &self,
        request: &TurnRequest,
        policy: &RetryPolicy,
    ) -> Result<SceneUpdate, TurnApiError> {
        let mut oracle_retries = 0u32;
        let mut malformed_retried = false;
        loop {
            let err = match self.generate_turn(request).await {
                Ok(update) => {
                    if oracle_retries > 0 || malformed_retried {
                        info!(oracle_retries, malformed_retried, "Turn succeeded after retry");
                    }
                    return Ok(update);
                }
                Err(e) => e,
            };
            match &err {
                TurnApiError::Malformed { reason, .. }
                    if policy.retry_malformed_once && !malformed_retried =>
                {
                    malformed_retried = true;
                    warn!(reason = %reason, "Retrying turn after malformed response");
                }
                TurnApiError::OracleFailure {
                    retryable: true,
                    message,
                } if oracle_retries < policy.max_oracle_retries => {
                    oracle_retries += 1;
                    let delay = policy.delay_for(oracle_retries);
                    warn!(
                        attempt = oracle_retries,
                        max_retries = policy.max_oracle_retries,
                        delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
                        error = %message,
                        "Oracle failed, retrying"
                    );
                    tokio::time::sleep(delay).await;
                }
                _ => return Err(err),
            }
        }
    }
}
