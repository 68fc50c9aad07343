//! Error types for the scene context assembler.

use thiserror::Error;

/// Errors raised while resolving and partitioning a scene.
///
/// Every variant is user-correctable: the caller asked for something the
/// entity store does not have.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SceneError {
    /// No location with this name exists.
    #[error("Location '{name}' not found")]
    LocationNotFound {
        /// The requested location name.
        name: String,
    },

    /// The location exists but has no room with this name.
    #[error("Room '{room}' not found in location '{location}'")]
    RoomNotFound {
        /// The location that was searched.
        location: String,
        /// The requested room name.
        room: String,
    },

    /// A requested character resolved to zero entity records.
    #[error("Character '{name}' not found")]
    CharacterNotFound {
        /// The requested character name.
        name: String,
    },

    /// The turn named no characters at all.
    #[error("No characters present in the scene")]
    NoCharactersPresent,
}

impl SceneError {
    /// The name the caller asked for that could not be resolved.
    ///
    /// Empty for [`SceneError::NoCharactersPresent`].
    #[must_use]
    pub fn missing_name(&self) -> &str {
        match self {
            Self::LocationNotFound { name } | Self::CharacterNotFound { name } => name,
            Self::RoomNotFound { room, .. } => room,
            Self::NoCharactersPresent => "",
        }
    }
}

/// Errors from an entity store adapter. Passed through the assembler unchanged.
#[derive(Error, Debug)]
pub enum StoreError {
    /// The backing data could not be read.
    #[error("Entity store I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// A stored document could not be decoded.
    #[error("Invalid document in {source_name}: {reason}")]
    InvalidDocument {
        /// File or collection the document came from.
        source_name: String,
        /// What was wrong with it.
        reason: String,
    },

    /// The store is not reachable.
    #[error("Entity store unavailable: {0}")]
    Unavailable(String),
}

/// Why an oracle response was rejected.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum MalformedReason {
    /// The text was empty after sanitization.
    #[error("response is empty")]
    Empty,

    /// The text is not valid JSON of the expected shape.
    #[error("not parseable: {0}")]
    Unparseable(String),

    /// A required key is absent.
    #[error("missing required key '{0}'")]
    MissingKey(&'static str),

    /// A dialogue entry names someone who is not present.
    #[error("speaker '{0}' is not present in the scene")]
    UnknownSpeaker(String),

    /// A non-verbal character was given dialogue.
    #[error("non-verbal character '{0}' was given dialogue")]
    NonVerbalSpeaker(String),

    /// A dialogue line or option is blank.
    #[error("blank {0}")]
    BlankText(&'static str),

    /// `followUp.options` is outside the allowed range.
    #[error("expected {min}-{max} follow-up options, got {count}")]
    OptionCount {
        /// Number of options received.
        count: usize,
        /// Minimum allowed.
        min: usize,
        /// Maximum allowed.
        max: usize,
    },

    /// The focus character is not present.
    #[error("focus character '{0}' is not present in the scene")]
    UnknownFocus(String),

    /// The focus character does not follow the last-speaker rule.
    #[error("focus character '{got}' should be '{expected}'")]
    FocusMismatch {
        /// What the oracle returned.
        got: String,
        /// What the focus rule requires.
        expected: String,
    },
}

/// The oracle's reply violated the declared schema or the speaker whitelist.
///
/// Carries the raw text so callers can log it or show it for diagnosis.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("Malformed oracle response: {reason}")]
pub struct MalformedResponse {
    /// What was wrong.
    pub reason: MalformedReason,
    /// The unmodified oracle text.
    pub raw: String,
}

/// Configuration could not be loaded or is incomplete.
#[derive(Error, Debug)]
pub enum ConfigError {
    /// The TOML text is invalid.
    #[error("Invalid configuration: {0}")]
    Parse(#[from] toml::de::Error),

    /// The config file could not be read.
    #[error("Cannot read configuration: {0}")]
    Io(#[from] std::io::Error),

    /// A required credential is not set.
    #[error("Missing credential: environment variable {0} is not set")]
    MissingCredential(String),

    /// A value is out of range.
    #[error("Invalid configuration value for {key}: {reason}")]
    InvalidValue {
        /// Dotted config key.
        key: &'static str,
        /// Why the value was rejected.
        reason: String,
    },
}

/// Convenience Result type alias for scene assembly.
pub type Result<T> = std::result::Result<T, SceneError>;
