//! Core type definitions for the scene context assembler.
//!
//! Entity types (`Character`, `Location`, `Room`, `LoreEntry`) are immutable
//! snapshots read from the entity store at the start of a turn. Scene types
//! (`SceneContext`, `SceneUpdate`) live for exactly one turn.

use serde::{Deserialize, Serialize};
use std::fmt;

// ---------------------------------------------------------------------------
// Entities
// ---------------------------------------------------------------------------

/// Whole words in a character's behavior notes that mark it as unable to speak.
pub const NON_VERBAL_WORDS: &[&str] = &["non-verbal", "nonverbal", "mute"];

/// Phrases that mark a character as unable to speak when they end a clause.
/// "Does not speak." counts; "does not speak Elvish" does not.
pub const NON_VERBAL_PHRASES: &[&[&str]] = &[&["does", "not", "speak"], &["cannot", "speak"]];

/// Words allowed after a non-verbal phrase without changing its meaning.
const TRAILING_QUALIFIERS: &[&[&str]] = &[&["aloud"], &["at", "all"]];

/// What sort of creature a character is.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CharacterKind {
    /// A non-player character (townsfolk, quest giver, companion).
    #[default]
    Npc,
    /// A hostile or wild creature.
    Monster,
}

impl fmt::Display for CharacterKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Npc => write!(f, "NPC"),
            Self::Monster => write!(f, "Monster"),
        }
    }
}

/// A character (NPC or monster) as stored in the entity store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Character {
    /// Unique display name; also the key used in prompts and dialogue.
    pub name: String,
    /// Public-facing profile text.
    #[serde(default)]
    pub description: String,
    /// What the character wants. Private.
    #[serde(default)]
    pub motivations: Vec<String>,
    /// Personality descriptors. Private.
    #[serde(default)]
    pub personality_traits: Vec<String>,
    /// Free-form behavior notes (may mark the character non-verbal).
    #[serde(default)]
    pub behavior: Option<String>,
    /// Languages the character speaks.
    #[serde(default)]
    pub languages: Vec<String>,
    /// Lore ids this character knows about.
    #[serde(default)]
    pub lore_refs: Vec<String>,
    /// NPC or monster.
    #[serde(default)]
    pub kind: CharacterKind,
}

impl Character {
    /// Create a character with only a name and description set.
    #[must_use]
    pub fn new(name: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            motivations: Vec::new(),
            personality_traits: Vec::new(),
            behavior: None,
            languages: Vec::new(),
            lore_refs: Vec::new(),
            kind: CharacterKind::Npc,
        }
    }

    /// Whether the behavior notes mark this character as unable to speak.
    #[must_use]
    pub fn is_non_verbal(&self) -> bool {
        self.behavior.as_deref().is_some_and(behavior_is_non_verbal)
    }
}

/// Clause-by-clause check of behavior notes against the non-verbal markers.
fn behavior_is_non_verbal(behavior: &str) -> bool {
    let lower = behavior.to_lowercase();
    lower
        .split(|c: char| matches!(c, '.' | ';' | ',' | ':' | '!' | '?' | '(' | ')' | '\n'))
        .any(|clause| {
            let words: Vec<&str> = clause
                .split(|c: char| !(c.is_alphanumeric() || c == '-'))
                .filter(|w| !w.is_empty())
                .collect();
            if words.iter().any(|w| NON_VERBAL_WORDS.contains(w)) {
                return true;
            }
            let words = TRAILING_QUALIFIERS
                .iter()
                .find_map(|q| words.strip_suffix(*q))
                .unwrap_or(words.as_slice());
            NON_VERBAL_PHRASES.iter().any(|phrase| words.ends_with(phrase))
        })
}

/// A room inside a [`Location`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Room {
    /// Room name, unique within its location.
    pub name: String,
    /// What the room looks like.
    #[serde(default)]
    pub description: String,
    /// Characters the data files place in this room by default.
    #[serde(default)]
    pub present_character_names: Vec<String>,
}

/// A location (building, dungeon, village) made of rooms.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Location {
    /// Unique location name.
    pub name: String,
    /// Short description of the whole location.
    #[serde(default)]
    pub description: String,
    /// Rooms, in data-file order.
    #[serde(default)]
    pub rooms: Vec<Room>,
}

impl Location {
    /// Find a room by exact name.
    #[must_use]
    pub fn room(&self, name: &str) -> Option<&Room> {
        self.rooms.iter().find(|room| room.name == name)
    }
}

/// A piece of world lore, linked to characters through `lore_refs`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoreEntry {
    /// Stable identifier referenced by characters.
    pub lore_id: String,
    /// Short title.
    #[serde(default)]
    pub title: String,
    /// Full lore text.
    #[serde(default)]
    pub content: String,
}

// ---------------------------------------------------------------------------
// Scene
// ---------------------------------------------------------------------------

/// Everything the prompt builder needs for one turn.
///
/// Built by [`crate::partition::partition`]. `dossiers` is ordered the same as
/// `present_characters`, and holds exactly one entry per present character.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SceneContext {
    /// The location the scene takes place in.
    pub location: Location,
    /// The room within `location`.
    pub room: Room,
    /// Characters physically present, in request order.
    pub present_characters: Vec<Character>,
    /// Facts every participant can see.
    pub public_knowledge: String,
    /// `(character name, private dossier)` pairs, in request order.
    pub dossiers: Vec<(String, String)>,
}

impl SceneContext {
    /// Names of all present characters, in request order.
    #[must_use]
    pub fn present_names(&self) -> Vec<&str> {
        self.present_characters
            .iter()
            .map(|c| c.name.as_str())
            .collect()
    }

    /// Names of present characters that cannot speak.
    #[must_use]
    pub fn non_verbal_names(&self) -> Vec<&str> {
        self.present_characters
            .iter()
            .filter(|c| c.is_non_verbal())
            .map(|c| c.name.as_str())
            .collect()
    }

    /// The private dossier for `name`, if that character is present.
    #[must_use]
    pub fn dossier(&self, name: &str) -> Option<&str> {
        self.dossiers
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, d)| d.as_str())
    }

    /// Whether `name` is one of the present characters.
    #[must_use]
    pub fn is_present(&self, name: &str) -> bool {
        self.present_characters.iter().any(|c| c.name == name)
    }
}

/// How the player's input should be framed for the oracle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionKind {
    /// The player speaks to a character.
    #[default]
    Dialogue,
    /// The player asks a character to use a named skill on the room.
    SkillCheck,
}

/// The player's input for one turn.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlayerAction {
    /// What the player typed (a line of speech, or a skill name for skill checks).
    pub raw_text: String,
    /// The character the player is addressing, if any.
    #[serde(default)]
    pub target_name: Option<String>,
    /// Dialogue or skill check.
    #[serde(default)]
    pub kind: ActionKind,
}

impl PlayerAction {
    /// A plain line of dialogue with no explicit target.
    #[must_use]
    pub fn say(text: impl Into<String>) -> Self {
        Self {
            raw_text: text.into(),
            target_name: None,
            kind: ActionKind::Dialogue,
        }
    }

    /// A skill check performed by `target`.
    #[must_use]
    pub fn skill_check(skill: impl Into<String>, target: impl Into<String>) -> Self {
        Self {
            raw_text: skill.into(),
            target_name: Some(target.into()),
            kind: ActionKind::SkillCheck,
        }
    }

    /// Address a specific character.
    #[must_use]
    pub fn to(mut self, target: impl Into<String>) -> Self {
        self.target_name = Some(target.into());
        self
    }
}

// ---------------------------------------------------------------------------
// Scene update (oracle output)
// ---------------------------------------------------------------------------

/// One line of spoken dialogue.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DialogueLine {
    /// A present, verbal character.
    pub speaker: String,
    /// What they say.
    pub line: String,
}

/// Suggested next actions for the player.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FollowUp {
    /// The character the options are aimed at.
    pub focus_character_name: String,
    /// 3–5 short things the player might say next.
    pub options: Vec<String>,
}

/// The validated result of one turn.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SceneUpdate {
    /// Spoken lines, in order.
    pub dialogue: Vec<DialogueLine>,
    /// Actions and environmental changes, including everything non-verbal
    /// characters do.
    pub scene_changes: String,
    /// Options for the player's next action.
    pub follow_up: FollowUp,
}

impl SceneUpdate {
    /// The last character to speak, if anyone spoke.
    #[must_use]
    pub fn last_speaker(&self) -> Option<&str> {
        self.dialogue.last().map(|l| l.speaker.as_str())
    }
}
