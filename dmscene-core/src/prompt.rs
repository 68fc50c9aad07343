//! Turn prompt construction.
//!
//! [`build`] turns a [`SceneContext`] and a [`PlayerAction`] into the single
//! instruction payload sent to the oracle. It is a pure function: no I/O, no
//! clock, no randomness. Identical inputs give byte-identical payloads.
//!
//! All store-sourced text reaching the payload has been through
//! [`escape_block_text`], so it cannot close a `<dossier>` block, break a
//! quoted attribute or start a new line.

use crate::sanitize::escape_block_text;
use crate::types::{ActionKind, DialogueLine, PlayerAction, SceneContext};

/// The JSON shape the oracle must return.
pub const SCENE_UPDATE_SCHEMA: &str = r#"{"dialogue": [{"speaker": "<name from CHARACTERS PRESENT, never a non-verbal character>", "line": "<what they say>"}], "sceneChanges": "<actions and environmental changes, including everything non-verbal characters do>", "followUp": {"focusCharacterName": "<speaker of the last dialogue entry, or the first present character if nobody speaks>", "options": ["<3 to 5 short things the player might say next>"]}}"#;

/// Minimum number of follow-up options.
pub const MIN_OPTIONS: usize = 3;
/// Maximum number of follow-up options.
pub const MAX_OPTIONS: usize = 5;

/// The instruction text plus the schema it demands.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PromptPayload {
    /// Full instruction text for the oracle.
    pub text: String,
    /// The output schema embedded in `text`.
    pub schema: &'static str,
}

/// The focus character for follow-up options.
///
/// The last speaker in `dialogue`; if nobody speaks, the first present
/// character. `None` only for a scene with no characters.
#[must_use]
pub fn focus_character<'a>(
    scene: &'a SceneContext,
    dialogue: &'a [DialogueLine],
) -> Option<&'a str> {
    dialogue
        .last()
        .map(|l| l.speaker.as_str())
        .or_else(|| scene.present_characters.first().map(|c| c.name.as_str()))
}

/// Build the oracle payload for one turn.
#[must_use]
pub fn build(scene: &SceneContext, action: &PlayerAction) -> PromptPayload {
    let present: Vec<String> = scene
        .present_names()
        .into_iter()
        .map(escape_block_text)
        .collect();
    let non_verbal: Vec<String> = scene
        .non_verbal_names()
        .into_iter()
        .map(escape_block_text)
        .collect();
    let first = present.first().cloned().unwrap_or_default();

    let mut text = String::with_capacity(2048);
    text.push_str(
        "You are a Dungeon Master AI. Narrate what happens after the player's action \
         and suggest what the player might say next.\n\
         Your response MUST be a single valid JSON object and nothing else.\n\n",
    );

    text.push_str("RULES:\n");
    text.push_str(
        "1. Only characters listed under CHARACTERS PRESENT may speak or act. Never invent \
         dialogue or actions for anyone else, even if the lore or a dossier mentions them.\n",
    );
    text.push_str(
        "2. A character's dialogue and behavior may draw only on that character's own \
         <dossier> block. No character knows anything from another character's dossier.\n",
    );
    text.push_str(
        "3. Characters listed under NON-VERBAL CHARACTERS must never appear as a \"speaker\" \
         in \"dialogue\". Describe everything they do in \"sceneChanges\" instead.\n",
    );
    text.push_str(&format!(
        "4. \"followUp.focusCharacterName\" must be the speaker of the last \"dialogue\" entry. \
         If \"dialogue\" is empty it must be \"{first}\".\n"
    ));
    text.push_str(&format!(
        "5. \"followUp.options\" must hold {MIN_OPTIONS} to {MAX_OPTIONS} short, plausible \
         things the player might say next to the focus character.\n\n"
    ));

    text.push_str("OUTPUT SCHEMA:\n");
    text.push_str(SCENE_UPDATE_SCHEMA);
    text.push_str("\n\n");

    text.push_str("PUBLIC KNOWLEDGE (visible to every character):\n<public>\n");
    text.push_str(&scene.public_knowledge);
    text.push_str("\n</public>\n\n");

    text.push_str(&format!("CHARACTERS PRESENT: {}\n", present.join(", ")));
    text.push_str(&format!(
        "NON-VERBAL CHARACTERS: {}\n\n",
        if non_verbal.is_empty() {
            "none".to_string()
        } else {
            non_verbal.join(", ")
        }
    ));

    text.push_str("PRIVATE DOSSIERS (each visible only to the named character):\n");
    for (name, dossier) in &scene.dossiers {
        let tag = escape_block_text(name);
        text.push_str(&format!("<dossier name=\"{tag}\">\n{dossier}\n</dossier name=\"{tag}\">\n"));
    }
    text.push('\n');

    text.push_str("PLAYER'S ACTION: ");
    text.push_str(&describe_action(scene, action, &first));
    text.push_str("\n\nGenerate the JSON response now.\n");

    PromptPayload {
        text,
        schema: SCENE_UPDATE_SCHEMA,
    }
}

/// Frame the player's input the way the oracle expects it.
///
/// The addressed character is the action's target when that character is
/// present, otherwise the first present character.
fn describe_action(scene: &SceneContext, action: &PlayerAction, first: &str) -> String {
    let target = action
        .target_name
        .as_deref()
        .filter(|t| scene.is_present(t))
        .map_or_else(|| first.to_string(), escape_block_text);
    let input = escape_block_text(&action.raw_text);
    match action.kind {
        ActionKind::Dialogue => format!("The player says to {target}: \"{input}\""),
        ActionKind::SkillCheck => format!(
            "The player prompts {target} to use their {input} skill to interact with the room \
             or its contents."
        ),
    }
}
