//! Oracle response normalization and validation.
//!
//! The oracle is untrusted. Its text goes through, in order:
//!   1. control-character stripping (raw text)
//!   2. optional code-fence removal
//!   3. strict JSON parsing with per-key presence checks
//!   4. control-character stripping of every parsed string
//!   5. allow-list checks against the scene: speakers, non-verbal
//!      characters, option count, focus character
//!
//! Any violation rejects the whole response. Nothing is repaired.

use serde::Deserialize;
use serde_json::Value;

use crate::error::{MalformedReason, MalformedResponse};
use crate::prompt::{focus_character, MAX_OPTIONS, MIN_OPTIONS};
use crate::sanitize::{escape_block_text, strip_code_fence, strip_control_chars};
use crate::types::{DialogueLine, FollowUp, SceneContext, SceneUpdate};

#[derive(Debug, Deserialize)]
struct RawLine {
    speaker: Option<String>,
    line: Option<String>,
}

/// Validates oracle output against one scene.
#[derive(Debug, Clone, Copy)]
pub struct ResponseNormalizer<'a> {
    scene: &'a SceneContext,
}

impl<'a> ResponseNormalizer<'a> {
    /// A normalizer for the given scene's speaker whitelist.
    #[must_use]
    pub fn for_scene(scene: &'a SceneContext) -> Self {
        Self { scene }
    }

    /// Parse and validate `raw` into a [`SceneUpdate`].
    ///
    /// # Errors
    /// Returns [`MalformedResponse`] carrying the unmodified `raw` text on
    /// any schema or allow-list violation.
    pub fn parse(&self, raw: &str) -> Result<SceneUpdate, MalformedResponse> {
        self.parse_inner(raw).map_err(|reason| MalformedResponse {
            reason,
            raw: raw.to_string(),
        })
    }

    fn parse_inner(&self, raw: &str) -> Result<SceneUpdate, MalformedReason> {
        let cleaned = strip_control_chars(raw);
        let body = strip_code_fence(&cleaned);
        if body.is_empty() {
            return Err(MalformedReason::Empty);
        }

        let value: Value =
            serde_json::from_str(body).map_err(|e| MalformedReason::Unparseable(e.to_string()))?;
        let Value::Object(mut root) = value else {
            return Err(MalformedReason::Unparseable("top level is not an object".into()));
        };

        let dialogue = take_required(&mut root, "dialogue", "dialogue")?;
        let scene_changes = take_required(&mut root, "sceneChanges", "sceneChanges")?;
        let mut follow_up = match take_required(&mut root, "followUp", "followUp")? {
            Value::Object(map) => map,
            _ => return Err(MalformedReason::Unparseable("followUp is not an object".into())),
        };
        let focus = take_required(
            &mut follow_up,
            "focusCharacterName",
            "followUp.focusCharacterName",
        )?;
        let options = take_required(&mut follow_up, "options", "followUp.options")?;

        let raw_lines: Vec<RawLine> = typed(dialogue, "dialogue")?;
        let scene_changes: String = typed(scene_changes, "sceneChanges")?;
        let focus: String = typed(focus, "followUp.focusCharacterName")?;
        let options: Vec<String> = typed(options, "followUp.options")?;

        let mut dialogue = Vec::with_capacity(raw_lines.len());
        for raw_line in raw_lines {
            let speaker = raw_line
                .speaker
                .ok_or(MalformedReason::MissingKey("dialogue[].speaker"))?;
            let line = raw_line
                .line
                .ok_or(MalformedReason::MissingKey("dialogue[].line"))?;
            dialogue.push(DialogueLine {
                speaker: self.present_name(clean(&speaker)),
                line: clean(&line),
            });
        }

        let update = SceneUpdate {
            dialogue,
            scene_changes: clean(&scene_changes),
            follow_up: FollowUp {
                focus_character_name: self.present_name(clean(&focus)),
                options: options.iter().map(|o| clean(o)).collect(),
            },
        };
        self.validate(&update)?;
        Ok(update)
    }

    /// Map a name the oracle copied from the prompt, where it appears
    /// entity-escaped, back to the present character's stored name.
    fn present_name(&self, name: String) -> String {
        if self.scene.is_present(&name) {
            return name;
        }
        self.scene
            .present_characters
            .iter()
            .find(|c| escape_block_text(&c.name) == name)
            .map_or(name, |c| c.name.clone())
    }

    fn validate(&self, update: &SceneUpdate) -> Result<(), MalformedReason> {
        for entry in &update.dialogue {
            let Some(speaker) = self
                .scene
                .present_characters
                .iter()
                .find(|c| c.name == entry.speaker)
            else {
                return Err(MalformedReason::UnknownSpeaker(entry.speaker.clone()));
            };
            if speaker.is_non_verbal() {
                return Err(MalformedReason::NonVerbalSpeaker(entry.speaker.clone()));
            }
            if entry.line.is_empty() {
                return Err(MalformedReason::BlankText("dialogue line"));
            }
        }

        let count = update.follow_up.options.len();
        if !(MIN_OPTIONS..=MAX_OPTIONS).contains(&count) {
            return Err(MalformedReason::OptionCount {
                count,
                min: MIN_OPTIONS,
                max: MAX_OPTIONS,
            });
        }
        if update.follow_up.options.iter().any(String::is_empty) {
            return Err(MalformedReason::BlankText("follow-up option"));
        }

        let focus = &update.follow_up.focus_character_name;
        if !self.scene.is_present(focus) {
            return Err(MalformedReason::UnknownFocus(focus.clone()));
        }
        if let Some(expected) = focus_character(self.scene, &update.dialogue) {
            if expected != focus.as_str() {
                return Err(MalformedReason::FocusMismatch {
                    got: focus.clone(),
                    expected: expected.to_string(),
                });
            }
        }
        Ok(())
    }
}

/// Remove `key` from `map`, failing with the dotted `path` if absent or null.
fn take_required(
    map: &mut serde_json::Map<String, Value>,
    key: &str,
    path: &'static str,
) -> Result<Value, MalformedReason> {
    match map.remove(key) {
        None | Some(Value::Null) => Err(MalformedReason::MissingKey(path)),
        Some(v) => Ok(v),
    }
}

fn typed<T: serde::de::DeserializeOwned>(value: Value, path: &str) -> Result<T, MalformedReason> {
    serde_json::from_value(value).map_err(|e| MalformedReason::Unparseable(format!("{path}: {e}")))
}

/// Strip control characters that survived as JSON escapes, then trim.
fn clean(text: &str) -> String {
    strip_control_chars(text).trim().to_string()
}
