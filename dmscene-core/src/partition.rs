//! Knowledge partitioning: public scene facts versus private dossiers.
//!
//! The public block is built from location/room names and descriptions and
//! the names of who is present. Nothing private (motivations, personality,
//! behavior, lore) ever enters it.
//!
//! Each present character gets its own dossier containing its identity,
//! profile and only the lore its `lore_refs` point at. Dossiers are rendered
//! independently from owned copies, so two characters sharing a lore id get
//! two separate copies of the text.
//!
//! Order is always the caller's requested order, never the store's, so the
//! same request produces byte-identical output.

use std::collections::HashSet;

use tracing::debug;

use crate::error::{Result, SceneError};
use crate::sanitize::escape_block_text;
use crate::types::{Character, Location, LoreEntry, SceneContext};

/// Placeholder for empty dossier sections.
const NONE_RECORDED: &str = "none recorded";

/// Build the [`SceneContext`] for one turn.
///
/// `characters` is whatever the store returned for `requested_names`;
/// `all_lore` is whatever it returned for [`referenced_lore_ids`].
///
/// # Errors
/// - [`SceneError::NoCharactersPresent`] if `requested_names` is empty
/// - [`SceneError::RoomNotFound`] if `location` has no room called `room_name`
/// - [`SceneError::CharacterNotFound`] for the first requested name with no record
pub fn partition(
    location: &Location,
    room_name: &str,
    requested_names: &[String],
    characters: &[Character],
    all_lore: &[LoreEntry],
) -> Result<SceneContext> {
    let room = location
        .room(room_name)
        .ok_or_else(|| SceneError::RoomNotFound {
            location: location.name.clone(),
            room: room_name.to_string(),
        })?
        .clone();

    let present = resolve_present(requested_names, characters)?;

    let public_knowledge = render_public(location, &room.name, &room.description, &present);
    let dossiers = present
        .iter()
        .map(|c| (c.name.clone(), render_dossier(c, all_lore)))
        .collect();

    debug!(
        location = %location.name,
        room = %room.name,
        present = present.len(),
        "Partitioned scene knowledge"
    );

    Ok(SceneContext {
        location: location.clone(),
        room,
        present_characters: present,
        public_knowledge,
        dossiers,
    })
}

/// Lore ids referenced by `characters`, deduplicated, in first-seen order.
#[must_use]
pub fn referenced_lore_ids(characters: &[Character]) -> Vec<String> {
    let mut seen = HashSet::new();
    characters
        .iter()
        .flat_map(|c| c.lore_refs.iter())
        .filter(|id| seen.insert(id.as_str()))
        .cloned()
        .collect()
}

/// Match requested names to store records, in request order.
///
/// Repeated names collapse to their first occurrence. If the store holds
/// several records with one name, the first record wins.
fn resolve_present(requested: &[String], found: &[Character]) -> Result<Vec<Character>> {
    if requested.is_empty() {
        return Err(SceneError::NoCharactersPresent);
    }
    let mut seen = HashSet::new();
    let mut present = Vec::with_capacity(requested.len());
    for name in requested {
        if !seen.insert(name.as_str()) {
            continue;
        }
        let record = found
            .iter()
            .find(|c| &c.name == name)
            .ok_or_else(|| SceneError::CharacterNotFound { name: name.clone() })?;
        present.push(record.clone());
    }
    Ok(present)
}

fn render_public(
    location: &Location,
    room_name: &str,
    room_description: &str,
    present: &[Character],
) -> String {
    let names: Vec<String> = present.iter().map(|c| escape_block_text(&c.name)).collect();
    let mut out = String::new();
    out.push_str(&format!("Location: {}\n", escape_block_text(&location.name)));
    if !location.description.trim().is_empty() {
        out.push_str(&format!(
            "Location description: {}\n",
            escape_block_text(&location.description)
        ));
    }
    out.push_str(&format!("Room: {}\n", escape_block_text(room_name)));
    out.push_str(&format!(
        "Room description: {}\n",
        or_none(&escape_block_text(room_description))
    ));
    out.push_str(&format!("Characters present: {}", names.join(", ")));
    out
}

fn render_dossier(character: &Character, all_lore: &[LoreEntry]) -> String {
    let mut out = String::new();
    out.push_str(&format!("Name: {}\n", escape_block_text(&character.name)));
    out.push_str(&format!("Kind: {}\n", character.kind));
    out.push_str(&format!(
        "Profile: {}\n",
        or_none(&escape_block_text(&character.description))
    ));
    out.push_str(&format!("Languages: {}\n", joined(&character.languages)));
    out.push_str(&format!("Personality: {}\n", joined(&character.personality_traits)));
    out.push_str(&format!(
        "Behavior: {}\n",
        or_none(&escape_block_text(character.behavior.as_deref().unwrap_or("")))
    ));
    if character.is_non_verbal() {
        out.push_str("Speech: non-verbal, never speaks aloud\n");
    }

    out.push_str("Motivations:");
    push_items(&mut out, character.motivations.iter().map(|m| escape_block_text(m)));

    out.push_str("\nKnown lore:");
    let mut seen = HashSet::new();
    let lore = character
        .lore_refs
        .iter()
        .filter(|id| seen.insert(id.as_str()))
        .filter_map(|id| {
            let entry = all_lore.iter().find(|l| &l.lore_id == id);
            if entry.is_none() {
                debug!(character = %character.name, lore_id = %id, "Referenced lore not found");
            }
            entry
        })
        .map(|l| {
            format!(
                "{}: {}",
                escape_block_text(&l.title),
                escape_block_text(&l.content)
            )
        });
    push_items(&mut out, lore);
    out
}

fn push_items<I>(out: &mut String, items: I)
where
    I: Iterator<Item = String>,
{
    let mut any = false;
    for item in items {
        out.push_str("\n- ");
        out.push_str(&item);
        any = true;
    }
    if !any {
        out.push(' ');
        out.push_str(NONE_RECORDED);
    }
}

fn joined(items: &[String]) -> String {
    let escaped: Vec<String> = items.iter().map(|s| escape_block_text(s)).collect();
    or_none(&escaped.join(", ")).to_string()
}

fn or_none(text: &str) -> &str {
    if text.trim().is_empty() {
        NONE_RECORDED
    } else {
        text
    }
}
