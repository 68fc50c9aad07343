//! Integration tests: JSON data directories through to a validated update.
//!
//! Exercises the synchronous half of a turn end to end: load, look up,
//! partition, build the prompt and normalize a reply.

use std::fs;
use std::path::Path;

use dmscene_core::config::DataConfig;
use dmscene_core::partition::referenced_lore_ids;
use dmscene_core::prompt;
use dmscene_core::{
    partition, EntityStore, JsonDirectoryLoader, MalformedReason, PlayerAction,
    ResponseNormalizer, SceneContext,
};

fn write(dir: &Path, file: &str, body: &str) {
    fs::create_dir_all(dir).expect("create dir");
    fs::write(dir.join(file), body).expect("write file");
}

/// Lays out a small world the way the data directories look on disk.
fn world(root: &Path) -> DataConfig {
    let data = DataConfig {
        npcs_dir: root.join("npcs"),
        locations_dir: root.join("locations"),
        lore_dir: root.join("lore"),
    };
    write(
        &data.npcs_dir,
        "gora.json",
        r#"{"name":"Gora","description":"Cave troll","behavior":"Non-verbal; snarls","type":"monster","lore_id":"mill-fire"}"#,
    );
    write(
        &data.npcs_dir,
        "townsfolk.json",
        r#"[
            {"name":"Lyra","description":"Bard","motivation":"Find her brother","personality":["Witty","Restless"],"lore_refs":["mill-fire","lost-brother"]},
            {"name":"Borin","description":"Miller","languages":"Dwarvish"}
        ]"#,
    );
    write(&data.npcs_dir, "broken.json", "{ not json");
    write(
        &data.locations_dir,
        "mill.json",
        r#"{"name":"Old Mill","description":"A burnt-out mill.","rooms":[
            {"name":"Cellar","description":"Dark and damp.","npcs":["Gora","Lyra"]},
            {"name":"Loft","description":"Sacks of grain.","npcs":"Borin"}
        ]}"#,
    );
    write(
        &data.lore_dir,
        "lore.json",
        r#"[
            {"lore_id":"mill-fire","title":"The Fire","content":"The mill burned ten winters ago."},
            {"id":"lost-brother","title":"Lost Brother","content":"Lyra's brother vanished in the fire."}
        ]"#,
    );
    data
}

fn assemble(store: &dyn EntityStore, names: &[&str], room: &str) -> SceneContext {
    let names: Vec<String> = names.iter().map(|s| (*s).to_string()).collect();
    let location = store
        .find_location_by_name("Old Mill")
        .expect("store")
        .expect("Old Mill exists");
    let characters = store.find_characters_by_name(&names).expect("store");
    let lore = store
        .find_lore_by_ids(&referenced_lore_ids(&characters))
        .expect("store");
    partition(&location, room, &names, &characters, &lore).expect("scene resolves")
}

#[test]
fn loader_skips_broken_files_and_accepts_both_layouts() {
    let dir = tempfile::tempdir().expect("tempdir");
    let store = JsonDirectoryLoader::new(world(dir.path()))
        .load_store()
        .expect("load");

    let names: Vec<String> = store
        .list_characters()
        .expect("list")
        .into_iter()
        .map(|c| c.name)
        .collect();
    assert_eq!(names.len(), 3);
    for expected in ["Gora", "Lyra", "Borin"] {
        assert!(names.iter().any(|n| n == expected), "missing {expected}");
    }

    let locations = store.list_locations().expect("list");
    assert_eq!(locations.len(), 1);
    let loft = locations[0].room("Loft").expect("loft");
    assert_eq!(loft.present_character_names, vec!["Borin"]);
}

#[test]
fn full_pipeline_accepts_a_well_formed_reply() {
    let dir = tempfile::tempdir().expect("tempdir");
    let store = JsonDirectoryLoader::new(world(dir.path()))
        .load_store()
        .expect("load");
    let scene = assemble(&store, &["Gora", "Lyra"], "Cellar");

    assert_eq!(scene.non_verbal_names(), vec!["Gora"]);
    let lyra = scene.dossier("Lyra").expect("Lyra's dossier");
    assert!(lyra.contains("vanished in the fire"));
    assert!(lyra.contains("ten winters ago"));
    let gora = scene.dossier("Gora").expect("Gora's dossier");
    assert!(gora.contains("ten winters ago"));
    assert!(!gora.contains("vanished"));
    assert!(!scene.public_knowledge.contains("Find her brother"));

    let payload = prompt::build(&scene, &PlayerAction::say("What happened here?").to("Lyra"));
    assert!(payload.text.contains("The player says to Lyra: \"What happened here?\""));

    let reply = "```json\n{\"dialogue\":[{\"speaker\":\"Lyra\",\"line\":\"It burned.\\nAll of it.\"}],\
                 \"sceneChanges\":\"Gora snarls at the ashes.\",\
                 \"followUp\":{\"focusCharacterName\":\"Lyra\",\"options\":[\"Who set it?\",\"Your brother?\",\"Let's go.\"]}}\n```";
    let update = ResponseNormalizer::for_scene(&scene)
        .parse(reply)
        .expect("valid reply");
    assert_eq!(update.dialogue[0].line, "It burned. All of it.");
    assert_eq!(update.follow_up.focus_character_name, "Lyra");
}

#[test]
fn troll_lines_are_rejected_even_when_the_oracle_ignores_the_rules() {
    let dir = tempfile::tempdir().expect("tempdir");
    let store = JsonDirectoryLoader::new(world(dir.path()))
        .load_store()
        .expect("load");
    let scene = assemble(&store, &["Gora", "Lyra"], "Cellar");

    let reply = r#"{"dialogue":[{"speaker":"Lyra","line":"Easy..."},{"speaker":"Gora","line":"GRAAH"}],
                    "sceneChanges":"","followUp":{"focusCharacterName":"Gora","options":["a","b","c"]}}"#;
    let err = ResponseNormalizer::for_scene(&scene).parse(reply).unwrap_err();
    assert_eq!(err.reason, MalformedReason::NonVerbalSpeaker("Gora".into()));
    assert_eq!(err.raw, reply);
}

#[test]
fn absent_characters_cannot_speak() {
    let dir = tempfile::tempdir().expect("tempdir");
    let store = JsonDirectoryLoader::new(world(dir.path()))
        .load_store()
        .expect("load");
    let scene = assemble(&store, &["Lyra"], "Cellar");

    let reply = r#"{"dialogue":[{"speaker":"Borin","line":"Who's down there?"}],
                    "sceneChanges":"","followUp":{"focusCharacterName":"Borin","options":["a","b","c"]}}"#;
    let err = ResponseNormalizer::for_scene(&scene).parse(reply).unwrap_err();
    assert_eq!(err.reason, MalformedReason::UnknownSpeaker("Borin".into()));
}

#[test]
fn store_edits_are_seen_by_later_turns() {
    let dir = tempfile::tempdir().expect("tempdir");
    let store = JsonDirectoryLoader::new(world(dir.path()))
        .load_store()
        .expect("load");
    let before = store.snapshot();

    store.edit(|snapshot| {
        if let Some(lyra) = snapshot.characters.iter_mut().find(|c| c.name == "Lyra") {
            lyra.behavior = Some("Has gone mute with fear".into());
        }
    });

    let scene = assemble(&store, &["Gora", "Lyra"], "Cellar");
    assert_eq!(scene.non_verbal_names(), vec!["Gora", "Lyra"]);
    // Readers holding the old snapshot are unaffected.
    let old_lyra = before.characters.iter().find(|c| c.name == "Lyra").expect("lyra");
    assert!(old_lyra.behavior.is_none());
}
