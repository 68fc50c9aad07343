//! End-to-end turn tests against a scripted oracle.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

use dmscene_core::prompt::PromptPayload;
use dmscene_core::store::{InMemoryStore, Snapshot};
use dmscene_core::{Character, Location, LoreEntry, MalformedReason, PlayerAction, Room};
use dmscene_engine::{
    Oracle, OracleError, RetryPolicy, ScriptedOracle, TurnApiError, TurnOrchestrator, TurnRequest,
    TurnService, TurnSettings,
};

// ---------------------------------------------------------------------------
// Fixtures
// ---------------------------------------------------------------------------

fn old_mill() -> Snapshot {
    let mut gora = Character::new("Gora", "A hulking cave troll chained in the cellar");
    gora.behavior = Some("Non-verbal. Growls and gestures.".into());
    gora.motivations = vec!["Break the chain".into()];
    gora.lore_refs = vec!["mill-curse".into()];

    let mut lyra = Character::new("Lyra", "A half-elf bard hiding from the baron");
    lyra.personality_traits = vec!["Witty".into(), "Nervous".into()];
    lyra.motivations = vec!["Escape the baron's men".into()];
    lyra.languages = vec!["Common".into(), "Elvish".into()];
    lyra.lore_refs = vec!["baron-secret".into()];

    Snapshot {
        characters: vec![gora, lyra],
        locations: vec![Location {
            name: "Old Mill".into(),
            description: "An abandoned mill on the river.".into(),
            rooms: vec![Room {
                name: "Cellar".into(),
                description: "Damp stone, a single barred window.".into(),
                present_character_names: vec!["Gora".into(), "Lyra".into()],
            }],
        }],
        lore: vec![
            LoreEntry {
                lore_id: "mill-curse".into(),
                title: "The Mill Curse".into(),
                content: "The miller drowned his apprentice here.".into(),
            },
            LoreEntry {
                lore_id: "baron-secret".into(),
                title: "The Baron's Secret".into(),
                content: "The baron is a doppelganger.".into(),
            },
        ],
    }
}

fn request(names: &[&str], location: &str, text: &str) -> TurnRequest {
    TurnRequest {
        present_character_names: names.iter().map(|s| (*s).to_string()).collect(),
        location_name: location.into(),
        room_name: "Cellar".into(),
        player_action: PlayerAction::say(text),
    }
}

fn service_with(oracle: Arc<dyn Oracle>, settings: TurnSettings) -> TurnService {
    let store = Arc::new(InMemoryStore::new(old_mill()));
    TurnService::new(TurnOrchestrator::new(store, oracle, settings), true)
}

fn service(oracle: Arc<ScriptedOracle>) -> TurnService {
    service_with(oracle, TurnSettings::default())
}

const LYRA_REPLY: &str = r#"{
    "dialogue": [{"speaker": "Lyra", "line": "Careful with that flame, the troll hates it."}],
    "sceneChanges": "Gora recoils from the torchlight, chains rattling.",
    "followUp": {"focusCharacterName": "Lyra", "options": ["Who chained him?", "Why are you hiding?", "Let's leave."]}
}"#;

const GORA_SPEAKS: &str = r#"{
    "dialogue": [{"speaker": "Gora", "line": "Put it out!"}],
    "sceneChanges": "",
    "followUp": {"focusCharacterName": "Gora", "options": ["Calm him", "Back away", "Ask Lyra"]}
}"#;

struct StalledOracle;

#[async_trait]
impl Oracle for StalledOracle {
    async fn complete(&self, _payload: &PromptPayload) -> Result<String, OracleError> {
        tokio::time::sleep(Duration::from_secs(3_600)).await;
        Ok(String::new())
    }
}

// ---------------------------------------------------------------------------
// Scenarios
// ---------------------------------------------------------------------------

#[tokio::test]
async fn non_verbal_troll_given_a_line_is_malformed() {
    let oracle = Arc::new(ScriptedOracle::new([GORA_SPEAKS]));
    let svc = service(oracle.clone());

    let err = svc
        .generate_turn(&request(&["Gora", "Lyra"], "Old Mill", "I light a torch"))
        .await
        .unwrap_err();

    match err {
        TurnApiError::Malformed { raw, reason } => {
            assert_eq!(reason, MalformedReason::NonVerbalSpeaker("Gora".into()));
            assert!(raw.contains("Put it out!"));
        }
        other => panic!("expected Malformed, got {other:?}"),
    }

    let prompt = &oracle.prompts()[0];
    assert!(prompt.contains("NON-VERBAL CHARACTERS: Gora"));
    assert!(prompt.contains("I light a torch"));
}

#[tokio::test]
async fn valid_reply_passes_through() {
    let svc = service(Arc::new(ScriptedOracle::new([LYRA_REPLY])));
    let update = svc
        .generate_turn(&request(&["Gora", "Lyra"], "Old Mill", "I light a torch"))
        .await
        .expect("valid turn");

    assert_eq!(update.dialogue.len(), 1);
    assert_eq!(update.dialogue[0].speaker, "Lyra");
    assert_eq!(update.follow_up.focus_character_name, "Lyra");
    assert!(update.scene_changes.contains("Gora recoils"));
}

#[tokio::test]
async fn each_dossier_only_carries_its_own_lore() {
    let oracle = Arc::new(ScriptedOracle::new([LYRA_REPLY]));
    let svc = service(oracle.clone());
    svc.generate_turn(&request(&["Gora", "Lyra"], "Old Mill", "Hello"))
        .await
        .expect("valid turn");

    let prompt = &oracle.prompts()[0];
    let gora_block = prompt
        .split("<dossier name=\"Gora\">")
        .nth(1)
        .and_then(|rest| rest.split("</dossier name=\"Gora\">").next())
        .expect("Gora's dossier");
    assert!(gora_block.contains("drowned his apprentice"));
    assert!(!gora_block.contains("doppelganger"));
}

#[tokio::test]
async fn unknown_location_is_not_found() {
    let oracle = Arc::new(ScriptedOracle::new([LYRA_REPLY]));
    let svc = service(oracle.clone());
    let err = svc
        .generate_turn(&request(&["Lyra"], "Atlantis", "Hello"))
        .await
        .unwrap_err();
    assert!(matches!(err, TurnApiError::NotFound { ref name } if name == "Atlantis"));
    assert_eq!(oracle.calls(), 0);
}

#[tokio::test]
async fn unknown_character_is_not_found() {
    let svc = service(Arc::new(ScriptedOracle::new([LYRA_REPLY])));
    let err = svc
        .generate_turn(&request(&["Lyra", "Baron"], "Old Mill", "Hello"))
        .await
        .unwrap_err();
    assert!(matches!(err, TurnApiError::NotFound { ref name } if name == "Baron"));
}

#[tokio::test]
async fn empty_present_list_is_rejected() {
    let oracle = Arc::new(ScriptedOracle::new([LYRA_REPLY]));
    let svc = service(oracle.clone());
    let err = svc
        .generate_turn(&request(&[], "Old Mill", "Hello?"))
        .await
        .unwrap_err();
    assert!(matches!(err, TurnApiError::NotFound { .. }));
    assert_eq!(oracle.calls(), 0);
}

#[tokio::test(start_paused = true)]
async fn stalled_oracle_times_out_as_retryable() {
    let settings = TurnSettings {
        oracle_timeout: Duration::from_millis(500),
        ..TurnSettings::default()
    };
    let svc = service_with(Arc::new(StalledOracle), settings);
    let err = svc
        .generate_turn(&request(&["Lyra"], "Old Mill", "Hello"))
        .await
        .unwrap_err();
    assert!(matches!(err, TurnApiError::OracleFailure { retryable: true, .. }));
}

#[tokio::test]
async fn concurrent_turns_are_independent() {
    let oracle = Arc::new(ScriptedOracle::new([LYRA_REPLY, LYRA_REPLY, LYRA_REPLY]));
    let svc = Arc::new(service(oracle.clone()));

    let handles: Vec<_> = (0..3)
        .map(|_| {
            let svc = Arc::clone(&svc);
            tokio::spawn(async move {
                svc.generate_turn(&request(&["Gora", "Lyra"], "Old Mill", "Hello"))
                    .await
            })
        })
        .collect();
    for handle in handles {
        assert!(handle.await.expect("task").is_ok());
    }

    let prompts = oracle.prompts();
    assert_eq!(prompts.len(), 3);
    assert!(prompts.iter().all(|p| p == &prompts[0]));
}

// ---------------------------------------------------------------------------
// Retry policy
// ---------------------------------------------------------------------------

fn fast_retry(max_oracle_retries: u32) -> RetryPolicy {
    RetryPolicy {
        max_oracle_retries,
        base_delay: Duration::from_millis(100),
        max_delay: Duration::from_secs(1),
        jitter_factor: 0.2,
        retry_malformed_once: true,
    }
}

#[tokio::test]
async fn malformed_reply_is_retried_once() {
    let oracle = Arc::new(ScriptedOracle::new([GORA_SPEAKS, LYRA_REPLY]));
    let svc = service(oracle.clone());
    let update = svc
        .generate_turn_with_retry(&request(&["Gora", "Lyra"], "Old Mill", "Hi"), &fast_retry(0))
        .await
        .expect("second attempt succeeds");
    assert_eq!(update.dialogue[0].speaker, "Lyra");
    assert_eq!(oracle.calls(), 2);
}

#[tokio::test]
async fn malformed_reply_is_not_retried_twice() {
    let oracle = Arc::new(ScriptedOracle::new([GORA_SPEAKS, GORA_SPEAKS, LYRA_REPLY]));
    let svc = service(oracle.clone());
    let err = svc
        .generate_turn_with_retry(&request(&["Gora", "Lyra"], "Old Mill", "Hi"), &fast_retry(3))
        .await
        .unwrap_err();
    assert!(matches!(err, TurnApiError::Malformed { .. }));
    assert_eq!(oracle.calls(), 2);
}

#[tokio::test(start_paused = true)]
async fn transient_oracle_failures_back_off_and_recover() {
    let oracle = Arc::new(ScriptedOracle::default());
    oracle.push(Err(OracleError::Unavailable("503".into())));
    oracle.push(Err(OracleError::Quota("429".into())));
    oracle.push(Ok(LYRA_REPLY.into()));
    let svc = service(oracle.clone());

    let update = svc
        .generate_turn_with_retry(&request(&["Lyra"], "Old Mill", "Hi"), &fast_retry(2))
        .await
        .expect("third attempt succeeds");
    assert_eq!(update.follow_up.focus_character_name, "Lyra");
    assert_eq!(oracle.calls(), 3);
}

#[tokio::test(start_paused = true)]
async fn retries_stop_at_the_limit() {
    let oracle = Arc::new(ScriptedOracle::default());
    for _ in 0..5 {
        oracle.push(Err(OracleError::Transport("reset".into())));
    }
    let svc = service(oracle.clone());
    let err = svc
        .generate_turn_with_retry(&request(&["Lyra"], "Old Mill", "Hi"), &fast_retry(2))
        .await
        .unwrap_err();
    assert!(matches!(err, TurnApiError::OracleFailure { retryable: true, .. }));
    assert_eq!(oracle.calls(), 3);
}

#[tokio::test]
async fn fatal_oracle_failures_and_not_found_are_never_retried() {
    let oracle = Arc::new(ScriptedOracle::default());
    oracle.push(Err(OracleError::Rejected("HTTP 401".into())));
    let svc = service(oracle.clone());

    let err = svc
        .generate_turn_with_retry(&request(&["Lyra"], "Old Mill", "Hi"), &fast_retry(3))
        .await
        .unwrap_err();
    assert!(matches!(err, TurnApiError::OracleFailure { retryable: false, .. }));
    assert_eq!(oracle.calls(), 1);

    let err = svc
        .generate_turn_with_retry(&request(&["Lyra"], "Nowhere", "Hi"), &fast_retry(3))
        .await
        .unwrap_err();
    assert!(matches!(err, TurnApiError::NotFound { .. }));
    assert_eq!(oracle.calls(), 1);
}
