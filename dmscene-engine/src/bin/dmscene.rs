//! `dmscene`: run Dungeon Master turns from the command line.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use dmscene_core::{DmConfig, EntityStore, JsonDirectoryLoader};
use dmscene_engine::{
    LlmOracle, RetryPolicy, TurnOrchestrator, TurnRequest, TurnService, TurnSettings,
};

#[derive(Debug, Parser)]
#[command(
    name = "dmscene",
    version,
    about = "Assemble scene context and run AI Dungeon Master turns."
)]
struct Cli {
    /// TOML configuration file. Defaults apply when it does not exist.
    #[arg(long, global = true, default_value = "dm.toml", env = "DMSCENE_CONFIG")]
    config: PathBuf,

    /// Emit logs as JSON lines instead of human-readable text.
    #[arg(long, global = true)]
    json_logs: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// List every character and location in the data directories.
    List,
    /// Run one turn and print the scene update as JSON.
    Turn {
        /// JSON turn request (camelCase keys).
        #[arg(long)]
        request: PathBuf,
        /// Apply the configured retry policy.
        #[arg(long)]
        retry: bool,
    },
    /// Print the prompt for a turn without calling the oracle.
    Prompt {
        /// JSON turn request (camelCase keys).
        #[arg(long)]
        request: PathBuf,
    },
}

fn load_config(path: &Path) -> Result<DmConfig> {
    let config = if path.exists() {
        DmConfig::from_file(path).with_context(|| format!("loading {}", path.display()))?
    } else {
        DmConfig::default()
    };
    config.validate()?;
    Ok(config)
}

fn init_tracing(level: &str, json: bool) {
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level)))
        .with(json.then(|| tracing_subscriber::fmt::layer().json()))
        .with((!json).then(tracing_subscriber::fmt::layer))
        .init();
}

fn read_request(path: &Path) -> Result<TurnRequest> {
    let body =
        std::fs::read_to_string(path).with_context(|| format!("reading {}", path.display()))?;
    serde_json::from_str(&body).with_context(|| format!("parsing {}", path.display()))
}

/// Fill in the room's listed occupants when the request names nobody.
fn with_default_present(mut request: TurnRequest, store: &dyn EntityStore) -> Result<TurnRequest> {
    if request.present_character_names.is_empty() {
        let occupants = store
            .find_location_by_name(&request.location_name)?
            .and_then(|loc| {
                loc.room(&request.room_name)
                    .map(|r| r.present_character_names.clone())
            });
        if let Some(names) = occupants {
            tracing::debug!(?names, "Using the room's listed occupants");
            request.present_character_names = names;
        }
    }
    Ok(request)
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let config = load_config(&cli.config)?;
    init_tracing(&config.logging.level, cli.json_logs);

    let store: Arc<dyn EntityStore> =
        Arc::new(JsonDirectoryLoader::new(config.data.clone()).load_store()?);

    match cli.command {
        Command::List => {
            println!("Characters:");
            for c in store.list_characters()? {
                println!("  {} ({})", c.name, c.kind);
            }
            println!("Locations:");
            for loc in store.list_locations()? {
                let rooms: Vec<&str> = loc.rooms.iter().map(|r| r.name.as_str()).collect();
                println!("  {} [{}]", loc.name, rooms.join(", "));
            }
        }
        Command::Prompt { request } => {
            let request = with_default_present(read_request(&request)?, store.as_ref())?;
            let orchestrator = TurnOrchestrator::new(
                Arc::clone(&store),
                Arc::new(dmscene_engine::ScriptedOracle::default()),
                TurnSettings::from(&config),
            );
            let (_, payload) = orchestrator.prepare(
                &request.player_action,
                &request.present_character_names,
                &request.location_name,
                &request.room_name,
            )?;
            println!("{}", payload.text);
        }
        Command::Turn { request, retry } => {
            let request = with_default_present(read_request(&request)?, store.as_ref())?;
            let oracle = LlmOracle::from_config(&config.oracle)?;
            tracing::info!(
                provider = ?config.oracle.provider,
                model = %config.oracle.model,
                "Oracle ready"
            );
            let service = TurnService::new(
                TurnOrchestrator::new(store, Arc::new(oracle), TurnSettings::from(&config)),
                config.logging.log_requests,
            );
            let update = if retry {
                service
                    .generate_turn_with_retry(&request, &RetryPolicy::from(&config.retry))
                    .await?
            } else {
                service.generate_turn(&request).await?
            };
            println!("{}", serde_json::to_string_pretty(&update)?);
        }
    }
    Ok(())
}
