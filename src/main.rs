//! Sixgun service entry point
//!
//! Constructs the service graph explicitly and runs the recovery and expiry
//! sweeps. Ships with the simulated ledger and in-memory store; a deployment
//! swaps those for real collaborators at the same seams.

use clap::Parser;
use sixgun::chain::{HdKeyDerivation, SimLedger};
use sixgun::config::SixgunConfig;
use sixgun::events::EventBus;
use sixgun::profile::NullProfileService;
use sixgun::room::RoomManager;
use sixgun::settlement::SettlementEngine;
use sixgun::store::MemoryRoomStore;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "sixgun", about = "Provably-fair elimination wagering engine")]
struct Args {
    /// Path to a TOML configuration file.
    #[arg(long)]
    config: Option<PathBuf>,

    /// Hex root secret for seat key derivation. Generated when omitted.
    #[arg(long, env = "SIXGUN_ROOT_SECRET")]
    root_secret: Option<String>,

    /// Starting height of the simulated ledger.
    #[arg(long, default_value_t = 1)]
    sim_start_height: u64,

    /// Simulated block interval in milliseconds.
    #[arg(long, default_value_t = 2_000)]
    sim_block_interval_ms: u64,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .init();

    let args = Args::parse();
    let config = match &args.config {
        Some(path) => SixgunConfig::load(path)?,
        None => SixgunConfig::default(),
    };
    config.validate()?;

    let root_secret = args
        .root_secret
        .clone()
        .unwrap_or_else(sixgun::fairness::generate_server_seed);

    let ledger = Arc::new(SimLedger::new(args.sim_start_height));
    let keys = Arc::new(HdKeyDerivation::new(
        root_secret.into_bytes(),
        config.chain.network_prefix.clone(),
    ));
    let store = Arc::new(MemoryRoomStore::new());
    let events = Arc::new(EventBus::new());
    let settlement = Arc::new(SettlementEngine::new(
        ledger.clone(),
        keys.clone(),
        config.chain.clone(),
        config.settlement.clone(),
    ));
    let manager = Arc::new(RoomManager::new(
        config.clone(),
        store,
        ledger.clone(),
        keys,
        events.clone(),
        settlement,
        Arc::new(NullProfileService),
    ));

    info!("sixgun starting");

    // Crash recovery before anything else can touch the rooms.
    manager.recover_stale_rooms().await?;

    // Simulated block production.
    {
        let ledger = ledger.clone();
        let interval = std::time::Duration::from_millis(args.sim_block_interval_ms);
        tokio::spawn(async move {
            loop {
                tokio::time::sleep(interval).await;
                ledger.advance(1);
            }
        });
    }

    // Periodic expiry sweep.
    {
        let manager = manager.clone();
        let interval =
            std::time::Duration::from_secs(config.game.expiry_sweep_interval_secs.max(1));
        tokio::spawn(async move {
            loop {
                tokio::time::sleep(interval).await;
                if let Err(err) = manager.check_expired_rooms().await {
                    error!(error = %err, "expiry sweep failed");
                }
            }
        });
    }

    // Mirror every outbound event into the log until a transport is attached.
    {
        let mut global = events.subscribe_global();
        tokio::spawn(async move {
            while let Ok(event) = global.recv().await {
                match serde_json::to_string(&event) {
                    Ok(json) => info!(event = %json, "outbound event"),
                    Err(err) => error!(error = %err, "event serialization failed"),
                }
            }
        });
    }

    tokio::signal::ctrl_c().await?;
    info!("sixgun shutting down");
    Ok(())
}
