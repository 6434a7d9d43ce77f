//! Wheelhouse server binary: wire the ledger, round scheduler, and API
//! server together from configuration and run until shutdown.

use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::info;
use wheelhouse::api::{ApiServer, AppState, ConnectionGateway, StaticTokenValidator};
use wheelhouse::bus::BroadcastBus;
use wheelhouse::config::{EngineConfig, SettingsProvider, StaticSettingsProvider};
use wheelhouse::engine::{Clock, RoundScheduler, SettlementEngine, TokioClock, UniformDrawer};
use wheelhouse::ledger::types::Account;
use wheelhouse::ledger::{BetLedger, LedgerStore, MemoryLedger};

#[derive(Parser, Debug)]
#[command(name = "wheelhouse", about = "Real-time wagering-round engine")]
struct Args {
    /// Path to a TOML configuration file.
    #[arg(long)]
    config: Option<PathBuf>,

    /// Override the configured listen port.
    #[arg(long)]
    port: Option<u16>,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "wheelhouse=info,tower_http=info".into()),
        )
        .init();

    let args = Args::parse();
    let mut config = EngineConfig::load(args.config.as_deref())?;
    if let Some(port) = args.port {
        config.server.port = port;
    }

    info!(
        round_duration = config.game.round_duration_secs,
        options = config.game.outcome_options.len(),
        "starting wheelhouse engine"
    );

    let store: Arc<dyn LedgerStore> = Arc::new(MemoryLedger::new());
    seed_accounts(&*store, &config).await?;

    let settings: Arc<dyn SettingsProvider> =
        Arc::new(StaticSettingsProvider::new(config.game.clone()));
    let clock: Arc<dyn Clock> = Arc::new(TokioClock);
    let bus = Arc::new(BroadcastBus::default());

    let settlement = Arc::new(SettlementEngine::new(
        store.clone(),
        Arc::new(UniformDrawer),
        clock.clone(),
    ));
    let scheduler = Arc::new(RoundScheduler::new(
        store.clone(),
        settings.clone(),
        settlement,
        bus.clone(),
        clock,
    ));
    scheduler.spawn();

    let bets = Arc::new(BetLedger::new(store.clone(), settings));
    let gateway = Arc::new(ConnectionGateway::new(
        bets,
        Duration::from_millis(config.gateway.min_bet_interval_ms),
        config.gateway.idempotency_cache_size,
    ));
    let validator = Arc::new(StaticTokenValidator::from_config(&config.auth));

    let state = Arc::new(AppState {
        gateway,
        bus,
        validator,
    });
    ApiServer::new(config.server.clone(), state).run().await
}

/// Seed an account for every configured identity; the external account
/// system owns registration in a full deployment.
async fn seed_accounts(
    store: &dyn LedgerStore,
    config: &EngineConfig,
) -> Result<(), Box<dyn std::error::Error>> {
    for identity in config.auth.tokens.values() {
        store
            .upsert_account(Account {
                id: identity.subject_id.clone(),
                balance: config.auth.starting_balance,
                role: identity.role,
            })
            .await?;
    }
    info!(accounts = config.auth.tokens.len(), "seeded accounts");
    Ok(())
}
