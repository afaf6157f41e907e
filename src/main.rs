mod api;
mod common;
mod config;
mod data;
mod execution;
mod monitoring;
mod strategies;

use anyhow::{Context, Result};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, Notify};
use tokio_util::sync::CancellationToken;
use api::QuerySurface;
use config::{Config, EnvConfig};
use data::chain::{ChainSource, EthersChainSource};
use data::decoder::EventDecoder;
use data::gamma_api::{GammaApiClient, MarketLookup};
use data::leaderboard::LeaderboardIngestion;
use data::watcher::{ChainWatcher, WatcherSettings};
use execution::backend::{ExecutionBackend, VaultBackend};
use execution::orchestrator::ExecutionOrchestrator;
use execution::outbox::SignalOutbox;
use execution::persistence::CopyTradeDatabase;
use execution::simulator::PaperTradingSimulator;
use execution::sizing::SizingPolicy;
use monitoring::logger::TradeJournal;
use strategies::tracked::{self, TrackedTraderSet};

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt::init();

    tracing::info!("🚀 Polymarket copy trader starting...");

    tracing::info!("Loading configuration...");
    let config = Config::load("config.toml")?;
    let env_config = EnvConfig::load()?;
    let dry_run = config.system.dry_run || env_config.dry_run;

    tracing::info!("Dry run mode: {}", dry_run);
    tracing::info!(
        "Tracking top {} traders above ${:.0} pnl, copying at {}x",
        config.tracking.top_traders_count,
        config.tracking.min_profit_threshold,
        config.execution.copy_trade_multiplier
    );

    tracing::info!("Initializing database: {}", config.system.database_path);
    if let Some(dir) = std::path::Path::new(&config.system.database_path).parent() {
        std::fs::create_dir_all(dir).with_context(|| format!("Failed to create {}", dir.display()))?;
    }
    let db = Arc::new(
        CopyTradeDatabase::new(&config.system.database_path).context("Failed to open ledger")?,
    );
    execution::persistence::recover_from_crash(&db).await?;

    let tracked = Arc::new(TrackedTraderSet::new());
    if let Err(e) = tracked::refresh_once(&tracked, &db, config.tracking.top_traders_count) {
        tracing::warn!("Initial tracked trader load failed: {}", e);
    }

    let leaderboard_refresh = Arc::new(Notify::new());
    let surface = QuerySurface::new(Arc::clone(&db), Arc::clone(&tracked), Arc::clone(&leaderboard_refresh));
    tracing::info!("Tracked traders: {}", surface.tracked_count());

    let backend: Arc<dyn ExecutionBackend> = if dry_run {
        Arc::new(PaperTradingSimulator::new(config.paper_trading.clone()))
    } else {
        let private_key = env_config
            .polygon_wallet_private_key
            .as_deref()
            .context("POLYGON_WALLET_PRIVATE_KEY is required for live trading")?;
        let vault = config
            .execution
            .vault_address
            .as_deref()
            .context("execution.vault_address is required for live trading")?;
        Arc::new(VaultBackend::new(
            &env_config.polygon_rpc_url,
            private_key,
            config.execution.chain_id,
            vault,
            Duration::from_secs(config.execution.confirm_timeout_secs),
        )?)
    };

    let journal = if config.monitoring.csv_logging {
        Some(TradeJournal::new(config.monitoring.csv_log_path.clone())?)
    } else {
        None
    };

    let markets: Arc<dyn MarketLookup> = Arc::new(GammaApiClient::new(
        env_config.polymarket_gamma_url.clone(),
        Duration::from_secs(config.monitoring.market_cache_ttl_secs),
    ));
    let orchestrator = Arc::new(ExecutionOrchestrator::new(
        Arc::clone(&db),
        backend,
        markets,
        SizingPolicy::new(config.execution.copy_trade_multiplier),
        journal,
    ));

    let source: Arc<dyn ChainSource> = Arc::new(
        EthersChainSource::connect(
            &env_config.polygon_ws_url,
            &[config.chain.ctf_exchange.clone(), config.chain.neg_risk_exchange.clone()],
            EventDecoder::new().topics(),
        )
        .await?,
    );

    let (signal_tx, signal_rx) = mpsc::channel(config.execution.queue_capacity);
    let watcher = Arc::new(ChainWatcher::new(
        source,
        Arc::clone(&tracked),
        SignalOutbox::new(Arc::clone(&db), signal_tx),
        WatcherSettings::from(&config.chain),
    ));

    let ingestion = Arc::new(LeaderboardIngestion::new(
        env_config.polymarket_data_url.clone(),
        &config.tracking,
        Arc::clone(&db),
        Arc::clone(&tracked),
    ));

    let shutdown = CancellationToken::new();
    let mut handles = Vec::new();

    {
        let watcher = Arc::clone(&watcher);
        let token = shutdown.clone();
        handles.push(tokio::spawn(async move {
            if let Err(e) = watcher.run_subscription(token.clone()).await {
                tracing::error!("🛑 Chain watcher stopped: {}", e);
                token.cancel();
            }
        }));
    }
    {
        let watcher = Arc::clone(&watcher);
        let token = shutdown.clone();
        handles.push(tokio::spawn(async move { watcher.run_backfill(token).await }));
    }
    handles.push(tokio::spawn(tracked::run_refresh_loop(
        Arc::clone(&tracked),
        Arc::clone(&db),
        config.tracking.top_traders_count,
        Duration::from_secs(config.tracking.refresh_interval_secs),
        shutdown.clone(),
    )));
    {
        let ingestion = Arc::clone(&ingestion);
        let refresh = Arc::clone(&leaderboard_refresh);
        let interval = Duration::from_secs(config.tracking.leaderboard_interval_secs);
        let token = shutdown.clone();
        handles.push(tokio::spawn(async move { ingestion.run(interval, refresh, token).await }));
    }
    {
        let orchestrator = Arc::clone(&orchestrator);
        let sweep = Duration::from_secs(config.execution.outbox_sweep_interval_secs);
        let token = shutdown.clone();
        handles.push(tokio::spawn(async move { orchestrator.run_worker(signal_rx, sweep, token).await }));
    }

    tracing::info!("✅ Copy trader running ({} tasks)", handles.len());

    tokio::select! {
        result = tokio::signal::ctrl_c() => {
            result.context("Failed to listen for ctrl-c")?;
            tracing::info!("Shutting down...");
        }
        _ = shutdown.cancelled() => {
            tracing::warn!("Fatal task failure, shutting down...");
        }
    }

    shutdown.cancel();
    for handle in handles {
        if let Err(e) = handle.await {
            tracing::error!("Task panicked during shutdown: {}", e);
        }
    }

    let open = surface.open_positions().map(|p| p.len()).unwrap_or_default();
    tracing::info!("Stopped with {} open positions", open);
    Ok(())
}
