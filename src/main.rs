mod candle_manager;
mod config;
mod error;
mod events;
mod exchange;
mod execution;
mod indicators;
mod orchestrator;
mod persistence;
mod state_machine;
mod strategy;
mod types;
mod watch;

use std::sync::Arc;
use std::time::Duration as StdDuration;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use candle_manager::CandleManager;
use config::load_settings;
use exchange::{Exchange, PaperExchange, PrivateEvent};
use execution::{InvalidationMonitor, OrderManager, PositionTracker, SlManager, TrailingManager};
use orchestrator::Orchestrator;
use persistence::{Persistence, SledPersistence};
use state_machine::StateMachine;
use strategy::StrategyEngine;
use watch::WatchManager;

#[derive(Parser)]
#[command(name = "trade-core")]
#[command(author = "Trading Bot")]
#[command(version = "0.1.0")]
#[command(about = "Decision and execution core for an automated derivatives trading assistant", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Configuration file path
    #[arg(short, long, default_value = "config.toml")]
    config: String,

    /// Enable verbose (debug) logging
    #[arg(short, long)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the decision and execution core
    Run,
    /// Load and validate the configuration file, then exit
    ValidateConfig,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    match cli.command {
        Commands::ValidateConfig => {
            let settings = load_settings(&cli.config).context("loading configuration")?;
            info!(symbols = settings.symbols.len(), "configuration is valid");
            Ok(())
        }
        Commands::Run => run(&cli.config).await,
    }
}

fn init_tracing(verbose: bool) {
    let default_filter = if verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .init();
}

async fn run(config_path: &str) -> Result<()> {
    let settings = load_settings(config_path).context("loading configuration")?;
    info!(symbols = settings.symbols.len(), "trade_core starting up");

    let events = events::EventBus::default();
    let persistence: Arc<dyn Persistence> =
        Arc::new(SledPersistence::open("./trade_core.db").context("opening persistence store")?);
    let (exchange_impl, mut private_stream) = PaperExchange::new();
    let exchange: Arc<dyn Exchange> = Arc::new(exchange_impl);

    let candle_manager = Arc::new(CandleManager::new(
        Arc::clone(&exchange),
        Arc::clone(&persistence),
        events.clone(),
        settings.general.clone(),
    ));
    let strategy_engine = Arc::new(StrategyEngine::new(
        settings.symbols.clone(),
        events.clone(),
        Arc::clone(&persistence),
    ));
    let state_machine = Arc::new(StateMachine::new(settings.general.anti_rage_lock_duration_secs));
    let order_manager = Arc::new(OrderManager::new(Arc::clone(&exchange), Arc::clone(&persistence), events.clone()));
    let position_tracker = Arc::new(PositionTracker::new(Arc::clone(&exchange), events.clone()));
    let sl_manager = Arc::new(SlManager::new(events.clone()));
    let trailing = Arc::new(TrailingManager::new(events.clone()));
    let invalidation = Arc::new(InvalidationMonitor::new(
        Arc::clone(&order_manager),
        Arc::clone(&position_tracker),
        Arc::clone(&state_machine),
        events.clone(),
    ));
    let watch_manager = Arc::new(WatchManager::new(events.clone(), settings.general.watch_retention_secs));

    let orchestrator = Arc::new(Orchestrator::new(
        Arc::clone(&state_machine),
        Arc::clone(&order_manager),
        Arc::clone(&position_tracker),
        Arc::clone(&sl_manager),
        Arc::clone(&trailing),
        Arc::clone(&invalidation),
        Arc::clone(&watch_manager),
        Arc::clone(&candle_manager),
        Arc::clone(&persistence),
        events.clone(),
        settings.clone(),
    ));

    orchestrator.restore().await.context("restoring open trades on startup")?;

    for (symbol, cfg) in &settings.symbols {
        if let Err(e) = candle_manager.backfill(symbol, cfg.timeframe).await {
            warn!(symbol, error = %e, "initial backfill failed, will retry on the poll loop");
        }
    }

    let orchestrator_loop = tokio::spawn(Arc::clone(&orchestrator).run());

    let private_stream_handle = {
        let order_manager = Arc::clone(&order_manager);
        let position_tracker = Arc::clone(&position_tracker);
        tokio::spawn(async move {
            loop {
                match private_stream.next_event().await {
                    Ok(PrivateEvent::Position(snapshot)) => {
                        position_tracker.on_stream_frame(snapshot).await;
                    }
                    Ok(event) => {
                        if let Err(e) = order_manager.on_private_event(event).await {
                            warn!(error = %e, "failed to apply private stream event");
                        }
                    }
                    Err(e) => {
                        warn!(error = %e, "private stream closed, no more position/order updates will arrive");
                        break;
                    }
                }
            }
        })
    };

    // No real-time kline stream is wired up (the exchange WebSocket client is
    // an external collaborator, spec 1); this polls the latest kline on a
    // short interval instead, which is enough to exercise the full
    // candle -> strategy -> orchestrator pipeline end to end.
    let candle_poll_handle = {
        let exchange = Arc::clone(&exchange);
        let candle_manager = Arc::clone(&candle_manager);
        let strategy_engine = Arc::clone(&strategy_engine);
        let symbols: Vec<(String, types::Timeframe)> = settings
            .symbols
            .iter()
            .map(|(symbol, cfg)| (symbol.clone(), cfg.timeframe))
            .collect();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(StdDuration::from_secs(10));
            loop {
                ticker.tick().await;
                for (symbol, timeframe) in &symbols {
                    let latest = match exchange.get_klines(symbol, *timeframe, 1, None).await {
                        Ok(mut candles) => candles.pop(),
                        Err(e) => {
                            warn!(symbol, error = %e, "poll for latest candle failed");
                            continue;
                        }
                    };
                    let Some(candle) = latest else { continue };
                    match candle_manager.ingest(candle).await {
                        Ok(Some(closed)) => {
                            let history = candle_manager.snapshot(symbol, *timeframe).await;
                            if let Err(e) = strategy_engine.on_candle_close(&closed, &history).await {
                                warn!(symbol, error = %e, "strategy engine rejected candle close");
                            }
                        }
                        Ok(None) => {}
                        Err(e) => warn!(symbol, error = %e, "candle ingest failed"),
                    }
                }
            }
        })
    };

    let housekeeping_handle = {
        let candle_manager = Arc::clone(&candle_manager);
        let watch_manager = Arc::clone(&watch_manager);
        let flush_interval = settings.general.candle_flush_interval_secs.max(1);
        let watch_interval = settings.general.watch_expiry_check_interval_secs.max(1);
        tokio::spawn(async move {
            let mut flush_ticker = tokio::time::interval(StdDuration::from_secs(flush_interval));
            let mut watch_ticker = tokio::time::interval(StdDuration::from_secs(watch_interval));
            loop {
                tokio::select! {
                    _ = flush_ticker.tick() => {
                        if let Err(e) = candle_manager.flush_all().await {
                            warn!(error = %e, "candle flush failed");
                        }
                    }
                    _ = watch_ticker.tick() => {
                        let now = chrono::Utc::now();
                        watch_manager.expire_due(now).await;
                        watch_manager.cleanup(now).await;
                    }
                }
            }
        })
    };

    info!("trade_core is running, press Ctrl+C to stop");
    tokio::signal::ctrl_c().await.context("waiting for shutdown signal")?;
    info!("shutdown signal received, flushing state");

    orchestrator_loop.abort();
    private_stream_handle.abort();
    candle_poll_handle.abort();
    housekeeping_handle.abort();

    if let Err(e) = candle_manager.flush_all().await {
        error!(error = %e, "final candle flush failed");
    }

    Ok(())
}
