//! The headless live-trading daemon body: scheduler, auto-tuner, simulation
//! supervisor, and the stuck-position scan, wired together. Shared by
//! `src/main.rs` and `src/bin/server.rs` (spec SPEC_FULL §0: "`main.rs` is a
//! thin alias that runs the same thing as `server.rs`").
//!
//! # Environment
//! - `LIVE_USER_ID` - single operator account id to watch (default "default-user")
//! - `LIVE_MARKETS` - comma-separated markets to watch (default "KRW-BTC")

use crate::config::Config;
use crate::infrastructure::{
    MockExchangeAdapter, SqliteDatabase, SqliteHourParamRepository, SqlitePositionRepository, SqliteSimulationTaskRepository,
    SqliteTradeRecordRepository, SqliteTradeStatRepository,
};
use crate::live::{run_scheduler, run_stuck_position_scan, TradingLoop, UserWatch};
use crate::position_manager::PositionManager;
use crate::strategies::{Strategy, StrategyRegistry};
use crate::supervisor::SimulationSupervisor;
use crate::tuner::Tuner;
use anyhow::Result;
use std::sync::Arc;
use tracing::info;

pub async fn run() -> Result<()> {
    info!("upbit-trader {} starting", env!("CARGO_PKG_VERSION"));

    let config = Config::from_env()?;
    let db = SqliteDatabase::connect(&config.database_path).await?;

    let positions = Arc::new(SqlitePositionRepository::new(db.clone()));
    let trade_records = Arc::new(SqliteTradeRecordRepository::new(db.clone()));
    let trade_stats = Arc::new(SqliteTradeStatRepository::new(db.clone()));
    let hour_params = Arc::new(SqliteHourParamRepository::new(db.clone()));
    let simulation_tasks = Arc::new(SqliteSimulationTaskRepository::new(db.clone()));

    // Real Upbit HTTP/JWT wiring is out of scope for this crate (spec §1); a
    // deployment wires its own `ExchangeAdapter` in here.
    let exchange = Arc::new(MockExchangeAdapter::new());

    let _supervisor = SimulationSupervisor::new(config.process_instance_id.clone(), simulation_tasks).await?;
    info!("simulation supervisor ready; stuck RUNNING tasks reclaimed");

    let tuner = Tuner::new(config.clone(), trade_stats.clone(), hour_params.clone());
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(std::time::Duration::from_secs(24 * 60 * 60));
        loop {
            interval.tick().await;
            if let Err(e) = tuner.tune_yesterday().await {
                tracing::error!(error = %e, "daily tuner run failed");
            }
        }
    });

    let position_manager = PositionManager::new(config.clone(), positions.clone());
    tokio::spawn({
        let exchange = exchange.clone();
        let config = config.clone();
        async move {
            run_stuck_position_scan(&position_manager, exchange.as_ref(), &config).await;
        }
    });

    let registry = StrategyRegistry::with_defaults();
    let strategies: Vec<&dyn Strategy> = registry.all();

    let user_id = std::env::var("LIVE_USER_ID").unwrap_or_else(|_| "default-user".to_string());
    let markets: Vec<String> = std::env::var("LIVE_MARKETS")
        .unwrap_or_else(|_| "KRW-BTC".to_string())
        .split(',')
        .map(|m| m.trim().to_string())
        .collect();
    let watches = vec![UserWatch { user_id, markets }];

    let trading_loop = TradingLoop::new(config.clone(), exchange, positions, trade_records, trade_stats, hour_params);

    info!("entering the live scheduler loop; press Ctrl+C to shut down");
    tokio::select! {
        _ = run_scheduler(&trading_loop, &config, &watches, &strategies) => {}
        _ = tokio::signal::ctrl_c() => {
            info!("shutdown signal received");
        }
    }

    Ok(())
}
