//! One-shot manual invocation of the daily auto-tuner, the `optimize.rs`
//! analogue for operators who don't want to wait for the scheduled run.

use anyhow::Result;
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::prelude::*;
use upbit_trader::config::Config;
use upbit_trader::infrastructure::{SqliteDatabase, SqliteHourParamRepository, SqliteTradeStatRepository};
use upbit_trader::tuner::Tuner;

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();

    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::from_default_env().add_directive(tracing::Level::INFO.into()))
        .with(tracing_subscriber::fmt::layer().with_target(false))
        .init();

    let config = Config::from_env()?;
    let db = SqliteDatabase::connect(&config.database_path).await?;
    let trade_stats = Arc::new(SqliteTradeStatRepository::new(db.clone()));
    let hour_params = Arc::new(SqliteHourParamRepository::new(db));

    let tuner = Tuner::new(config, trade_stats, hour_params);
    let updated = tuner.tune_yesterday().await?;
    info!(hours_updated = updated, "manual tuner run complete");

    Ok(())
}
