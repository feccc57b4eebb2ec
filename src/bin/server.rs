//! Headless live-trading daemon entry point. See [`upbit_trader::daemon`]
//! for the wiring; this binary just sets up logging and calls it.

use anyhow::Result;
use tracing::Level;
use tracing_subscriber::prelude::*;

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();

    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::from_default_env().add_directive(Level::INFO.into()))
        .with(tracing_subscriber::fmt::layer().with_target(false))
        .init();

    upbit_trader::daemon::run().await
}
