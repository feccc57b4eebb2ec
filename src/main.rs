//! Thin alias for `bin/server.rs`: this crate carries no UI, so the default
//! binary runs the same headless daemon.

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
