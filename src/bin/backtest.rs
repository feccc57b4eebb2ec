//! Ad-hoc and multi-market backtest CLI, the `benchmark.rs` analogue.

use anyhow::{Context, Result};
use chrono::{NaiveDate, TimeZone, Utc};
use clap::Parser;
use rust_decimal::Decimal;
use std::str::FromStr;
use tracing::info;
use tracing_subscriber::prelude::*;
use upbit_trader::backtest::{run_multi_market, run_single_market, MarketJob};
use upbit_trader::config::Config;
use upbit_trader::domain::repositories::CandleRepository;
use upbit_trader::domain::CandleWindow;
use upbit_trader::infrastructure::{SqliteCandleRepository, SqliteDatabase};
use upbit_trader::strategies::StrategyRegistry;

#[derive(Parser)]
#[command(author, version, about = "Offline backtest runner", long_about = None)]
struct Cli {
    /// Market(s) to backtest, comma separated (e.g. "KRW-BTC,KRW-ETH")
    #[arg(long, default_value = "KRW-BTC")]
    market: String,

    /// Start date, YYYYMMDD
    #[arg(long)]
    from: String,

    /// End date, YYYYMMDD
    #[arg(long)]
    to: String,

    /// Strategy names, comma separated (default: the full registered set)
    #[arg(long)]
    strategies: Option<String>,

    /// Starting KRW balance
    #[arg(long, default_value = "1000000")]
    initial_balance: String,
}

fn parse_ymd(s: &str) -> Result<chrono::DateTime<Utc>> {
    let date = NaiveDate::parse_from_str(s, "%Y%m%d").with_context(|| format!("expected YYYYMMDD, got {s}"))?;
    Ok(Utc.from_utc_datetime(&date.and_hms_opt(0, 0, 0).expect("midnight is always valid")))
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();

    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::from_default_env().add_directive(tracing::Level::INFO.into()))
        .with(tracing_subscriber::fmt::layer().with_target(false))
        .init();

    let cli = Cli::parse();
    let config = Config::from_env()?;

    let markets: Vec<String> = cli.market.split(',').map(|m| m.trim().to_string()).collect();
    let from = parse_ymd(&cli.from)?;
    let to = parse_ymd(&cli.to)?;
    let initial_balance = Decimal::from_str(&cli.initial_balance).context("initial-balance must be a decimal")?;

    let registry = StrategyRegistry::with_defaults();
    let strategies = match &cli.strategies {
        Some(names) => {
            let names: Vec<String> = names.split(',').map(|n| n.trim().to_string()).collect();
            registry.enabled(&names)
        }
        None => registry.all(),
    };
    if strategies.is_empty() {
        anyhow::bail!("no matching strategies; check --strategies against the registered names");
    }

    let db = SqliteDatabase::connect(&config.database_path).await?;
    let candles_repo = SqliteCandleRepository::new(db);

    if markets.len() == 1 {
        let raw = candles_repo.get_range(&markets[0], 1, from, to).await.context("loading candle range")?;
        let window = CandleWindow::from_ascending(raw);
        let result = run_single_market(&markets[0], &window, &strategies, &config, initial_balance);
        info!(
            market = %result.market,
            total_profit_rate = result.total_profit_rate,
            max_drawdown = result.max_drawdown,
            win_rate = result.win_rate,
            trades = result.trades.len(),
            "backtest complete"
        );
        println!("{}", serde_json::to_string_pretty(&result)?);
    } else {
        let mut windows = Vec::with_capacity(markets.len());
        for market in &markets {
            let raw = candles_repo.get_range(market, 1, from, to).await.context("loading candle range")?;
            windows.push(CandleWindow::from_ascending(raw));
        }
        let jobs: Vec<MarketJob<'_>> = markets
            .iter()
            .zip(windows.into_iter())
            .map(|(market, candles)| MarketJob { market: market.clone(), candles, strategies: strategies.clone() })
            .collect();
        let summary = run_multi_market(jobs, &config, initial_balance);
        info!(
            best = ?summary.best_market,
            worst = ?summary.worst_market,
            average_profit_rate = summary.average_profit_rate,
            "multi-market backtest complete"
        );
        println!("{}", serde_json::to_string_pretty(&summary)?);
    }

    Ok(())
}
