//! Bounded-worker-pool fan-out across markets (spec §4.7, seed scenario 6).

use super::executor::run_single_market;
use super::report::{BacktestResult, MultiMarketSummary};
use crate::config::Config;
use crate::domain::CandleWindow;
use crate::strategies::Strategy;
use rayon::prelude::*;
use rust_decimal::Decimal;
use tracing::warn;

/// One market's input to a multi-market run.
pub struct MarketJob<'a> {
    pub market: String,
    pub candles: CandleWindow,
    pub strategies: Vec<&'a dyn Strategy>,
}

/// Runs `jobs` across a thread pool sized by `config.backtest_worker_core`..
/// `config.backtest_worker_max`, each market replayed independently against
/// the same `initial_balance`, then folded into a [`MultiMarketSummary`].
///
/// Rayon pools don't distinguish core/max like a tokio runtime would; we size
/// the pool to `backtest_worker_max` and treat `backtest_worker_core` as the
/// documented floor a deployment is expected to provision.
pub fn run_multi_market(jobs: Vec<MarketJob<'_>>, config: &Config, initial_balance: Decimal) -> MultiMarketSummary {
    if jobs.len() > config.backtest_queue {
        warn!(queued = jobs.len(), capacity = config.backtest_queue, "multi-market run exceeds configured queue depth; running anyway");
    }

    let pool = rayon::ThreadPoolBuilder::new()
        .num_threads(config.backtest_worker_max.max(1))
        .build();

    let results: Vec<BacktestResult> = match pool {
        Ok(pool) => pool.install(|| run_all(&jobs, config, initial_balance)),
        Err(e) => {
            warn!(error = %e, "failed to build bounded thread pool; falling back to the global rayon pool");
            run_all(&jobs, config, initial_balance)
        }
    };

    MultiMarketSummary::from_results(results)
}

fn run_all(jobs: &[MarketJob<'_>], config: &Config, initial_balance: Decimal) -> Vec<BacktestResult> {
    jobs.par_iter()
        .map(|job| run_single_market(&job.market, &job.candles, &job.strategies, config, initial_balance))
        .collect()
}
