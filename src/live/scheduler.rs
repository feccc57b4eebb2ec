//! Periodic driver across enabled users (spec §4.6, §5: "the live loop is
//! driven by a periodic scheduler; each tick processes enabled users
//! sequentially per tick").

use crate::config::Config;
use crate::live::trading_loop::TradingLoop;
use crate::strategies::Strategy;
use std::time::Duration;
use tracing::{error, info};

/// One user's watchlist: which markets to tick this user against.
pub struct UserWatch {
    pub user_id: String,
    pub markets: Vec<String>,
}

/// Runs a single scheduler tick across every watch, in order. A per-market
/// failure is logged and does not abort the rest of the tick (spec §7: "live
/// loop never aborts the whole tick on a per-market failure").
pub async fn run_one_tick(trading_loop: &TradingLoop, watches: &[UserWatch], strategies: &[&dyn Strategy]) {
    for watch in watches {
        for market in &watch.markets {
            if let Err(e) = trading_loop.tick(&watch.user_id, market, strategies).await {
                error!(user = %watch.user_id, market, error = %e, "tick failed; continuing with the next market");
            }
        }
    }
    info!(users = watches.len(), "completed a scheduler tick");
}

/// Drives [`run_one_tick`] on a fixed interval (`config.live_tick_seconds`)
/// until the process is shut down. A no-op tick when `config.trading_enabled`
/// is false, so the gate can be flipped without restarting the process.
pub async fn run_scheduler(trading_loop: &TradingLoop, config: &Config, watches: &[UserWatch], strategies: &[&dyn Strategy]) {
    let mut interval = tokio::time::interval(Duration::from_secs(config.live_tick_seconds.max(1)));
    loop {
        interval.tick().await;
        if !config.trading_enabled {
            continue;
        }
        run_one_tick(trading_loop, watches, strategies).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::ports::Account;
    use crate::domain::Candle;
    use crate::infrastructure::in_memory::{InMemoryHourParamRepository, InMemoryPositionRepository, InMemoryTradeRecordRepository, InMemoryTradeStatRepository};
    use crate::infrastructure::mock::MockExchangeAdapter;
    use crate::strategies::BollingerBreakoutStrategy;
    use chrono::{Duration as ChronoDuration, Utc};
    use rust_decimal::Decimal;
    use rust_decimal_macros::dec;
    use std::sync::Arc;

    fn candle(ts_offset: i64, price: f64) -> Candle {
        let ts = Utc::now() + ChronoDuration::minutes(ts_offset);
        let price = Decimal::try_from(price).unwrap();
        Candle {
            market: "KRW-BTC".into(),
            candle_at_kst: ts,
            candle_at_utc: ts,
            opening_price: price,
            high_price: price,
            low_price: price,
            trade_price: price,
            candle_acc_trade_volume: dec!(10),
            candle_acc_trade_price: price * dec!(10),
            unit_minutes: 1,
        }
    }

    #[tokio::test]
    async fn one_tick_covers_every_watched_market_without_panicking() {
        let adapter = Arc::new(MockExchangeAdapter::new());
        let candles: Vec<Candle> = (0..40).map(|i| candle(i, 100.0)).collect();
        adapter.seed_candles("KRW-BTC", candles.clone());
        adapter.seed_candles("KRW-ETH", candles);
        adapter.seed_account("u1", vec![Account { currency: "KRW".into(), balance: dec!(1_000_000), locked: Decimal::ZERO, avg_buy_price: Decimal::ZERO }]);

        let trading_loop = TradingLoop::new(
            Config::default(),
            adapter,
            Arc::new(InMemoryPositionRepository::new()),
            Arc::new(InMemoryTradeRecordRepository::new()),
            Arc::new(InMemoryTradeStatRepository::new()),
            Arc::new(InMemoryHourParamRepository::new()),
        );
        let strategy = BollingerBreakoutStrategy::new();
        let strategies: Vec<&dyn Strategy> = vec![&strategy];
        let watches = vec![UserWatch { user_id: "u1".into(), markets: vec!["KRW-BTC".into(), "KRW-ETH".into()] }];

        run_one_tick(&trading_loop, &watches, &strategies).await;
    }
}
