//! Periodic scan for positions open past `max_holding_hours`, with optional
//! auto emergency-close (spec §5, supplemented per SPEC_FULL §2).

use crate::config::Config;
use crate::domain::ports::ExchangeAdapter;
use crate::position_manager::PositionManager;
use chrono::{Duration as ChronoDuration, Utc};
use std::time::Duration;
use tracing::{error, warn};

const SCAN_INTERVAL: Duration = Duration::from_secs(600);

/// Runs forever, scanning every [`SCAN_INTERVAL`] for positions that have
/// outlived `config.max_holding_hours`. Each is logged as a warning; if
/// `config.auto_emergency_close` is set, it's force-closed at the current
/// ticker price.
pub async fn run_stuck_position_scan(position_manager: &PositionManager, exchange: &dyn ExchangeAdapter, config: &Config) {
    let mut interval = tokio::time::interval(SCAN_INTERVAL);
    loop {
        interval.tick().await;
        scan_once(position_manager, exchange, config).await;
    }
}

async fn scan_once(position_manager: &PositionManager, exchange: &dyn ExchangeAdapter, config: &Config) {
    let cutoff = Utc::now() - ChronoDuration::hours(config.max_holding_hours);
    let overdue = position_manager.find_overdue(cutoff).await;
    for mut position in overdue {
        warn!(market = %position.market, user = %position.user_id, "position has outlived the expected holding horizon");
        if !config.auto_emergency_close {
            continue;
        }
        let ticker = match exchange.ticker(std::slice::from_ref(&position.market)).await {
            Ok(t) => t,
            Err(e) => {
                error!(market = %position.market, error = %e, "could not fetch a price to emergency-close an overdue position");
                continue;
            }
        };
        let Some(price) = ticker.into_iter().find(|t| t.market == position.market).map(|t| t.trade_price) else {
            error!(market = %position.market, "ticker response had no quote for an overdue position");
            continue;
        };
        if let Err(e) = position_manager.emergency_close(&mut position, price, Utc::now()) {
            error!(market = %position.market, error = %e, "emergency-close failed");
            continue;
        }
        if let Err(e) = position_manager.save(&position).await {
            error!(market = %position.market, error = %e, "failed to persist an emergency-closed position");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{Candle, Position};
    use crate::infrastructure::in_memory::InMemoryPositionRepository;
    use crate::infrastructure::mock::MockExchangeAdapter;
    use rust_decimal_macros::dec;
    use std::sync::Arc;

    fn candle(price: rust_decimal::Decimal) -> Candle {
        let ts = Utc::now();
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
    async fn overdue_position_is_emergency_closed_when_enabled() {
        let positions = Arc::new(InMemoryPositionRepository::new());
        let mut config = Config::default();
        config.max_holding_hours = 6;
        config.auto_emergency_close = true;
        let position_manager = PositionManager::new(config.clone(), positions.clone());

        let mut position = Position::new_pending("u1", "KRW-BTC", "s");
        position.record_entry_fill(dec!(100), dec!(1), dec!(90), Utc::now() - ChronoDuration::hours(8)).unwrap();
        position.activate().unwrap();
        position_manager.save(&position).await.unwrap();

        let adapter = MockExchangeAdapter::new();
        adapter.seed_candles("KRW-BTC", vec![candle(dec!(102))]);

        scan_once(&position_manager, &adapter, &config).await;

        let reloaded = positions.find_active("u1", "KRW-BTC").await.unwrap();
        assert!(reloaded.is_none(), "an emergency-closed position is no longer ACTIVE");

    }
}
