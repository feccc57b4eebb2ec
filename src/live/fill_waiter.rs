//! Bounded-retry fill confirmation (spec §4.6, §5: "order-fill waits poll at
//! a fixed interval up to a retry cap").

use crate::config::Config;
use crate::domain::ports::{ExchangeAdapter, OrderHandle, OrderState};
use crate::domain::ExchangeError;
use std::time::Duration;
use tracing::warn;

/// Polls `get_order` at `config.order_check_interval_ms` up to
/// `config.order_check_max_retry` times. Returns the terminal handle once
/// the exchange reports `done`; on `cancel` or exhausted retries, cancels
/// the outstanding order (best-effort) and returns `Err`.
pub async fn await_fill(exchange: &dyn ExchangeAdapter, user_id: &str, uuid: &str, config: &Config) -> Result<OrderHandle, ExchangeError> {
    for attempt in 0..config.order_check_max_retry {
        let handle = exchange.get_order(user_id, uuid).await?;
        match handle.state {
            OrderState::Done => return Ok(handle),
            OrderState::Cancel => return Err(ExchangeError::Rejected(format!("order {uuid} was cancelled"))),
            OrderState::Wait | OrderState::Watch => {
                if attempt + 1 < config.order_check_max_retry {
                    tokio::time::sleep(Duration::from_millis(config.order_check_interval_ms)).await;
                }
            }
        }
    }

    warn!(uuid, "order did not reach a terminal state within the retry budget; cancelling");
    exchange.cancel_order(user_id, uuid).await?;
    Err(ExchangeError::Timeout(config.order_check_max_retry))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::Candle;
    use crate::infrastructure::mock::MockExchangeAdapter;
    use chrono::Utc;
    use rust_decimal_macros::dec;

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
    async fn mock_orders_fill_immediately() {
        let adapter = MockExchangeAdapter::new();
        adapter.seed_candles("KRW-BTC", vec![candle(dec!(100))]);
        let config = Config::default();
        let order = adapter.buy_market("u1", "KRW-BTC", dec!(1_000)).await.unwrap();
        let filled = await_fill(&adapter, "u1", &order.uuid, &config).await.unwrap();
        assert_eq!(filled.state, OrderState::Done);
    }
}
