//! Test double for [`crate::domain::ports::ExchangeAdapter`]. Concrete
//! HTTP/JWT wiring against the real exchange is out of scope for this crate.

use crate::domain::ports::{Account, ExchangeAdapter, MarketInfo, OrderHandle, OrderState, Orderbook, Ticker};
use crate::domain::{Candle, ExchangeError};
use async_trait::async_trait;
use chrono::Utc;
use rust_decimal::Decimal;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;

/// Deterministic in-memory exchange: candles and accounts are seeded ahead
/// of time; orders fill immediately at the requested price/volume.
pub struct MockExchangeAdapter {
    candles: Mutex<std::collections::HashMap<String, Vec<Candle>>>,
    accounts: Mutex<std::collections::HashMap<String, Vec<Account>>>,
    orders: Mutex<std::collections::HashMap<String, OrderHandle>>,
    next_order_id: AtomicU64,
}

impl MockExchangeAdapter {
    pub fn new() -> Self {
        Self {
            candles: Mutex::new(std::collections::HashMap::new()),
            accounts: Mutex::new(std::collections::HashMap::new()),
            orders: Mutex::new(std::collections::HashMap::new()),
            next_order_id: AtomicU64::new(1),
        }
    }

    pub fn seed_candles(&self, market: &str, candles: Vec<Candle>) {
        self.candles.lock().unwrap().insert(market.to_string(), candles);
    }

    pub fn seed_account(&self, user_id: &str, accounts: Vec<Account>) {
        self.accounts.lock().unwrap().insert(user_id.to_string(), accounts);
    }

    fn next_uuid(&self) -> String {
        let id = self.next_order_id.fetch_add(1, Ordering::SeqCst);
        format!("mock-order-{id}")
    }
}

impl Default for MockExchangeAdapter {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ExchangeAdapter for MockExchangeAdapter {
    async fn list_markets(&self) -> Result<Vec<MarketInfo>, ExchangeError> {
        Ok(self
            .candles
            .lock()
            .unwrap()
            .keys()
            .map(|market| MarketInfo { market: market.clone(), warning: None })
            .collect())
    }

    async fn minute_candles(&self, market: &str, _unit: u32, count: usize) -> Result<Vec<Candle>, ExchangeError> {
        let candles = self.candles.lock().unwrap();
        let Some(series) = candles.get(market) else {
            return Ok(Vec::new());
        };
        let mut newest_first: Vec<Candle> = series.iter().rev().take(count).cloned().collect();
        newest_first.truncate(count);
        Ok(newest_first)
    }

    async fn day_candles(&self, market: &str, count: usize) -> Result<Vec<Candle>, ExchangeError> {
        self.minute_candles(market, 1440, count).await
    }

    async fn ticker(&self, markets: &[String]) -> Result<Vec<Ticker>, ExchangeError> {
        let candles = self.candles.lock().unwrap();
        Ok(markets
            .iter()
            .filter_map(|m| candles.get(m).and_then(|series| series.last()).map(|c| Ticker { market: m.clone(), trade_price: c.close() }))
            .collect())
    }

    async fn orderbook(&self, _market: &str) -> Result<Orderbook, ExchangeError> {
        Ok(Orderbook::default())
    }

    async fn accounts(&self, user_id: &str) -> Result<Vec<Account>, ExchangeError> {
        Ok(self.accounts.lock().unwrap().get(user_id).cloned().unwrap_or_default())
    }

    async fn buy_market(&self, _user_id: &str, market: &str, krw_amount: Decimal) -> Result<OrderHandle, ExchangeError> {
        let price = self.last_price(market)?;
        let volume = if price.is_zero() { Decimal::ZERO } else { krw_amount / price };
        self.fill(krw_amount, volume)
    }

    async fn sell_market(&self, _user_id: &str, market: &str, volume: Decimal) -> Result<OrderHandle, ExchangeError> {
        let price = self.last_price(market)?;
        self.fill(price * volume, volume)
    }

    async fn buy_limit(&self, _user_id: &str, _market: &str, volume: Decimal, price: Decimal) -> Result<OrderHandle, ExchangeError> {
        self.fill(price * volume, volume)
    }

    async fn sell_limit(&self, _user_id: &str, _market: &str, volume: Decimal, price: Decimal) -> Result<OrderHandle, ExchangeError> {
        self.fill(price * volume, volume)
    }

    async fn get_order(&self, _user_id: &str, uuid: &str) -> Result<OrderHandle, ExchangeError> {
        self.orders
            .lock()
            .unwrap()
            .get(uuid)
            .cloned()
            .ok_or_else(|| ExchangeError::MalformedResponse(format!("unknown order {uuid}")))
    }

    async fn cancel_order(&self, _user_id: &str, uuid: &str) -> Result<(), ExchangeError> {
        if let Some(order) = self.orders.lock().unwrap().get_mut(uuid) {
            order.state = OrderState::Cancel;
        }
        Ok(())
    }
}

impl MockExchangeAdapter {
    fn last_price(&self, market: &str) -> Result<Decimal, ExchangeError> {
        self.candles
            .lock()
            .unwrap()
            .get(market)
            .and_then(|series| series.last())
            .map(|c| c.close())
            .ok_or_else(|| ExchangeError::MalformedResponse(format!("no seeded candles for {market}")))
    }

    fn fill(&self, funds: Decimal, volume: Decimal) -> Result<OrderHandle, ExchangeError> {
        let uuid = self.next_uuid();
        let handle = OrderHandle { uuid: uuid.clone(), state: OrderState::Done, executed_volume: volume, executed_funds: funds };
        self.orders.lock().unwrap().insert(uuid, handle.clone());
        Ok(handle)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn candle(price: Decimal) -> Candle {
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
    async fn buy_market_fills_immediately_at_last_seeded_price() {
        let adapter = MockExchangeAdapter::new();
        adapter.seed_candles("KRW-BTC", vec![candle(dec!(100))]);
        let handle = adapter.buy_market("u1", "KRW-BTC", dec!(1000)).await.unwrap();
        assert_eq!(handle.state, OrderState::Done);
        assert_eq!(handle.executed_volume, dec!(10));
    }

    #[tokio::test]
    async fn get_order_round_trips_a_filled_order() {
        let adapter = MockExchangeAdapter::new();
        adapter.seed_candles("KRW-BTC", vec![candle(dec!(100))]);
        let handle = adapter.buy_market("u1", "KRW-BTC", dec!(1000)).await.unwrap();
        let fetched = adapter.get_order("u1", &handle.uuid).await.unwrap();
        assert_eq!(fetched.uuid, handle.uuid);
    }
}
