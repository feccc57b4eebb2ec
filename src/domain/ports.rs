use crate::domain::candle::Candle;
use crate::domain::errors::ExchangeError;
use crate::domain::trade::OrderSide;
use async_trait::async_trait;
use rust_decimal::Decimal;

#[derive(Debug, Clone)]
pub struct MarketInfo {
    pub market: String,
    pub warning: Option<String>,
}

#[derive(Debug, Clone)]
pub struct Ticker {
    pub market: String,
    pub trade_price: Decimal,
}

#[derive(Debug, Clone, Default)]
pub struct Orderbook {
    pub bids: Vec<(Decimal, Decimal)>,
    pub asks: Vec<(Decimal, Decimal)>,
    pub total_bid_size: Decimal,
    pub total_ask_size: Decimal,
}

#[derive(Debug, Clone)]
pub struct Account {
    pub currency: String,
    pub balance: Decimal,
    pub locked: Decimal,
    pub avg_buy_price: Decimal,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OrderState {
    Wait,
    Watch,
    Done,
    Cancel,
}

#[derive(Debug, Clone)]
pub struct OrderHandle {
    pub uuid: String,
    pub state: OrderState,
    pub executed_volume: Decimal,
    pub executed_funds: Decimal,
}

/// The exchange capability set this crate depends on (spec §6). Concrete
/// HTTP/JWT wiring against the real Upbit API is out of scope; only the
/// trait and a test double ([`crate::infrastructure::mock::MockExchangeAdapter`])
/// live in this crate.
#[async_trait]
pub trait ExchangeAdapter: Send + Sync {
    async fn list_markets(&self) -> Result<Vec<MarketInfo>, ExchangeError>;
    async fn minute_candles(&self, market: &str, unit: u32, count: usize) -> Result<Vec<Candle>, ExchangeError>;
    async fn day_candles(&self, market: &str, count: usize) -> Result<Vec<Candle>, ExchangeError>;
    async fn ticker(&self, markets: &[String]) -> Result<Vec<Ticker>, ExchangeError>;
    async fn orderbook(&self, market: &str) -> Result<Orderbook, ExchangeError>;
    async fn accounts(&self, user_id: &str) -> Result<Vec<Account>, ExchangeError>;
    async fn buy_market(&self, user_id: &str, market: &str, krw_amount: Decimal) -> Result<OrderHandle, ExchangeError>;
    async fn sell_market(&self, user_id: &str, market: &str, volume: Decimal) -> Result<OrderHandle, ExchangeError>;
    async fn buy_limit(&self, user_id: &str, market: &str, volume: Decimal, price: Decimal) -> Result<OrderHandle, ExchangeError>;
    async fn sell_limit(&self, user_id: &str, market: &str, volume: Decimal, price: Decimal) -> Result<OrderHandle, ExchangeError>;
    async fn get_order(&self, user_id: &str, uuid: &str) -> Result<OrderHandle, ExchangeError>;
    async fn cancel_order(&self, user_id: &str, uuid: &str) -> Result<(), ExchangeError>;
}

/// Order side re-export at the port boundary, so adapter implementations
/// don't need to reach into `domain::trade` for it.
pub type Side = OrderSide;

/// Upbit's ten-step price-tick ladder (spec §6). Rounds `price` down to the
/// nearest valid tick for its band.
pub fn round_down_to_tick(price: Decimal) -> Decimal {
    let tick = tick_size(price);
    if tick.is_zero() {
        return price;
    }
    (price / tick).floor() * tick
}

pub fn tick_size(price: Decimal) -> Decimal {
    use rust_decimal_macros::dec;
    if price >= dec!(2_000_000) {
        dec!(1_000)
    } else if price >= dec!(1_000_000) {
        dec!(500)
    } else if price >= dec!(500_000) {
        dec!(100)
    } else if price >= dec!(100_000) {
        dec!(50)
    } else if price >= dec!(10_000) {
        dec!(10)
    } else if price >= dec!(1_000) {
        dec!(5)
    } else if price >= dec!(100) {
        dec!(1)
    } else if price >= dec!(10) {
        dec!(0.1)
    } else if price >= dec!(1) {
        dec!(0.01)
    } else {
        dec!(0.001)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn tick_adjusted_price_never_exceeds_requested() {
        let cases = [
            dec!(2_345_678),
            dec!(1_234_567),
            dec!(543_210),
            dec!(123_456),
            dec!(12_345),
            dec!(1_234),
            dec!(123),
            dec!(12.3),
            dec!(1.23),
            dec!(0.1234),
        ];
        for price in cases {
            let adjusted = round_down_to_tick(price);
            assert!(adjusted <= price, "{adjusted} should be <= {price}");
            let tick = tick_size(price);
            let ratio = adjusted / tick;
            assert_eq!(ratio.fract(), Decimal::ZERO, "{adjusted} / {tick} must be an integer");
        }
    }
}
