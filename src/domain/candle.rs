use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Immutable snapshot of one minute/day bar for a single market.
///
/// `candle_at_kst` is the canonical ordering key (§2 GLOSSARY); `candle_at_utc`
/// is carried alongside for callers that need to reason in UTC without
/// re-deriving the offset.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Candle {
    pub market: String,
    pub candle_at_kst: DateTime<Utc>,
    pub candle_at_utc: DateTime<Utc>,
    pub opening_price: Decimal,
    pub high_price: Decimal,
    pub low_price: Decimal,
    pub trade_price: Decimal,
    pub candle_acc_trade_volume: Decimal,
    pub candle_acc_trade_price: Decimal,
    pub unit_minutes: u32,
}

impl Candle {
    pub fn close(&self) -> Decimal {
        self.trade_price
    }
}

/// Ordered sequence of candles for one (market, unit).
///
/// Ascending-by-KST-timestamp is the canonical storage order; strategies are
/// handed a *newest-first* view via [`CandleWindow::newest_first`], matching
/// both the live path and the backtest replay slice (spec §3).
#[derive(Debug, Clone, Default)]
pub struct CandleWindow {
    /// Ascending by `candle_at_kst`.
    ascending: Vec<Candle>,
}

impl CandleWindow {
    pub fn from_ascending(mut candles: Vec<Candle>) -> Self {
        candles.sort_by_key(|c| c.candle_at_kst);
        Self { ascending: candles }
    }

    pub fn len(&self) -> usize {
        self.ascending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ascending.is_empty()
    }

    pub fn ascending(&self) -> &[Candle] {
        &self.ascending
    }

    /// Newest-first view, the shape every strategy's `analyze`/
    /// `analyze_for_backtest` receives.
    pub fn newest_first(&self) -> Vec<Candle> {
        let mut v = self.ascending.clone();
        v.reverse();
        v
    }

    /// Closing prices, oldest-first, the shape the indicator library expects.
    pub fn closes(&self) -> Vec<Decimal> {
        self.ascending.iter().map(|c| c.trade_price).collect()
    }

    pub fn volumes(&self) -> Vec<Decimal> {
        self.ascending
            .iter()
            .map(|c| c.candle_acc_trade_volume)
            .collect()
    }

    /// A sub-window containing only the last `n` bars (oldest-first order
    /// preserved), the slicing backtests perform before handing a window to
    /// `analyze_for_backtest` to keep live/backtest semantics identical.
    pub fn tail(&self, n: usize) -> CandleWindow {
        let start = self.ascending.len().saturating_sub(n);
        CandleWindow {
            ascending: self.ascending[start..].to_vec(),
        }
    }

    pub fn last(&self) -> Option<&Candle> {
        self.ascending.last()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn candle(minute: i64, price: i64) -> Candle {
        let ts = Utc::now() + Duration::minutes(minute);
        Candle {
            market: "KRW-BTC".into(),
            candle_at_kst: ts,
            candle_at_utc: ts,
            opening_price: Decimal::from(price),
            high_price: Decimal::from(price),
            low_price: Decimal::from(price),
            trade_price: Decimal::from(price),
            candle_acc_trade_volume: Decimal::from(100),
            candle_acc_trade_price: Decimal::from(100 * price),
            unit_minutes: 1,
        }
    }

    #[test]
    fn ascending_sorts_by_kst() {
        let w = CandleWindow::from_ascending(vec![candle(2, 102), candle(1, 101), candle(3, 103)]);
        let closes: Vec<i64> = w
            .ascending()
            .iter()
            .map(|c| c.trade_price.try_into().unwrap())
            .collect();
        assert_eq!(closes, vec![101, 102, 103]);
    }

    #[test]
    fn newest_first_reverses_ascending() {
        let w = CandleWindow::from_ascending(vec![candle(1, 101), candle(2, 102)]);
        let nf = w.newest_first();
        assert_eq!(nf[0].trade_price, Decimal::from(102));
        assert_eq!(nf[1].trade_price, Decimal::from(101));
    }

    #[test]
    fn tail_keeps_oldest_first_order() {
        let w = CandleWindow::from_ascending(vec![candle(1, 1), candle(2, 2), candle(3, 3)]);
        let t = w.tail(2);
        assert_eq!(t.closes(), vec![Decimal::from(2), Decimal::from(3)]);
    }
}
