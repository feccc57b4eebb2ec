use super::{closes_f64, last_candle, require_window, volumes_f64, Advisory, AdvisoryStore};
use crate::domain::{CandleWindow, ExitReason, Position, Signal, StrategyError};
use crate::indicators::{bollinger, sma};
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;

const NAME: &str = "bb_breakout";
const WINDOW: usize = 20;
const MIN_WINDOW: usize = 30;
const K: f64 = 2.0;
const VOLUME_SPIKE_MULTIPLIER: f64 = 1.5;
const TAKE_PROFIT_RATE: Decimal = dec!(0.05);
const STOP_LOSS_RATE: Decimal = dec!(-0.03);

/// Buys a breakout above the upper Bollinger band on a volume spike; exits
/// on take-profit, or falls back to the caller's stop-loss/trailing checks.
pub struct BollingerBreakoutStrategy {
    advisories: AdvisoryStore,
}

impl BollingerBreakoutStrategy {
    pub fn new() -> Self {
        Self { advisories: AdvisoryStore::new() }
    }

    fn evaluate(&self, market: &str, window: &CandleWindow, position: Option<&Position>) -> Result<Signal, StrategyError> {
        require_window(NAME, window, MIN_WINDOW)?;
        let closes = closes_f64(window);
        let volumes = volumes_f64(window);
        let bands = bollinger(&closes, WINDOW, K).ok_or_else(|| StrategyError::Internal {
            strategy: NAME.to_string(),
            reason: "bollinger returned None despite window check".to_string(),
        })?;
        let avg_volume = sma(&volumes, WINDOW).unwrap_or(0.0);
        let last = last_candle(window).ok_or_else(|| StrategyError::Internal {
            strategy: NAME.to_string(),
            reason: "empty window".to_string(),
        })?;
        let last_close = last.close().to_f64().unwrap_or(0.0);
        let last_volume = *volumes.last().unwrap_or(&0.0);

        if let Some(position) = position {
            if position.is_closed() {
                self.advisories.clear(market);
                return Ok(Signal::hold());
            }
            let entry = position.avg_entry_price;
            if entry.is_zero() {
                return Ok(Signal::hold());
            }
            let profit_rate = (last.close() - entry) / entry;
            if profit_rate >= TAKE_PROFIT_RATE {
                return Ok(Signal::sell(ExitReason::TakeProfit, "close reached take-profit target"));
            }
            return Ok(Signal::hold());
        }

        if last_close > bands.upper && last_volume > avg_volume * VOLUME_SPIKE_MULTIPLIER {
            let entry_price = last.close();
            let stop_loss_price = entry_price * (Decimal::ONE + STOP_LOSS_RATE);
            let target_price = entry_price * (Decimal::ONE + TAKE_PROFIT_RATE);
            self.advisories.set(market, Advisory {
                target_price: Some(target_price),
                stop_loss_price: Some(stop_loss_price),
                entry_price: Some(entry_price),
            });
            return Ok(Signal::buy(entry_price, target_price, stop_loss_price, "close broke above upper band on volume spike"));
        }

        Ok(Signal::hold())
    }
}

impl super::Strategy for BollingerBreakoutStrategy {
    fn name(&self) -> &str {
        NAME
    }

    fn min_window(&self) -> usize {
        MIN_WINDOW
    }

    fn analyze(&self, market: &str, window: &CandleWindow) -> Result<Signal, StrategyError> {
        self.evaluate(market, window, None)
    }

    fn analyze_for_backtest(
        &self,
        market: &str,
        window: &CandleWindow,
        position: Option<&Position>,
        _scratch: &super::AnalysisScratch,
    ) -> Result<Signal, StrategyError> {
        self.evaluate(market, window, position)
    }

    fn target_price(&self, market: &str) -> Option<Decimal> {
        self.advisories.get(market).target_price
    }

    fn stop_loss_price(&self, market: &str) -> Option<Decimal> {
        self.advisories.get(market).stop_loss_price
    }

    fn entry_price(&self, market: &str) -> Option<Decimal> {
        self.advisories.get(market).entry_price
    }

    fn clear_position(&self, market: &str) {
        self.advisories.clear(market);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::Candle;
    use crate::strategies::Strategy;
    use chrono::{Duration, Utc};

    fn candle(i: i64, close: f64, volume: f64) -> Candle {
        let ts = Utc::now() + Duration::minutes(i);
        let price = Decimal::from_f64_retain(close).unwrap();
        Candle {
            market: "KRW-BTC".into(),
            candle_at_kst: ts,
            candle_at_utc: ts,
            opening_price: price,
            high_price: price,
            low_price: price,
            trade_price: price,
            candle_acc_trade_volume: Decimal::from_f64_retain(volume).unwrap(),
            candle_acc_trade_price: price * Decimal::from_f64_retain(volume).unwrap(),
            unit_minutes: 1,
        }
    }

    fn seed_window() -> CandleWindow {
        let mut candles = Vec::new();
        for i in 0..40 {
            let jitter = if i % 2 == 0 { 0.5 } else { -0.5 };
            candles.push(candle(i, 100.0 + jitter, 10.0));
        }
        for i in 40..50 {
            let price = 100.0 + (i - 39) as f64;
            candles.push(candle(i, price, 20.0));
        }
        CandleWindow::from_ascending(candles)
    }

    #[test]
    fn buys_on_breakout_with_volume_spike() {
        let strategy = BollingerBreakoutStrategy::new();
        let window = seed_window();
        let signal = strategy.analyze("KRW-BTC", &window).unwrap();
        assert!(signal.is_buy(), "expected a buy signal, got {:?}", signal.kind);
    }

    #[test]
    fn sells_on_take_profit_once_position_is_active() {
        use rust_decimal_macros::dec;
        let strategy = BollingerBreakoutStrategy::new();
        let window = seed_window();
        let mut position = Position::new_pending("u1", "KRW-BTC", NAME);
        position.record_entry_fill(dec!(100), dec!(1), dec!(97), Utc::now()).unwrap();
        position.activate().unwrap();
        let tail = window.tail(MIN_WINDOW);
        let scratch = super::super::AnalysisScratch::default();
        let signal = strategy.analyze_for_backtest("KRW-BTC", &tail, Some(&position), &scratch).unwrap();
        assert!(signal.is_sell());
        assert_eq!(signal.exit_reason, Some(ExitReason::TakeProfit));
    }

    #[test]
    fn window_below_minimum_is_an_error_not_a_panic() {
        let strategy = BollingerBreakoutStrategy::new();
        let short = CandleWindow::from_ascending(vec![candle(0, 100.0, 10.0)]);
        assert!(strategy.analyze("KRW-BTC", &short).is_err());
    }
}
