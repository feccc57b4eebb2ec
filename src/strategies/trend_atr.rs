use super::{closes_f64, highs_f64, last_candle, lows_f64, require_window, Advisory, AdvisoryStore};
use crate::domain::{CandleWindow, ExitReason, Position, Signal, StrategyError};
use crate::indicators::{atr, sma};
use rust_decimal::prelude::{FromPrimitive, ToPrimitive};
use rust_decimal::Decimal;

const NAME: &str = "trend_atr";
const ATR_PERIOD: usize = 14;
const TREND_WINDOW: usize = 20;
const MIN_WINDOW: usize = 30;
const STOP_LOSS_ATR_MULTIPLIER: f64 = 1.5;
const TRAILING_ATR_MULTIPLIER: f64 = 2.0;

/// Trend-following breakout: buys when the close clears the trend-window
/// SMA by more than one ATR; exits on an ATR-scaled hard or trailing stop.
pub struct TrendAtrStrategy {
    advisories: AdvisoryStore,
}

impl TrendAtrStrategy {
    pub fn new() -> Self {
        Self { advisories: AdvisoryStore::new() }
    }

    fn evaluate(&self, market: &str, window: &CandleWindow, position: Option<&Position>) -> Result<Signal, StrategyError> {
        require_window(NAME, window, MIN_WINDOW)?;
        let closes = closes_f64(window);
        let highs = highs_f64(window);
        let lows = lows_f64(window);
        let current_atr = atr(&highs, &lows, &closes, ATR_PERIOD).ok_or_else(|| StrategyError::Internal {
            strategy: NAME.to_string(),
            reason: "atr returned None despite window check".to_string(),
        })?;
        let trend_mean = sma(&closes, TREND_WINDOW).ok_or_else(|| StrategyError::Internal {
            strategy: NAME.to_string(),
            reason: "sma returned None despite window check".to_string(),
        })?;
        let last = last_candle(window).ok_or_else(|| StrategyError::Internal {
            strategy: NAME.to_string(),
            reason: "empty window".to_string(),
        })?;
        let last_close_f64 = last.close().to_f64().unwrap_or(0.0);

        if let Some(position) = position {
            if position.is_closed() {
                self.advisories.clear(market);
                return Ok(Signal::hold());
            }
            let atr_decimal = Decimal::from_f64(current_atr).unwrap_or(Decimal::ZERO);
            let hard_stop = position.avg_entry_price - atr_decimal * Decimal::from_f64(STOP_LOSS_ATR_MULTIPLIER).unwrap_or(Decimal::ZERO);
            if last.close() <= hard_stop {
                return Ok(Signal::sell(ExitReason::StopLossAtr, "close fell through the ATR-scaled stop"));
            }
            let trailing_stop = position.highest_since_entry - atr_decimal * Decimal::from_f64(TRAILING_ATR_MULTIPLIER).unwrap_or(Decimal::ZERO);
            if position.trailing_stop_price.is_some() && last.close() <= trailing_stop {
                return Ok(Signal::sell(ExitReason::TrailingStop, "close fell through the ATR trailing stop"));
            }
            return Ok(Signal::hold());
        }

        if last_close_f64 > trend_mean + current_atr {
            let entry_price = last.close();
            let atr_decimal = Decimal::from_f64(current_atr).unwrap_or(Decimal::ZERO);
            let stop_loss_price = entry_price - atr_decimal * Decimal::from_f64(STOP_LOSS_ATR_MULTIPLIER).unwrap_or(Decimal::ZERO);
            self.advisories.set(market, Advisory {
                target_price: None,
                stop_loss_price: Some(stop_loss_price),
                entry_price: Some(entry_price),
            });
            return Ok(Signal::buy(entry_price, entry_price, stop_loss_price, "close broke above trend mean by more than one ATR"));
        }

        Ok(Signal::hold())
    }
}

impl super::Strategy for TrendAtrStrategy {
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
