use super::{closes_f64, last_candle, require_window, Advisory, AdvisoryStore};
use crate::domain::{CandleWindow, ExitReason, Position, Signal, StrategyError};
use crate::indicators::rsi;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;

const NAME: &str = "rsi_reversal";
const RSI_PERIOD: usize = 14;
const MIN_WINDOW: usize = 30;
const OVERSOLD: f64 = 30.0;
const OVERBOUGHT: f64 = 70.0;
const STOP_LOSS_RATE: Decimal = dec!(-0.03);

/// Buys an oversold reversal (RSI crossing back above 30 from below), exits
/// when RSI enters overbought territory.
pub struct RsiReversalStrategy {
    advisories: AdvisoryStore,
}

impl RsiReversalStrategy {
    pub fn new() -> Self {
        Self { advisories: AdvisoryStore::new() }
    }

    fn evaluate(&self, market: &str, window: &CandleWindow, position: Option<&Position>) -> Result<Signal, StrategyError> {
        require_window(NAME, window, MIN_WINDOW)?;
        let closes = closes_f64(window);
        let current = rsi(&closes, RSI_PERIOD).ok_or_else(|| StrategyError::Internal {
            strategy: NAME.to_string(),
            reason: "rsi returned None despite window check".to_string(),
        })?;
        let prior = rsi(&closes[..closes.len() - 1], RSI_PERIOD);
        let last = last_candle(window).ok_or_else(|| StrategyError::Internal {
            strategy: NAME.to_string(),
            reason: "empty window".to_string(),
        })?;

        if let Some(position) = position {
            if position.is_closed() {
                self.advisories.clear(market);
                return Ok(Signal::hold());
            }
            if current >= OVERBOUGHT {
                return Ok(Signal::sell(ExitReason::Overheated, format!("rsi {current:.1} entered overbought territory")));
            }
            return Ok(Signal::hold());
        }

        let crossed_up = prior.map(|p| p < OVERSOLD).unwrap_or(false) && current >= OVERSOLD;
        if crossed_up {
            let entry_price = last.close();
            let stop_loss_price = entry_price * (Decimal::ONE + STOP_LOSS_RATE);
            self.advisories.set(market, Advisory {
                target_price: None,
                stop_loss_price: Some(stop_loss_price),
                entry_price: Some(entry_price),
            });
            return Ok(Signal::buy(entry_price, entry_price, stop_loss_price, format!("rsi reversed up through {OVERSOLD}")));
        }

        Ok(Signal::hold())
    }
}

impl super::Strategy for RsiReversalStrategy {
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
