use super::{closes_f64, last_candle, require_window, volumes_f64, Advisory, AdvisoryStore, AnalysisScratch};
use crate::domain::{Candle, CandleWindow, ExitReason, Position, Signal, StrategyError};
use crate::indicators::{sma, z_score};
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;

const NAME: &str = "z_volume_impulse";
const WINDOW: usize = 20;
const MIN_WINDOW: usize = 30;
const STOP_LOSS_RATE: Decimal = dec!(-0.03);
const TAKE_PROFIT_RATE: Decimal = dec!(0.05);
const VOLUME_DROP_RATIO: f64 = 0.4;

/// Ratio of buy-side traded volume to total traded volume over the window,
/// in percent (GLOSSARY "execution strength"). Approximated from candle
/// direction since raw buy/sell-side volume isn't part of the candle shape.
fn execution_strength(candles: &[Candle]) -> f64 {
    let total: f64 = candles.iter().map(|c| c.candle_acc_trade_volume.to_f64().unwrap_or(0.0)).sum();
    if total == 0.0 {
        return 0.0;
    }
    let buy_side: f64 = candles
        .iter()
        .filter(|c| c.trade_price >= c.opening_price)
        .map(|c| c.candle_acc_trade_volume.to_f64().unwrap_or(0.0))
        .sum();
    100.0 * buy_side / total
}

/// Buys on a volume-Z-score impulse with strong buy-side execution; exits on
/// take-profit or a sharp volume drop-off (a signal the impulse faded).
pub struct ZVolumeImpulseStrategy {
    advisories: AdvisoryStore,
}

impl ZVolumeImpulseStrategy {
    pub fn new() -> Self {
        Self { advisories: AdvisoryStore::new() }
    }

    fn evaluate(&self, market: &str, window: &CandleWindow, position: Option<&Position>, scratch: &AnalysisScratch) -> Result<Signal, StrategyError> {
        require_window(NAME, window, MIN_WINDOW)?;
        let volumes = volumes_f64(window);
        let z = z_score(&volumes, WINDOW).ok_or_else(|| StrategyError::Internal {
            strategy: NAME.to_string(),
            reason: "z_score returned None despite window check".to_string(),
        })?;
        let tail_candles = window.tail(WINDOW);
        let strength = execution_strength(tail_candles.ascending());
        let last = last_candle(window).ok_or_else(|| StrategyError::Internal {
            strategy: NAME.to_string(),
            reason: "empty window".to_string(),
        })?;

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
                return Ok(Signal::sell(ExitReason::TakeProfit, "impulse target reached"));
            }
            let recent_avg = {
                let closes = closes_f64(window);
                let _ = closes; // volumes already computed above
                let recent = &volumes[volumes.len().saturating_sub(WINDOW)..];
                recent.iter().sum::<f64>() / recent.len().max(1) as f64
            };
            let latest_volume = *volumes.last().unwrap_or(&0.0);
            if recent_avg > 0.0 && latest_volume < recent_avg * VOLUME_DROP_RATIO {
                return Ok(Signal::sell(ExitReason::VolumeDrop, "traded volume collapsed after the impulse"));
            }
            return Ok(Signal::hold());
        }

        let hour_param = scratch.resolved_hour_param();
        let avg_volume = sma(&volumes, WINDOW).unwrap_or(0.0);
        let latest_volume = *volumes.last().unwrap_or(&0.0);
        let volume_confirmed = avg_volume > 0.0 && latest_volume >= avg_volume * hour_param.volume_multiplier;

        if z >= hour_param.min_z_score && strength >= hour_param.min_execution_strength && volume_confirmed {
            let entry_price = last.close();
            let stop_loss_price = entry_price * (Decimal::ONE + STOP_LOSS_RATE);
            let target_price = entry_price * (Decimal::ONE + TAKE_PROFIT_RATE);
            self.advisories.set(market, Advisory {
                target_price: Some(target_price),
                stop_loss_price: Some(stop_loss_price),
                entry_price: Some(entry_price),
            });
            return Ok(Signal::buy(entry_price, target_price, stop_loss_price, format!("volume impulse z={z:.2} strength={strength:.1}")));
        }

        Ok(Signal::hold())
    }
}

impl super::Strategy for ZVolumeImpulseStrategy {
    fn name(&self) -> &str {
        NAME
    }

    fn min_window(&self) -> usize {
        MIN_WINDOW
    }

    fn analyze(&self, market: &str, window: &CandleWindow) -> Result<Signal, StrategyError> {
        self.evaluate(market, window, None, &AnalysisScratch::default())
    }

    fn analyze_for_backtest(
        &self,
        market: &str,
        window: &CandleWindow,
        position: Option<&Position>,
        scratch: &super::AnalysisScratch,
    ) -> Result<Signal, StrategyError> {
        self.evaluate(market, window, position, scratch)
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
    use crate::strategies::Strategy;
    use chrono::{Duration, Utc};

    fn candle(i: i64, open: f64, close: f64, volume: f64) -> Candle {
        let ts = Utc::now() + Duration::minutes(i);
        Candle {
            market: "KRW-BTC".into(),
            candle_at_kst: ts,
            candle_at_utc: ts,
            opening_price: Decimal::from_f64_retain(open).unwrap(),
            high_price: Decimal::from_f64_retain(close.max(open)).unwrap(),
            low_price: Decimal::from_f64_retain(close.min(open)).unwrap(),
            trade_price: Decimal::from_f64_retain(close).unwrap(),
            candle_acc_trade_volume: Decimal::from_f64_retain(volume).unwrap(),
            candle_acc_trade_price: Decimal::from_f64_retain(volume * close).unwrap(),
            unit_minutes: 1,
        }
    }

    #[test]
    fn zero_variance_volume_window_yields_hold_not_error() {
        let strategy = ZVolumeImpulseStrategy::new();
        let candles: Vec<Candle> = (0..30).map(|i| candle(i, 100.0, 100.0, 10.0)).collect();
        let window = CandleWindow::from_ascending(candles);
        let signal = strategy.analyze("KRW-BTC", &window).unwrap();
        assert!(matches!(signal.kind, crate::domain::SignalKind::Hold));
    }

    #[test]
    fn buys_on_volume_impulse_with_buy_side_strength() {
        let strategy = ZVolumeImpulseStrategy::new();
        let mut candles: Vec<Candle> = (0..29).map(|i| candle(i, 100.0, 100.0, 10.0)).collect();
        candles.push(candle(29, 100.0, 103.0, 60.0));
        let window = CandleWindow::from_ascending(candles);
        let signal = strategy.analyze("KRW-BTC", &window).unwrap();
        assert!(signal.is_buy());
    }
}
