//! Service layer enforcing position state-machine invariants and the
//! exit-trigger evaluation order (spec §4.4).

use crate::config::Config;
use crate::domain::repositories::PositionRepository;
use crate::domain::{ExitReason, Position, PositionError};
use rust_decimal::Decimal;
use std::sync::Arc;

/// The reason, if any, that the caller should exit an ACTIVE position on
/// this tick. Evaluated in the fixed order the spec requires: hard stop,
/// trailing stop, aggregator Sell vote, then risk-manager max-loss.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ExitTrigger {
    HardStop,
    TrailingStop,
    AggregatorSell,
    RiskManagerMaxLoss,
}

impl ExitTrigger {
    pub fn exit_reason(self) -> ExitReason {
        match self {
            ExitTrigger::HardStop => ExitReason::StopLossFixed,
            ExitTrigger::TrailingStop => ExitReason::TrailingStop,
            ExitTrigger::AggregatorSell => ExitReason::FakeRebound,
            ExitTrigger::RiskManagerMaxLoss => ExitReason::EmergencyClose,
        }
    }
}

/// Checks, in order, whether an ACTIVE position should exit on this tick.
/// `aggregator_sell` and `max_loss_exceeded` are evaluated last because they
/// require external computation the caller already has in hand.
pub fn evaluate_exit_trigger(position: &Position, current_price: Decimal, aggregator_sell: bool, max_loss_exceeded: bool) -> Option<ExitTrigger> {
    if current_price <= position.stop_loss_price {
        return Some(ExitTrigger::HardStop);
    }
    if let Some(trailing) = position.trailing_stop_price {
        if current_price <= trailing {
            return Some(ExitTrigger::TrailingStop);
        }
    }
    if aggregator_sell {
        return Some(ExitTrigger::AggregatorSell);
    }
    if max_loss_exceeded {
        return Some(ExitTrigger::RiskManagerMaxLoss);
    }
    None
}

pub struct PositionManager {
    config: Config,
    positions: Arc<dyn PositionRepository>,
}

impl PositionManager {
    pub fn new(config: Config, positions: Arc<dyn PositionRepository>) -> Self {
        Self { config, positions }
    }

    /// Arms the trailing stop once unrealized profit clears the arming
    /// threshold (default 2%), tracking `highest - max(k*ATR, trailingRate*highest)`.
    pub fn maybe_arm_trailing_stop(&self, position: &mut Position, current_atr: f64) -> Result<(), PositionError> {
        if position.avg_entry_price.is_zero() {
            return Ok(());
        }
        let profit_rate = (position.highest_since_entry - position.avg_entry_price) / position.avg_entry_price;
        if profit_rate < self.config.trailing_arm_threshold_rate {
            return Ok(());
        }
        let trailing = crate::risk::math::trailing_stop_price(
            position.highest_since_entry,
            current_atr,
            self.config.trailing_atr_multiplier,
            self.config.trailing_stop_rate,
        );
        position.arm_trailing_stop(trailing)
    }

    pub async fn save(&self, position: &Position) -> Result<(), crate::domain::errors::PersistenceError> {
        self.positions.save(position).await
    }

    /// Positions outliving the expected holding horizon (default 6h),
    /// flagged for the operator-triggered emergency-close path (spec §5).
    pub async fn find_overdue(&self, older_than: chrono::DateTime<chrono::Utc>) -> Vec<Position> {
        self.positions.find_stale_non_closed(older_than).await.unwrap_or_default()
    }

    /// Emergency-close: forces a non-CLOSED position to CLOSED with
    /// `EMERGENCY_CLOSE`, bypassing the normal exit-trigger evaluation.
    pub fn emergency_close(&self, position: &mut Position, exit_price: Decimal, now: chrono::DateTime<chrono::Utc>) -> Result<Decimal, PositionError> {
        if position.status == crate::domain::PositionStatus::Active {
            position.begin_exit()?;
        }
        position.close(exit_price, self.config.trade_fee_rate, ExitReason::EmergencyClose, now)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use rust_decimal_macros::dec;

    #[test]
    fn hard_stop_wins_over_trailing_and_aggregator() {
        let mut p = Position::new_pending("u1", "KRW-BTC", "s");
        p.record_entry_fill(dec!(100), dec!(1), dec!(97), Utc::now()).unwrap();
        p.activate().unwrap();
        p.trailing_stop_price = Some(dec!(99));
        let trigger = evaluate_exit_trigger(&p, dec!(96), true, true);
        assert_eq!(trigger, Some(ExitTrigger::HardStop));
    }

    #[test]
    fn trailing_stop_fires_before_aggregator_sell() {
        let mut p = Position::new_pending("u1", "KRW-BTC", "s");
        p.record_entry_fill(dec!(100), dec!(1), dec!(97), Utc::now()).unwrap();
        p.activate().unwrap();
        p.trailing_stop_price = Some(dec!(99));
        let trigger = evaluate_exit_trigger(&p, dec!(98), true, true);
        assert_eq!(trigger, Some(ExitTrigger::TrailingStop));
    }

    #[test]
    fn no_trigger_fires_when_price_is_healthy_and_votes_are_quiet() {
        let mut p = Position::new_pending("u1", "KRW-BTC", "s");
        p.record_entry_fill(dec!(100), dec!(1), dec!(97), Utc::now()).unwrap();
        p.activate().unwrap();
        let trigger = evaluate_exit_trigger(&p, dec!(105), false, false);
        assert_eq!(trigger, None);
    }
}
