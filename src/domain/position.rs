use crate::domain::errors::PositionError;
use crate::domain::signal::ExitReason;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PositionStatus {
    Pending,
    Entering,
    Active,
    Exiting,
    Closed,
}

/// Per (user, market) lifecycle record (spec §3, §4.4).
///
/// Invariants enforced by the mutating methods below:
/// - at most one non-`Closed` position per (user, market) is the caller's
///   responsibility (enforced by [`crate::position_manager::PositionManager`]
///   via a find-active lookup before `open`);
/// - `quantity >= 0`;
/// - `highest_since_entry >= avg_entry_price` once set;
/// - `stop_loss_price < avg_entry_price` for a long;
/// - `trailing_stop_price >= stop_loss_price` whenever armed.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Position {
    pub user_id: String,
    pub market: String,
    pub status: PositionStatus,
    pub entry_phase: u8,
    pub avg_entry_price: Decimal,
    pub total_invested: Decimal,
    pub quantity: Decimal,
    pub stop_loss_price: Decimal,
    pub highest_since_entry: Decimal,
    pub trailing_stop_price: Option<Decimal>,
    pub strategy_name: String,
    pub entry_timestamps: Vec<DateTime<Utc>>,
    pub realized_pnl: Decimal,
    pub unrealized_pnl: Decimal,
    pub final_exit_time: Option<DateTime<Utc>>,
    pub exit_reason: Option<ExitReason>,
}

impl Position {
    pub fn new_pending(user_id: impl Into<String>, market: impl Into<String>, strategy_name: impl Into<String>) -> Self {
        Self {
            user_id: user_id.into(),
            market: market.into(),
            status: PositionStatus::Pending,
            entry_phase: 0,
            avg_entry_price: Decimal::ZERO,
            total_invested: Decimal::ZERO,
            quantity: Decimal::ZERO,
            stop_loss_price: Decimal::ZERO,
            highest_since_entry: Decimal::ZERO,
            trailing_stop_price: None,
            strategy_name: strategy_name.into(),
            entry_timestamps: Vec::new(),
            realized_pnl: Decimal::ZERO,
            unrealized_pnl: Decimal::ZERO,
            final_exit_time: None,
            exit_reason: None,
        }
    }

    pub fn is_closed(&self) -> bool {
        self.status == PositionStatus::Closed
    }

    pub fn is_open_for_entry(&self) -> bool {
        matches!(self.status, PositionStatus::Entering | PositionStatus::Active) && self.entry_phase < 3
    }

    /// Transition `PENDING -> ENTERING` and record the first fill, or add a
    /// staged re-entry while already `ENTERING`/`ACTIVE` (entry_phase < 3).
    pub fn record_entry_fill(
        &mut self,
        fill_price: Decimal,
        fill_quantity: Decimal,
        stop_loss_price: Decimal,
        now: DateTime<Utc>,
    ) -> Result<(), PositionError> {
        match self.status {
            PositionStatus::Pending => self.status = PositionStatus::Entering,
            PositionStatus::Entering | PositionStatus::Active => {}
            other => return Err(PositionError::InvalidTransition { from: other, to: PositionStatus::Entering }),
        }
        if self.entry_phase >= 3 {
            return Err(PositionError::MaxEntryPhaseReached);
        }
        if fill_quantity < Decimal::ZERO {
            return Err(PositionError::NegativeQuantity);
        }

        let new_total_invested = self.total_invested + fill_price * fill_quantity;
        let new_quantity = self.quantity + fill_quantity;
        self.avg_entry_price = if new_quantity.is_zero() {
            fill_price
        } else {
            new_total_invested / new_quantity
        };
        self.total_invested = new_total_invested;
        self.quantity = new_quantity;
        self.entry_phase += 1;
        self.stop_loss_price = stop_loss_price;
        if self.highest_since_entry < self.avg_entry_price {
            self.highest_since_entry = self.avg_entry_price;
        }
        self.entry_timestamps.push(now);
        Ok(())
    }

    /// `ENTERING -> ACTIVE` once the entry is fully staged (caller decides
    /// when staging is complete; a single-phase entry calls this right after
    /// `record_entry_fill`).
    pub fn activate(&mut self) -> Result<(), PositionError> {
        match self.status {
            PositionStatus::Entering => {
                self.status = PositionStatus::Active;
                Ok(())
            }
            PositionStatus::Active => Ok(()),
            other => Err(PositionError::InvalidTransition { from: other, to: PositionStatus::Active }),
        }
    }

    /// Update the high-water mark while `ACTIVE`, called on every tick
    /// (spec §4.4: "highest-price tracker is updated on every ACTIVE tick").
    pub fn update_highest(&mut self, price: Decimal) -> Result<(), PositionError> {
        if self.status != PositionStatus::Active {
            return Err(PositionError::InvalidTransition { from: self.status, to: PositionStatus::Active });
        }
        if price > self.highest_since_entry {
            self.highest_since_entry = price;
        }
        Ok(())
    }

    pub fn arm_trailing_stop(&mut self, trailing_stop_price: Decimal) -> Result<(), PositionError> {
        if trailing_stop_price < self.stop_loss_price {
            return Err(PositionError::TrailingBelowStopLoss);
        }
        self.trailing_stop_price = Some(trailing_stop_price);
        Ok(())
    }

    /// `ACTIVE -> EXITING`.
    pub fn begin_exit(&mut self) -> Result<(), PositionError> {
        match self.status {
            PositionStatus::Active => {
                self.status = PositionStatus::Exiting;
                Ok(())
            }
            other => Err(PositionError::InvalidTransition { from: other, to: PositionStatus::Exiting }),
        }
    }

    /// Terminal transition to `CLOSED`. `final_exit_time`, `realized_pnl`,
    /// and `exit_reason` are never rewritten after this call (spec §4.4).
    pub fn close(
        &mut self,
        exit_price: Decimal,
        fee_rate: Decimal,
        exit_reason: ExitReason,
        now: DateTime<Utc>,
    ) -> Result<Decimal, PositionError> {
        if self.status == PositionStatus::Closed {
            return Err(PositionError::AlreadyClosed);
        }
        let proceeds = exit_price * self.quantity * (Decimal::ONE - fee_rate);
        let realized = proceeds - self.total_invested;
        self.status = PositionStatus::Closed;
        self.final_exit_time = Some(now);
        self.realized_pnl = realized;
        self.exit_reason = Some(exit_reason);
        self.unrealized_pnl = Decimal::ZERO;
        Ok(realized)
    }

    /// Cancel a `PENDING`/`ENTERING` position whose entry never filled.
    pub fn cancel_failed_entry(&mut self) -> Result<(), PositionError> {
        match self.status {
            PositionStatus::Pending | PositionStatus::Entering if self.quantity.is_zero() => {
                self.status = PositionStatus::Closed;
                self.exit_reason = Some(ExitReason::SignalInvalid);
                Ok(())
            }
            other => Err(PositionError::InvalidTransition { from: other, to: PositionStatus::Closed }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn entry_fill_moves_pending_to_entering_then_active() {
        let mut p = Position::new_pending("u1", "KRW-BTC", "bb_breakout");
        p.record_entry_fill(dec!(100), dec!(1), dec!(97), Utc::now()).unwrap();
        assert_eq!(p.status, PositionStatus::Entering);
        p.activate().unwrap();
        assert_eq!(p.status, PositionStatus::Active);
        assert_eq!(p.avg_entry_price, dec!(100));
        assert_eq!(p.quantity, dec!(1));
    }

    #[test]
    fn staged_entry_averages_price() {
        let mut p = Position::new_pending("u1", "KRW-BTC", "bb_breakout");
        p.record_entry_fill(dec!(100), dec!(1), dec!(97), Utc::now()).unwrap();
        p.activate().unwrap();
        p.record_entry_fill(dec!(110), dec!(1), dec!(97), Utc::now()).unwrap();
        assert_eq!(p.avg_entry_price, dec!(105));
        assert_eq!(p.quantity, dec!(2));
        assert_eq!(p.entry_phase, 2);
    }

    #[test]
    fn cannot_enter_past_phase_three() {
        let mut p = Position::new_pending("u1", "KRW-BTC", "s");
        for _ in 0..3 {
            p.record_entry_fill(dec!(100), dec!(1), dec!(97), Utc::now()).unwrap();
        }
        let err = p.record_entry_fill(dec!(100), dec!(1), dec!(97), Utc::now());
        assert!(matches!(err, Err(PositionError::MaxEntryPhaseReached)));
    }

    #[test]
    fn close_sets_terminal_fields_once() {
        let mut p = Position::new_pending("u1", "KRW-BTC", "s");
        p.record_entry_fill(dec!(100), dec!(1), dec!(97), Utc::now()).unwrap();
        p.activate().unwrap();
        p.begin_exit().unwrap();
        let realized = p.close(dec!(110), dec!(0.0005), ExitReason::TakeProfit, Utc::now()).unwrap();
        assert_eq!(p.status, PositionStatus::Closed);
        assert!(p.final_exit_time.is_some());
        assert_eq!(p.exit_reason, Some(ExitReason::TakeProfit));
        assert_eq!(realized, p.realized_pnl);
        assert!(p.close(dec!(120), dec!(0.0005), ExitReason::TakeProfit, Utc::now()).is_err());
    }

    #[test]
    fn trailing_stop_cannot_be_armed_below_stop_loss() {
        let mut p = Position::new_pending("u1", "KRW-BTC", "s");
        p.record_entry_fill(dec!(100), dec!(1), dec!(97), Utc::now()).unwrap();
        p.activate().unwrap();
        assert!(p.arm_trailing_stop(dec!(96)).is_err());
        assert!(p.arm_trailing_stop(dec!(98)).is_ok());
    }
}
