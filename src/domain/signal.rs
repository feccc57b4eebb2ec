use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SignalKind {
    Buy,
    Hold,
    Sell,
}

impl fmt::Display for SignalKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SignalKind::Buy => write!(f, "BUY"),
            SignalKind::Hold => write!(f, "HOLD"),
            SignalKind::Sell => write!(f, "SELL"),
        }
    }
}

/// Label recorded on every sell identifying which trigger fired (§3, §4.4).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ExitReason {
    StopLossFixed,
    StopLossAtr,
    TrailingStop,
    TakeProfit,
    SignalInvalid,
    FakeRebound,
    VolumeDrop,
    Overheated,
    Timeout,
    EmergencyClose,
}

impl fmt::Display for ExitReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ExitReason::StopLossFixed => "STOP_LOSS_FIXED",
            ExitReason::StopLossAtr => "STOP_LOSS_ATR",
            ExitReason::TrailingStop => "TRAILING_STOP",
            ExitReason::TakeProfit => "TAKE_PROFIT",
            ExitReason::SignalInvalid => "SIGNAL_INVALID",
            ExitReason::FakeRebound => "FAKE_REBOUND",
            ExitReason::VolumeDrop => "VOLUME_DROP",
            ExitReason::Overheated => "OVERHEATED",
            ExitReason::Timeout => "TIMEOUT",
            ExitReason::EmergencyClose => "EMERGENCY_CLOSE",
        };
        write!(f, "{s}")
    }
}

/// One strategy's verdict for one market, plus the advisory prices it chose
/// to publish alongside it (spec §3).
#[derive(Debug, Clone, PartialEq)]
pub struct Signal {
    pub kind: SignalKind,
    pub target_price: Option<Decimal>,
    pub stop_loss_price: Option<Decimal>,
    pub entry_price: Option<Decimal>,
    pub exit_reason: Option<ExitReason>,
    pub reason: String,
}

impl Signal {
    pub fn hold() -> Self {
        Self {
            kind: SignalKind::Hold,
            target_price: None,
            stop_loss_price: None,
            entry_price: None,
            exit_reason: None,
            reason: String::new(),
        }
    }

    pub fn buy(entry_price: Decimal, target_price: Decimal, stop_loss_price: Decimal, reason: impl Into<String>) -> Self {
        Self {
            kind: SignalKind::Buy,
            target_price: Some(target_price),
            stop_loss_price: Some(stop_loss_price),
            entry_price: Some(entry_price),
            exit_reason: None,
            reason: reason.into(),
        }
    }

    pub fn sell(exit_reason: ExitReason, reason: impl Into<String>) -> Self {
        Self {
            kind: SignalKind::Sell,
            target_price: None,
            stop_loss_price: None,
            entry_price: None,
            exit_reason: Some(exit_reason),
            reason: reason.into(),
        }
    }

    pub fn is_buy(&self) -> bool {
        self.kind == SignalKind::Buy
    }

    pub fn is_sell(&self) -> bool {
        self.kind == SignalKind::Sell
    }
}
