use crate::domain::position::PositionStatus;
use rust_decimal::Decimal;
use thiserror::Error;

/// Errors a strategy's `analyze`/`analyze_for_backtest` call can raise.
/// The aggregator treats any of these as an abstention, not a vote (spec §4.3, §7).
#[derive(Debug, Error)]
pub enum StrategyError {
    #[error("window too short for {strategy}: need {required}, have {available}")]
    WindowTooShort {
        strategy: String,
        required: usize,
        available: usize,
    },
    #[error("strategy {strategy} failed: {reason}")]
    Internal { strategy: String, reason: String },
}

/// Position state machine invariant violations (spec §3, §4.4).
#[derive(Debug, Error, PartialEq)]
pub enum PositionError {
    #[error("invalid transition from {from:?} to {to:?}")]
    InvalidTransition { from: PositionStatus, to: PositionStatus },
    #[error("entry phase already at maximum (3)")]
    MaxEntryPhaseReached,
    #[error("quantity cannot go negative")]
    NegativeQuantity,
    #[error("trailing stop cannot be armed below the stop-loss price")]
    TrailingBelowStopLoss,
    #[error("position already closed")]
    AlreadyClosed,
}

/// Reasons the risk manager's ordered pipeline denies a proposed entry (spec §4.5).
#[derive(Debug, Error, Clone, PartialEq)]
pub enum RiskDenial {
    #[error("user is under an active cooldown until {until}")]
    Cooldown { until: chrono::DateTime<chrono::Utc> },
    #[error("max concurrent positions reached: {current} >= {cap}")]
    MaxConcurrentPositions { current: usize, cap: usize },
    #[error("a non-closed position already exists for {market}")]
    DuplicatePosition { market: String },
    #[error("requested notional {requested} exceeds sizing cap {cap}")]
    SizingCapExceeded { requested: Decimal, cap: Decimal },
    #[error("today's realized losses {losses} exceed the daily loss cap {cap}")]
    DailyLossCapExceeded { losses: Decimal, cap: Decimal },
    #[error("consecutive losses ({count}) reached the configured threshold")]
    ConsecutiveLosses { count: usize },
}

/// Exchange adapter failures (spec §6, §7).
#[derive(Debug, Error)]
pub enum ExchangeError {
    #[error("exchange call timed out after {0} attempts")]
    Timeout(u32),
    #[error("malformed exchange response: {0}")]
    MalformedResponse(String),
    #[error("exchange rejected the request: {0}")]
    Rejected(String),
}

/// Persistence-layer failures (spec §6, §7).
#[derive(Debug, Error)]
pub enum PersistenceError {
    #[error("row not found: {0}")]
    NotFound(String),
    #[error("write conflict on {0}, retried once and still failed")]
    Conflict(String),
    #[error("storage backend error: {0}")]
    Backend(String),
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to parse env var {key}: {source}")]
    Parse {
        key: String,
        #[source]
        source: anyhow::Error,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn risk_denial_formats_with_values() {
        let denial = RiskDenial::MaxConcurrentPositions { current: 5, cap: 5 };
        let msg = denial.to_string();
        assert!(msg.contains('5'));
    }
}
