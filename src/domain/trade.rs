use crate::domain::signal::ExitReason;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OrderSide {
    Buy,
    Sell,
}

impl std::fmt::Display for OrderSide {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            OrderSide::Buy => write!(f, "BUY"),
            OrderSide::Sell => write!(f, "SELL"),
        }
    }
}

/// Append-only row of one execution (spec §3).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TradeRecord {
    pub id: String,
    pub user_id: String,
    pub market: String,
    pub timestamp: DateTime<Utc>,
    pub side: OrderSide,
    pub price: Decimal,
    pub volume: Decimal,
    pub fee: Decimal,
    pub krw_balance_after: Decimal,
    pub coin_balance_after: Decimal,
    pub total_asset_after: Decimal,
    pub running_profit_rate: Decimal,
    pub strategy_name: String,
    pub exit_reason: Option<ExitReason>,
}

/// Per-trade outcome row, persisted at exit (spec §3).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TradeStat {
    pub id: String,
    pub user_id: String,
    pub market: String,
    pub entry_time: DateTime<Utc>,
    pub exit_time: DateTime<Utc>,
    pub entry_price: Decimal,
    pub exit_price: Decimal,
    pub profit_rate: Decimal,
    pub entry_z_score: f64,
    pub entry_execution_strength: f64,
    pub entry_hour: u8,
    pub success: bool,
    pub exit_reason: ExitReason,
}

impl TradeStat {
    pub fn is_win(&self) -> bool {
        self.success
    }
}
