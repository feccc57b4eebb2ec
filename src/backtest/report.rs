//! Backtest result shapes (spec §4.7).

use crate::domain::{ExitReason, TradeRecord};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BacktestResult {
    pub market: String,
    pub initial_balance: Decimal,
    pub final_balance: Decimal,
    pub total_profit_rate: f64,
    pub max_profit_rate: f64,
    pub max_drawdown: f64,
    pub buy_and_hold_profit_rate: f64,
    pub buy_count: u32,
    pub sell_count: u32,
    pub win_count: u32,
    pub lose_count: u32,
    pub win_rate: f64,
    pub trades: Vec<TradeRecord>,
    pub exit_reason_counts: BTreeMap<String, u32>,
}

impl BacktestResult {
    pub fn win_lose_total(&self) -> u32 {
        self.win_count + self.lose_count
    }
}

/// Tracks running max/min total-asset for max-drawdown reporting, and the
/// running peak for profit-rate reporting, as the executor walks bar by bar.
#[derive(Debug, Clone)]
pub(super) struct AssetTracker {
    initial_balance: Decimal,
    peak_asset: Decimal,
    max_drawdown: f64,
    max_profit_rate: f64,
}

impl AssetTracker {
    pub(super) fn new(initial_balance: Decimal) -> Self {
        Self { initial_balance, peak_asset: initial_balance, max_drawdown: 0.0, max_profit_rate: 0.0 }
    }

    pub(super) fn observe(&mut self, total_asset: Decimal) {
        if total_asset > self.peak_asset {
            self.peak_asset = total_asset;
        }
        if self.initial_balance.is_zero() {
            return;
        }
        let profit_rate = to_f64(total_asset - self.initial_balance) / to_f64(self.initial_balance);
        if profit_rate > self.max_profit_rate {
            self.max_profit_rate = profit_rate;
        }
        if self.peak_asset > Decimal::ZERO {
            let drawdown = to_f64(self.peak_asset - total_asset) / to_f64(self.peak_asset);
            if drawdown > self.max_drawdown {
                self.max_drawdown = drawdown;
            }
        }
    }

    pub(super) fn max_profit_rate(&self) -> f64 {
        self.max_profit_rate
    }

    pub(super) fn max_drawdown(&self) -> f64 {
        self.max_drawdown
    }
}

pub(super) fn to_f64(d: Decimal) -> f64 {
    d.to_string().parse().unwrap_or(0.0)
}

pub(super) fn exit_reason_key(reason: ExitReason) -> &'static str {
    match reason {
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
    }
}

/// Summary across a multi-market backtest run (spec §4.7, seed scenario 6).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MultiMarketSummary {
    pub per_market: Vec<BacktestResult>,
    pub best_market: Option<String>,
    pub worst_market: Option<String>,
    pub average_profit_rate: f64,
}

impl MultiMarketSummary {
    pub fn from_results(results: Vec<BacktestResult>) -> Self {
        if results.is_empty() {
            return Self { per_market: results, best_market: None, worst_market: None, average_profit_rate: 0.0 };
        }
        let best = results.iter().max_by(|a, b| a.total_profit_rate.total_cmp(&b.total_profit_rate)).map(|r| r.market.clone());
        let worst = results.iter().min_by(|a, b| a.total_profit_rate.total_cmp(&b.total_profit_rate)).map(|r| r.market.clone());
        let average = results.iter().map(|r| r.total_profit_rate).sum::<f64>() / results.len() as f64;
        Self { per_market: results, best_market: best, worst_market: worst, average_profit_rate: average }
    }
}
