use serde::{Deserialize, Serialize};

/// Per-hour (0-23) tuning row for parameterized strategies (spec §3, §4.8).
/// Uniqueness on `hour`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct HourParam {
    pub hour: u8,
    pub min_execution_strength: f64,
    pub min_z_score: f64,
    pub volume_multiplier: f64,
    pub sample_count: u32,
    pub win_rate: f64,
    pub avg_profit_rate: f64,
    pub enabled: bool,
}

impl HourParam {
    /// The band-3 ("default") row a strategy falls back to on a missing or
    /// disabled hour parameter (spec §4.8).
    pub fn default_for_hour(hour: u8) -> Self {
        Self {
            hour,
            min_execution_strength: 65.0,
            min_z_score: 1.5,
            volume_multiplier: 4.0,
            sample_count: 0,
            win_rate: 0.0,
            avg_profit_rate: 0.0,
            enabled: true,
        }
    }
}
