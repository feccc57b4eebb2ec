use anyhow::{Context, Result};
use rust_decimal::prelude::FromPrimitive;
use rust_decimal::Decimal;
use std::env;

/// Tuning bands written by the auto-tuner (spec §4.8).
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TunerBand {
    pub min_execution_strength: f64,
    pub min_z_score: f64,
    pub volume_multiplier: f64,
}

#[derive(Debug, Clone, Copy)]
pub struct TunerBands {
    pub tighten: TunerBand,
    pub default: TunerBand,
    pub loosen: TunerBand,
}

impl Default for TunerBands {
    fn default() -> Self {
        Self {
            tighten: TunerBand { min_execution_strength: 70.0, min_z_score: 2.0, volume_multiplier: 5.0 },
            default: TunerBand { min_execution_strength: 65.0, min_z_score: 1.5, volume_multiplier: 4.0 },
            loosen: TunerBand { min_execution_strength: 60.0, min_z_score: 1.2, volume_multiplier: 3.5 },
        }
    }
}

/// Single configuration struct recognized by the whole system (spec §6).
/// Loaded once at process start via [`Config::from_env`] and passed by
/// reference thereafter, following the teacher's `Config::from_env` idiom.
#[derive(Debug, Clone)]
pub struct Config {
    pub trading_enabled: bool,
    pub trade_fee_rate: Decimal,
    pub stop_loss_rate: Decimal,
    pub take_profit_rate: Decimal,
    pub trailing_stop_rate: Decimal,
    pub min_window_aggregate: usize,
    pub min_window_single: usize,
    pub max_concurrent_positions: usize,
    pub max_position_size_rate: Decimal,
    pub max_daily_loss_rate: Decimal,
    pub max_consecutive_losses: usize,
    pub cooldown_minutes: i64,
    pub stop_loss_atr_multiplier: f64,
    pub stop_loss_max_rate: Decimal,
    pub trailing_atr_multiplier: f64,
    pub trailing_arm_threshold_rate: Decimal,
    pub entry_ratio: [Decimal; 3],
    pub order_check_max_retry: u32,
    pub order_check_interval_ms: u64,
    pub backtest_worker_core: usize,
    pub backtest_worker_max: usize,
    pub backtest_queue: usize,
    pub tuner_min_samples: u32,
    pub tuner_bands: TunerBands,
    pub max_holding_hours: i64,
    pub auto_emergency_close: bool,
    pub live_tick_seconds: u64,
    pub process_instance_id: String,
    pub database_path: String,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        let trading_enabled = env_bool("TRADING_ENABLED", true);
        let trade_fee_rate = env_decimal("TRADE_FEE_RATE", "0.0005")?;
        let stop_loss_rate = env_decimal("STOP_LOSS_RATE", "-0.03")?;
        let take_profit_rate = env_decimal("TAKE_PROFIT_RATE", "0.05")?;
        let trailing_stop_rate = env_decimal("TRAILING_STOP_RATE", "0.02")?;

        let min_window_aggregate = env_parse("MIN_WINDOW_AGGREGATE", "100")?;
        let min_window_single = env_parse("MIN_WINDOW_SINGLE", "30")?;
        let max_concurrent_positions = env_parse("MAX_CONCURRENT_POSITIONS", "5")?;
        let max_position_size_rate = env_decimal("MAX_POSITION_SIZE_RATE", "0.2")?;
        let max_daily_loss_rate = env_decimal("MAX_DAILY_LOSS_RATE", "0.05")?;
        let max_consecutive_losses = env_parse("MAX_CONSECUTIVE_LOSSES", "3")?;
        let cooldown_minutes = env_parse("COOLDOWN_MINUTES", "30")?;
        let stop_loss_atr_multiplier = env_parse("STOP_LOSS_ATR_MULTIPLIER", "1.5")?;
        let stop_loss_max_rate = env_decimal("STOP_LOSS_MAX_RATE", "0.05")?;
        let trailing_atr_multiplier = env_parse("TRAILING_ATR_MULTIPLIER", "2.0")?;
        let trailing_arm_threshold_rate = env_decimal("TRAILING_ARM_THRESHOLD_RATE", "0.02")?;

        let entry_ratio = [
            env_decimal("ENTRY_RATIO_1", "0.5")?,
            env_decimal("ENTRY_RATIO_2", "0.3")?,
            env_decimal("ENTRY_RATIO_3", "0.2")?,
        ];

        let order_check_max_retry = env_parse("ORDER_CHECK_MAX_RETRY", "10")?;
        let order_check_interval_ms = env_parse("ORDER_CHECK_INTERVAL_MS", "500")?;

        let backtest_worker_core = env_parse("BACKTEST_WORKER_CORE", "2")?;
        let backtest_worker_max = env_parse("BACKTEST_WORKER_MAX", "4")?;
        let backtest_queue = env_parse("BACKTEST_QUEUE", "10")?;

        let tuner_min_samples = env_parse("TUNER_MIN_SAMPLES", "20")?;

        let max_holding_hours = env_parse("MAX_HOLDING_HOURS", "6")?;
        let auto_emergency_close = env_bool("AUTO_EMERGENCY_CLOSE", false);
        let live_tick_seconds = env_parse("LIVE_TICK_SECONDS", "300")?;

        let process_instance_id = env::var("PROCESS_INSTANCE_ID").unwrap_or_else(|_| uuid::Uuid::new_v4().to_string());
        let database_path = env::var("DATABASE_PATH").unwrap_or_else(|_| "sqlite://upbit-trader.db".to_string());

        Ok(Config {
            trading_enabled,
            trade_fee_rate,
            stop_loss_rate,
            take_profit_rate,
            trailing_stop_rate,
            min_window_aggregate,
            min_window_single,
            max_concurrent_positions,
            max_position_size_rate,
            max_daily_loss_rate,
            max_consecutive_losses,
            cooldown_minutes,
            stop_loss_atr_multiplier,
            stop_loss_max_rate,
            trailing_atr_multiplier,
            trailing_arm_threshold_rate,
            entry_ratio,
            order_check_max_retry,
            order_check_interval_ms,
            backtest_worker_core,
            backtest_worker_max,
            backtest_queue,
            tuner_min_samples,
            tuner_bands: TunerBands::default(),
            max_holding_hours,
            auto_emergency_close,
            live_tick_seconds,
            process_instance_id,
            database_path,
        })
    }

    /// Majority threshold over `n` enabled strategies: `floor(n/2) + 1` (spec §6).
    pub fn majority_threshold(n: usize) -> usize {
        n / 2 + 1
    }

    /// The buy-side fee buffer, kept as a function of `trade_fee_rate` rather
    /// than a hardcoded `0.99` literal (spec §9 Open Question: if the fee
    /// rate is ever raised above 1%, a literal buffer is no longer safe).
    pub fn buy_fee_buffer(&self) -> Decimal {
        Decimal::ONE - self.trade_fee_rate
    }
}

impl Default for Config {
    fn default() -> Self {
        Config {
            trading_enabled: true,
            trade_fee_rate: Decimal::new(5, 4),
            stop_loss_rate: Decimal::new(-3, 2),
            take_profit_rate: Decimal::new(5, 2),
            trailing_stop_rate: Decimal::new(2, 2),
            min_window_aggregate: 100,
            min_window_single: 30,
            max_concurrent_positions: 5,
            max_position_size_rate: Decimal::new(2, 1),
            max_daily_loss_rate: Decimal::new(5, 2),
            max_consecutive_losses: 3,
            cooldown_minutes: 30,
            stop_loss_atr_multiplier: 1.5,
            stop_loss_max_rate: Decimal::new(5, 2),
            trailing_atr_multiplier: 2.0,
            trailing_arm_threshold_rate: Decimal::new(2, 2),
            entry_ratio: [Decimal::new(5, 1), Decimal::new(3, 1), Decimal::new(2, 1)],
            order_check_max_retry: 10,
            order_check_interval_ms: 500,
            backtest_worker_core: 2,
            backtest_worker_max: 4,
            backtest_queue: 10,
            tuner_min_samples: 20,
            tuner_bands: TunerBands::default(),
            max_holding_hours: 6,
            auto_emergency_close: false,
            live_tick_seconds: 300,
            process_instance_id: "test-instance".to_string(),
            database_path: "sqlite::memory:".to_string(),
        }
    }
}

fn env_parse<T: std::str::FromStr>(key: &str, default: &str) -> Result<T>
where
    T::Err: std::fmt::Display,
{
    let raw = env::var(key).unwrap_or_else(|_| default.to_string());
    raw.parse::<T>()
        .map_err(|e| anyhow::anyhow!("failed to parse {key}={raw}: {e}"))
        .with_context(|| format!("invalid value for {key}"))
}

fn env_bool(key: &str, default: bool) -> bool {
    env::var(key)
        .ok()
        .and_then(|v| v.parse::<bool>().ok())
        .unwrap_or(default)
}

fn env_decimal(key: &str, default: &str) -> Result<Decimal> {
    let raw = env::var(key).unwrap_or_else(|_| default.to_string());
    let f: f64 = raw.parse().with_context(|| format!("invalid decimal value for {key}"))?;
    Decimal::from_f64(f).ok_or_else(|| anyhow::anyhow!("could not represent {key}={raw} as Decimal"))
}
