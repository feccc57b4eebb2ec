use crate::domain::candle::Candle;
use crate::domain::errors::PersistenceError;
use crate::domain::hour_param::HourParam;
use crate::domain::position::Position;
use crate::domain::simulation_task::SimulationTask;
use crate::domain::trade::{TradeRecord, TradeStat};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;

/// Candle lookup by (market, unit, KST range), ascending; distinct market list (spec §6).
#[async_trait]
pub trait CandleRepository: Send + Sync {
    async fn get_range(
        &self,
        market: &str,
        unit_minutes: u32,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<Vec<Candle>, PersistenceError>;

    async fn distinct_markets(&self) -> Result<Vec<String>, PersistenceError>;
}

/// Position find-active by (user, market); count active by user; today's
/// realized-loss sum; consecutive losses by scanning recent CLOSED in reverse (spec §6).
#[async_trait]
pub trait PositionRepository: Send + Sync {
    async fn save(&self, position: &Position) -> Result<(), PersistenceError>;
    async fn find_active(&self, user_id: &str, market: &str) -> Result<Option<Position>, PersistenceError>;
    async fn count_active(&self, user_id: &str) -> Result<usize, PersistenceError>;
    async fn todays_realized_loss_sum(&self, user_id: &str, now: DateTime<Utc>) -> Result<Decimal, PersistenceError>;
    /// Most-recent CLOSED positions for `user_id`, newest first.
    async fn recent_closed(&self, user_id: &str, limit: usize) -> Result<Vec<Position>, PersistenceError>;
    async fn find_stale_non_closed(&self, older_than: DateTime<Utc>) -> Result<Vec<Position>, PersistenceError>;
}

#[async_trait]
pub trait TradeRecordRepository: Send + Sync {
    async fn save(&self, record: &TradeRecord) -> Result<(), PersistenceError>;
    async fn find_by_user(&self, user_id: &str, limit: usize) -> Result<Vec<TradeRecord>, PersistenceError>;
}

/// TradeStat hourly aggregation over an arbitrary window with a minimum sample clause (spec §6).
#[async_trait]
pub trait TradeStatRepository: Send + Sync {
    async fn save(&self, stat: &TradeStat) -> Result<(), PersistenceError>;
    async fn hourly_aggregate(
        &self,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
        min_samples: u32,
    ) -> Result<Vec<HourlyAggregate>, PersistenceError>;
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct HourlyAggregate {
    pub hour: u8,
    pub sample_count: u32,
    pub win_rate: f64,
    pub avg_profit_rate: f64,
}

/// HourParam upsert by hour (spec §6).
#[async_trait]
pub trait HourParamRepository: Send + Sync {
    async fn upsert(&self, param: &HourParam) -> Result<(), PersistenceError>;
    async fn get(&self, hour: u8) -> Result<Option<HourParam>, PersistenceError>;
    async fn all(&self) -> Result<Vec<HourParam>, PersistenceError>;
}

/// SimulationTask find-by-id, find-by-param-hash-active, find-stuck-running (spec §6).
#[async_trait]
pub trait SimulationTaskRepository: Send + Sync {
    async fn insert(&self, task: &SimulationTask) -> Result<(), PersistenceError>;
    async fn update(&self, task: &SimulationTask) -> Result<(), PersistenceError>;
    async fn find_by_id(&self, id: uuid::Uuid) -> Result<Option<SimulationTask>, PersistenceError>;
    async fn find_active_by_param_hash(&self, param_hash: &str) -> Result<Option<SimulationTask>, PersistenceError>;
    async fn find_stuck_running(&self, owner_instance_id: &str) -> Result<Vec<SimulationTask>, PersistenceError>;
}
