//! In-memory repository implementations, `Arc<RwLock<...>>`-backed, for
//! tests and the backtest path where a real database isn't needed.

use crate::domain::errors::PersistenceError;
use crate::domain::repositories::{
    CandleRepository, HourParamRepository, HourlyAggregate, PositionRepository, SimulationTaskRepository, TradeRecordRepository,
    TradeStatRepository,
};
use crate::domain::{Candle, HourParam, Position, SimulationTask, TradeRecord, TradeStat};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use std::collections::HashMap;
use std::sync::RwLock;

#[derive(Default)]
pub struct InMemoryCandleRepository {
    candles: RwLock<HashMap<(String, u32), Vec<Candle>>>,
}

impl InMemoryCandleRepository {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn seed(&self, market: &str, unit_minutes: u32, candles: Vec<Candle>) {
        self.candles.write().unwrap().insert((market.to_string(), unit_minutes), candles);
    }
}

#[async_trait]
impl CandleRepository for InMemoryCandleRepository {
    async fn get_range(&self, market: &str, unit_minutes: u32, from: DateTime<Utc>, to: DateTime<Utc>) -> Result<Vec<Candle>, PersistenceError> {
        let store = self.candles.read().unwrap();
        Ok(store
            .get(&(market.to_string(), unit_minutes))
            .map(|series| series.iter().filter(|c| c.candle_at_kst >= from && c.candle_at_kst <= to).cloned().collect())
            .unwrap_or_default())
    }

    async fn distinct_markets(&self) -> Result<Vec<String>, PersistenceError> {
        let store = self.candles.read().unwrap();
        let mut markets: Vec<String> = store.keys().map(|(m, _)| m.clone()).collect();
        markets.sort();
        markets.dedup();
        Ok(markets)
    }
}

#[derive(Default)]
pub struct InMemoryPositionRepository {
    positions: RwLock<Vec<Position>>,
}

impl InMemoryPositionRepository {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl PositionRepository for InMemoryPositionRepository {
    async fn save(&self, position: &Position) -> Result<(), PersistenceError> {
        let mut store = self.positions.write().unwrap();
        if let Some(slot) = store
            .iter_mut()
            .find(|p| p.user_id == position.user_id && p.market == position.market && !p.is_closed())
        {
            *slot = position.clone();
        } else {
            store.push(position.clone());
        }
        Ok(())
    }

    async fn find_active(&self, user_id: &str, market: &str) -> Result<Option<Position>, PersistenceError> {
        let store = self.positions.read().unwrap();
        Ok(store.iter().find(|p| p.user_id == user_id && p.market == market && !p.is_closed()).cloned())
    }

    async fn count_active(&self, user_id: &str) -> Result<usize, PersistenceError> {
        let store = self.positions.read().unwrap();
        Ok(store.iter().filter(|p| p.user_id == user_id && !p.is_closed()).count())
    }

    async fn todays_realized_loss_sum(&self, user_id: &str, now: DateTime<Utc>) -> Result<Decimal, PersistenceError> {
        let store = self.positions.read().unwrap();
        let today = now.date_naive();
        let sum = store
            .iter()
            .filter(|p| p.user_id == user_id && p.is_closed() && p.realized_pnl < Decimal::ZERO)
            .filter(|p| p.final_exit_time.map(|t| t.date_naive() == today).unwrap_or(false))
            .map(|p| p.realized_pnl)
            .sum();
        Ok(sum)
    }

    async fn recent_closed(&self, user_id: &str, limit: usize) -> Result<Vec<Position>, PersistenceError> {
        let store = self.positions.read().unwrap();
        let mut closed: Vec<Position> = store.iter().filter(|p| p.user_id == user_id && p.is_closed()).cloned().collect();
        closed.sort_by_key(|p| std::cmp::Reverse(p.final_exit_time));
        closed.truncate(limit);
        Ok(closed)
    }

    async fn find_stale_non_closed(&self, older_than: DateTime<Utc>) -> Result<Vec<Position>, PersistenceError> {
        let store = self.positions.read().unwrap();
        Ok(store
            .iter()
            .filter(|p| !p.is_closed() && p.entry_timestamps.first().map(|t| *t < older_than).unwrap_or(false))
            .cloned()
            .collect())
    }
}

#[derive(Default)]
pub struct InMemoryTradeRecordRepository {
    records: RwLock<Vec<TradeRecord>>,
}

impl InMemoryTradeRecordRepository {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl TradeRecordRepository for InMemoryTradeRecordRepository {
    async fn save(&self, record: &TradeRecord) -> Result<(), PersistenceError> {
        self.records.write().unwrap().push(record.clone());
        Ok(())
    }

    async fn find_by_user(&self, user_id: &str, limit: usize) -> Result<Vec<TradeRecord>, PersistenceError> {
        let store = self.records.read().unwrap();
        Ok(store.iter().filter(|r| r.user_id == user_id).rev().take(limit).cloned().collect())
    }
}

#[derive(Default)]
pub struct InMemoryTradeStatRepository {
    stats: RwLock<Vec<TradeStat>>,
}

impl InMemoryTradeStatRepository {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl TradeStatRepository for InMemoryTradeStatRepository {
    async fn save(&self, stat: &TradeStat) -> Result<(), PersistenceError> {
        self.stats.write().unwrap().push(stat.clone());
        Ok(())
    }

    async fn hourly_aggregate(&self, from: DateTime<Utc>, to: DateTime<Utc>, min_samples: u32) -> Result<Vec<HourlyAggregate>, PersistenceError> {
        let store = self.stats.read().unwrap();
        let mut by_hour: HashMap<u8, Vec<&TradeStat>> = HashMap::new();
        for stat in store.iter().filter(|s| s.entry_time >= from && s.entry_time <= to) {
            by_hour.entry(stat.entry_hour).or_default().push(stat);
        }
        let mut out = Vec::new();
        for (hour, stats) in by_hour {
            if (stats.len() as u32) < min_samples {
                continue;
            }
            let wins = stats.iter().filter(|s| s.is_win()).count();
            let win_rate = wins as f64 / stats.len() as f64;
            let avg_profit_rate = stats.iter().map(|s| s.profit_rate.to_string().parse::<f64>().unwrap_or(0.0)).sum::<f64>() / stats.len() as f64;
            out.push(HourlyAggregate { hour, sample_count: stats.len() as u32, win_rate, avg_profit_rate });
        }
        out.sort_by_key(|a| a.hour);
        Ok(out)
    }
}

#[derive(Default)]
pub struct InMemoryHourParamRepository {
    params: RwLock<HashMap<u8, HourParam>>,
}

impl InMemoryHourParamRepository {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl HourParamRepository for InMemoryHourParamRepository {
    async fn upsert(&self, param: &HourParam) -> Result<(), PersistenceError> {
        self.params.write().unwrap().insert(param.hour, *param);
        Ok(())
    }

    async fn get(&self, hour: u8) -> Result<Option<HourParam>, PersistenceError> {
        Ok(self.params.read().unwrap().get(&hour).copied())
    }

    async fn all(&self) -> Result<Vec<HourParam>, PersistenceError> {
        let mut all: Vec<HourParam> = self.params.read().unwrap().values().copied().collect();
        all.sort_by_key(|p| p.hour);
        Ok(all)
    }
}

#[derive(Default)]
pub struct InMemorySimulationTaskRepository {
    tasks: RwLock<HashMap<uuid::Uuid, SimulationTask>>,
}

impl InMemorySimulationTaskRepository {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl SimulationTaskRepository for InMemorySimulationTaskRepository {
    async fn insert(&self, task: &SimulationTask) -> Result<(), PersistenceError> {
        self.tasks.write().unwrap().insert(task.id, task.clone());
        Ok(())
    }

    async fn update(&self, task: &SimulationTask) -> Result<(), PersistenceError> {
        self.tasks.write().unwrap().insert(task.id, task.clone());
        Ok(())
    }

    async fn find_by_id(&self, id: uuid::Uuid) -> Result<Option<SimulationTask>, PersistenceError> {
        Ok(self.tasks.read().unwrap().get(&id).cloned())
    }

    async fn find_active_by_param_hash(&self, param_hash: &str) -> Result<Option<SimulationTask>, PersistenceError> {
        let store = self.tasks.read().unwrap();
        Ok(store.values().find(|t| t.param_hash == param_hash && t.is_active()).cloned())
    }

    async fn find_stuck_running(&self, owner_instance_id: &str) -> Result<Vec<SimulationTask>, PersistenceError> {
        let store = self.tasks.read().unwrap();
        Ok(store
            .values()
            .filter(|t| t.owner_instance_id == owner_instance_id && t.status == crate::domain::SimulationStatus::Running)
            .cloned()
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[tokio::test]
    async fn position_repository_round_trips_active_lookup() {
        let repo = InMemoryPositionRepository::new();
        let mut p = Position::new_pending("u1", "KRW-BTC", "s");
        p.record_entry_fill(dec!(100), dec!(1), dec!(97), Utc::now()).unwrap();
        repo.save(&p).await.unwrap();
        let found = repo.find_active("u1", "KRW-BTC").await.unwrap();
        assert!(found.is_some());
        assert_eq!(repo.count_active("u1").await.unwrap(), 1);
    }

    #[tokio::test]
    async fn simulation_task_dedup_by_param_hash_finds_active() {
        let repo = InMemorySimulationTaskRepository::new();
        let task = SimulationTask::new_pending(crate::domain::SimulationTaskType::SingleMarketBacktest, "hash1".into(), 1, "inst1".into());
        repo.insert(&task).await.unwrap();
        let found = repo.find_active_by_param_hash("hash1").await.unwrap();
        assert!(found.is_some());
    }
}
