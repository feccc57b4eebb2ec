//! Ordered pre-trade risk pipeline (spec §4.5). Stateless over persisted
//! counters except for the cooldown registry, a concurrent map keyed by
//! user id (spec §5).

use crate::config::Config;
use crate::domain::repositories::PositionRepository;
use crate::domain::RiskDenial;
use crate::risk::score::{risk_score_report, RiskScore, RiskScoreInputs};
use chrono::{DateTime, Duration, Utc};
use rust_decimal::Decimal;
use std::collections::HashMap;
use std::sync::{Arc, RwLock};

pub struct RiskManager {
    config: Config,
    positions: Arc<dyn PositionRepository>,
    cooldowns: RwLock<HashMap<String, DateTime<Utc>>>,
}

impl RiskManager {
    pub fn new(config: Config, positions: Arc<dyn PositionRepository>) -> Self {
        Self { config, positions, cooldowns: RwLock::new(HashMap::new()) }
    }

    fn cooldown_until(&self, user_id: &str) -> Option<DateTime<Utc>> {
        self.cooldowns.read().unwrap().get(user_id).copied()
    }

    fn activate_cooldown(&self, user_id: &str, now: DateTime<Utc>) -> DateTime<Utc> {
        let until = now + Duration::minutes(self.config.cooldown_minutes);
        self.cooldowns.write().unwrap().insert(user_id.to_string(), until);
        until
    }

    /// Runs the full ordered pipeline, short-circuiting on the first deny.
    pub async fn check_entry(
        &self,
        user_id: &str,
        market: &str,
        requested_notional: Decimal,
        balance: Decimal,
        now: DateTime<Utc>,
    ) -> Result<(), RiskDenial> {
        // 1. Cooldown
        if let Some(until) = self.cooldown_until(user_id) {
            if now < until {
                return Err(RiskDenial::Cooldown { until });
            }
        }

        // 2. Max concurrent positions
        let current = self
            .positions
            .count_active(user_id)
            .await
            .unwrap_or(0);
        if current >= self.config.max_concurrent_positions {
            return Err(RiskDenial::MaxConcurrentPositions { current, cap: self.config.max_concurrent_positions });
        }

        // 3. Duplicate
        if let Ok(Some(existing)) = self.positions.find_active(user_id, market).await {
            if !existing.is_closed() {
                return Err(RiskDenial::DuplicatePosition { market: market.to_string() });
            }
        }

        // 4. Sizing cap
        let cap = balance * self.config.max_position_size_rate;
        if requested_notional > cap {
            return Err(RiskDenial::SizingCapExceeded { requested: requested_notional, cap });
        }

        // 5. Daily loss cap
        let losses = self.positions.todays_realized_loss_sum(user_id, now).await.unwrap_or(Decimal::ZERO);
        let loss_cap = -balance * self.config.max_daily_loss_rate;
        if losses <= loss_cap {
            return Err(RiskDenial::DailyLossCapExceeded { losses, cap: loss_cap });
        }

        // 6. Consecutive losses
        let recent = self
            .positions
            .recent_closed(user_id, self.config.max_consecutive_losses)
            .await
            .unwrap_or_default();
        let streak = recent.iter().take_while(|p| p.realized_pnl < Decimal::ZERO).count();
        if streak >= self.config.max_consecutive_losses {
            self.activate_cooldown(user_id, now);
            return Err(RiskDenial::ConsecutiveLosses { count: streak });
        }

        Ok(())
    }

    /// Operator-facing accessor for the 0-100 risk score (spec §4.5), broken
    /// down by weighted component. `balance` is the caller's current total
    /// asset figure, needed to turn the daily-loss sum into a utilization ratio.
    pub async fn risk_score(&self, user_id: &str, balance: Decimal, now: DateTime<Utc>) -> RiskScore {
        let cooldown_active = self.cooldown_until(user_id).map(|until| now < until).unwrap_or(false);

        let active = self.positions.count_active(user_id).await.unwrap_or(0);
        let position_utilization = if self.config.max_concurrent_positions == 0 {
            0.0
        } else {
            active as f64 / self.config.max_concurrent_positions as f64
        };

        let losses = self.positions.todays_realized_loss_sum(user_id, now).await.unwrap_or(Decimal::ZERO);
        let loss_cap = balance * self.config.max_daily_loss_rate;
        let daily_loss_utilization = if loss_cap.is_zero() {
            0.0
        } else {
            (-losses / loss_cap).to_string().parse().unwrap_or(0.0)
        };

        let recent = self.positions.recent_closed(user_id, self.config.max_consecutive_losses).await.unwrap_or_default();
        let streak = recent.iter().take_while(|p| p.realized_pnl < Decimal::ZERO).count();
        let consecutive_loss_utilization = if self.config.max_consecutive_losses == 0 {
            0.0
        } else {
            streak as f64 / self.config.max_consecutive_losses as f64
        };

        risk_score_report(RiskScoreInputs { position_utilization, daily_loss_utilization, consecutive_loss_utilization, cooldown_active })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::errors::PersistenceError;
    use crate::domain::Position;
    use async_trait::async_trait;
    use rust_decimal_macros::dec;
    use std::sync::Mutex;

    struct FakePositions {
        active_count: usize,
        active_for_market: Option<Position>,
        loss_sum: Decimal,
        recent: Mutex<Vec<Position>>,
    }

    #[async_trait]
    impl PositionRepository for FakePositions {
        async fn save(&self, _position: &Position) -> Result<(), PersistenceError> {
            Ok(())
        }
        async fn find_active(&self, _user_id: &str, _market: &str) -> Result<Option<Position>, PersistenceError> {
            Ok(self.active_for_market.clone())
        }
        async fn count_active(&self, _user_id: &str) -> Result<usize, PersistenceError> {
            Ok(self.active_count)
        }
        async fn todays_realized_loss_sum(&self, _user_id: &str, _now: DateTime<Utc>) -> Result<Decimal, PersistenceError> {
            Ok(self.loss_sum)
        }
        async fn recent_closed(&self, _user_id: &str, limit: usize) -> Result<Vec<Position>, PersistenceError> {
            let recent = self.recent.lock().unwrap();
            Ok(recent.iter().take(limit).cloned().collect())
        }
        async fn find_stale_non_closed(&self, _older_than: DateTime<Utc>) -> Result<Vec<Position>, PersistenceError> {
            Ok(Vec::new())
        }
    }

    fn losing_position() -> Position {
        let mut p = Position::new_pending("u1", "KRW-BTC", "s");
        p.record_entry_fill(dec!(100), dec!(1), dec!(97), Utc::now()).unwrap();
        p.activate().unwrap();
        p.begin_exit().unwrap();
        p.close(dec!(95), dec!(0.0005), crate::domain::ExitReason::StopLossFixed, Utc::now()).unwrap();
        p
    }

    #[tokio::test]
    async fn consecutive_losses_denies_and_activates_cooldown() {
        let fake = FakePositions {
            active_count: 0,
            active_for_market: None,
            loss_sum: Decimal::ZERO,
            recent: Mutex::new(vec![losing_position(), losing_position(), losing_position()]),
        };
        let mut config = Config::default();
        config.max_consecutive_losses = 3;
        let manager = RiskManager::new(config, Arc::new(fake));
        let now = Utc::now();
        let result = manager.check_entry("u1", "KRW-BTC", dec!(10_000), dec!(1_000_000), now).await;
        assert!(matches!(result, Err(RiskDenial::ConsecutiveLosses { count: 3 })));

        // A subsequent call within the cooldown window denies with Cooldown.
        let result2 = manager.check_entry("u1", "KRW-BTC", dec!(10_000), dec!(1_000_000), now).await;
        assert!(matches!(result2, Err(RiskDenial::Cooldown { .. })));
    }

    #[tokio::test]
    async fn duplicate_position_is_denied() {
        let mut active = Position::new_pending("u1", "KRW-BTC", "s");
        active.record_entry_fill(dec!(100), dec!(1), dec!(97), Utc::now()).unwrap();
        let fake = FakePositions {
            active_count: 1,
            active_for_market: Some(active),
            loss_sum: Decimal::ZERO,
            recent: Mutex::new(Vec::new()),
        };
        let manager = RiskManager::new(Config::default(), Arc::new(fake));
        let result = manager.check_entry("u1", "KRW-BTC", dec!(10_000), dec!(1_000_000), Utc::now()).await;
        assert!(matches!(result, Err(RiskDenial::DuplicatePosition { .. })));
    }

    #[tokio::test]
    async fn sizing_cap_is_enforced() {
        let fake = FakePositions {
            active_count: 0,
            active_for_market: None,
            loss_sum: Decimal::ZERO,
            recent: Mutex::new(Vec::new()),
        };
        let manager = RiskManager::new(Config::default(), Arc::new(fake));
        // cap = 1_000_000 * 0.2 = 200_000
        let result = manager.check_entry("u1", "KRW-BTC", dec!(300_000), dec!(1_000_000), Utc::now()).await;
        assert!(matches!(result, Err(RiskDenial::SizingCapExceeded { .. })));
    }

    #[tokio::test]
    async fn risk_score_blocks_trading_once_cooldown_is_active() {
        let fake = FakePositions {
            active_count: 0,
            active_for_market: None,
            loss_sum: Decimal::ZERO,
            recent: Mutex::new(vec![losing_position(), losing_position(), losing_position()]),
        };
        let mut config = Config::default();
        config.max_consecutive_losses = 3;
        let manager = RiskManager::new(config, Arc::new(fake));
        let now = Utc::now();
        let _ = manager.check_entry("u1", "KRW-BTC", dec!(10_000), dec!(1_000_000), now).await;

        let score = manager.risk_score("u1", dec!(1_000_000), now).await;
        assert!(score.cooldown_active);
        assert_eq!(score.total, 100.0);
    }
}
