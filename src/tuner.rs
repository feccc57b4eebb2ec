//! Daily auto-tuner: maps each hour bucket's trailing win rate onto a fixed
//! parameter band (spec §4.8).

use crate::config::{Config, TunerBand};
use crate::domain::repositories::{HourParamRepository, TradeStatRepository};
use crate::domain::HourParam;
use chrono::{DateTime, Duration, Utc};
use std::sync::Arc;
use tracing::info;

pub struct Tuner {
    config: Config,
    trade_stats: Arc<dyn TradeStatRepository>,
    hour_params: Arc<dyn HourParamRepository>,
}

impl Tuner {
    pub fn new(config: Config, trade_stats: Arc<dyn TradeStatRepository>, hour_params: Arc<dyn HourParamRepository>) -> Self {
        Self { config, trade_stats, hour_params }
    }

    /// The default scheduled entry point (cron 04:30 local, §4.8): tunes over
    /// the full previous calendar day.
    pub async fn tune_yesterday(&self) -> anyhow::Result<usize> {
        let yesterday = (Utc::now() - Duration::days(1)).date_naive();
        let from = yesterday.and_hms_opt(0, 0, 0).expect("midnight is always valid").and_utc();
        let to = yesterday.and_hms_opt(23, 59, 59).expect("23:59:59 is always valid").and_utc();
        self.tune_range(from, to).await
    }

    /// Testable core: tunes over an explicit `[from, to]` range, returning the
    /// number of hour rows written. Hours with fewer than
    /// `config.tuner_min_samples` trades are skipped entirely — no row change
    /// — which the repository's `hourly_aggregate` already enforces.
    pub async fn tune_range(&self, from: DateTime<Utc>, to: DateTime<Utc>) -> anyhow::Result<usize> {
        let aggregates = self.trade_stats.hourly_aggregate(from, to, self.config.tuner_min_samples).await?;
        let mut updated = 0;
        for agg in aggregates {
            let band = band_for(&self.config.tuner_bands, agg.win_rate);
            let param = HourParam {
                hour: agg.hour,
                min_execution_strength: band.min_execution_strength,
                min_z_score: band.min_z_score,
                volume_multiplier: band.volume_multiplier,
                sample_count: agg.sample_count,
                win_rate: agg.win_rate,
                avg_profit_rate: agg.avg_profit_rate,
                enabled: true,
            };
            self.hour_params.upsert(&param).await?;
            updated += 1;
            info!(hour = agg.hour, win_rate = agg.win_rate, sample_count = agg.sample_count, "tuned hour bucket");
        }
        Ok(updated)
    }
}

fn band_for(bands: &crate::config::TunerBands, win_rate: f64) -> TunerBand {
    if win_rate < 0.45 {
        bands.tighten
    } else if win_rate > 0.60 {
        bands.loosen
    } else {
        bands.default
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::ExitReason;
    use crate::domain::TradeStat;
    use crate::infrastructure::in_memory::{InMemoryHourParamRepository, InMemoryTradeStatRepository};
    use rust_decimal_macros::dec;

    fn stat(hour: u8, success: bool, entry_time: DateTime<Utc>) -> TradeStat {
        TradeStat {
            id: uuid::Uuid::new_v4().to_string(),
            user_id: "u1".into(),
            market: "KRW-BTC".into(),
            entry_time,
            exit_time: entry_time + Duration::minutes(30),
            entry_price: dec!(100),
            exit_price: if success { dec!(105) } else { dec!(98) },
            profit_rate: if success { dec!(0.05) } else { dec!(-0.02) },
            entry_z_score: 2.0,
            entry_execution_strength: 70.0,
            entry_hour: hour,
            success,
            exit_reason: if success { ExitReason::TakeProfit } else { ExitReason::StopLossFixed },
        }
    }

    #[tokio::test]
    async fn hour_with_two_thirds_win_rate_loosens_its_band() {
        let trade_stats = Arc::new(InMemoryTradeStatRepository::new());
        let hour_params = Arc::new(InMemoryHourParamRepository::new());

        let from = Utc::now() - Duration::days(1);
        let to = Utc::now();
        for i in 0..30 {
            let success = i < 20;
            trade_stats.save(&stat(9, success, from + Duration::minutes(i))).await.unwrap();
        }

        let tuner = Tuner::new(Config::default(), trade_stats, hour_params.clone());
        let updated = tuner.tune_range(from, to).await.unwrap();
        assert_eq!(updated, 1);

        let param = hour_params.get(9).await.unwrap().expect("hour 9 row must exist");
        assert_eq!(param.sample_count, 30);
        assert!((param.win_rate - 20.0 / 30.0).abs() < 1e-9);
        assert_eq!(param.min_execution_strength, 60.0);
        assert_eq!(param.min_z_score, 1.2);
        assert_eq!(param.volume_multiplier, 3.5);
    }

    #[tokio::test]
    async fn under_sampled_hour_is_skipped() {
        let trade_stats = Arc::new(InMemoryTradeStatRepository::new());
        let hour_params = Arc::new(InMemoryHourParamRepository::new());
        let from = Utc::now() - Duration::days(1);
        let to = Utc::now();
        for i in 0..5 {
            trade_stats.save(&stat(14, true, from + Duration::minutes(i))).await.unwrap();
        }

        let tuner = Tuner::new(Config::default(), trade_stats, hour_params.clone());
        let updated = tuner.tune_range(from, to).await.unwrap();
        assert_eq!(updated, 0);
        assert!(hour_params.get(14).await.unwrap().is_none());
    }
}
