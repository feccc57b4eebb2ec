//! Per-(user, market) tick: fetch window, evaluate exits or entries, submit
//! orders, persist the result (spec §4.6).

use crate::aggregator::aggregate;
use crate::config::Config;
use crate::domain::ports::ExchangeAdapter;
use crate::domain::repositories::{HourParamRepository, PositionRepository, TradeRecordRepository, TradeStatRepository};
use crate::domain::{CandleWindow, OrderSide, Position, PositionStatus, SignalKind, TradeRecord, TradeStat};
use crate::indicators::atr;
use crate::live::fill_waiter::await_fill;
use crate::position_manager::{evaluate_exit_trigger, PositionManager};
use crate::risk::{blocks_trading, RiskManager};
use crate::strategies::{closes_f64, highs_f64, lows_f64, AnalysisScratch, Strategy};
use anyhow::Context;
use chrono::{DateTime, Timelike, Utc};
use rust_decimal::Decimal;
use std::sync::Arc;
use tracing::{debug, warn};

const ATR_PERIOD: usize = 14;

/// Owns the adapters a tick needs; constructed once per process and shared
/// across users/markets (spec §5: transitions within one (user, market) are
/// serialized by the per-position mutex the caller holds around `tick`).
pub struct TradingLoop {
    config: Config,
    exchange: Arc<dyn ExchangeAdapter>,
    positions: Arc<dyn PositionRepository>,
    trade_records: Arc<dyn TradeRecordRepository>,
    trade_stats: Arc<dyn TradeStatRepository>,
    hour_params: Arc<dyn HourParamRepository>,
    risk_manager: RiskManager,
    position_manager: PositionManager,
}

impl TradingLoop {
    pub fn new(
        config: Config,
        exchange: Arc<dyn ExchangeAdapter>,
        positions: Arc<dyn PositionRepository>,
        trade_records: Arc<dyn TradeRecordRepository>,
        trade_stats: Arc<dyn TradeStatRepository>,
        hour_params: Arc<dyn HourParamRepository>,
    ) -> Self {
        let risk_manager = RiskManager::new(config.clone(), positions.clone());
        let position_manager = PositionManager::new(config.clone(), positions.clone());
        Self { config, exchange, positions, trade_records, trade_stats, hour_params, risk_manager, position_manager }
    }

    /// Looks up the tuning row for the hour `now` falls in, defaulting to
    /// the band-3 row on a missing or disabled entry (spec §4.8).
    async fn resolve_scratch(&self, now: DateTime<Utc>) -> AnalysisScratch {
        let hour = now.hour() as u8;
        let hour_param = self.hour_params.get(hour).await.ok().flatten();
        AnalysisScratch { now_hour: Some(hour), hour_param }
    }

    /// Runs one tick for `(user_id, market)` against `strategies` (more than
    /// one routes through the majority-vote aggregator). Never returns an
    /// error for a condition the spec treats as "log and continue" — callers
    /// in the scheduler only see failures worth surfacing to an operator.
    pub async fn tick(&self, user_id: &str, market: &str, strategies: &[&dyn Strategy]) -> anyhow::Result<()> {
        let min_required = if strategies.len() > 1 { self.config.min_window_aggregate } else { self.config.min_window_single };
        let raw = self.exchange.minute_candles(market, 1, min_required).await.context("fetching candle window")?;
        if raw.len() < min_required {
            debug!(market, available = raw.len(), min_required, "window too short; treating as Hold");
            return Ok(());
        }
        let window = CandleWindow::from_ascending(raw);
        let current_price = window.last().map(|c| c.close()).unwrap_or(Decimal::ZERO);
        let now = window.last().map(|c| c.candle_at_kst).unwrap_or_else(Utc::now);

        let active = self.positions.find_active(user_id, market).await.context("loading active position")?;

        match active {
            Some(mut position) if position.status == PositionStatus::Active => {
                self.handle_active(user_id, market, &mut position, &window, current_price, now, strategies).await
            }
            Some(position) => {
                debug!(market, status = ?position.status, "position mid-transition; skipping this tick");
                Ok(())
            }
            None => self.handle_flat(user_id, market, &window, current_price, now, strategies).await,
        }
    }

    async fn krw_balance(&self, user_id: &str) -> anyhow::Result<Decimal> {
        let accounts = self.exchange.accounts(user_id).await.context("fetching accounts")?;
        Ok(accounts.iter().find(|a| a.currency == "KRW").map(|a| a.balance).unwrap_or(Decimal::ZERO))
    }

    async fn handle_active(
        &self,
        user_id: &str,
        market: &str,
        position: &mut Position,
        window: &CandleWindow,
        current_price: Decimal,
        now: DateTime<Utc>,
        strategies: &[&dyn Strategy],
    ) -> anyhow::Result<()> {
        position.update_highest(current_price).context("updating the high-water mark")?;

        let closes = closes_f64(window);
        let highs = highs_f64(window);
        let lows = lows_f64(window);
        if let Some(current_atr) = atr(&highs, &lows, &closes, ATR_PERIOD) {
            self.position_manager.maybe_arm_trailing_stop(position, current_atr).context("arming trailing stop")?;
        }

        let scratch = self.resolve_scratch(now).await;
        let aggregate_result = aggregate(market, strategies, window, Some(&*position), &scratch);
        let aggregator_sell = aggregate_result.outcome == SignalKind::Sell;

        let balance = self.krw_balance(user_id).await?;
        let score = self.risk_manager.risk_score(user_id, balance, now).await;
        let max_loss_exceeded = blocks_trading(score.total);

        let Some(trigger) = evaluate_exit_trigger(position, current_price, aggregator_sell, max_loss_exceeded) else {
            self.position_manager.save(position).await.context("saving position after a quiet tick")?;
            return Ok(());
        };

        position.begin_exit().context("transitioning ACTIVE to EXITING")?;
        self.position_manager.save(position).await.context("persisting the EXITING transition")?;

        let order = self.exchange.sell_market(user_id, market, position.quantity).await.context("submitting market sell")?;
        let filled = match await_fill(self.exchange.as_ref(), user_id, &order.uuid, &self.config).await {
            Ok(handle) => handle,
            Err(e) => {
                warn!(market, error = %e, "sell did not fill; leaving the position EXITING for operator review");
                return Ok(());
            }
        };

        let exit_price = if filled.executed_volume.is_zero() { current_price } else { filled.executed_funds / filled.executed_volume };
        let entry_hour = position.entry_timestamps.first().map(|t| t.hour() as u8).unwrap_or(now.hour() as u8);
        let entry_time = position.entry_timestamps.first().copied().unwrap_or(now);
        let entry_price = position.avg_entry_price;
        let total_invested = position.total_invested;
        let strategy_name = position.strategy_name.clone();

        let realized = position.close(exit_price, self.config.trade_fee_rate, trigger.exit_reason(), now).context("closing the position")?;
        self.position_manager.save(position).await.context("persisting the CLOSED transition")?;

        for strategy in strategies {
            if strategy.name() == strategy_name {
                strategy.clear_position(market);
            }
        }

        let remaining_balance = balance + filled.executed_funds;
        self.trade_records
            .save(&TradeRecord {
                id: order.uuid.clone(),
                user_id: user_id.to_string(),
                market: market.to_string(),
                timestamp: now,
                side: OrderSide::Sell,
                price: exit_price,
                volume: filled.executed_volume,
                fee: filled.executed_funds * self.config.trade_fee_rate,
                krw_balance_after: remaining_balance,
                coin_balance_after: Decimal::ZERO,
                total_asset_after: remaining_balance,
                running_profit_rate: if total_invested.is_zero() { Decimal::ZERO } else { realized / total_invested },
                strategy_name: strategy_name.clone(),
                exit_reason: Some(trigger.exit_reason()),
            })
            .await
            .context("recording the sell trade")?;

        let profit_rate = if total_invested.is_zero() { Decimal::ZERO } else { realized / total_invested };
        self.trade_stats
            .save(&TradeStat {
                id: order.uuid,
                user_id: user_id.to_string(),
                market: market.to_string(),
                entry_time,
                exit_time: now,
                entry_price,
                exit_price,
                profit_rate,
                entry_z_score: 0.0,
                entry_execution_strength: 0.0,
                entry_hour,
                success: realized >= Decimal::ZERO,
                exit_reason: trigger.exit_reason(),
            })
            .await
            .context("recording the trade stat")?;

        Ok(())
    }

    async fn handle_flat(
        &self,
        user_id: &str,
        market: &str,
        window: &CandleWindow,
        current_price: Decimal,
        now: DateTime<Utc>,
        strategies: &[&dyn Strategy],
    ) -> anyhow::Result<()> {
        let scratch = self.resolve_scratch(now).await;
        let aggregate_result = aggregate(market, strategies, window, None, &scratch);
        if aggregate_result.outcome != SignalKind::Buy {
            return Ok(());
        }
        let Some(buy_vote) = aggregate_result.votes.iter().find(|v| v.signal.kind == SignalKind::Buy) else {
            return Ok(());
        };

        let balance = self.krw_balance(user_id).await?;
        let notional = crate::risk::math::position_size_for_config(&self.config, balance, 1);

        if let Err(denial) = self.risk_manager.check_entry(user_id, market, notional, balance, now).await {
            debug!(market, %denial, "entry denied by the risk manager");
            return Ok(());
        }

        let order = self.exchange.buy_market(user_id, market, notional).await.context("submitting market buy")?;
        let filled = await_fill(self.exchange.as_ref(), user_id, &order.uuid, &self.config).await.context("awaiting buy fill")?;
        if filled.executed_volume.is_zero() {
            warn!(market, "buy order filled with zero volume");
            return Ok(());
        }

        let fill_price = filled.executed_funds / filled.executed_volume;
        let closes = closes_f64(window);
        let highs = highs_f64(window);
        let lows = lows_f64(window);
        let stop_loss = match atr(&highs, &lows, &closes, ATR_PERIOD) {
            Some(current_atr) => crate::risk::math::stop_loss_price_for_config(&self.config, fill_price, current_atr),
            None => buy_vote.signal.stop_loss_price.unwrap_or(fill_price * (Decimal::ONE + self.config.stop_loss_rate)),
        };
        let strategy_name = buy_vote.strategy_name.clone();

        let mut position = Position::new_pending(user_id, market, &strategy_name);
        position.record_entry_fill(fill_price, filled.executed_volume, stop_loss, now).context("recording the entry fill")?;
        position.activate().context("activating the new position")?;
        self.position_manager.save(&position).await.context("persisting the new position")?;

        let remaining_balance = balance - filled.executed_funds;
        self.trade_records
            .save(&TradeRecord {
                id: order.uuid,
                user_id: user_id.to_string(),
                market: market.to_string(),
                timestamp: now,
                side: OrderSide::Buy,
                price: fill_price,
                volume: filled.executed_volume,
                fee: filled.executed_funds * self.config.trade_fee_rate,
                krw_balance_after: remaining_balance,
                coin_balance_after: filled.executed_volume,
                total_asset_after: remaining_balance + filled.executed_volume * current_price,
                running_profit_rate: Decimal::ZERO,
                strategy_name,
                exit_reason: None,
            })
            .await
            .context("recording the buy trade")?;

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::Candle;
    use crate::infrastructure::in_memory::{InMemoryHourParamRepository, InMemoryPositionRepository, InMemoryTradeRecordRepository, InMemoryTradeStatRepository};
    use crate::infrastructure::mock::MockExchangeAdapter;
    use crate::domain::ports::Account;
    use crate::strategies::BollingerBreakoutStrategy;
    use chrono::Duration as ChronoDuration;
    use rust_decimal_macros::dec;

    fn candle(ts_offset: i64, price: f64) -> Candle {
        let ts = Utc::now() + ChronoDuration::minutes(ts_offset);
        let price = Decimal::try_from(price).unwrap();
        Candle {
            market: "KRW-BTC".into(),
            candle_at_kst: ts,
            candle_at_utc: ts,
            opening_price: price,
            high_price: price,
            low_price: price,
            trade_price: price,
            candle_acc_trade_volume: dec!(10),
            candle_acc_trade_price: price * dec!(10),
            unit_minutes: 1,
        }
    }

    fn build_loop(adapter: Arc<MockExchangeAdapter>) -> TradingLoop {
        TradingLoop::new(
            Config::default(),
            adapter,
            Arc::new(InMemoryPositionRepository::new()),
            Arc::new(InMemoryTradeRecordRepository::new()),
            Arc::new(InMemoryTradeStatRepository::new()),
            Arc::new(InMemoryHourParamRepository::new()),
        )
    }

    #[tokio::test]
    async fn flat_tick_with_no_quorum_places_no_order() {
        let adapter = Arc::new(MockExchangeAdapter::new());
        let candles: Vec<Candle> = (0..40).map(|i| candle(i, 100.0)).collect();
        adapter.seed_candles("KRW-BTC", candles);
        adapter.seed_account("u1", vec![Account { currency: "KRW".into(), balance: dec!(1_000_000), locked: Decimal::ZERO, avg_buy_price: Decimal::ZERO }]);

        let trading_loop = build_loop(adapter);
        let strategy = BollingerBreakoutStrategy::new();
        let strategies: Vec<&dyn Strategy> = vec![&strategy];
        trading_loop.tick("u1", "KRW-BTC", &strategies).await.unwrap();

        let records = trading_loop.trade_records.find_by_user("u1", 10).await.unwrap();
        assert!(records.is_empty());
    }
}
