//! Deterministic single-market replay (spec §4.7).

use super::report::{exit_reason_key, to_f64, AssetTracker, BacktestResult};
use crate::config::Config;
use crate::domain::{CandleWindow, OrderSide, Position, Signal, SignalKind, TradeRecord};
use crate::indicators::atr;
use crate::position_manager::evaluate_exit_trigger;
use crate::strategies::{closes_f64, highs_f64, lows_f64, AnalysisScratch, Strategy};
use chrono::Timelike;
use rust_decimal::Decimal;
use std::collections::BTreeMap;
use tracing::debug;

const ATR_PERIOD: usize = 14;

/// Replays `candles` (ascending) bar by bar starting at `min_required`,
/// mutating a local `(krwBalance, coinBalance, lastBuyPrice, highestSinceBuy,
/// position)` tuple exactly as the live loop would, but synchronously and
/// without any exchange/persistence I/O.
pub fn run_single_market(market: &str, candles: &CandleWindow, strategies: &[&dyn Strategy], config: &Config, initial_balance: Decimal) -> BacktestResult {
    let min_required = if strategies.len() > 1 { config.min_window_aggregate } else { config.min_window_single };
    let ascending = candles.ascending();

    let mut krw_balance = initial_balance;
    let mut coin_balance = Decimal::ZERO;
    let mut position: Option<Position> = None;
    let mut highest_since_buy = Decimal::ZERO;

    let mut trades = Vec::new();
    let mut buy_count = 0u32;
    let mut sell_count = 0u32;
    let mut win_count = 0u32;
    let mut lose_count = 0u32;
    let mut exit_reason_counts: BTreeMap<String, u32> = BTreeMap::new();
    let mut tracker = AssetTracker::new(initial_balance);

    if ascending.len() <= min_required {
        debug!(market, available = ascending.len(), min_required, "window never reaches the minimum bar count; no trades possible");
    }

    let first_close = ascending.first().map(|c| c.trade_price).unwrap_or(Decimal::ONE);
    let last_close = ascending.last().map(|c| c.trade_price).unwrap_or(first_close);

    for i in min_required..ascending.len() {
        let bar = &ascending[i];
        let window = CandleWindow::from_ascending(ascending[..=i].to_vec());
        let close = bar.trade_price;
        // No hour-param table is threaded through a pure replay; strategies
        // resolve the band-3 default for this hour (spec §4.8).
        let scratch = AnalysisScratch { now_hour: Some(bar.candle_at_kst.hour() as u8), hour_param: None };

        if let Some(pos) = position.as_mut() {
            if close > highest_since_buy {
                highest_since_buy = close;
            }
            let _ = pos.update_highest(close);

            let result = strategies
                .iter()
                .find(|s| s.name() == pos.strategy_name)
                .map(|s| s.analyze_for_backtest(market, &window, Some(pos), &scratch))
                .unwrap_or_else(|| Ok(Signal::hold()));

            if let Ok(signal) = result {
                let aggregator_sell = signal.kind == SignalKind::Sell;
                // Hard stop / trailing stop are checked the same way the live
                // loop checks them (spec §4.4 fixed order), not left purely to
                // the owning strategy's own vote.
                let trigger = evaluate_exit_trigger(pos, close, aggregator_sell, false);
                if let Some(trigger) = trigger {
                    let proceeds = close * pos.quantity * (Decimal::ONE - config.trade_fee_rate);
                    let reason = if aggregator_sell {
                        signal.exit_reason.unwrap_or_else(|| trigger.exit_reason())
                    } else {
                        trigger.exit_reason()
                    };
                    let realized = pos.close(close, config.trade_fee_rate, reason, bar.candle_at_kst).unwrap_or(Decimal::ZERO);

                    krw_balance += proceeds;
                    coin_balance = Decimal::ZERO;

                    *exit_reason_counts.entry(exit_reason_key(reason).to_string()).or_insert(0) += 1;
                    sell_count += 1;
                    if realized >= Decimal::ZERO {
                        win_count += 1;
                    } else {
                        lose_count += 1;
                    }

                    trades.push(TradeRecord {
                        id: format!("{market}-{i}-sell"),
                        user_id: "backtest".into(),
                        market: market.to_string(),
                        timestamp: bar.candle_at_kst,
                        side: OrderSide::Sell,
                        price: close,
                        volume: pos.quantity,
                        fee: close * pos.quantity * config.trade_fee_rate,
                        krw_balance_after: krw_balance,
                        coin_balance_after: coin_balance,
                        total_asset_after: krw_balance,
                        running_profit_rate: Decimal::try_from(total_asset_profit_rate(krw_balance, initial_balance)).unwrap_or(Decimal::ZERO),
                        strategy_name: pos.strategy_name.clone(),
                        exit_reason: pos.exit_reason,
                    });

                    position = None;
                    highest_since_buy = Decimal::ZERO;
                }
            }
        } else {
            let buyer = strategies.iter().find_map(|s| match s.analyze_for_backtest(market, &window, None, &scratch) {
                Ok(signal) if signal.kind == SignalKind::Buy => Some((s.name().to_string(), signal)),
                _ => None,
            });

            if let Some((strategy_name, signal)) = buyer {
                let invest_notional = krw_balance * config.buy_fee_buffer();
                if invest_notional > Decimal::ZERO && close > Decimal::ZERO {
                    let quantity = invest_notional / close;
                    krw_balance -= invest_notional;
                    coin_balance = quantity;
                    highest_since_buy = close;

                    let mut new_position = Position::new_pending("backtest", market, &strategy_name);
                    let closes = closes_f64(&window);
                    let highs = highs_f64(&window);
                    let lows = lows_f64(&window);
                    let stop_loss = match atr(&highs, &lows, &closes, ATR_PERIOD) {
                        Some(current_atr) => crate::risk::math::stop_loss_price_for_config(config, close, current_atr),
                        None => signal.stop_loss_price.unwrap_or(close * (Decimal::ONE + config.stop_loss_rate)),
                    };
                    let _ = new_position.record_entry_fill(close, quantity, stop_loss, bar.candle_at_kst);
                    let _ = new_position.activate();

                    buy_count += 1;
                    trades.push(TradeRecord {
                        id: format!("{market}-{i}-buy"),
                        user_id: "backtest".into(),
                        market: market.to_string(),
                        timestamp: bar.candle_at_kst,
                        side: OrderSide::Buy,
                        price: close,
                        volume: quantity,
                        fee: invest_notional * config.trade_fee_rate,
                        krw_balance_after: krw_balance,
                        coin_balance_after: coin_balance,
                        total_asset_after: krw_balance + coin_balance * close,
                        running_profit_rate: Decimal::try_from(total_asset_profit_rate(krw_balance + coin_balance * close, initial_balance)).unwrap_or(Decimal::ZERO),
                        strategy_name: strategy_name.clone(),
                        exit_reason: None,
                    });

                    position = Some(new_position);
                }
            }
        }

        let total_asset = krw_balance + coin_balance * close;
        tracker.observe(total_asset);
    }

    let final_asset = krw_balance + coin_balance * last_close;
    let total_profit_rate = if initial_balance.is_zero() { 0.0 } else { to_f64(final_asset - initial_balance) / to_f64(initial_balance) };
    let buy_and_hold_profit_rate = if first_close.is_zero() { 0.0 } else { to_f64(last_close - first_close) / to_f64(first_close) };
    let win_lose_total = win_count + lose_count;
    let win_rate = if win_lose_total == 0 { 0.0 } else { win_count as f64 / win_lose_total as f64 };

    BacktestResult {
        market: market.to_string(),
        initial_balance,
        final_balance: final_asset,
        total_profit_rate,
        max_profit_rate: tracker.max_profit_rate(),
        max_drawdown: tracker.max_drawdown(),
        buy_and_hold_profit_rate,
        buy_count,
        sell_count,
        win_count,
        lose_count,
        win_rate,
        trades,
        exit_reason_counts,
    }
}

fn total_asset_profit_rate(total_asset: Decimal, initial_balance: Decimal) -> f64 {
    if initial_balance.is_zero() {
        0.0
    } else {
        to_f64(total_asset - initial_balance) / to_f64(initial_balance)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::Candle;
    use crate::strategies::BollingerBreakoutStrategy;
    use chrono::{Duration, Utc};
    use rust_decimal_macros::dec;

    fn candle(ts_offset: i64, price: f64, volume: f64) -> Candle {
        let ts = Utc::now() + Duration::minutes(ts_offset);
        let price = Decimal::try_from(price).unwrap();
        Candle {
            market: "KRW-BTC".into(),
            candle_at_kst: ts,
            candle_at_utc: ts,
            opening_price: price,
            high_price: price,
            low_price: price,
            trade_price: price,
            candle_acc_trade_volume: Decimal::try_from(volume).unwrap(),
            candle_acc_trade_price: price * Decimal::try_from(volume).unwrap(),
            unit_minutes: 1,
        }
    }

    fn seed_window() -> CandleWindow {
        let mut candles = Vec::new();
        for i in 0..40 {
            let wobble = if i % 2 == 0 { 0.3 } else { -0.3 };
            candles.push(candle(i, 100.0 + wobble, 10.0));
        }
        for i in 40..50 {
            let step = (i - 39) as f64;
            candles.push(candle(i, 100.0 + step * 1.5, 40.0));
        }
        CandleWindow::from_ascending(candles)
    }

    #[test]
    fn replay_is_deterministic_across_repeated_runs() {
        let window = seed_window();
        let strategy = BollingerBreakoutStrategy::new();
        let strategies: Vec<&dyn Strategy> = vec![&strategy];
        let config = Config::default();

        let first = run_single_market("KRW-BTC", &window, &strategies, &config, dec!(1_000_000));
        let second = run_single_market("KRW-BTC", &window, &strategies, &config, dec!(1_000_000));

        assert_eq!(first.trades.len(), second.trades.len());
        assert_eq!(first.total_profit_rate, second.total_profit_rate);
        assert_eq!(first.buy_count, second.buy_count);
        assert_eq!(first.sell_count, second.sell_count);
    }

    #[test]
    fn zero_fee_backtest_matches_ideal_accounting() {
        let window = seed_window();
        let strategy = BollingerBreakoutStrategy::new();
        let strategies: Vec<&dyn Strategy> = vec![&strategy];
        let mut config = Config::default();
        config.trade_fee_rate = Decimal::ZERO;

        let result = run_single_market("KRW-BTC", &window, &strategies, &config, dec!(1_000_000));
        assert!(result.final_balance > Decimal::ZERO);
    }
}
