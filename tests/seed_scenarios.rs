//! End-to-end seed scenarios exercised against the public API surface,
//! rather than a module's own unit tests.

use chrono::{Duration, Utc};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use upbit_trader::backtest::run_single_market;
use upbit_trader::config::Config;
use upbit_trader::domain::{Candle, CandleWindow, ExitReason};
use upbit_trader::strategies::{BollingerBreakoutStrategy, Strategy};

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

/// Seed scenario 2: a breakout buy followed by a sharp drawdown must close
/// the position on the hard stop-loss, independent of whether the owning
/// strategy itself ever casts a Sell vote (BollingerBreakoutStrategy's own
/// backtest path only votes Sell on take-profit).
#[test]
fn stop_loss_trigger_closes_the_position() {
    let mut candles = Vec::new();
    // 30 ranging bars so the strategy's min window (30) is satisfied.
    for i in 0..30 {
        let wobble = if i % 2 == 0 { 0.3 } else { -0.3 };
        candles.push(candle(i, 100.0 + wobble, 10.0));
    }
    // A volume-spiking breakout bar that the strategy buys.
    candles.push(candle(30, 103.0, 50.0));
    // A sharp 5% drawdown over the next 10 bars, well past the -3% stop.
    for i in 1..=10 {
        let price = 103.0 - (i as f64) * 0.5;
        candles.push(candle(30 + i, price, 10.0));
    }

    let window = CandleWindow::from_ascending(candles);
    let strategy = BollingerBreakoutStrategy::new();
    let strategies: Vec<&dyn Strategy> = vec![&strategy];
    let config = Config::default();

    let result = run_single_market("KRW-BTC", &window, &strategies, &config, dec!(1_000_000));

    assert_eq!(result.buy_count, 1);
    assert_eq!(result.sell_count, 1);
    assert_eq!(*result.exit_reason_counts.get("STOP_LOSS_FIXED").unwrap_or(&0), 1);
    let sell = result.trades.iter().find(|t| t.exit_reason.is_some()).expect("a sell trade must be recorded");
    assert_eq!(sell.exit_reason, Some(ExitReason::StopLossFixed));
    assert!(result.total_profit_rate < 0.0, "a stopped-out trade should show a loss");
}

/// Seed scenario 6: three markets, worker pool core=2/max=4/queue=10 (the
/// configured defaults). All three complete and the summary's average is
/// the arithmetic mean of the three individual profit rates.
#[test]
fn multi_market_fan_out_averages_match_arithmetic_mean() {
    use upbit_trader::backtest::{run_multi_market, MarketJob};

    let config = Config::default();
    assert_eq!(config.backtest_worker_core, 2);
    assert_eq!(config.backtest_worker_max, 4);
    assert_eq!(config.backtest_queue, 10);

    fn window(n: i64) -> CandleWindow {
        let wobble = |i: i64| if i % 2 == 0 { 0.3 } else { -0.3 };
        CandleWindow::from_ascending((0..n).map(|i| candle(i, 100.0 + wobble(i), 10.0)).collect())
    }

    let strategy = BollingerBreakoutStrategy::new();
    let strategies: Vec<&dyn Strategy> = vec![&strategy];
    let jobs = vec![
        MarketJob { market: "KRW-BTC".into(), candles: window(40), strategies: strategies.clone() },
        MarketJob { market: "KRW-ETH".into(), candles: window(40), strategies: strategies.clone() },
        MarketJob { market: "KRW-XRP".into(), candles: window(40), strategies },
    ];

    let summary = run_multi_market(jobs, &config, dec!(1_000_000));
    assert_eq!(summary.per_market.len(), 3);
    let expected_average: f64 = summary.per_market.iter().map(|r| r.total_profit_rate).sum::<f64>() / 3.0;
    assert!((summary.average_profit_rate - expected_average).abs() < 1e-9);
}
