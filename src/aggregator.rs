//! Majority-vote signal aggregator (spec §4.3).

use crate::domain::{CandleWindow, Position, Signal, SignalKind};
use crate::strategies::{AnalysisScratch, Strategy};

/// One strategy's contribution to a tally, kept for audit even when it
/// didn't move the outcome.
#[derive(Debug, Clone)]
pub struct Vote {
    pub strategy_name: String,
    pub signal: Signal,
}

#[derive(Debug, Clone)]
pub struct AggregateResult {
    pub outcome: SignalKind,
    pub votes: Vec<Vote>,
    pub buy_votes: usize,
    pub sell_votes: usize,
    pub hold_votes: usize,
    pub enabled_count: usize,
    pub threshold: usize,
}

/// Strict-majority threshold over `n` participating strategies: `floor(n/2) + 1`.
pub fn majority_threshold(n: usize) -> usize {
    n / 2 + 1
}

/// Evaluate every strategy in `strategies` over `window` and tally votes.
/// Threads `position` and `scratch` (the current hour's tuning row, spec
/// §4.8) into each strategy's `analyze_for_backtest` path, which is pure in
/// `(window, position, scratch)` and thus equally correct as the live
/// decision path. Failing strategies are excluded from both the tally and
/// the denominator (spec §4.3, §7) — they are not counted as abstentions.
pub fn aggregate(
    market: &str,
    strategies: &[&dyn Strategy],
    window: &CandleWindow,
    position: Option<&Position>,
    scratch: &AnalysisScratch,
) -> AggregateResult {
    let mut votes = Vec::with_capacity(strategies.len());
    for strategy in strategies {
        if let Ok(signal) = strategy.analyze_for_backtest(market, window, position, scratch) {
            votes.push(Vote { strategy_name: strategy.name().to_string(), signal });
        }
    }
    finish(votes, position.is_some())
}

/// Call-site alias for backtest replay; identical to [`aggregate`].
pub fn aggregate_for_backtest(
    market: &str,
    strategies: &[&dyn Strategy],
    window: &CandleWindow,
    position: Option<&Position>,
    scratch: &AnalysisScratch,
) -> AggregateResult {
    aggregate(market, strategies, window, position, scratch)
}

fn finish(votes: Vec<Vote>, holding_position: bool) -> AggregateResult {
    let enabled_count = votes.len();
    let threshold = majority_threshold(enabled_count);
    let buy_votes = votes.iter().filter(|v| v.signal.kind == SignalKind::Buy).count();
    let sell_votes = votes.iter().filter(|v| v.signal.kind == SignalKind::Sell).count();
    let hold_votes = votes.iter().filter(|v| v.signal.kind == SignalKind::Hold).count();

    let outcome = if !holding_position && buy_votes >= threshold {
        SignalKind::Buy
    } else if holding_position && sell_votes >= threshold {
        SignalKind::Sell
    } else {
        SignalKind::Hold
    };

    AggregateResult { outcome, votes, buy_votes, sell_votes, hold_votes, enabled_count, threshold }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{Candle, ExitReason};
    use chrono::Utc;
    use rust_decimal_macros::dec;

    struct FixedStrategy {
        name: &'static str,
        signal: Signal,
    }

    impl Strategy for FixedStrategy {
        fn name(&self) -> &str {
            self.name
        }

        fn min_window(&self) -> usize {
            0
        }

        fn analyze(&self, _market: &str, _window: &CandleWindow) -> Result<Signal, crate::domain::StrategyError> {
            Ok(self.signal.clone())
        }
    }

    fn empty_window() -> CandleWindow {
        let ts = Utc::now();
        CandleWindow::from_ascending(vec![Candle {
            market: "KRW-BTC".into(),
            candle_at_kst: ts,
            candle_at_utc: ts,
            opening_price: dec!(100),
            high_price: dec!(100),
            low_price: dec!(100),
            trade_price: dec!(100),
            candle_acc_trade_volume: dec!(1),
            candle_acc_trade_price: dec!(100),
            unit_minutes: 1,
        }])
    }

    #[test]
    fn no_quorum_resolves_to_hold_and_emits_no_trade() {
        // 5 strategies: 1 buy, 2 sell, 2 hold; no position held.
        let strategies: Vec<Box<dyn Strategy>> = vec![
            Box::new(FixedStrategy { name: "a", signal: Signal::buy(dec!(100), dec!(105), dec!(97), "x") }),
            Box::new(FixedStrategy { name: "b", signal: Signal::sell(ExitReason::TakeProfit, "x") }),
            Box::new(FixedStrategy { name: "c", signal: Signal::sell(ExitReason::TakeProfit, "x") }),
            Box::new(FixedStrategy { name: "d", signal: Signal::hold() }),
            Box::new(FixedStrategy { name: "e", signal: Signal::hold() }),
        ];
        let refs: Vec<&dyn Strategy> = strategies.iter().map(|b| b.as_ref()).collect();
        let result = aggregate("KRW-BTC", &refs, &empty_window(), None, &AnalysisScratch::default());
        assert_eq!(result.outcome, SignalKind::Hold);
        assert_eq!(result.threshold, 3);
        assert_eq!(result.buy_votes, 1);
    }

    #[test]
    fn strict_majority_buy_triggers_when_no_position_held() {
        let strategies: Vec<Box<dyn Strategy>> = vec![
            Box::new(FixedStrategy { name: "a", signal: Signal::buy(dec!(100), dec!(105), dec!(97), "x") }),
            Box::new(FixedStrategy { name: "b", signal: Signal::buy(dec!(100), dec!(105), dec!(97), "x") }),
            Box::new(FixedStrategy { name: "c", signal: Signal::buy(dec!(100), dec!(105), dec!(97), "x") }),
            Box::new(FixedStrategy { name: "d", signal: Signal::hold() }),
        ];
        let refs: Vec<&dyn Strategy> = strategies.iter().map(|b| b.as_ref()).collect();
        let result = aggregate("KRW-BTC", &refs, &empty_window(), None, &AnalysisScratch::default());
        assert_eq!(result.outcome, SignalKind::Buy);
    }

    #[test]
    fn failing_strategies_are_excluded_from_denominator_not_counted_as_abstention() {
        struct FailingStrategy;
        impl Strategy for FailingStrategy {
            fn name(&self) -> &str {
                "failing"
            }
            fn min_window(&self) -> usize {
                1000
            }
            fn analyze(&self, _market: &str, _window: &CandleWindow) -> Result<Signal, crate::domain::StrategyError> {
                Err(crate::domain::StrategyError::WindowTooShort { strategy: "failing".into(), required: 1000, available: 1 })
            }
        }
        let failing = FailingStrategy;
        let buy_a = FixedStrategy { name: "a", signal: Signal::buy(dec!(100), dec!(105), dec!(97), "x") };
        let buy_b = FixedStrategy { name: "b", signal: Signal::buy(dec!(100), dec!(105), dec!(97), "x") };
        let refs: Vec<&dyn Strategy> = vec![&failing, &buy_a, &buy_b];
        let result = aggregate("KRW-BTC", &refs, &empty_window(), None, &AnalysisScratch::default());
        // Only 2 strategies actually voted; threshold = 2, both bought -> Buy.
        assert_eq!(result.enabled_count, 2);
        assert_eq!(result.outcome, SignalKind::Buy);
    }

    #[test]
    fn majority_threshold_is_strict() {
        assert_eq!(majority_threshold(5), 3);
        assert_eq!(majority_threshold(4), 3);
        assert_eq!(majority_threshold(2), 2);
    }
}
