//! Strategy registry and the bounded set of concrete strategies (spec §4.2).

mod bb_breakout;
mod rsi_reversal;
mod trend_atr;
mod z_volume_impulse;

pub use bb_breakout::BollingerBreakoutStrategy;
pub use rsi_reversal::RsiReversalStrategy;
pub use trend_atr::TrendAtrStrategy;
pub use z_volume_impulse::ZVolumeImpulseStrategy;

use crate::domain::{Candle, CandleWindow, HourParam, Position, Signal, StrategyError};
use std::collections::HashMap;
use std::sync::Mutex;

/// Per-call scratch area threaded into `analyze_for_backtest`, eliminating
/// the cyclic strategy/executor reference a thread-local exit-reason hint
/// would otherwise require (spec §9). Also carries the current hour's
/// tuning row so parameterized strategies can read it at decision time
/// (spec §4.8).
#[derive(Debug, Default, Clone)]
pub struct AnalysisScratch {
    pub now_hour: Option<u8>,
    pub hour_param: Option<HourParam>,
}

impl AnalysisScratch {
    /// The row a parameterized strategy should decide against: the stored
    /// row if present and enabled, else the band-3 default for `now_hour`
    /// (hour 0 if even that is unknown).
    pub fn resolved_hour_param(&self) -> HourParam {
        match self.hour_param {
            Some(param) if param.enabled => param,
            _ => HourParam::default_for_hour(self.now_hour.unwrap_or(0)),
        }
    }
}

/// A named, stateless-from-the-outside analyzer over a candle window (spec §4.2).
pub trait Strategy: Send + Sync {
    fn name(&self) -> &str;

    /// Minimum candle count this strategy needs to produce a verdict.
    fn min_window(&self) -> usize;

    /// Live path. May read/update per-market memoized state owned by the
    /// strategy, guarded internally by a per-market lock.
    fn analyze(&self, market: &str, window: &CandleWindow) -> Result<Signal, StrategyError>;

    /// Backtest path. Must be pure given `(window, position, scratch)` — no
    /// persistence or time-source access. The default delegates to
    /// `analyze` for strategies with no stateful dependency.
    fn analyze_for_backtest(
        &self,
        market: &str,
        window: &CandleWindow,
        _position: Option<&Position>,
        _scratch: &AnalysisScratch,
    ) -> Result<Signal, StrategyError> {
        self.analyze(market, window)
    }

    fn target_price(&self, _market: &str) -> Option<rust_decimal::Decimal> {
        None
    }

    fn stop_loss_price(&self, _market: &str) -> Option<rust_decimal::Decimal> {
        None
    }

    fn entry_price(&self, _market: &str) -> Option<rust_decimal::Decimal> {
        None
    }

    /// Called on CLOSE; the strategy must drop any memoized state for `market`.
    fn clear_position(&self, _market: &str) {}
}

/// Per-market memoized advisory prices, the shape every concrete strategy in
/// this module shares (spec §4.2's "memoized state ... guarded by a
/// per-market mutex").
#[derive(Debug, Default, Clone, Copy)]
pub(crate) struct Advisory {
    pub target_price: Option<rust_decimal::Decimal>,
    pub stop_loss_price: Option<rust_decimal::Decimal>,
    pub entry_price: Option<rust_decimal::Decimal>,
}

pub(crate) struct AdvisoryStore {
    inner: Mutex<HashMap<String, Advisory>>,
}

impl AdvisoryStore {
    pub(crate) fn new() -> Self {
        Self { inner: Mutex::new(HashMap::new()) }
    }

    pub(crate) fn set(&self, market: &str, advisory: Advisory) {
        self.inner.lock().unwrap().insert(market.to_string(), advisory);
    }

    pub(crate) fn get(&self, market: &str) -> Advisory {
        self.inner.lock().unwrap().get(market).copied().unwrap_or_default()
    }

    pub(crate) fn clear(&self, market: &str) {
        self.inner.lock().unwrap().remove(market);
    }
}

pub(crate) fn require_window(strategy: &str, window: &CandleWindow, required: usize) -> Result<(), StrategyError> {
    if window.len() < required {
        return Err(StrategyError::WindowTooShort {
            strategy: strategy.to_string(),
            required,
            available: window.len(),
        });
    }
    Ok(())
}

pub(crate) fn closes_f64(window: &CandleWindow) -> Vec<f64> {
    window.closes().iter().map(|d| d.to_string().parse().unwrap_or(0.0)).collect()
}

pub(crate) fn volumes_f64(window: &CandleWindow) -> Vec<f64> {
    window.volumes().iter().map(|d| d.to_string().parse().unwrap_or(0.0)).collect()
}

pub(crate) fn highs_f64(window: &CandleWindow) -> Vec<f64> {
    window.ascending().iter().map(|c| c.high_price.to_string().parse().unwrap_or(0.0)).collect()
}

pub(crate) fn lows_f64(window: &CandleWindow) -> Vec<f64> {
    window.ascending().iter().map(|c| c.low_price.to_string().parse().unwrap_or(0.0)).collect()
}

pub(crate) fn last_candle<'a>(window: &'a CandleWindow) -> Option<&'a Candle> {
    window.last()
}

/// Name-keyed lookup of enabled strategy instances (spec §9: "duck-typed
/// strategy selection by name" preserved as a registry keyed by `name()`).
pub struct StrategyRegistry {
    strategies: HashMap<String, Box<dyn Strategy>>,
}

impl StrategyRegistry {
    pub fn new() -> Self {
        Self { strategies: HashMap::new() }
    }

    pub fn register(&mut self, strategy: Box<dyn Strategy>) -> &mut Self {
        self.strategies.insert(strategy.name().to_string(), strategy);
        self
    }

    pub fn get(&self, name: &str) -> Option<&dyn Strategy> {
        self.strategies.get(name).map(|b| b.as_ref())
    }

    pub fn enabled(&self, names: &[String]) -> Vec<&dyn Strategy> {
        names.iter().filter_map(|n| self.get(n)).collect()
    }

    pub fn all(&self) -> Vec<&dyn Strategy> {
        self.strategies.values().map(|b| b.as_ref()).collect()
    }

    /// The full bounded set this crate ships, registered under their stable names.
    pub fn with_defaults() -> Self {
        let mut registry = Self::new();
        registry
            .register(Box::new(BollingerBreakoutStrategy::new()))
            .register(Box::new(ZVolumeImpulseStrategy::new()))
            .register(Box::new(RsiReversalStrategy::new()))
            .register(Box::new(TrendAtrStrategy::new()));
        registry
    }
}

impl Default for StrategyRegistry {
    fn default() -> Self {
        Self::with_defaults()
    }
}
