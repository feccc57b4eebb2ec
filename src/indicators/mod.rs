//! Pure numeric indicator library. No I/O, no `Decimal` — these feed
//! strategy logic off `f64` closes/volumes pulled from a [`crate::domain::CandleWindow`].

/// Simple moving average of the last `n` values. `None` if `values.len() < n`.
pub fn sma(values: &[f64], n: usize) -> Option<f64> {
    if n == 0 || values.len() < n {
        return None;
    }
    let tail = &values[values.len() - n..];
    Some(tail.iter().sum::<f64>() / n as f64)
}

/// Exponential moving average, seeded from the SMA of the first `n` values
/// then smoothed forward with factor `2 / (n + 1)`. `None` if `values.len() < n`.
pub fn ema(values: &[f64], n: usize) -> Option<f64> {
    if n == 0 || values.len() < n {
        return None;
    }
    let k = 2.0 / (n as f64 + 1.0);
    let seed = values[..n].iter().sum::<f64>() / n as f64;
    let mut prev = seed;
    for &v in &values[n..] {
        prev = v * k + prev * (1.0 - k);
    }
    Some(prev)
}

/// Wilder's RSI over the last `n+1` closes (needs `n` deltas). Loss sum of
/// zero maps to RSI 100, matching Wilder's convention for a strictly rising window.
pub fn rsi(values: &[f64], n: usize) -> Option<f64> {
    if n == 0 || values.len() < n + 1 {
        return None;
    }
    let tail = &values[values.len() - (n + 1)..];
    let mut gains = 0.0;
    let mut losses = 0.0;
    for w in tail.windows(2) {
        let delta = w[1] - w[0];
        if delta >= 0.0 {
            gains += delta;
        } else {
            losses += -delta;
        }
    }
    let avg_gain = gains / n as f64;
    let avg_loss = losses / n as f64;
    if avg_loss == 0.0 {
        return Some(100.0);
    }
    let rs = avg_gain / avg_loss;
    Some(100.0 - 100.0 / (1.0 + rs))
}

/// One bar's true range given the previous close.
fn true_range(high: f64, low: f64, prev_close: f64) -> f64 {
    (high - low).max((high - prev_close).abs()).max((low - prev_close).abs())
}

/// Wilder's ATR over `n` true-range samples (needs `n+1` bars of
/// high/low/close). `None` if there are fewer than `n + 1` bars.
pub fn atr(highs: &[f64], lows: &[f64], closes: &[f64], n: usize) -> Option<f64> {
    if n == 0 || highs.len() < n + 1 || lows.len() != highs.len() || closes.len() != highs.len() {
        return None;
    }
    let start = highs.len() - (n + 1);
    let mut trs = Vec::with_capacity(n);
    for i in (start + 1)..highs.len() {
        trs.push(true_range(highs[i], lows[i], closes[i - 1]));
    }
    Some(trs.iter().sum::<f64>() / n as f64)
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Bollinger {
    pub middle: f64,
    pub upper: f64,
    pub lower: f64,
}

/// Bollinger bands using the population standard deviation (divide by `n`,
/// not `n - 1`) over the last `n` closes, `k` standard deviations wide.
pub fn bollinger(values: &[f64], n: usize, k: f64) -> Option<Bollinger> {
    let middle = sma(values, n)?;
    let tail = &values[values.len() - n..];
    let variance = tail.iter().map(|v| (v - middle).powi(2)).sum::<f64>() / n as f64;
    let sigma = variance.sqrt();
    Some(Bollinger {
        middle,
        upper: middle + k * sigma,
        lower: middle - k * sigma,
    })
}

/// Z-score of the most recent value against the population mean/σ of the
/// trailing `n` values (including the most recent one). A zero-variance
/// window (e.g. `n` identical volumes) yields `0.0` rather than `NaN`.
pub fn z_score(values: &[f64], n: usize) -> Option<f64> {
    if n == 0 || values.len() < n {
        return None;
    }
    let tail = &values[values.len() - n..];
    let mean = tail.iter().sum::<f64>() / n as f64;
    let variance = tail.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / n as f64;
    let sigma = variance.sqrt();
    if sigma == 0.0 {
        return Some(0.0);
    }
    let latest = *tail.last().unwrap();
    Some((latest - mean) / sigma)
}

#[cfg(test)]
mod tests {
    use super::*;

    const TOL: f64 = 1e-6;

    #[test]
    fn sma_matches_hand_computed_average() {
        let values = [1.0, 2.0, 3.0, 4.0, 5.0];
        assert!((sma(&values, 5).unwrap() - 3.0).abs() < TOL);
        assert_eq!(sma(&values, 6), None);
    }

    #[test]
    fn ema_seeds_from_sma_of_first_window() {
        let values = [1.0, 2.0, 3.0, 4.0, 5.0, 6.0];
        // n=3: seed = mean(1,2,3) = 2.0; k = 0.5
        // step 4: 4*0.5 + 2*0.5 = 3.0
        // step 5: 5*0.5 + 3*0.5 = 4.0
        // step 6: 6*0.5 + 4*0.5 = 5.0
        assert!((ema(&values, 3).unwrap() - 5.0).abs() < TOL);
    }

    #[test]
    fn rsi_is_100_when_losses_are_zero() {
        let values = [1.0, 2.0, 3.0, 4.0, 5.0];
        assert_eq!(rsi(&values, 4), Some(100.0));
    }

    #[test]
    fn rsi_window_exactly_at_minimum_is_defined() {
        let values = [10.0, 9.0, 11.0, 10.5, 12.0];
        let value = rsi(&values, 4).unwrap();
        assert!(value > 0.0 && value <= 100.0);
        assert_eq!(rsi(&values[..4], 4), None);
    }

    #[test]
    fn atr_matches_hand_computed_true_range_average() {
        // bars: (h, l, c)
        let highs = [10.0, 11.0, 12.0, 11.5];
        let lows = [9.0, 9.5, 10.5, 10.0];
        let closes = [9.5, 10.5, 11.0, 10.8];
        // n=3 trs from bars 1..3 using prev close from bar 0..2
        // bar1: max(11-9.5, |11-9.5|, |9.5-9.5|) = 1.5
        // bar2: max(12-10.5, |12-10.5|, |10.5-10.5|) = 1.5
        // bar3: max(11.5-10, |11.5-11|, |10-11|) = 1.5
        let value = atr(&highs, &lows, &closes, 3).unwrap();
        assert!((value - 1.5).abs() < TOL);
    }

    #[test]
    fn bollinger_uses_population_sigma() {
        let values = [2.0, 4.0, 4.0, 4.0, 5.0, 5.0, 7.0, 9.0];
        let bands = bollinger(&values, 8, 2.0).unwrap();
        assert!((bands.middle - 5.0).abs() < TOL);
        // population variance = 4.0 -> sigma = 2.0
        assert!((bands.upper - 9.0).abs() < TOL);
        assert!((bands.lower - 1.0).abs() < TOL);
    }

    #[test]
    fn z_score_zero_variance_window_is_zero() {
        let values = [100.0, 100.0, 100.0, 100.0];
        assert_eq!(z_score(&values, 4), Some(0.0));
    }

    #[test]
    fn z_score_matches_hand_computed_value() {
        let values = [10.0, 10.0, 10.0, 20.0];
        // mean = 12.5, variance = ((2.5)^2*3 + 7.5^2)/4 = (18.75 + 56.25)/4 = 18.75
        // sigma = sqrt(18.75) = 4.3301...
        // z = (20 - 12.5) / 4.3301 = 1.7320...
        let value = z_score(&values, 4).unwrap();
        assert!((value - 1.7320508).abs() < 1e-4);
    }
}
