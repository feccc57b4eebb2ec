//! Pure risk math: stop/trailing prices and phased position sizing (spec §4.5).

use crate::config::Config;
use rust_decimal::prelude::FromPrimitive;
use rust_decimal::Decimal;

fn clamp(value: Decimal, lo: Decimal, hi: Decimal) -> Decimal {
    value.max(lo).min(hi)
}

/// `entry - clamp(k*ATR, minRate*entry, maxRate*entry)` for a long.
pub fn stop_loss_price(entry: Decimal, atr: f64, k: f64, min_rate: Decimal, max_rate: Decimal) -> Decimal {
    let k_atr = Decimal::from_f64(k * atr).unwrap_or(Decimal::ZERO);
    let min_offset = min_rate.abs() * entry;
    let max_offset = max_rate.abs() * entry;
    let offset = clamp(k_atr, min_offset, max_offset);
    entry - offset
}

/// Convenience wrapper reading the ATR multiplier and rate band straight
/// from [`Config`] for entry-time stop-loss staging.
pub fn stop_loss_price_for_config(config: &Config, entry: Decimal, atr: f64) -> Decimal {
    stop_loss_price(entry, atr, config.stop_loss_atr_multiplier, config.stop_loss_rate, config.stop_loss_max_rate)
}

/// `highest - max(k*ATR, trailingRate*highest)`.
pub fn trailing_stop_price(highest: Decimal, atr: f64, k: f64, trailing_rate: Decimal) -> Decimal {
    let k_atr = Decimal::from_f64(k * atr).unwrap_or(Decimal::ZERO);
    let rate_offset = trailing_rate * highest;
    highest - k_atr.max(rate_offset)
}

/// `balance * maxPositionSizeRate * phaseRatio[phase]`, phase is 1-indexed
/// (entry_phase as recorded on [`crate::domain::Position`]).
pub fn position_size(balance: Decimal, max_position_size_rate: Decimal, entry_ratio: &[Decimal; 3], phase: u8) -> Decimal {
    let idx = (phase.saturating_sub(1)).min(2) as usize;
    balance * max_position_size_rate * entry_ratio[idx]
}

/// Convenience wrapper reading straight from [`Config`] for the first-phase entry.
pub fn position_size_for_config(config: &Config, balance: Decimal, phase: u8) -> Decimal {
    position_size(balance, config.max_position_size_rate, &config.entry_ratio, phase)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn stop_loss_clamps_atr_offset_into_rate_band() {
        let entry = dec!(100);
        // k*atr = 1.5*10 = 15, way above maxRate*entry = 0.05*100 = 5 -> clamp to 5
        let stop = stop_loss_price(entry, 10.0, 1.5, dec!(0.01), dec!(0.05));
        assert_eq!(stop, dec!(95));
    }

    #[test]
    fn trailing_stop_prefers_the_larger_of_atr_and_rate_offset() {
        let highest = dec!(200);
        // k*atr = 2*5=10, rate*highest = 0.02*200=4 -> max is 10
        let trailing = trailing_stop_price(highest, 5.0, 2.0, dec!(0.02));
        assert_eq!(trailing, dec!(190));
    }

    #[test]
    fn position_size_scales_by_phase_ratio() {
        let ratios = [dec!(0.5), dec!(0.3), dec!(0.2)];
        let size_phase1 = position_size(dec!(1_000_000), dec!(0.2), &ratios, 1);
        assert_eq!(size_phase1, dec!(100_000)); // 1_000_000*0.2*0.5
        let size_phase2 = position_size(dec!(1_000_000), dec!(0.2), &ratios, 2);
        assert_eq!(size_phase2, dec!(60_000));
    }
}
