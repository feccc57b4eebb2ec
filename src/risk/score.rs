//! 0-100 weighted risk score (spec §4.5).

/// Inputs the score is computed from, already normalized to a [0, 1] utilization.
#[derive(Debug, Clone, Copy)]
pub struct RiskScoreInputs {
    pub position_utilization: f64,
    pub daily_loss_utilization: f64,
    pub consecutive_loss_utilization: f64,
    pub cooldown_active: bool,
}

/// 30% position utilization + 40% daily-loss utilization + 30%
/// consecutive-loss utilization; an active cooldown forces the score to 100.
/// Scores >= 100 block trading.
pub fn risk_score(inputs: RiskScoreInputs) -> f64 {
    if inputs.cooldown_active {
        return 100.0;
    }
    let raw = 0.30 * inputs.position_utilization.clamp(0.0, 1.0)
        + 0.40 * inputs.daily_loss_utilization.clamp(0.0, 1.0)
        + 0.30 * inputs.consecutive_loss_utilization.clamp(0.0, 1.0);
    (raw * 100.0).min(100.0)
}

pub fn blocks_trading(score: f64) -> bool {
    score >= 100.0
}

/// The weighted components alongside the total, for the operator-facing
/// accessor the formula in this module doesn't otherwise expose.
#[derive(Debug, Clone, Copy)]
pub struct RiskScore {
    pub position_utilization: f64,
    pub daily_loss_utilization: f64,
    pub consecutive_loss_utilization: f64,
    pub cooldown_active: bool,
    pub total: f64,
}

pub fn risk_score_report(inputs: RiskScoreInputs) -> RiskScore {
    RiskScore {
        position_utilization: inputs.position_utilization.clamp(0.0, 1.0),
        daily_loss_utilization: inputs.daily_loss_utilization.clamp(0.0, 1.0),
        consecutive_loss_utilization: inputs.consecutive_loss_utilization.clamp(0.0, 1.0),
        cooldown_active: inputs.cooldown_active,
        total: risk_score(inputs),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cooldown_forces_max_score() {
        let inputs = RiskScoreInputs {
            position_utilization: 0.0,
            daily_loss_utilization: 0.0,
            consecutive_loss_utilization: 0.0,
            cooldown_active: true,
        };
        assert_eq!(risk_score(inputs), 100.0);
        assert!(blocks_trading(risk_score(inputs)));
    }

    #[test]
    fn weighted_combination_matches_spec_formula() {
        let inputs = RiskScoreInputs {
            position_utilization: 1.0,
            daily_loss_utilization: 0.5,
            consecutive_loss_utilization: 0.0,
            cooldown_active: false,
        };
        // 0.30*1.0 + 0.40*0.5 + 0.30*0.0 = 0.50 -> 50.0
        assert!((risk_score(inputs) - 50.0).abs() < 1e-9);
        assert!(!blocks_trading(risk_score(inputs)));
    }

    #[test]
    fn full_utilization_across_all_three_blocks_trading() {
        let inputs = RiskScoreInputs {
            position_utilization: 1.0,
            daily_loss_utilization: 1.0,
            consecutive_loss_utilization: 1.0,
            cooldown_active: false,
        };
        assert!(blocks_trading(risk_score(inputs)));
    }
}
