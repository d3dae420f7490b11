use crate::domain::candidate::{Candidate, ProfitTrend, Profitability};
use crate::domain::profile::RiskTolerance;
use crate::ranking::config::RankingConfig;
use serde::{Deserialize, Serialize};

pub const RISK_PENALTY_KEY: &str = "risk_penalty";
pub const PROFIT_BONUS_KEY: &str = "profit_bonus";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExclusionReason {
    /// Weekly change above the runaway threshold.
    RunawayMomentum,
    /// Unprofitable, volatile and rallying hard.
    SpeculativeCombination,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum RuleOutcome {
    Excluded(ExclusionReason),
    /// `risk_penalty` is zero or negative, `profit_bonus` zero or positive.
    Adjusted { risk_penalty: f64, profit_bonus: f64 },
}

/// Applies the exclusion, penalty and bonus rules to one candidate, in that order.
pub fn apply_rules(candidate: &Candidate, risk: RiskTolerance, cfg: &RankingConfig) -> RuleOutcome {
    let weekly = candidate.weekly_change_pct;
    let exceeds = |v: Option<f64>, limit: f64| v.is_some_and(|v| v > limit);

    if exceeds(weekly, cfg.runaway_momentum_pct) {
        return RuleOutcome::Excluded(ExclusionReason::RunawayMomentum);
    }

    let unprofitable_and_volatile = candidate.profitability == Profitability::Unprofitable
        && exceeds(candidate.volatility_pct, cfg.volatility_ceiling_pct);

    if unprofitable_and_volatile && exceeds(weekly, cfg.speculative_momentum_pct) {
        return RuleOutcome::Excluded(ExclusionReason::SpeculativeCombination);
    }

    let risk_penalty = if unprofitable_and_volatile {
        -cfg.risk_penalty.get(risk)
    } else {
        0.0
    };

    let profit_bonus = match (candidate.profitability, candidate.profit_trend) {
        (Profitability::Profitable, ProfitTrend::Increasing) => {
            cfg.profit_bonus_increasing.get(risk)
        }
        (Profitability::Profitable, _) => cfg.profit_bonus.get(risk),
        _ => 0.0,
    };

    RuleOutcome::Adjusted {
        risk_penalty,
        profit_bonus,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::candidate::fixtures;

    fn speculative(weekly: f64) -> Candidate {
        Candidate {
            weekly_change_pct: Some(weekly),
            volatility_pct: Some(45.0),
            profitability: Profitability::Unprofitable,
            ..fixtures::bare("SPEC")
        }
    }

    #[test]
    fn runaway_momentum_is_excluded_regardless_of_fundamentals() {
        let cfg = RankingConfig::default();
        let c = Candidate {
            weekly_change_pct: Some(60.0),
            profitability: Profitability::Profitable,
            profit_trend: ProfitTrend::Increasing,
            ..fixtures::bare("RUN")
        };
        for r in RiskTolerance::ALL {
            assert_eq!(
                apply_rules(&c, r, &cfg),
                RuleOutcome::Excluded(ExclusionReason::RunawayMomentum)
            );
        }
    }

    #[test]
    fn threshold_is_exclusive() {
        let cfg = RankingConfig::default();
        let c = Candidate {
            weekly_change_pct: Some(50.0),
            ..fixtures::bare("EDGE")
        };
        assert!(matches!(
            apply_rules(&c, RiskTolerance::Medium, &cfg),
            RuleOutcome::Adjusted { .. }
        ));
    }

    #[test]
    fn speculative_combination_is_excluded_not_penalized() {
        let cfg = RankingConfig::default();
        assert_eq!(
            apply_rules(&speculative(35.0), RiskTolerance::High, &cfg),
            RuleOutcome::Excluded(ExclusionReason::SpeculativeCombination)
        );
    }

    #[test]
    fn penalty_is_heavier_for_cautious_investors() {
        let cfg = RankingConfig::default();
        let penalty = |r| match apply_rules(&speculative(10.0), r, &cfg) {
            RuleOutcome::Adjusted { risk_penalty, .. } => risk_penalty,
            other => panic!("unexpected outcome: {other:?}"),
        };
        let low = penalty(RiskTolerance::Low);
        let high = penalty(RiskTolerance::High);
        assert!(low < 0.0 && high < 0.0);
        assert!(low.abs() > high.abs());
    }

    #[test]
    fn unknown_profitability_is_neither_penalized_nor_rewarded() {
        let cfg = RankingConfig::default();
        let c = Candidate {
            volatility_pct: Some(80.0),
            weekly_change_pct: Some(40.0),
            ..fixtures::bare("UNK")
        };
        assert_eq!(
            apply_rules(&c, RiskTolerance::Low, &cfg),
            RuleOutcome::Adjusted {
                risk_penalty: 0.0,
                profit_bonus: 0.0
            }
        );
    }

    #[test]
    fn increasing_profit_earns_the_larger_bonus() {
        let cfg = RankingConfig::default();
        let bonus = |trend, r| {
            let c = Candidate {
                profitability: Profitability::Profitable,
                profit_trend: trend,
                ..fixtures::bare("Q")
            };
            match apply_rules(&c, r, &cfg) {
                RuleOutcome::Adjusted { profit_bonus, .. } => profit_bonus,
                other => panic!("unexpected outcome: {other:?}"),
            }
        };
        for r in RiskTolerance::ALL {
            assert!(bonus(ProfitTrend::Increasing, r) > bonus(ProfitTrend::Stable, r));
        }
        assert!(
            bonus(ProfitTrend::Stable, RiskTolerance::Low)
                > bonus(ProfitTrend::Stable, RiskTolerance::High)
        );
    }
}
