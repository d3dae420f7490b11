use crate::domain::candidate::Candidate;
use crate::domain::profile::InvestorProfile;
use crate::domain::recommendation::{ScoredCandidate, Shortlist};
use crate::ranking::config::{ConfigError, FactorWeights, RankingConfig};
use crate::ranking::factor::Factor;
use crate::ranking::filters::{diversify, exclude_registered, filter_affordable};
use crate::ranking::normalize::normalize;
use crate::ranking::rules::{self, ExclusionReason, RuleOutcome, PROFIT_BONUS_KEY, RISK_PENALTY_KEY};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Turns a candidate pool into a per-investor shortlist.
///
/// Holds only validated configuration. Ranking borrows the pool immutably and keeps no state
/// between calls, so one engine can serve any number of investors concurrently.
#[derive(Debug, Clone)]
pub struct RankingEngine {
    config: RankingConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Exclusion {
    pub ticker: String,
    pub reason: ExclusionReason,
}

/// Candidate counts after each stage, for logging and auditing a run.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StageCounts {
    pub pool: usize,
    pub affordable: usize,
    pub scored: usize,
    pub diversified: usize,
    pub after_registered: usize,
    pub registered_exclusion_applied: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RankingReport {
    pub shortlist: Shortlist,
    pub counts: StageCounts,
    pub excluded: Vec<Exclusion>,
}

impl RankingEngine {
    pub fn new(config: RankingConfig) -> Result<Self, ConfigError> {
        config.validate()?;
        Ok(Self { config })
    }

    pub fn config(&self) -> &RankingConfig {
        &self.config
    }

    pub fn rank(&self, pool: &[Candidate], profile: &InvestorProfile) -> Shortlist {
        self.rank_with_report(pool, profile).shortlist
    }

    /// Affordability -> normalize/score/rules -> sort -> diversify -> registered exclusion ->
    /// truncate. An empty stage short-circuits to an empty shortlist.
    pub fn rank_with_report(&self, pool: &[Candidate], profile: &InvestorProfile) -> RankingReport {
        let mut counts = StageCounts {
            pool: pool.len(),
            ..Default::default()
        };
        let report = |counts: StageCounts, excluded: Vec<Exclusion>, items| RankingReport {
            shortlist: Shortlist { items },
            counts,
            excluded,
        };

        let affordable = filter_affordable(pool, profile.budget, self.config.lot_size);
        counts.affordable = affordable.len();
        if affordable.is_empty() {
            return report(counts, Vec::new(), Vec::new());
        }

        let (mut scored, excluded) = self.score(&affordable, profile);
        counts.scored = scored.len();
        if scored.is_empty() {
            return report(counts, excluded, Vec::new());
        }

        scored.sort_by(|a, b| {
            b.score
                .total_cmp(&a.score)
                .then_with(|| a.candidate.ticker.cmp(&b.candidate.ticker))
                .then_with(|| a.candidate.security_id.cmp(&b.candidate.security_id))
        });

        let diversified = diversify(scored, self.config.sector_cap);
        counts.diversified = diversified.len();

        let (mut remaining, applied) = exclude_registered(
            diversified,
            &profile.registered,
            self.config.registered_exclusion_min,
        );
        counts.after_registered = remaining.len();
        counts.registered_exclusion_applied = applied;

        remaining.truncate(self.config.shortlist_size);

        tracing::debug!(
            user_id = ?profile.user_id,
            pool = counts.pool,
            affordable = counts.affordable,
            scored = counts.scored,
            diversified = counts.diversified,
            after_registered = counts.after_registered,
            shortlisted = remaining.len(),
            "ranking complete"
        );

        report(counts, excluded, remaining)
    }

    /// Normalizes every factor across `pool`, computes composite scores and applies the
    /// exclusion/penalty/bonus rules. Returns survivors in pool order plus the exclusions.
    pub fn score(
        &self,
        pool: &[&Candidate],
        profile: &InvestorProfile,
    ) -> (Vec<ScoredCandidate>, Vec<Exclusion>) {
        let (horizon, weight_risk) = profile.weight_key();
        let Some(weights) = self.config.weights.get(horizon, weight_risk) else {
            // Unreachable with a validated config.
            return (Vec::new(), Vec::new());
        };
        let invert_volatility = profile.is_risk_averse();
        let risk = profile.risk_level();

        let columns: Vec<(Factor, Vec<f64>)> = Factor::ALL
            .iter()
            .map(|&factor| {
                let raw: Vec<Option<f64>> = pool.iter().map(|c| factor.raw(c)).collect();
                let invert = factor == Factor::Volatility && invert_volatility;
                (factor, normalize(&raw, invert))
            })
            .collect();

        let mut scored = Vec::with_capacity(pool.len());
        let mut excluded = Vec::new();

        for (idx, candidate) in pool.iter().enumerate() {
            let (risk_penalty, profit_bonus) = match rules::apply_rules(candidate, risk, &self.config)
            {
                RuleOutcome::Excluded(reason) => {
                    excluded.push(Exclusion {
                        ticker: candidate.ticker.clone(),
                        reason,
                    });
                    continue;
                }
                RuleOutcome::Adjusted {
                    risk_penalty,
                    profit_bonus,
                } => (risk_penalty, profit_bonus),
            };

            let row: Vec<(Factor, f64)> = columns.iter().map(|(f, col)| (*f, col[idx])).collect();
            let (mut score, mut breakdown) = composite(&row, weights);
            let normalized = row
                .iter()
                .map(|(f, n)| (f.as_str().to_string(), *n))
                .collect();

            breakdown.insert(RISK_PENALTY_KEY.to_string(), risk_penalty);
            breakdown.insert(PROFIT_BONUS_KEY.to_string(), profit_bonus);
            score += risk_penalty + profit_bonus;

            scored.push(ScoredCandidate {
                candidate: (*candidate).clone(),
                score,
                breakdown,
                normalized,
            });
        }

        (scored, excluded)
    }
}

/// Weighted sum of normalized factor scores (each 0-100, weights summing to 100), plus the
/// per-factor contributions keyed by factor name.
pub fn composite(normalized: &[(Factor, f64)], weights: &FactorWeights) -> (f64, BTreeMap<String, f64>) {
    let mut breakdown = BTreeMap::new();
    let mut score = 0.0;
    for (factor, n) in normalized {
        let contribution = n / 100.0 * f64::from(weights.get(*factor));
        breakdown.insert(factor.as_str().to_string(), contribution);
        score += contribution;
    }
    (score, breakdown)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::candidate::{fixtures, ProfitTrend, Profitability};
    use crate::domain::profile::{Horizon, RiskTolerance};

    fn engine() -> RankingEngine {
        RankingEngine::new(RankingConfig::default()).unwrap()
    }

    fn profile(h: Horizon, r: RiskTolerance) -> InvestorProfile {
        InvestorProfile {
            horizon: Some(h),
            risk_tolerance: Some(r),
            ..Default::default()
        }
    }

    fn all_profiles() -> Vec<InvestorProfile> {
        let mut out = vec![InvestorProfile::default()];
        for h in Horizon::ALL {
            for r in RiskTolerance::ALL {
                out.push(profile(h, r));
            }
        }
        out
    }

    fn mixed_pool() -> Vec<Candidate> {
        (0..12)
            .map(|i| {
                let f = i as f64;
                Candidate {
                    sector: Some(["Tech", "Finance", "Retail"][i % 3].to_string()),
                    price: Some(500.0 + 250.0 * f),
                    weekly_change_pct: if i % 5 == 4 { None } else { Some(f * 3.0 - 10.0) },
                    volume_ratio: Some(0.5 + f / 10.0),
                    market_cap: Some(1.0e9 * (f + 1.0)),
                    volatility_pct: Some(5.0 + f * 4.0),
                    dividend_yield_pct: if i % 2 == 0 { Some(f / 4.0) } else { None },
                    profitability: [
                        Profitability::Profitable,
                        Profitability::Unprofitable,
                        Profitability::Unknown,
                    ][i % 3],
                    profit_trend: if i % 4 == 0 {
                        ProfitTrend::Increasing
                    } else {
                        ProfitTrend::Stable
                    },
                    ..fixtures::bare(&format!("T{i:02}"))
                }
            })
            .collect()
    }

    #[test]
    fn refuses_malformed_configuration() {
        let mut cfg = RankingConfig::default();
        cfg.weights.remove(Horizon::Short, RiskTolerance::High);
        assert!(RankingEngine::new(cfg).is_err());
    }

    #[test]
    fn empty_pool_returns_empty_shortlist() {
        let report = engine().rank_with_report(&[], &InvestorProfile::default());
        assert!(report.shortlist.is_empty());
        assert_eq!(report.counts, StageCounts::default());
    }

    #[test]
    fn single_candidate_normalizes_to_neutral() {
        let pool = vec![Candidate {
            weekly_change_pct: Some(3.0),
            volume_ratio: Some(1.4),
            market_cap: Some(2.0e10),
            volatility_pct: Some(12.0),
            dividend_yield_pct: Some(2.5),
            ..fixtures::bare("ONE")
        }];
        let shortlist = engine().rank(&pool, &profile(Horizon::Long, RiskTolerance::Low));
        assert_eq!(shortlist.len(), 1);
        for f in Factor::ALL {
            assert_eq!(shortlist.items[0].normalized[f.as_str()], 50.0);
        }
        assert!((shortlist.items[0].score - 50.0).abs() < 1e-9);
    }

    #[test]
    fn normalized_scores_stay_in_range_for_every_profile() {
        let pool = mixed_pool();
        let refs: Vec<&Candidate> = pool.iter().collect();
        for p in all_profiles() {
            let (scored, _) = engine().score(&refs, &p);
            assert!(!scored.is_empty());
            for sc in &scored {
                assert_eq!(sc.normalized.len(), Factor::ALL.len());
                for (name, n) in &sc.normalized {
                    assert!((0.0..=100.0).contains(n), "{name}={n} for {:?}", p.weight_key());
                }
            }
        }
    }

    #[test]
    fn identical_values_score_fifty() {
        let pool: Vec<Candidate> = (0..4)
            .map(|i| Candidate {
                dividend_yield_pct: Some(1.75),
                weekly_change_pct: Some(i as f64),
                ..fixtures::bare(&format!("D{i}"))
            })
            .collect();
        let refs: Vec<&Candidate> = pool.iter().collect();
        let (scored, _) = engine().score(&refs, &InvestorProfile::default());
        for sc in scored {
            assert_eq!(sc.normalized["dividend"], 50.0);
        }
    }

    #[test]
    fn volatility_is_inverted_for_risk_averse_profiles() {
        let pool = vec![
            Candidate {
                volatility_pct: Some(5.0),
                ..fixtures::bare("CALM")
            },
            Candidate {
                volatility_pct: Some(25.0),
                ..fixtures::bare("WILD")
            },
        ];
        let refs: Vec<&Candidate> = pool.iter().collect();

        let (averse, _) = engine().score(&refs, &profile(Horizon::Long, RiskTolerance::Medium));
        assert_eq!(averse[0].normalized["volatility"], 100.0);
        assert_eq!(averse[1].normalized["volatility"], 0.0);

        let (seeking, _) = engine().score(&refs, &profile(Horizon::Short, RiskTolerance::High));
        assert_eq!(seeking[0].normalized["volatility"], 0.0);
        assert_eq!(seeking[1].normalized["volatility"], 100.0);
    }

    #[test]
    fn runaway_momentum_never_reaches_any_shortlist() {
        let mut pool = mixed_pool();
        pool.push(Candidate {
            weekly_change_pct: Some(60.0),
            profitability: Profitability::Profitable,
            profit_trend: ProfitTrend::Increasing,
            volume_ratio: Some(9.0),
            market_cap: Some(1.0e13),
            dividend_yield_pct: Some(8.0),
            ..fixtures::in_sector("ROCKET", "Space")
        });
        for p in all_profiles() {
            let report = engine().rank_with_report(&pool, &p);
            assert!(!report.shortlist.tickers().contains(&"ROCKET"));
            assert!(report.excluded.contains(&Exclusion {
                ticker: "ROCKET".to_string(),
                reason: ExclusionReason::RunawayMomentum,
            }));
        }
    }

    #[test]
    fn speculative_combination_is_excluded() {
        let pool = vec![
            Candidate {
                weekly_change_pct: Some(35.0),
                volatility_pct: Some(45.0),
                profitability: Profitability::Unprofitable,
                ..fixtures::bare("SPEC")
            },
            fixtures::bare("PLAIN"),
        ];
        let report = engine().rank_with_report(&pool, &InvestorProfile::default());
        assert_eq!(report.shortlist.tickers(), vec!["PLAIN"]);
        assert_eq!(
            report.excluded[0].reason,
            ExclusionReason::SpeculativeCombination
        );
    }

    #[test]
    fn risk_penalty_recorded_and_heavier_for_low_risk() {
        let pool = vec![Candidate {
            weekly_change_pct: Some(10.0),
            volatility_pct: Some(45.0),
            profitability: Profitability::Unprofitable,
            ..fixtures::bare("RISKY")
        }];
        let penalty = |r| {
            let sl = engine().rank(&pool, &profile(Horizon::Medium, r));
            sl.items[0].breakdown[RISK_PENALTY_KEY]
        };
        let low = penalty(RiskTolerance::Low);
        let high = penalty(RiskTolerance::High);
        assert!(low < 0.0 && high < 0.0);
        assert!(low.abs() > high.abs());
    }

    #[test]
    fn declared_low_risk_applies_without_a_horizon() {
        let pool = vec![
            Candidate {
                volatility_pct: Some(5.0),
                ..fixtures::bare("CALM")
            },
            Candidate {
                volatility_pct: Some(45.0),
                weekly_change_pct: Some(10.0),
                profitability: Profitability::Unprofitable,
                ..fixtures::bare("WILD")
            },
        ];
        let refs: Vec<&Candidate> = pool.iter().collect();
        let p = InvestorProfile {
            risk_tolerance: Some(RiskTolerance::Low),
            ..Default::default()
        };

        let (scored, _) = engine().score(&refs, &p);
        assert_eq!(scored[0].normalized["volatility"], 100.0);
        assert_eq!(scored[1].normalized["volatility"], 0.0);
        assert_eq!(scored[1].breakdown[RISK_PENALTY_KEY], -15.0);
    }

    #[test]
    fn composite_weights_each_factor() {
        let weights = FactorWeights::new(30, 20, 20, 20, 10);
        let row = [
            (Factor::Momentum, 100.0),
            (Factor::VolumeActivity, 50.0),
            (Factor::Volatility, 0.0),
            (Factor::Size, 50.0),
            (Factor::Dividend, 50.0),
        ];
        let (score, breakdown) = composite(&row, &weights);
        assert!((score - 55.0).abs() < 1e-9);
        assert_eq!(breakdown["momentum"], 30.0);
        assert_eq!(breakdown["volatility"], 0.0);
    }

    #[test]
    fn breakdown_always_lists_rule_adjustments() {
        let pool = mixed_pool();
        let shortlist = engine().rank(&pool, &InvestorProfile::default());
        for sc in &shortlist.items {
            assert!(sc.breakdown.contains_key(RISK_PENALTY_KEY));
            assert!(sc.breakdown.contains_key(PROFIT_BONUS_KEY));
            let total: f64 = sc.breakdown.values().sum();
            assert!((total - sc.score).abs() < 1e-9);
        }
    }

    #[test]
    fn budget_filters_before_scoring() {
        let pool = vec![
            Candidate {
                price: Some(4_500.0),
                ..fixtures::bare("KEEP")
            },
            Candidate {
                price: Some(6_000.0),
                ..fixtures::bare("DROP")
            },
        ];
        let p = InvestorProfile {
            budget: Some(500_000.0),
            ..Default::default()
        };
        let report = engine().rank_with_report(&pool, &p);
        assert_eq!(report.counts.affordable, 1);
        assert_eq!(report.shortlist.tickers(), vec!["KEEP"]);

        let p = InvestorProfile {
            budget: Some(100.0),
            ..Default::default()
        };
        assert!(engine().rank(&pool, &p).is_empty());
    }

    #[test]
    fn shortlist_is_sorted_and_truncated() {
        let pool = mixed_pool();
        let shortlist = engine().rank(&pool, &profile(Horizon::Short, RiskTolerance::High));
        assert_eq!(shortlist.len(), 3);
        for pair in shortlist.items.windows(2) {
            assert!(pair[0].score >= pair[1].score);
        }
    }

    #[test]
    fn registered_names_are_skipped_when_pool_is_large_enough() {
        let pool = mixed_pool();
        let p = InvestorProfile::default();
        let top = engine().rank(&pool, &p).items[0].candidate.security_id.clone();

        let p = InvestorProfile {
            registered: [top.clone()].into_iter().collect(),
            ..Default::default()
        };
        let report = engine().rank_with_report(&pool, &p);
        assert!(report.counts.registered_exclusion_applied);
        assert!(report
            .shortlist
            .items
            .iter()
            .all(|sc| sc.candidate.security_id != top));
    }

    #[test]
    fn repeated_runs_are_byte_identical() {
        let pool = mixed_pool();
        for p in all_profiles() {
            let a = serde_json::to_string(&engine().rank(&pool, &p)).unwrap();
            let b = serde_json::to_string(&engine().rank(&pool, &p)).unwrap();
            assert_eq!(a, b);
        }
    }

    #[test]
    fn end_to_end_three_candidate_scenario() {
        let x = Candidate {
            weekly_change_pct: Some(8.0),
            profitability: Profitability::Profitable,
            volatility_pct: Some(12.0),
            ..fixtures::in_sector("X", "Tech")
        };
        let y = Candidate {
            weekly_change_pct: Some(52.0),
            ..fixtures::in_sector("Y", "Tech")
        };
        let z = Candidate {
            weekly_change_pct: Some(-2.0),
            profitability: Profitability::Unprofitable,
            volatility_pct: Some(40.0),
            ..fixtures::in_sector("Z", "Finance")
        };

        let report = engine().rank_with_report(
            &[x, y, z],
            &profile(Horizon::Medium, RiskTolerance::Medium),
        );
        assert_eq!(report.shortlist.tickers(), vec!["X", "Z"]);
        assert_eq!(
            report.excluded,
            vec![Exclusion {
                ticker: "Y".to_string(),
                reason: ExclusionReason::RunawayMomentum,
            }]
        );

        let x = &report.shortlist.items[0];
        let z = &report.shortlist.items[1];
        assert!(x.breakdown[PROFIT_BONUS_KEY] > 0.0);
        assert!(z.breakdown[RISK_PENALTY_KEY] < 0.0);
        // Without the bonus Z would come out on top.
        assert!(x.score - x.breakdown[PROFIT_BONUS_KEY] < z.score);
    }
}
