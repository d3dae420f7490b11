pub mod anthropic;
pub mod error;
pub mod json;

use crate::domain::profile::InvestorProfile;
use crate::domain::recommendation::{RecommendationSnapshot, Shortlist};
use serde_json::json;

/// Everything the explanation model sees for one investor.
#[derive(Debug, Clone)]
pub struct ExplainInput {
    pub as_of_date: chrono::NaiveDate,
    pub profile: InvestorProfile,
    pub shortlist: Shortlist,
}

impl ExplainInput {
    pub fn try_new(
        as_of_date: chrono::NaiveDate,
        profile: &InvestorProfile,
        shortlist: &Shortlist,
    ) -> anyhow::Result<Self> {
        anyhow::ensure!(
            !shortlist.is_empty(),
            "cannot explain an empty shortlist (as_of_date={as_of_date})"
        );
        Ok(Self {
            as_of_date,
            profile: profile.clone(),
            shortlist: shortlist.clone(),
        })
    }

    /// Compact JSON view of the investor and the shortlist for prompting.
    pub fn prompt_json(&self) -> serde_json::Value {
        let (horizon, _) = self.profile.weight_key();
        let risk = self.profile.risk_level();
        let items: Vec<_> = self
            .shortlist
            .items
            .iter()
            .enumerate()
            .map(|(idx, sc)| {
                let c = &sc.candidate;
                json!({
                    "rank": idx + 1,
                    "ticker": c.ticker,
                    "name": c.name,
                    "sector": c.sector_bucket(),
                    "score": sc.score,
                    "breakdown": sc.breakdown,
                    "price": c.price,
                    "weekly_change_pct": c.weekly_change_pct,
                    "volume_ratio": c.volume_ratio,
                    "market_cap": c.market_cap,
                    "volatility_pct": c.volatility_pct,
                    "dividend_yield_pct": c.dividend_yield_pct,
                    "profitability": c.profitability,
                    "profit_trend": c.profit_trend,
                })
            })
            .collect();

        json!({
            "investor": {
                "horizon": horizon,
                "risk_tolerance": risk,
                "budget": self.profile.budget,
            },
            "shortlist": items,
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Provider {
    Anthropic,
}

impl Provider {
    pub fn as_str(self) -> &'static str {
        match self {
            Provider::Anthropic => "anthropic",
        }
    }
}

/// A validated snapshot plus the provider response it was parsed from.
#[derive(Debug, Clone)]
pub struct Explanation {
    pub snapshot: RecommendationSnapshot,
    pub raw_response: Option<serde_json::Value>,
}

#[async_trait::async_trait]
pub trait LlmClient: Send + Sync {
    fn provider(&self) -> Provider;

    /// Attaches rationale to every shortlisted security, keeping the engine's order.
    async fn explain(&self, input: &ExplainInput) -> anyhow::Result<Explanation>;
}
