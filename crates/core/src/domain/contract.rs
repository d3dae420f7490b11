use crate::domain::recommendation::{RecommendationItem, RecommendationSnapshot, Shortlist};
use anyhow::{bail, ensure};
use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

pub const MAX_RATIONALE_LINES: usize = 3;

/// Raw explanation payload as emitted by the LLM.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LlmExplanationSet {
    pub items: Vec<LlmExplanationItem>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LlmExplanationItem {
    pub ticker: String,
    pub rationale: Vec<String>,
    #[serde(default)]
    pub risk_notes: Option<String>,
}

impl LlmExplanationSet {
    /// Checks the explanations cover exactly the shortlisted tickers and joins them onto the
    /// shortlist, keeping the engine's ranking order.
    pub fn validate_and_attach(
        self,
        shortlist: &Shortlist,
        as_of_date: NaiveDate,
        generated_at: DateTime<Utc>,
    ) -> anyhow::Result<RecommendationSnapshot> {
        ensure!(
            self.items.len() == shortlist.len(),
            "LLM output must contain exactly {} items (got {})",
            shortlist.len(),
            self.items.len()
        );

        let mut by_ticker = BTreeMap::<String, (Vec<String>, Option<String>)>::new();
        for item in self.items {
            let ticker = item.ticker.trim().to_string();
            ensure!(!ticker.is_empty(), "ticker must be non-empty");
            let (rationale, risk_notes) = item.validate()?;
            if by_ticker.insert(ticker.clone(), (rationale, risk_notes)).is_some() {
                bail!("duplicate ticker in LLM output: {ticker}");
            }
        }

        let mut items = Vec::with_capacity(shortlist.len());
        for (idx, scored) in shortlist.items.iter().enumerate() {
            let Some((rationale, risk_notes)) = by_ticker.remove(scored.ticker()) else {
                bail!("missing explanation for ticker {}", scored.ticker());
            };
            items.push(RecommendationItem::from_scored(idx, scored, rationale, risk_notes));
        }

        // Same length and no duplicates means anything left over is an unknown ticker.
        if let Some(unknown) = by_ticker.keys().next() {
            bail!("LLM output references ticker outside the shortlist: {unknown}");
        }

        Ok(RecommendationSnapshot {
            as_of_date,
            generated_at,
            items,
        })
    }
}

impl LlmExplanationItem {
    fn validate(self) -> anyhow::Result<(Vec<String>, Option<String>)> {
        ensure!(
            (1..=MAX_RATIONALE_LINES).contains(&self.rationale.len()),
            "rationale must have 1..={MAX_RATIONALE_LINES} lines (got {})",
            self.rationale.len()
        );
        let rationale: Vec<String> = self
            .rationale
            .into_iter()
            .map(|s| s.trim().to_string())
            .collect();
        ensure!(
            rationale.iter().all(|s| !s.is_empty()),
            "rationale lines must be non-empty"
        );

        let risk_notes = self
            .risk_notes
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty());

        Ok((rationale, risk_notes))
    }
}
