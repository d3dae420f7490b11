use crate::domain::candidate::Candidate;
use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// A candidate with its composite score and the per-factor contributions that produced it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScoredCandidate {
    pub candidate: Candidate,
    pub score: f64,
    /// Factor and rule name -> contribution to `score`. BTreeMap keeps serialization stable.
    pub breakdown: BTreeMap<String, f64>,
    /// Factor name -> 0..=100 normalized score (after volatility inversion).
    pub normalized: BTreeMap<String, f64>,
}

impl ScoredCandidate {
    pub fn ticker(&self) -> &str {
        &self.candidate.ticker
    }
}

/// Ranked, diversified, budget-filtered candidates for one investor, best first.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Shortlist {
    pub items: Vec<ScoredCandidate>,
}

impl Shortlist {
    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn tickers(&self) -> Vec<&str> {
        self.items.iter().map(ScoredCandidate::ticker).collect()
    }
}

/// Shortlist joined with natural-language rationale, as persisted and served.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecommendationSnapshot {
    pub as_of_date: NaiveDate,
    pub generated_at: DateTime<Utc>,
    pub items: Vec<RecommendationItem>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecommendationItem {
    pub rank: i32,
    pub security_id: String,
    pub ticker: String,
    pub name: String,
    pub score: f64,
    pub breakdown: BTreeMap<String, f64>,
    pub rationale: Vec<String>,
    pub risk_notes: Option<String>,
}

impl RecommendationSnapshot {
    /// Snapshot with no rationale attached, used when explanation is skipped or fails.
    pub fn unexplained(
        as_of_date: NaiveDate,
        generated_at: DateTime<Utc>,
        shortlist: &Shortlist,
    ) -> Self {
        let items = shortlist
            .items
            .iter()
            .enumerate()
            .map(|(idx, sc)| RecommendationItem::from_scored(idx, sc, Vec::new(), None))
            .collect();
        Self {
            as_of_date,
            generated_at,
            items,
        }
    }
}

impl RecommendationItem {
    pub fn from_scored(
        idx: usize,
        scored: &ScoredCandidate,
        rationale: Vec<String>,
        risk_notes: Option<String>,
    ) -> Self {
        Self {
            rank: idx as i32 + 1,
            security_id: scored.candidate.security_id.clone(),
            ticker: scored.candidate.ticker.clone(),
            name: scored.candidate.name.clone(),
            score: scored.score,
            breakdown: scored.breakdown.clone(),
            rationale,
            risk_notes,
        }
    }
}
