use crate::domain::candidate::Candidate;
use crate::domain::recommendation::ScoredCandidate;
use std::collections::{BTreeSet, HashMap};

/// Keeps candidates whose one-lot cost fits the budget. Unknown or non-finite prices are
/// kept; a missing, non-positive or non-finite budget means no cap.
pub fn filter_affordable<'a>(
    pool: &'a [Candidate],
    budget: Option<f64>,
    lot_size: u32,
) -> Vec<&'a Candidate> {
    let Some(budget) = budget.filter(|b| b.is_finite() && *b > 0.0) else {
        return pool.iter().collect();
    };

    pool.iter()
        .filter(|c| match c.price.filter(|p| p.is_finite()) {
            Some(price) => price * f64::from(lot_size) <= budget,
            None => true,
        })
        .collect()
}

/// Walks `sorted` best-first and admits at most `cap` candidates per sector bucket.
/// Order is preserved.
pub fn diversify(sorted: Vec<ScoredCandidate>, cap: usize) -> Vec<ScoredCandidate> {
    let mut per_sector: HashMap<String, usize> = HashMap::new();
    sorted
        .into_iter()
        .filter(|sc| {
            let admitted = per_sector
                .entry(sc.candidate.sector_bucket().to_string())
                .or_insert(0);
            if *admitted < cap {
                *admitted += 1;
                true
            } else {
                false
            }
        })
        .collect()
}

/// Drops already-registered securities, but only when more than `min_remaining` candidates
/// would be left. Returns whether the exclusion was applied.
pub fn exclude_registered(
    list: Vec<ScoredCandidate>,
    registered: &BTreeSet<String>,
    min_remaining: usize,
) -> (Vec<ScoredCandidate>, bool) {
    if registered.is_empty() {
        return (list, false);
    }

    let remaining = list
        .iter()
        .filter(|sc| !registered.contains(&sc.candidate.security_id))
        .count();
    if remaining <= min_remaining {
        return (list, false);
    }

    let kept = list
        .into_iter()
        .filter(|sc| !registered.contains(&sc.candidate.security_id))
        .collect();
    (kept, true)
}
