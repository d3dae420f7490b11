use anyhow::Context;
use kabupick_core::domain::candidate::Candidate;
use kabupick_core::domain::profile::InvestorProfile;
use kabupick_core::ranking::{RankingEngine, RankingReport};
use serde::Serialize;
use std::path::Path;

#[derive(Debug, Serialize)]
pub struct OfflineResult {
    pub user_id: Option<uuid::Uuid>,
    pub report: RankingReport,
}

pub fn load_json<T: serde::de::DeserializeOwned>(path: &Path) -> anyhow::Result<T> {
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read {}", path.display()))?;
    serde_json::from_str(&text).with_context(|| format!("invalid JSON in {}", path.display()))
}

/// Ranks every profile against a pool read from fixture files, without touching the database
/// or the LLM.
pub fn rank_files(
    engine: &RankingEngine,
    pool_file: &Path,
    profiles_file: Option<&Path>,
) -> anyhow::Result<Vec<OfflineResult>> {
    let candidates: Vec<Candidate> = load_json(pool_file)?;
    let profiles: Vec<InvestorProfile> = match profiles_file {
        Some(p) => load_json(p)?,
        None => vec![InvestorProfile::default()],
    };

    tracing::info!(
        candidates = candidates.len(),
        profiles = profiles.len(),
        "offline ranking"
    );

    Ok(rank_all(engine, &candidates, &profiles))
}

pub fn rank_all(
    engine: &RankingEngine,
    candidates: &[Candidate],
    profiles: &[InvestorProfile],
) -> Vec<OfflineResult> {
    profiles
        .iter()
        .map(|profile| OfflineResult {
            user_id: profile.user_id,
            report: engine.rank_with_report(candidates, profile),
        })
        .collect()
}
