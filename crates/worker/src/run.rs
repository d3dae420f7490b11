use chrono::{NaiveDate, Utc};
use kabupick_core::domain::candidate::Candidate;
use kabupick_core::domain::profile::InvestorProfile;
use kabupick_core::domain::recommendation::RecommendationSnapshot;
use kabupick_core::llm::error::LlmDiagnosticsError;
use kabupick_core::llm::{ExplainInput, LlmClient};
use kabupick_core::ranking::{RankingEngine, RankingReport};
use kabupick_core::storage::recommendations::{persist_run, NewRun, RunStatus};

/// Per-run counters. Owned by the batch loop and returned to the caller; never shared.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RunStats {
    pub investors: usize,
    pub skipped: usize,
    pub empty: usize,
    pub explained: usize,
    pub unexplained: usize,
    pub persisted: usize,
    pub persist_failed: usize,
    pub hard_excluded: usize,
}

impl RunStats {
    pub fn record_ranking(&mut self, report: &RankingReport) {
        self.investors += 1;
        self.hard_excluded += report.excluded.len();
        if report.shortlist.is_empty() {
            self.empty += 1;
        }
    }
}

pub struct BatchContext<'a> {
    pub db: Option<&'a sqlx::PgPool>,
    pub engine: &'a RankingEngine,
    pub llm: Option<&'a dyn LlmClient>,
    pub as_of_date: NaiveDate,
}

/// Ranks, explains and persists every investor against one shared pool. A failure for one
/// investor is logged and counted; the batch carries on.
pub async fn run_batch(
    ctx: &BatchContext<'_>,
    candidates: &[Candidate],
    profiles: &[InvestorProfile],
) -> RunStats {
    let mut stats = RunStats::default();

    for profile in profiles {
        let Some(user_id) = profile.user_id else {
            tracing::warn!("profile without user_id; skipping");
            stats.skipped += 1;
            continue;
        };

        let report = ctx.engine.rank_with_report(candidates, profile);
        stats.record_ranking(&report);
        tracing::info!(
            %user_id,
            as_of_date = %ctx.as_of_date,
            shortlisted = report.shortlist.len(),
            tickers = ?report.shortlist.tickers(),
            hard_excluded = report.excluded.len(),
            "investor ranked"
        );

        let generated_at = Utc::now();
        let outcome = if report.shortlist.is_empty() {
            Outcome {
                snapshot: RecommendationSnapshot::unexplained(
                    ctx.as_of_date,
                    generated_at,
                    &report.shortlist,
                ),
                status: RunStatus::Empty,
                error: None,
                raw: None,
            }
        } else {
            explain(ctx, profile, &report).await
        };

        match outcome.status {
            RunStatus::Success => stats.explained += 1,
            RunStatus::Unexplained => stats.unexplained += 1,
            RunStatus::Empty => {}
        }

        let Some(db) = ctx.db else {
            continue;
        };

        let provider = ctx.llm.map(|l| l.provider().as_str());
        let res = persist_run(
            db,
            NewRun {
                user_id,
                snapshot: &outcome.snapshot,
                status: outcome.status,
                provider,
                error: outcome.error.as_deref(),
                raw_llm_response: outcome.raw,
            },
        )
        .await;

        match res {
            Ok(run_id) => {
                stats.persisted += 1;
                tracing::info!(%user_id, %run_id, status = outcome.status.as_str(), "persisted recommendation run");
            }
            Err(err) => {
                stats.persist_failed += 1;
                sentry_anyhow::capture_anyhow(&err);
                tracing::error!(%user_id, error = %format!("{err:#}"), "persist recommendation run failed");
            }
        }
    }

    stats
}

struct Outcome {
    snapshot: RecommendationSnapshot,
    status: RunStatus,
    error: Option<String>,
    raw: Option<serde_json::Value>,
}

async fn explain(ctx: &BatchContext<'_>, profile: &InvestorProfile, report: &RankingReport) -> Outcome {
    let unexplained = |error: Option<String>, raw: Option<serde_json::Value>| Outcome {
        snapshot: RecommendationSnapshot::unexplained(ctx.as_of_date, Utc::now(), &report.shortlist),
        status: RunStatus::Unexplained,
        error,
        raw,
    };

    let Some(llm) = ctx.llm else {
        return unexplained(None, None);
    };

    let input = match ExplainInput::try_new(ctx.as_of_date, profile, &report.shortlist) {
        Ok(input) => input,
        Err(err) => return unexplained(Some(format!("{err:#}")), None),
    };

    match llm.explain(&input).await {
        Ok(explanation) => Outcome {
            snapshot: explanation.snapshot,
            status: RunStatus::Success,
            error: None,
            raw: explanation.raw_response,
        },
        Err(err) => {
            sentry_anyhow::capture_anyhow(&err);
            tracing::warn!(user_id = ?profile.user_id, error = %err, "explanation failed; storing shortlist without rationale");
            let raw = err
                .downcast_ref::<LlmDiagnosticsError>()
                .and_then(LlmDiagnosticsError::raw_payload);
            unexplained(Some(format!("{err:#}")), raw)
        }
    }
}
