use crate::domain::recommendation::{RecommendationItem, RecommendationSnapshot};
use anyhow::Context;
use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    /// Shortlist stored with rationale.
    Success,
    /// Shortlist stored, explanation skipped or failed.
    Unexplained,
    /// The engine produced no candidates.
    Empty,
}

impl RunStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            RunStatus::Success => "success",
            RunStatus::Unexplained => "unexplained",
            RunStatus::Empty => "empty",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "success" => Some(RunStatus::Success),
            "unexplained" => Some(RunStatus::Unexplained),
            "empty" => Some(RunStatus::Empty),
            _ => None,
        }
    }
}

/// Everything written for one investor's run.
#[derive(Debug, Clone)]
pub struct NewRun<'a> {
    pub user_id: Uuid,
    pub snapshot: &'a RecommendationSnapshot,
    pub status: RunStatus,
    pub provider: Option<&'a str>,
    pub error: Option<&'a str>,
    pub raw_llm_response: Option<serde_json::Value>,
}

#[derive(Debug, Clone, Serialize)]
pub struct StoredRun {
    pub run_id: Uuid,
    pub user_id: Uuid,
    pub status: RunStatus,
    pub provider: Option<String>,
    pub error: Option<String>,
    pub snapshot: RecommendationSnapshot,
}

pub async fn persist_run(pool: &sqlx::PgPool, run: NewRun<'_>) -> anyhow::Result<Uuid> {
    anyhow::ensure!(
        (run.status == RunStatus::Empty) == run.snapshot.items.is_empty(),
        "run status {} does not match item count {}",
        run.status.as_str(),
        run.snapshot.items.len()
    );

    let mut tx = pool.begin().await.context("begin transaction failed")?;

    let run_id = Uuid::new_v4();
    sqlx::query(
        "INSERT INTO recommendation_runs (id, user_id, as_of_date, generated_at, provider, status, error, raw_llm_response) \
         VALUES ($1, $2, $3, $4, $5, $6, $7, $8)",
    )
    .persistent(false)
    .bind(run_id)
    .bind(run.user_id)
    .bind(run.snapshot.as_of_date)
    .bind(run.snapshot.generated_at)
    .bind(run.provider)
    .bind(run.status.as_str())
    .bind(run.error)
    .bind(run.raw_llm_response)
    .execute(&mut *tx)
    .await
    .context("insert recommendation_runs failed")?;

    for item in &run.snapshot.items {
        insert_item(&mut tx, run_id, item).await?;
    }

    tx.commit().await.context("commit transaction failed")?;
    Ok(run_id)
}

async fn insert_item(
    tx: &mut sqlx::Transaction<'_, sqlx::Postgres>,
    run_id: Uuid,
    item: &RecommendationItem,
) -> anyhow::Result<()> {
    let breakdown =
        serde_json::to_value(&item.breakdown).context("serialize score breakdown failed")?;

    sqlx::query(
        "INSERT INTO recommendation_items (run_id, rank, security_id, ticker, name, score, breakdown, rationale, risk_notes) \
         VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)",
    )
    .persistent(false)
    .bind(run_id)
    .bind(item.rank)
    .bind(&item.security_id)
    .bind(&item.ticker)
    .bind(&item.name)
    .bind(item.score)
    .bind(breakdown)
    .bind(&item.rationale)
    .bind(&item.risk_notes)
    .execute(&mut **tx)
    .await
    .context("insert recommendation_items failed")?;

    Ok(())
}

/// Most recent run for the investor, optionally restricted to one as-of date.
pub async fn fetch_latest(
    pool: &sqlx::PgPool,
    user_id: Uuid,
    as_of_date: Option<NaiveDate>,
) -> anyhow::Result<Option<StoredRun>> {
    let row = sqlx::query_as::<
        _,
        (
            Uuid,
            NaiveDate,
            DateTime<Utc>,
            Option<String>,
            String,
            Option<String>,
        ),
    >(
        "SELECT id, as_of_date, generated_at, provider, status, error \
         FROM recommendation_runs \
         WHERE user_id = $1 AND ($2::date IS NULL OR as_of_date = $2) \
         ORDER BY as_of_date DESC, generated_at DESC \
         LIMIT 1",
    )
    .persistent(false)
    .bind(user_id)
    .bind(as_of_date)
    .fetch_optional(pool)
    .await
    .context("select recommendation_runs failed")?;

    let Some((run_id, as_of_date, generated_at, provider, status, error)) = row else {
        return Ok(None);
    };
    let status = RunStatus::parse(&status)
        .with_context(|| format!("unknown run status in DB for run_id={run_id}: {status}"))?;

    let items = fetch_items(pool, run_id).await?;

    Ok(Some(StoredRun {
        run_id,
        user_id,
        status,
        provider,
        error,
        snapshot: RecommendationSnapshot {
            as_of_date,
            generated_at,
            items,
        },
    }))
}

pub async fn fetch_by_date(
    pool: &sqlx::PgPool,
    user_id: Uuid,
    as_of_date: NaiveDate,
) -> anyhow::Result<Option<StoredRun>> {
    fetch_latest(pool, user_id, Some(as_of_date)).await
}

async fn fetch_items(pool: &sqlx::PgPool, run_id: Uuid) -> anyhow::Result<Vec<RecommendationItem>> {
    let rows = sqlx::query_as::<
        _,
        (
            i32,
            String,
            String,
            String,
            f64,
            serde_json::Value,
            Vec<String>,
            Option<String>,
        ),
    >(
        "SELECT rank, security_id, ticker, name, score, breakdown, rationale, risk_notes \
         FROM recommendation_items \
         WHERE run_id = $1 \
         ORDER BY rank ASC",
    )
    .persistent(false)
    .bind(run_id)
    .fetch_all(pool)
    .await
    .context("select recommendation_items failed")?;

    let mut out = Vec::with_capacity(rows.len());
    for (rank, security_id, ticker, name, score, breakdown, rationale, risk_notes) in rows {
        let breakdown: BTreeMap<String, f64> = serde_json::from_value(breakdown)
            .with_context(|| format!("invalid breakdown in DB for run_id={run_id}, ticker={ticker}"))?;
        out.push(RecommendationItem {
            rank,
            security_id,
            ticker,
            name,
            score,
            breakdown,
            rationale,
            risk_notes,
        });
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_labels_match_schema_check() {
        for s in [RunStatus::Success, RunStatus::Unexplained, RunStatus::Empty] {
            assert_eq!(RunStatus::parse(s.as_str()), Some(s));
        }
        assert_eq!(RunStatus::parse("error"), None);
    }
}
