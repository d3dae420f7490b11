use axum::{
    extract::{Path, State},
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};
use chrono::NaiveDate;
use serde::Deserialize;
use sqlx::PgPool;
use std::sync::Arc;
use tower_http::trace::TraceLayer;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use uuid::Uuid;

use kabupick_core::domain::candidate::Candidate;
use kabupick_core::domain::profile::InvestorProfile;
use kabupick_core::ranking::{RankingConfig, RankingEngine, RankingReport};
use kabupick_core::storage::recommendations::{fetch_by_date, fetch_latest, StoredRun};

const MAX_RANK_CANDIDATES: usize = 10_000;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    let settings = kabupick_core::config::Settings::from_env()?;
    let _sentry_guard = init_sentry(&settings);

    tracing_subscriber::registry()
        .with(EnvFilter::from_default_env())
        .with(tracing_subscriber::fmt::layer())
        .with(sentry_tracing::layer())
        .init();

    let engine = RankingEngine::new(RankingConfig::from_env()?)?;

    let pool: Option<PgPool> = match settings.require_database_url() {
        Ok(db_url) => match sqlx::postgres::PgPoolOptions::new()
            .max_connections(5)
            .connect(db_url)
            .await
        {
            Ok(pool) => match kabupick_core::storage::migrate(&pool).await {
                Ok(()) => Some(pool),
                Err(e) => {
                    sentry_anyhow::capture_anyhow(&e);
                    tracing::error!(error = %e, "db migrations failed; starting API in degraded mode");
                    None
                }
            },
            Err(e) => {
                let err = anyhow::Error::new(e);
                sentry_anyhow::capture_anyhow(&err);
                tracing::error!(error = %err, "db connect failed; starting API in degraded mode");
                None
            }
        },
        Err(e) => {
            tracing::warn!(error = %e, "DATABASE_URL missing; only /rank is served");
            None
        }
    };

    let state = AppState {
        pool,
        engine: Arc::new(engine),
    };

    let app = router(state);

    let port: u16 = std::env::var("PORT")
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(3000);
    let addr = std::net::SocketAddr::from(([0, 0, 0, 0], port));

    tracing::info!(%addr, "api listening");

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    Ok(())
}

fn router(state: AppState) -> Router {
    Router::new()
        .route("/healthz", get(healthz))
        .route("/rank", post(rank))
        .route(
            "/users/:user_id/recommendations/latest",
            get(get_latest_recommendations),
        )
        .route(
            "/users/:user_id/recommendations/:as_of_date",
            get(get_recommendations_by_date),
        )
        .with_state(state)
        .layer(TraceLayer::new_for_http())
}

async fn healthz() -> &'static str {
    "ok"
}

#[derive(Debug, Clone)]
struct AppState {
    pool: Option<PgPool>,
    engine: Arc<RankingEngine>,
}

#[derive(Debug, Deserialize)]
struct RankRequest {
    candidates: Vec<Candidate>,
    #[serde(default)]
    profile: InvestorProfile,
}

async fn rank(
    State(state): State<AppState>,
    Json(req): Json<RankRequest>,
) -> Result<Json<RankingReport>, StatusCode> {
    if req.candidates.len() > MAX_RANK_CANDIDATES {
        return Err(StatusCode::PAYLOAD_TOO_LARGE);
    }

    let engine = Arc::clone(&state.engine);
    let report = tokio::task::spawn_blocking(move || {
        engine.rank_with_report(&req.candidates, &req.profile)
    })
    .await
    .map_err(|e| {
        let err = anyhow::Error::new(e);
        sentry_anyhow::capture_anyhow(&err);
        StatusCode::INTERNAL_SERVER_ERROR
    })?;

    Ok(Json(report))
}

async fn get_latest_recommendations(
    State(state): State<AppState>,
    Path(user_id): Path<Uuid>,
) -> Result<Json<StoredRun>, StatusCode> {
    let Some(pool) = &state.pool else {
        return Err(StatusCode::SERVICE_UNAVAILABLE);
    };
    respond(user_id, fetch_latest(pool, user_id, None).await)
}

async fn get_recommendations_by_date(
    State(state): State<AppState>,
    Path((user_id, as_of_date)): Path<(Uuid, String)>,
) -> Result<Json<StoredRun>, StatusCode> {
    let as_of_date =
        NaiveDate::parse_from_str(&as_of_date, "%Y-%m-%d").map_err(|_| StatusCode::BAD_REQUEST)?;
    let Some(pool) = &state.pool else {
        return Err(StatusCode::SERVICE_UNAVAILABLE);
    };
    respond(user_id, fetch_by_date(pool, user_id, as_of_date).await)
}

fn respond(
    user_id: Uuid,
    res: anyhow::Result<Option<StoredRun>>,
) -> Result<Json<StoredRun>, StatusCode> {
    let run = res
        .map_err(|e| {
            sentry_anyhow::capture_anyhow(&e);
            tracing::error!(%user_id, error = %format!("{e:#}"), "recommendation lookup failed");
            StatusCode::INTERNAL_SERVER_ERROR
        })?
        .ok_or(StatusCode::NOT_FOUND)?;

    Ok(Json(run))
}

async fn shutdown_signal() {
    let _ = tokio::signal::ctrl_c().await;
}

fn init_sentry(settings: &kabupick_core::config::Settings) -> Option<sentry::ClientInitGuard> {
    let dsn = settings.sentry_dsn.as_deref()?;
    Some(sentry::init((
        dsn,
        sentry::ClientOptions {
            release: sentry::release_name!(),
            ..Default::default()
        },
    )))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn state() -> AppState {
        AppState {
            pool: None,
            engine: Arc::new(RankingEngine::new(RankingConfig::default()).unwrap()),
        }
    }

    #[tokio::test]
    async fn rank_works_without_a_database() {
        let req: RankRequest = serde_json::from_value(json!({
            "candidates": [
                {"security_id": "1", "ticker": "7203", "name": "Toyota", "weekly_change_pct": 3.0},
                {"security_id": "2", "ticker": "9984", "name": "SoftBank", "weekly_change_pct": 60.0}
            ]
        }))
        .unwrap();

        let Json(report) = rank(State(state()), Json(req)).await.unwrap();
        assert_eq!(report.shortlist.tickers(), vec!["7203"]);
        assert_eq!(report.excluded.len(), 1);
        assert_eq!(report.excluded[0].ticker, "9984");
    }

    #[tokio::test]
    async fn oversized_pool_is_rejected() {
        let candidate = json!({"security_id": "1", "ticker": "1", "name": "x"});
        let req: RankRequest = serde_json::from_value(json!({
            "candidates": vec![candidate; MAX_RANK_CANDIDATES + 1],
        }))
        .unwrap();
        let err = rank(State(state()), Json(req)).await.unwrap_err();
        assert_eq!(err, StatusCode::PAYLOAD_TOO_LARGE);
    }

    #[tokio::test]
    async fn lookups_need_a_database() {
        let err = get_latest_recommendations(State(state()), Path(Uuid::new_v4()))
            .await
            .unwrap_err();
        assert_eq!(err, StatusCode::SERVICE_UNAVAILABLE);

        let err = get_recommendations_by_date(
            State(state()),
            Path((Uuid::new_v4(), "not-a-date".to_string())),
        )
        .await
        .unwrap_err();
        assert_eq!(err, StatusCode::BAD_REQUEST);
    }
}
