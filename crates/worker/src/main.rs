use anyhow::Context;
use clap::Parser;
use kabupick_core::llm::LlmClient;
use kabupick_core::ranking::{RankingConfig, RankingEngine};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

mod offline;
mod run;

#[derive(Debug, Parser)]
#[command(name = "kabupick_worker")]
struct Args {
    /// Market as-of date (YYYY-MM-DD). Defaults to the latest completed TSE session.
    #[arg(long)]
    as_of_date: Option<String>,

    /// Rank and log, but do not call the LLM or write to the database.
    #[arg(long)]
    dry_run: bool,

    /// Only run for this investor.
    #[arg(long)]
    user: Option<uuid::Uuid>,

    /// Store shortlists without calling the LLM.
    #[arg(long)]
    skip_explanations: bool,

    /// Rank a candidate pool from a JSON file and print the results; no database needed.
    #[arg(long)]
    pool_file: Option<PathBuf>,

    /// Investor profiles (JSON array) for --pool-file. Defaults to one unset profile.
    #[arg(long, requires = "pool_file")]
    profiles_file: Option<PathBuf>,
}

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

    let args = Args::parse();

    let engine = RankingEngine::new(RankingConfig::from_env()?)
        .context("ranking configuration rejected")?;

    if let Some(pool_file) = args.pool_file.as_deref() {
        let results = offline::rank_files(&engine, pool_file, args.profiles_file.as_deref())?;
        println!("{}", serde_json::to_string_pretty(&results)?);
        return Ok(());
    }

    let as_of_date =
        kabupick_core::time::jp_market::resolve_as_of_date(args.as_of_date.as_deref(), chrono::Utc::now())?;

    let db_url = settings.require_database_url()?;
    let pool = sqlx::postgres::PgPoolOptions::new()
        .max_connections(5)
        .connect(db_url)
        .await
        .context("connect DATABASE_URL failed")?;

    kabupick_core::storage::migrate(&pool).await?;

    if !args.dry_run {
        let acquired =
            kabupick_core::storage::lock::try_acquire_as_of_date_lock(&pool, as_of_date).await?;
        if !acquired {
            tracing::warn!(%as_of_date, "as_of_date lock not acquired; another run in progress");
            return Ok(());
        }
    }

    let result = run_for_date(&args, &settings, &pool, &engine, as_of_date).await;

    if !args.dry_run {
        if let Err(err) =
            kabupick_core::storage::lock::release_as_of_date_lock(&pool, as_of_date).await
        {
            tracing::warn!(%as_of_date, error = %err, "failed to release as_of_date lock");
        }
    }

    if let Err(err) = &result {
        sentry_anyhow::capture_anyhow(err);
    }
    result
}

async fn run_for_date(
    args: &Args,
    settings: &kabupick_core::config::Settings,
    pool: &sqlx::PgPool,
    engine: &RankingEngine,
    as_of_date: chrono::NaiveDate,
) -> anyhow::Result<()> {
    let candidates = kabupick_core::storage::candidates::load_pool(pool, as_of_date).await?;
    if candidates.is_empty() {
        tracing::warn!(%as_of_date, "no candidate metrics for as_of_date; nothing to rank");
        return Ok(());
    }

    let profiles = kabupick_core::storage::profiles::load_profiles(pool, args.user).await?;
    if profiles.is_empty() {
        tracing::warn!(%as_of_date, user = ?args.user, "no active investor profiles");
        return Ok(());
    }

    let llm = if args.dry_run || args.skip_explanations {
        None
    } else {
        Some(kabupick_core::llm::anthropic::AnthropicClient::from_settings(settings)?)
    };

    let ctx = run::BatchContext {
        db: (!args.dry_run).then_some(pool),
        engine,
        llm: llm.as_ref().map(|c| c as &dyn LlmClient),
        as_of_date,
    };

    let t0 = std::time::Instant::now();
    let stats = run::run_batch(&ctx, &candidates, &profiles).await;

    tracing::info!(
        %as_of_date,
        dry_run = args.dry_run,
        candidates = candidates.len(),
        investors = stats.investors,
        skipped = stats.skipped,
        empty = stats.empty,
        explained = stats.explained,
        unexplained = stats.unexplained,
        persisted = stats.persisted,
        persist_failed = stats.persist_failed,
        hard_excluded = stats.hard_excluded,
        elapsed_ms = t0.elapsed().as_millis(),
        "batch run finished"
    );

    anyhow::ensure!(
        stats.persist_failed == 0,
        "{} of {} recommendation runs failed to persist",
        stats.persist_failed,
        stats.investors
    );
    Ok(())
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
