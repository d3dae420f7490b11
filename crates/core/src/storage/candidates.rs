use crate::domain::candidate::{Candidate, ProfitTrend, Profitability};
use anyhow::Context;
use chrono::NaiveDate;

#[derive(Debug, Clone, sqlx::FromRow)]
struct MetricsRow {
    security_id: String,
    ticker: String,
    name: String,
    sector: Option<String>,
    price: Option<f64>,
    weekly_change_pct: Option<f64>,
    volume_ratio: Option<f64>,
    market_cap: Option<f64>,
    volatility_pct: Option<f64>,
    dividend_yield_pct: Option<f64>,
    is_profitable: Option<bool>,
    profit_trend: Option<String>,
}

impl From<MetricsRow> for Candidate {
    fn from(row: MetricsRow) -> Self {
        let sector = row
            .sector
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty());

        Candidate {
            security_id: row.security_id,
            ticker: row.ticker.trim().to_string(),
            name: row.name.trim().to_string(),
            sector,
            price: row.price,
            weekly_change_pct: row.weekly_change_pct,
            volume_ratio: row.volume_ratio,
            market_cap: row.market_cap,
            volatility_pct: row.volatility_pct,
            dividend_yield_pct: row.dividend_yield_pct,
            profitability: Profitability::from_flag(row.is_profitable),
            profit_trend: ProfitTrend::parse_lenient(row.profit_trend.as_deref()),
        }
    }
}

/// Loads the candidate pool for one data-refresh cycle, ordered by ticker.
pub async fn load_pool(pool: &sqlx::PgPool, as_of_date: NaiveDate) -> anyhow::Result<Vec<Candidate>> {
    let t0 = std::time::Instant::now();
    let rows = sqlx::query_as::<_, MetricsRow>(
        "SELECT security_id, ticker, name, sector, price, weekly_change_pct, volume_ratio, \
                market_cap, volatility_pct, dividend_yield_pct, is_profitable, profit_trend \
         FROM security_metrics_daily \
         WHERE as_of_date = $1 \
         ORDER BY ticker ASC, security_id ASC",
    )
    .persistent(false)
    .bind(as_of_date)
    .fetch_all(pool)
    .await
    .with_context(|| format!("load security_metrics_daily failed (as_of_date={as_of_date})"))?;

    let out: Vec<Candidate> = rows.into_iter().map(Candidate::from).collect();
    tracing::debug!(
        %as_of_date,
        candidates = out.len(),
        elapsed_ms = t0.elapsed().as_millis(),
        "loaded candidate pool"
    );
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn row_conversion_normalizes_labels() {
        let row = MetricsRow {
            security_id: "6758".to_string(),
            ticker: " 6758.T ".to_string(),
            name: "Sony Group ".to_string(),
            sector: Some("  ".to_string()),
            price: Some(3200.0),
            weekly_change_pct: None,
            volume_ratio: Some(1.1),
            market_cap: None,
            volatility_pct: Some(14.0),
            dividend_yield_pct: None,
            is_profitable: Some(true),
            profit_trend: Some("Increasing".to_string()),
        };
        let c = Candidate::from(row);
        assert_eq!(c.ticker, "6758.T");
        assert_eq!(c.name, "Sony Group");
        assert_eq!(c.sector, None);
        assert_eq!(c.profitability, Profitability::Profitable);
        assert_eq!(c.profit_trend, ProfitTrend::Increasing);
    }
}
