use serde::{Deserialize, Serialize};

/// Sector bucket used for candidates whose sector label is missing or blank.
pub const UNCLASSIFIED_SECTOR: &str = "unclassified";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Profitability {
    Profitable,
    Unprofitable,
    #[default]
    Unknown,
}

impl Profitability {
    pub fn from_flag(flag: Option<bool>) -> Self {
        match flag {
            Some(true) => Self::Profitable,
            Some(false) => Self::Unprofitable,
            None => Self::Unknown,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProfitTrend {
    Increasing,
    Stable,
    Decreasing,
    #[default]
    Unknown,
}

impl ProfitTrend {
    /// Lenient parse for values coming out of the database; anything unrecognised is `Unknown`.
    pub fn parse_lenient(s: Option<&str>) -> Self {
        match s.map(|s| s.trim().to_ascii_lowercase()).as_deref() {
            Some("increasing") => Self::Increasing,
            Some("stable") => Self::Stable,
            Some("decreasing") => Self::Decreasing,
            _ => Self::Unknown,
        }
    }
}

/// One tradable security as of a single data-refresh cycle.
///
/// Every metric is optional because upstream data may be missing; the ranking engine gives
/// missing metrics a neutral contribution instead of dropping the candidate.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Candidate {
    pub security_id: String,
    pub ticker: String,
    pub name: String,
    #[serde(default)]
    pub sector: Option<String>,

    /// Latest close, in account currency.
    #[serde(default)]
    pub price: Option<f64>,
    /// Trailing-week change in percent (8.0 means +8%).
    #[serde(default)]
    pub weekly_change_pct: Option<f64>,
    /// Recent average volume divided by baseline average volume.
    #[serde(default)]
    pub volume_ratio: Option<f64>,
    #[serde(default)]
    pub market_cap: Option<f64>,
    /// Percentage dispersion of recent closes.
    #[serde(default)]
    pub volatility_pct: Option<f64>,
    #[serde(default)]
    pub dividend_yield_pct: Option<f64>,
    #[serde(default)]
    pub profitability: Profitability,
    #[serde(default)]
    pub profit_trend: ProfitTrend,
}

impl Candidate {
    pub fn sector_bucket(&self) -> &str {
        match self.sector.as_deref().map(str::trim) {
            Some(s) if !s.is_empty() => s,
            _ => UNCLASSIFIED_SECTOR,
        }
    }
}
