use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Horizon {
    Short,
    Medium,
    Long,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RiskTolerance {
    Low,
    Medium,
    High,
}

impl Horizon {
    pub const ALL: [Horizon; 3] = [Horizon::Short, Horizon::Medium, Horizon::Long];

    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "short" => Some(Self::Short),
            "medium" => Some(Self::Medium),
            "long" => Some(Self::Long),
            _ => None,
        }
    }
}

impl RiskTolerance {
    pub const ALL: [RiskTolerance; 3] = [
        RiskTolerance::Low,
        RiskTolerance::Medium,
        RiskTolerance::High,
    ];

    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "low" => Some(Self::Low),
            "medium" => Some(Self::Medium),
            "high" => Some(Self::High),
            _ => None,
        }
    }
}

/// Settings for a single investor run.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct InvestorProfile {
    #[serde(default)]
    pub user_id: Option<uuid::Uuid>,
    #[serde(default)]
    pub horizon: Option<Horizon>,
    #[serde(default)]
    pub risk_tolerance: Option<RiskTolerance>,
    /// Cash available for one lot purchase. `None` disables the affordability filter.
    #[serde(default)]
    pub budget: Option<f64>,
    /// Security ids the investor already holds or watches.
    #[serde(default)]
    pub registered: BTreeSet<String>,
}

impl InvestorProfile {
    /// Key into the weight table. Falls back to (medium, medium) when either axis is unset.
    pub fn weight_key(&self) -> (Horizon, RiskTolerance) {
        match (self.horizon, self.risk_tolerance) {
            (Some(h), Some(r)) => (h, r),
            _ => (Horizon::Medium, RiskTolerance::Medium),
        }
    }

    /// Declared risk tolerance, or medium when unset. Drives volatility inversion and rule
    /// magnitudes; only the weight lookup uses [`Self::weight_key`].
    pub fn risk_level(&self) -> RiskTolerance {
        self.risk_tolerance.unwrap_or(RiskTolerance::Medium)
    }

    /// Lower volatility is preferable for these investors.
    pub fn is_risk_averse(&self) -> bool {
        match self.risk_level() {
            RiskTolerance::Low => true,
            RiskTolerance::Medium => self.horizon == Some(Horizon::Long),
            RiskTolerance::High => false,
        }
    }
}
