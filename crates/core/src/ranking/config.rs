use crate::domain::profile::{Horizon, RiskTolerance};
use crate::ranking::factor::Factor;
use anyhow::Context;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

/// Every weight profile must sum to exactly this.
pub const WEIGHT_TOTAL: u32 = 100;

/// Raised when the ranking configuration cannot be used. The engine refuses to construct
/// rather than rescale weights or guess missing entries.
#[derive(Debug, Clone, PartialEq)]
pub enum ConfigError {
    MissingWeightProfile {
        horizon: Horizon,
        risk: RiskTolerance,
    },
    DuplicateWeightProfile {
        horizon: Horizon,
        risk: RiskTolerance,
    },
    WeightSum {
        horizon: Horizon,
        risk: RiskTolerance,
        total: u64,
    },
    InvalidValue {
        field: &'static str,
        detail: String,
    },
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigError::MissingWeightProfile { horizon, risk } => write!(
                f,
                "weight profile missing for horizon={horizon:?}, risk={risk:?}"
            ),
            ConfigError::DuplicateWeightProfile { horizon, risk } => write!(
                f,
                "weight profile defined twice for horizon={horizon:?}, risk={risk:?}"
            ),
            ConfigError::WeightSum {
                horizon,
                risk,
                total,
            } => write!(
                f,
                "weights for horizon={horizon:?}, risk={risk:?} sum to {total} (expected {WEIGHT_TOTAL})"
            ),
            ConfigError::InvalidValue { field, detail } => {
                write!(f, "invalid ranking config value for {field}: {detail}")
            }
        }
    }
}

impl std::error::Error for ConfigError {}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FactorWeights {
    pub momentum: u32,
    pub volume_activity: u32,
    pub volatility: u32,
    pub size: u32,
    pub dividend: u32,
}

impl FactorWeights {
    pub const fn new(
        momentum: u32,
        volume_activity: u32,
        volatility: u32,
        size: u32,
        dividend: u32,
    ) -> Self {
        Self {
            momentum,
            volume_activity,
            volatility,
            size,
            dividend,
        }
    }

    pub fn get(&self, factor: Factor) -> u32 {
        match factor {
            Factor::Momentum => self.momentum,
            Factor::VolumeActivity => self.volume_activity,
            Factor::Volatility => self.volatility,
            Factor::Size => self.size,
            Factor::Dividend => self.dividend,
        }
    }

    /// Widened so that oversized weights cannot wrap around to a valid total.
    pub fn total(&self) -> u64 {
        Factor::ALL.iter().map(|f| u64::from(self.get(*f))).sum()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WeightEntry {
    pub horizon: Horizon,
    pub risk: RiskTolerance,
    pub weights: FactorWeights,
}

/// Weight profiles keyed by (horizon, risk tolerance). Serialized as a flat list of entries.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "Vec<WeightEntry>", into = "Vec<WeightEntry>")]
pub struct WeightTable {
    entries: BTreeMap<(Horizon, RiskTolerance), FactorWeights>,
}

impl WeightTable {
    pub fn get(&self, horizon: Horizon, risk: RiskTolerance) -> Option<&FactorWeights> {
        self.entries.get(&(horizon, risk))
    }

    pub fn insert(&mut self, horizon: Horizon, risk: RiskTolerance, weights: FactorWeights) {
        self.entries.insert((horizon, risk), weights);
    }

    pub fn remove(&mut self, horizon: Horizon, risk: RiskTolerance) -> Option<FactorWeights> {
        self.entries.remove(&(horizon, risk))
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        for horizon in Horizon::ALL {
            for risk in RiskTolerance::ALL {
                let weights = self
                    .get(horizon, risk)
                    .ok_or(ConfigError::MissingWeightProfile { horizon, risk })?;
                let total = weights.total();
                if total != u64::from(WEIGHT_TOTAL) {
                    return Err(ConfigError::WeightSum {
                        horizon,
                        risk,
                        total,
                    });
                }
            }
        }
        Ok(())
    }
}

impl Default for WeightTable {
    fn default() -> Self {
        use Horizon as H;
        use RiskTolerance as R;

        // momentum, volume_activity, volatility, size, dividend
        let rows = [
            (H::Short, R::Low, FactorWeights::new(25, 20, 25, 20, 10)),
            (H::Short, R::Medium, FactorWeights::new(35, 25, 15, 15, 10)),
            (H::Short, R::High, FactorWeights::new(40, 30, 15, 10, 5)),
            (H::Medium, R::Low, FactorWeights::new(20, 15, 25, 25, 15)),
            (H::Medium, R::Medium, FactorWeights::new(30, 20, 20, 20, 10)),
            (H::Medium, R::High, FactorWeights::new(35, 25, 20, 15, 5)),
            (H::Long, R::Low, FactorWeights::new(10, 10, 25, 30, 25)),
            (H::Long, R::Medium, FactorWeights::new(15, 15, 20, 30, 20)),
            (H::Long, R::High, FactorWeights::new(25, 20, 20, 25, 10)),
        ];

        Self {
            entries: rows.into_iter().map(|(h, r, w)| ((h, r), w)).collect(),
        }
    }
}

impl TryFrom<Vec<WeightEntry>> for WeightTable {
    type Error = ConfigError;

    fn try_from(value: Vec<WeightEntry>) -> Result<Self, Self::Error> {
        let mut entries = BTreeMap::new();
        for e in value {
            if entries.insert((e.horizon, e.risk), e.weights).is_some() {
                return Err(ConfigError::DuplicateWeightProfile {
                    horizon: e.horizon,
                    risk: e.risk,
                });
            }
        }
        Ok(Self { entries })
    }
}

impl From<WeightTable> for Vec<WeightEntry> {
    fn from(value: WeightTable) -> Self {
        value
            .entries
            .into_iter()
            .map(|((horizon, risk), weights)| WeightEntry {
                horizon,
                risk,
                weights,
            })
            .collect()
    }
}

/// A magnitude that depends on the investor's risk tolerance.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RiskScaled {
    pub low: f64,
    pub medium: f64,
    pub high: f64,
}

impl RiskScaled {
    pub fn get(&self, risk: RiskTolerance) -> f64 {
        match risk {
            RiskTolerance::Low => self.low,
            RiskTolerance::Medium => self.medium,
            RiskTolerance::High => self.high,
        }
    }

    fn validate(&self, field: &'static str) -> Result<(), ConfigError> {
        for v in [self.low, self.medium, self.high] {
            if !v.is_finite() || v < 0.0 {
                return Err(ConfigError::InvalidValue {
                    field,
                    detail: format!("magnitudes must be finite and >= 0 (got {v})"),
                });
            }
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RankingConfig {
    pub weights: WeightTable,

    /// Weekly change (%) above which a candidate is dropped outright.
    pub runaway_momentum_pct: f64,
    /// Weekly change (%) above which an unprofitable, volatile candidate is dropped.
    pub speculative_momentum_pct: f64,
    /// Volatility (%) above which the speculative rules apply.
    pub volatility_ceiling_pct: f64,

    /// Subtracted from unprofitable, volatile candidates.
    pub risk_penalty: RiskScaled,
    /// Added to profitable candidates without an increasing profit trend.
    pub profit_bonus: RiskScaled,
    /// Added to profitable candidates with an increasing profit trend.
    pub profit_bonus_increasing: RiskScaled,

    /// Maximum candidates admitted per sector.
    pub sector_cap: usize,
    /// Registered securities are only removed if more than this many candidates remain.
    pub registered_exclusion_min: usize,
    pub shortlist_size: usize,
    /// Shares per lot for the affordability check.
    pub lot_size: u32,
}

impl Default for RankingConfig {
    fn default() -> Self {
        Self {
            weights: WeightTable::default(),
            runaway_momentum_pct: 50.0,
            speculative_momentum_pct: 30.0,
            volatility_ceiling_pct: 30.0,
            risk_penalty: RiskScaled {
                low: 15.0,
                medium: 10.0,
                high: 5.0,
            },
            profit_bonus: RiskScaled {
                low: 12.0,
                medium: 8.0,
                high: 4.0,
            },
            profit_bonus_increasing: RiskScaled {
                low: 18.0,
                medium: 12.0,
                high: 6.0,
            },
            sector_cap: 5,
            registered_exclusion_min: 5,
            shortlist_size: 3,
            lot_size: 100,
        }
    }
}

impl RankingConfig {
    /// Defaults, optionally replaced by the JSON file at `RANKING_CONFIG_PATH`, then scalar
    /// env overrides. The result is validated.
    pub fn from_env() -> anyhow::Result<Self> {
        let mut out = match std::env::var("RANKING_CONFIG_PATH")
            .ok()
            .filter(|s| !s.trim().is_empty())
        {
            Some(path) => {
                let text = std::fs::read_to_string(&path)
                    .with_context(|| format!("failed to read RANKING_CONFIG_PATH={path}"))?;
                Self::from_json_str(&text)
                    .with_context(|| format!("invalid ranking config in {path}"))?
            }
            None => Self::default(),
        };

        if let Some(n) = env_override::<usize>("SHORTLIST_SIZE")? {
            out.shortlist_size = n;
        }
        if let Some(n) = env_override::<usize>("SECTOR_CAP")? {
            out.sector_cap = n;
        }
        if let Some(n) = env_override::<usize>("REGISTERED_EXCLUSION_MIN")? {
            out.registered_exclusion_min = n;
        }
        if let Some(v) = env_override::<f64>("VOLATILITY_CEILING_PCT")? {
            out.volatility_ceiling_pct = v;
        }

        out.validate()?;
        Ok(out)
    }

    pub fn from_json_str(text: &str) -> anyhow::Result<Self> {
        let out: Self = serde_json::from_str(text).context("ranking config is not valid JSON")?;
        out.validate()?;
        Ok(out)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        self.weights.validate()?;

        for (field, v) in [
            ("runaway_momentum_pct", self.runaway_momentum_pct),
            ("speculative_momentum_pct", self.speculative_momentum_pct),
            ("volatility_ceiling_pct", self.volatility_ceiling_pct),
        ] {
            if !v.is_finite() {
                return Err(ConfigError::InvalidValue {
                    field,
                    detail: format!("must be finite (got {v})"),
                });
            }
        }

        self.risk_penalty.validate("risk_penalty")?;
        self.profit_bonus.validate("profit_bonus")?;
        self.profit_bonus_increasing
            .validate("profit_bonus_increasing")?;

        for (field, v) in [
            ("sector_cap", self.sector_cap),
            ("shortlist_size", self.shortlist_size),
            ("lot_size", self.lot_size as usize),
        ] {
            if v == 0 {
                return Err(ConfigError::InvalidValue {
                    field,
                    detail: "must be >= 1".to_string(),
                });
            }
        }

        Ok(())
    }
}

fn env_override<T>(key: &str) -> anyhow::Result<Option<T>>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match std::env::var(key) {
        Ok(s) if !s.trim().is_empty() => {
            let v = s
                .trim()
                .parse::<T>()
                .with_context(|| format!("{key} is not a valid value: {s}"))?;
            Ok(Some(v))
        }
        _ => Ok(None),
    }
}
