use crate::domain::candidate::Candidate;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Factor {
    Momentum,
    VolumeActivity,
    Volatility,
    Size,
    Dividend,
}

impl Factor {
    pub const ALL: [Factor; 5] = [
        Factor::Momentum,
        Factor::VolumeActivity,
        Factor::Volatility,
        Factor::Size,
        Factor::Dividend,
    ];

    /// Breakdown key.
    pub fn as_str(self) -> &'static str {
        match self {
            Factor::Momentum => "momentum",
            Factor::VolumeActivity => "volume_activity",
            Factor::Volatility => "volatility",
            Factor::Size => "size",
            Factor::Dividend => "dividend",
        }
    }

    /// The raw metric this factor is normalized from.
    pub fn raw(self, candidate: &Candidate) -> Option<f64> {
        match self {
            Factor::Momentum => candidate.weekly_change_pct,
            Factor::VolumeActivity => candidate.volume_ratio,
            Factor::Volatility => candidate.volatility_pct,
            Factor::Size => candidate.market_cap,
            Factor::Dividend => candidate.dividend_yield_pct,
        }
    }
}
