//! Personalized multi-factor ranking: turns a shared candidate pool and one investor profile
//! into a short, sector-diversified, affordable shortlist.

pub mod config;
pub mod engine;
pub mod factor;
pub mod filters;
pub mod normalize;
pub mod rules;

pub use config::{ConfigError, RankingConfig};
pub use engine::{RankingEngine, RankingReport};
