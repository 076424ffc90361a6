//! Weighted ranking of implementation strategies.

use serde::{Deserialize, Serialize};

use crate::core::types::{ImplementationStrategy, RiskLevel};

/// Caller-supplied weights. They need not sum to 1; scores are only compared.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RankingCriteria {
    pub safety: f64,
    pub quality: f64,
    pub speed: f64,
    pub simplicity: f64,
}

impl Default for RankingCriteria {
    fn default() -> Self {
        Self {
            safety: 0.4,
            quality: 0.3,
            speed: 0.3,
            simplicity: 0.0,
        }
    }
}

fn safety_score(risk: RiskLevel) -> f64 {
    match risk {
        RiskLevel::Low => 1.0,
        RiskLevel::Medium => 0.6,
        RiskLevel::High => 0.3,
    }
}

/// Weighted linear score; higher is better.
pub fn strategy_score(strategy: &ImplementationStrategy, criteria: &RankingCriteria) -> f64 {
    let complexity = f64::from(strategy.complexity);
    let quality = (1.0 - complexity / 15.0).max(0.0);
    let speed = (1.0 - complexity / 12.0).max(0.0);
    let simplicity = (1.0 - complexity / 10.0).max(0.0);
    criteria.safety * safety_score(strategy.risk)
        + criteria.quality * quality
        + criteria.speed * speed
        + criteria.simplicity * simplicity
}

/// Sort strategies by descending score; equal scores keep their input order.
pub fn rank_strategies(
    strategies: Vec<ImplementationStrategy>,
    criteria: &RankingCriteria,
) -> Vec<ImplementationStrategy> {
    let mut scored: Vec<(f64, ImplementationStrategy)> = strategies
        .into_iter()
        .map(|s| (strategy_score(&s, criteria), s))
        .collect();
    scored.sort_by(|a, b| b.0.total_cmp(&a.0));
    scored.into_iter().map(|(_, s)| s).collect()
}
