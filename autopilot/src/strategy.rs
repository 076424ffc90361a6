//! Strategy selection: ask for candidate approaches, then rank them.

use anyhow::Result;
use serde_json::Value;
use tracing::{info, instrument, warn};

use crate::agent::ask;
use crate::core::action::extract_json;
use crate::core::ranking::{RankingCriteria, rank_strategies, strategy_score};
use crate::core::types::{ImplementationStrategy, RiskLevel, TicketAnalysis, WorkItem};
use crate::governor::ResourceGovernor;
use crate::io::model::Model;
use crate::io::prompt::PromptEngine;

const FALLBACK_NAME: &str = "Standard Implementation";

/// What to generate strategies for.
#[derive(Debug, Clone, Copy)]
pub struct StrategyRequest<'a> {
    pub item: &'a WorkItem,
    pub context: &'a str,
    pub analysis: Option<&'a TicketAnalysis>,
    pub max: usize,
}

/// One model call for up to `request.max` strategies.
///
/// Never returns an empty list: an unusable reply yields a single strategy
/// built from the analysis recommendation. Model and quota errors propagate.
#[instrument(skip_all, fields(issue = request.item.number, max = request.max))]
pub fn generate_strategies<M: Model>(
    model: &M,
    governor: &mut ResourceGovernor,
    prompts: &PromptEngine,
    system: &str,
    request: &StrategyRequest<'_>,
) -> Result<Vec<ImplementationStrategy>> {
    let prompt = prompts.strategies(request.item, request.context, request.analysis, request.max)?;
    let reply = ask(model, governor, "strategy generation", system, &prompt)?;
    let mut strategies = parse_strategies(&reply);
    strategies.truncate(request.max.max(1));
    if strategies.is_empty() {
        warn!("strategy reply unusable, falling back to a single strategy");
        return Ok(vec![fallback_strategy(request.analysis)]);
    }
    info!(count = strategies.len(), "strategies generated");
    Ok(strategies)
}

/// Rank, logging each strategy's score.
pub fn rank(
    strategies: Vec<ImplementationStrategy>,
    criteria: &RankingCriteria,
) -> Vec<ImplementationStrategy> {
    let ranked = rank_strategies(strategies, criteria);
    for (idx, strategy) in ranked.iter().enumerate() {
        info!(
            rank = idx + 1,
            name = %strategy.name,
            score = strategy_score(strategy, criteria),
            "strategy ranked"
        );
    }
    ranked
}

pub fn fallback_strategy(analysis: Option<&TicketAnalysis>) -> ImplementationStrategy {
    let approach = analysis
        .map(|a| a.suggested_strategy.trim())
        .filter(|s| !s.is_empty() && *s != "Unknown")
        .unwrap_or("Implement the work item directly, following existing project conventions");
    ImplementationStrategy {
        name: FALLBACK_NAME.to_string(),
        approach: approach.to_string(),
        pros: vec!["Follows analysis recommendation".to_string()],
        cons: vec!["Only one approach considered".to_string()],
        complexity: analysis.map_or(5, |a| a.complexity),
        risk: analysis.map_or(RiskLevel::Medium, |a| a.risk),
        time_estimate: "Unknown".to_string(),
    }
}

/// Accepts a bare array or `{"strategies": [...]}`; entries without a name are dropped.
fn parse_strategies(reply: &str) -> Vec<ImplementationStrategy> {
    let items = match extract_json(reply) {
        Some(Value::Array(items)) => items,
        Some(Value::Object(mut obj)) => match obj.remove("strategies") {
            Some(Value::Array(items)) => items,
            _ => return Vec::new(),
        },
        _ => return Vec::new(),
    };
    items.iter().filter_map(strategy_from).collect()
}

fn strategy_from(value: &Value) -> Option<ImplementationStrategy> {
    let obj = value.as_object()?;
    let text = |keys: &[&str]| -> Option<String> {
        keys.iter()
            .find_map(|k| obj.get(*k).and_then(Value::as_str))
            .map(|s| s.trim().to_string())
    };
    let list = |key: &str| -> Vec<String> {
        obj.get(key)
            .and_then(Value::as_array)
            .map(|items| {
                items
                    .iter()
                    .filter_map(Value::as_str)
                    .map(str::to_string)
                    .collect()
            })
            .unwrap_or_default()
    };
    let name = text(&["name"]).filter(|n| !n.is_empty())?;
    let complexity = ["complexity", "estimated_complexity"]
        .iter()
        .find_map(|k| obj.get(*k).and_then(Value::as_u64))
        .unwrap_or(5)
        .clamp(1, 10) as u8;
    Some(ImplementationStrategy {
        name,
        approach: text(&["approach"]).unwrap_or_default(),
        pros: list("pros"),
        cons: list("cons"),
        complexity,
        risk: text(&["risk", "risk_level"])
            .map(|r| RiskLevel::parse_lenient(&r))
            .unwrap_or_default(),
        time_estimate: text(&["time_estimate", "estimated_time"])
            .unwrap_or_else(|| "Unknown".to_string()),
    })
}
