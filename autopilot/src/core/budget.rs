//! Token/cost budget rules: pricing, ceilings, quota decisions and alerts.

use serde::{Deserialize, Serialize};

use crate::core::types::{CostEstimate, Usage};

/// USD per one million tokens.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ModelPricing {
    pub input_per_million: f64,
    pub output_per_million: f64,
}

const GPT_4O: ModelPricing = ModelPricing {
    input_per_million: 2.50,
    output_per_million: 10.00,
};

const GPT_4O_MINI: ModelPricing = ModelPricing {
    input_per_million: 0.15,
    output_per_million: 0.60,
};

/// Pricing keyed by model identifier; unknown models are billed as gpt-4o.
pub fn pricing_for(model: &str) -> ModelPricing {
    match model {
        "gpt-4o-mini" => GPT_4O_MINI,
        _ => GPT_4O,
    }
}

impl ModelPricing {
    pub fn cost(&self, input_tokens: u64, output_tokens: u64) -> f64 {
        (input_tokens as f64 * self.input_per_million
            + output_tokens as f64 * self.output_per_million)
            / 1_000_000.0
    }

    /// Cost of an undifferentiated token count, assuming a 40/60 input/output split.
    pub fn blended_cost(&self, tokens: u64) -> f64 {
        let input = tokens as f64 * 0.4;
        let output = tokens as f64 * 0.6;
        (input * self.input_per_million + output * self.output_per_million) / 1_000_000.0
    }
}

/// Spend ceilings at daily and per-issue scope.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BudgetLimits {
    pub daily_token_limit: u64,
    pub daily_cost_limit: f64,
    pub per_issue_token_limit: u64,
    pub per_issue_cost_limit: f64,
}

impl Default for BudgetLimits {
    fn default() -> Self {
        Self {
            daily_token_limit: 1_000_000,
            daily_cost_limit: 50.0,
            per_issue_token_limit: 200_000,
            per_issue_cost_limit: 10.0,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QuotaScope {
    Daily,
    Issue,
}

impl QuotaScope {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Daily => "daily",
            Self::Issue => "per-issue",
        }
    }
}

/// Which ceiling a prospective spend would cross.
#[derive(Debug, Clone, PartialEq)]
pub struct QuotaBreach {
    pub scope: QuotaScope,
    pub resource: &'static str,
    pub projected: f64,
    pub limit: f64,
}

impl std::fmt::Display for QuotaBreach {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.resource == "cost" {
            write!(
                f,
                "{} cost limit: ${:.2} would exceed ${:.2}",
                self.scope.as_str(),
                self.projected,
                self.limit
            )
        } else {
            write!(
                f,
                "{} token limit: {:.0} would exceed {:.0}",
                self.scope.as_str(),
                self.projected,
                self.limit
            )
        }
    }
}

/// Decide whether a prospective spend fits under every ceiling.
///
/// Compares current usage plus the estimate against both scopes; the first
/// breach found is returned.
pub fn check_quota(
    limits: &BudgetLimits,
    daily: &Usage,
    issue: &Usage,
    estimated_tokens: u64,
    estimated_cost: f64,
) -> Result<(), QuotaBreach> {
    let checks = [
        (
            QuotaScope::Daily,
            "tokens",
            (daily.tokens + estimated_tokens) as f64,
            limits.daily_token_limit as f64,
        ),
        (
            QuotaScope::Daily,
            "cost",
            daily.cost + estimated_cost,
            limits.daily_cost_limit,
        ),
        (
            QuotaScope::Issue,
            "tokens",
            (issue.tokens + estimated_tokens) as f64,
            limits.per_issue_token_limit as f64,
        ),
        (
            QuotaScope::Issue,
            "cost",
            issue.cost + estimated_cost,
            limits.per_issue_cost_limit,
        ),
    ];
    for (scope, resource, projected, limit) in checks {
        if projected > limit {
            return Err(QuotaBreach {
                scope,
                resource,
                projected,
                limit,
            });
        }
    }
    Ok(())
}

/// Non-blocking notice levels for daily consumption.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum AlertLevel {
    /// At or above 80% of a daily ceiling.
    Warning,
    /// At or above 90% of a daily ceiling.
    Critical,
}

pub fn alert_level(used: f64, limit: f64) -> Option<AlertLevel> {
    if limit <= 0.0 {
        return None;
    }
    let ratio = used / limit;
    if ratio >= 0.9 {
        Some(AlertLevel::Critical)
    } else if ratio >= 0.8 {
        Some(AlertLevel::Warning)
    } else {
        None
    }
}

/// Highest alert level across daily tokens and daily cost.
pub fn daily_alert(limits: &BudgetLimits, daily: &Usage) -> Option<AlertLevel> {
    let tokens = alert_level(daily.tokens as f64, limits.daily_token_limit as f64);
    let cost = alert_level(daily.cost, limits.daily_cost_limit);
    tokens.max(cost)
}

/// Estimate issue cost from context size (characters) and complexity (1-10).
pub fn estimate_issue_cost(
    pricing: &ModelPricing,
    context_size: usize,
    complexity: u8,
) -> CostEstimate {
    let complexity = u32::from(complexity.clamp(1, 10));
    let context_tokens = (context_size / 4) as u64;
    let iterations = (3 + complexity).min(15);
    let per_iteration_input = 1_000u64;
    let per_iteration_output = 2_000u64;
    let input = context_tokens + u64::from(iterations) * per_iteration_input;
    let output = u64::from(iterations) * per_iteration_output;
    CostEstimate {
        estimated_tokens: input + output,
        estimated_cost: pricing.cost(input, output),
        estimated_iterations: iterations,
        confidence: (1.0 - f64::from(complexity) / 15.0).max(0.3),
    }
}
