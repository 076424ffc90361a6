//! Shared deterministic types for autopilot core logic.
//!
//! These types define stable contracts between the driver, the gate engine and
//! the orchestrator. They do not touch the filesystem or spawn processes.

use serde::{Deserialize, Serialize};

/// Where a work item came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WorkItemSource {
    Issue,
    Manual,
}

/// Input to one implementation run: a tracked issue or a pasted ticket.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkItem {
    pub number: u64,
    pub title: String,
    pub body: String,
    #[serde(default)]
    pub labels: Vec<String>,
    pub source: WorkItemSource,
}

impl WorkItem {
    /// Body text, or a placeholder when the author left it empty.
    pub fn description(&self) -> &str {
        let body = self.body.trim();
        if body.is_empty() {
            "No description provided"
        } else {
            body
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
}

/// One role-tagged conversation message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    pub role: Role,
    pub content: String,
}

impl Message {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: Role::System,
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            content: content.into(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum RiskLevel {
    Low,
    #[default]
    Medium,
    High,
}

impl RiskLevel {
    /// Lenient parse of model-provided risk text; unknown values map to medium.
    pub fn parse_lenient(raw: &str) -> Self {
        match raw.trim().to_ascii_lowercase().as_str() {
            "low" => Self::Low,
            "high" => Self::High,
            _ => Self::Medium,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Low => "low",
            Self::Medium => "medium",
            Self::High => "high",
        }
    }
}

/// One candidate approach for implementing a work item.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ImplementationStrategy {
    pub name: String,
    pub approach: String,
    #[serde(default)]
    pub pros: Vec<String>,
    #[serde(default)]
    pub cons: Vec<String>,
    /// 1 (trivial) to 10 (sweeping).
    pub complexity: u8,
    pub risk: RiskLevel,
    pub time_estimate: String,
}

/// Assessment of how ready a work item is for implementation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TicketAnalysis {
    /// 0 to 100.
    pub clarity_score: u8,
    pub is_implementable: bool,
    pub missing_information: Vec<String>,
    pub assumptions: Vec<String>,
    pub questions: Vec<String>,
    pub acceptance_criteria: Vec<String>,
    /// 1 to 10.
    pub complexity: u8,
    pub suggested_strategy: String,
    pub risk: RiskLevel,
}

/// Named snapshot of repository state, usable for rollback.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Checkpoint {
    pub name: String,
    /// RFC 3339 creation time.
    pub timestamp: String,
    pub commit: String,
    pub description: String,
    pub score: f64,
}

/// Token/cost counters for one scope (call, issue, or day).
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Usage {
    #[serde(default)]
    pub tokens: u64,
    #[serde(default)]
    pub cost: f64,
    #[serde(default, rename = "api_calls")]
    pub calls: u64,
}

impl Usage {
    pub fn record(&mut self, tokens: u64, cost: f64) {
        self.tokens += tokens;
        self.cost += cost;
        self.calls += 1;
    }
}

/// Pre-flight estimate of what an issue will cost.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CostEstimate {
    pub estimated_tokens: u64,
    pub estimated_cost: f64,
    pub estimated_iterations: u32,
    /// 0.3 to 1.0; lower for more complex work.
    pub confidence: f64,
}

/// Enforcement tier of a quality gate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum GateLevel {
    Critical,
    Required,
    Recommended,
}

impl GateLevel {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Critical => "critical",
            Self::Required => "required",
            Self::Recommended => "recommended",
        }
    }
}

/// Result of one quality gate for one verification pass.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GateResult {
    pub name: String,
    pub level: GateLevel,
    pub passed: bool,
    /// True when no applicable tool exists; `passed` is then also true.
    #[serde(default)]
    pub skipped: bool,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
}

/// Closing record for one issue-attempt. Appended to the outcome log.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct ImplementationOutcome {
    pub success: bool,
    pub attempts: u32,
    pub quality_passed: bool,
    pub cost: f64,
    pub duration_secs: f64,
    pub files_changed: u32,
    pub lines_added: u32,
    pub lines_removed: u32,
    pub strategy_used: Option<String>,
    #[serde(default)]
    pub error_messages: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pr_url: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn risk_parse_is_lenient() {
        assert_eq!(RiskLevel::parse_lenient(" HIGH "), RiskLevel::High);
        assert_eq!(RiskLevel::parse_lenient("low"), RiskLevel::Low);
        assert_eq!(RiskLevel::parse_lenient("spicy"), RiskLevel::Medium);
    }

    #[test]
    fn usage_serializes_call_count_as_api_calls() {
        let mut usage = Usage::default();
        usage.record(100, 0.5);
        let value = serde_json::to_value(usage).expect("serialize");
        assert_eq!(value["api_calls"], 1);
        assert_eq!(value["tokens"], 100);
    }

    #[test]
    fn empty_body_has_placeholder_description() {
        let item = WorkItem {
            number: 1,
            title: "t".to_string(),
            body: "   ".to_string(),
            labels: Vec::new(),
            source: WorkItemSource::Issue,
        };
        assert_eq!(item.description(), "No description provided");
    }
}
