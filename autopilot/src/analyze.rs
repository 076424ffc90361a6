//! Ticket analysis: is the work item clear enough to implement?

use anyhow::Result;
use serde_json::Value;
use tracing::{info, instrument, warn};

use crate::agent::ask;
use crate::core::action::extract_json;
use crate::core::types::{RiskLevel, TicketAnalysis, WorkItem};
use crate::governor::ResourceGovernor;
use crate::io::model::Model;
use crate::io::prompt::PromptEngine;

/// Lowest clarity at which documented assumptions may stand in for answers.
const ASSUMPTION_FLOOR: u8 = 50;
const MAX_ASSUMPTIONS: usize = 3;

/// One model call producing a [`TicketAnalysis`].
///
/// An unparseable reply yields [`fallback_analysis`]. Model and quota errors propagate.
#[instrument(skip_all, fields(issue = item.number))]
pub fn analyze_ticket<M: Model>(
    model: &M,
    governor: &mut ResourceGovernor,
    prompts: &PromptEngine,
    system: &str,
    item: &WorkItem,
    context: &str,
) -> Result<TicketAnalysis> {
    let prompt = prompts.analysis(item, context)?;
    let reply = ask(model, governor, "ticket analysis", system, &prompt)?;
    let analysis = match extract_json(&reply) {
        Some(Value::Object(obj)) => analysis_from(&obj),
        _ => {
            warn!("analysis reply unparseable, using conservative fallback");
            fallback_analysis()
        }
    };
    info!(
        clarity = analysis.clarity_score,
        complexity = analysis.complexity,
        risk = analysis.risk.as_str(),
        "ticket analyzed"
    );
    Ok(analysis)
}

/// Conservative assessment used when the model's reply cannot be read.
pub fn fallback_analysis() -> TicketAnalysis {
    TicketAnalysis {
        clarity_score: 50,
        is_implementable: false,
        missing_information: vec!["Unable to analyze ticket".to_string()],
        assumptions: Vec::new(),
        questions: Vec::new(),
        acceptance_criteria: Vec::new(),
        complexity: 5,
        suggested_strategy: "Unknown".to_string(),
        risk: RiskLevel::High,
    }
}

/// Proceed when clarity meets the threshold, or when a few documented
/// assumptions can cover a moderately clear ticket.
pub fn should_proceed(analysis: &TicketAnalysis, min_clarity: u8, allow_assumptions: bool) -> bool {
    if analysis.clarity_score >= min_clarity {
        return true;
    }
    allow_assumptions
        && analysis.clarity_score >= ASSUMPTION_FLOOR
        && analysis.assumptions.len() <= MAX_ASSUMPTIONS
}

fn analysis_from(obj: &serde_json::Map<String, Value>) -> TicketAnalysis {
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
    let number = |key: &str, default: u64, max: u64| -> u64 {
        obj.get(key)
            .and_then(|v| v.as_u64().or_else(|| v.as_f64().map(|f| f.max(0.0) as u64)))
            .unwrap_or(default)
            .min(max)
    };
    TicketAnalysis {
        clarity_score: number("clarity_score", 50, 100) as u8,
        is_implementable: obj
            .get("is_implementable")
            .and_then(Value::as_bool)
            .unwrap_or(false),
        missing_information: list("missing_information"),
        assumptions: list("assumptions_needed"),
        questions: list("questions_for_author"),
        acceptance_criteria: list("acceptance_criteria"),
        complexity: number("estimated_complexity", 5, 10).max(1) as u8,
        suggested_strategy: obj
            .get("implementation_strategy")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string(),
        risk: obj
            .get("risk_level")
            .and_then(Value::as_str)
            .map(RiskLevel::parse_lenient)
            .unwrap_or_default(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::budget::BudgetLimits;
    use crate::test_support::{ScriptedModel, work_item};

    fn analyze(reply: &str) -> TicketAnalysis {
        let temp = tempfile::tempdir().expect("tempdir");
        let mut gov =
            ResourceGovernor::new("gpt-4o", BudgetLimits::default(), temp.path().join("u.json"));
        let model = ScriptedModel::new([reply]);
        analyze_ticket(
            &model,
            &mut gov,
            &PromptEngine::new(),
            "system",
            &work_item(3, "Add export", "CSV export of orders"),
            "",
        )
        .expect("analyze")
    }

    #[test]
    fn parses_model_assessment() {
        let analysis = analyze(
            r#"```json
{"clarity_score": 85, "is_implementable": true, "missing_information": [],
 "assumptions_needed": ["UTF-8"], "questions_for_author": [],
 "acceptance_criteria": ["Button exports CSV"], "estimated_complexity": 4,
 "implementation_strategy": "Add an export endpoint", "risk_level": "low"}
```"#,
        );
        assert_eq!(analysis.clarity_score, 85);
        assert!(analysis.is_implementable);
        assert_eq!(analysis.assumptions, vec!["UTF-8"]);
        assert_eq!(analysis.complexity, 4);
        assert_eq!(analysis.risk, RiskLevel::Low);
    }

    #[test]
    fn unparseable_reply_is_conservative() {
        let analysis = analyze("I'd need to see the code first.");
        assert_eq!(analysis, fallback_analysis());
        assert_eq!(analysis.risk, RiskLevel::High);
    }

    #[test]
    fn out_of_range_numbers_are_clamped() {
        let analysis = analyze(r#"{"clarity_score": 250, "estimated_complexity": 0}"#);
        assert_eq!(analysis.clarity_score, 100);
        assert_eq!(analysis.complexity, 1);
        assert_eq!(analysis.risk, RiskLevel::Medium);
    }

    #[test]
    fn proceed_rules() {
        let mut analysis = fallback_analysis();
        analysis.clarity_score = 40;
        assert!(!should_proceed(&analysis, 70, true));
        analysis.clarity_score = 60;
        assert!(should_proceed(&analysis, 70, true));
        assert!(!should_proceed(&analysis, 70, false));
        analysis.assumptions = vec!["a".into(), "b".into(), "c".into(), "d".into()];
        assert!(!should_proceed(&analysis, 70, true));
        analysis.clarity_score = 70;
        assert!(should_proceed(&analysis, 70, false));
    }
}
