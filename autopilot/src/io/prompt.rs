//! Prompt templates rendered with minijinja.
//!
//! Every model-facing text lives in `prompts/*.md` and is compiled into the
//! binary. Rendering is deterministic: the same inputs produce the same prompt.

use anyhow::Result;
use minijinja::{Environment, context};
use serde::Serialize;

use crate::core::action::action_schema;
use crate::core::types::{ImplementationStrategy, TicketAnalysis, WorkItem};

const SYSTEM_TEMPLATE: &str = include_str!("prompts/system.md");
const IMPLEMENT_TEMPLATE: &str = include_str!("prompts/implement.md");
const RETRY_TEMPLATE: &str = include_str!("prompts/retry.md");
const CORRECTIVE_TEMPLATE: &str = include_str!("prompts/corrective.md");
const STRATEGIES_TEMPLATE: &str = include_str!("prompts/strategies.md");
const ANALYSIS_TEMPLATE: &str = include_str!("prompts/analysis.md");
const REVIEW_TEMPLATE: &str = include_str!("prompts/review.md");
const CLARIFICATION_TEMPLATE: &str = include_str!("prompts/clarification.md");
const PULL_REQUEST_TEMPLATE: &str = include_str!("prompts/pull_request.md");

/// A changed file shown to the reviewer.
#[derive(Debug, Clone, Serialize)]
pub struct ReviewFile {
    pub path: String,
    pub content: String,
}

/// Inputs for the pull request body.
#[derive(Debug, Clone)]
pub struct PullRequestBody<'a> {
    pub item: &'a WorkItem,
    pub strategy: &'a str,
    pub attempts: u32,
    pub quality_status: &'a str,
    pub cost: f64,
    pub tokens: u64,
    pub checklist: &'a str,
    pub warning: Option<&'a str>,
}

fn non_empty(text: &str) -> Option<&str> {
    let trimmed = text.trim();
    (!trimmed.is_empty()).then_some(trimmed)
}

/// Template engine wrapper around minijinja.
pub struct PromptEngine {
    env: Environment<'static>,
}

impl Default for PromptEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl PromptEngine {
    pub fn new() -> Self {
        let mut env = Environment::new();
        env.set_trim_blocks(true);
        env.set_lstrip_blocks(true);
        for (name, source) in [
            ("system", SYSTEM_TEMPLATE),
            ("implement", IMPLEMENT_TEMPLATE),
            ("retry", RETRY_TEMPLATE),
            ("corrective", CORRECTIVE_TEMPLATE),
            ("strategies", STRATEGIES_TEMPLATE),
            ("analysis", ANALYSIS_TEMPLATE),
            ("review", REVIEW_TEMPLATE),
            ("clarification", CLARIFICATION_TEMPLATE),
            ("pull_request", PULL_REQUEST_TEMPLATE),
        ] {
            env.add_template(name, source)
                .expect("prompt template should be valid");
        }
        Self { env }
    }

    /// Persistent system message: project context, coding standards and the action protocol.
    pub fn system(&self, context: &str, standards: &str, command_timeout_secs: u64) -> Result<String> {
        let rendered = self.env.get_template("system")?.render(context! {
            context => non_empty(context),
            standards => non_empty(standards),
            command_timeout_secs => command_timeout_secs,
        })?;
        Ok(rendered)
    }

    /// First-attempt prompt for one strategy. Asks for a plan before any actions.
    pub fn implement(
        &self,
        item: &WorkItem,
        strategy: &ImplementationStrategy,
        analysis: Option<&TicketAnalysis>,
        files: &[String],
    ) -> Result<String> {
        let rendered = self.env.get_template("implement")?.render(context! {
            item => item,
            description => item.description(),
            strategy => strategy,
            analysis => analysis,
            files => files,
        })?;
        Ok(rendered)
    }

    /// Follow-up attempt within a strategy. Project context stays in the system message.
    pub fn retry(
        &self,
        item: &WorkItem,
        strategy: &str,
        attempt: u32,
        max_attempts: u32,
        feedback: &str,
    ) -> Result<String> {
        let rendered = self.env.get_template("retry")?.render(context! {
            item => item,
            strategy => strategy,
            attempt => attempt,
            max_attempts => max_attempts,
            feedback => feedback.trim(),
        })?;
        Ok(rendered)
    }

    pub fn corrective(&self, reason: &str) -> Result<String> {
        let rendered = self.env.get_template("corrective")?.render(context! {
            reason => reason,
            schema => action_schema().trim(),
        })?;
        Ok(rendered)
    }

    pub fn strategies(
        &self,
        item: &WorkItem,
        context: &str,
        analysis: Option<&TicketAnalysis>,
        count: usize,
    ) -> Result<String> {
        let rendered = self.env.get_template("strategies")?.render(context! {
            item => item,
            description => item.description(),
            context => non_empty(context),
            analysis => analysis,
            count => count,
        })?;
        Ok(rendered)
    }

    pub fn analysis(&self, item: &WorkItem, context: &str) -> Result<String> {
        let rendered = self.env.get_template("analysis")?.render(context! {
            item => item,
            description => item.description(),
            labels => &item.labels,
            context => non_empty(context),
        })?;
        Ok(rendered)
    }

    pub fn review(
        &self,
        item: &WorkItem,
        context: &str,
        standards: &str,
        diff: &str,
        files: &[ReviewFile],
    ) -> Result<String> {
        let rendered = self.env.get_template("review")?.render(context! {
            item => item,
            description => item.description(),
            context => non_empty(context),
            standards => non_empty(standards),
            diff => diff,
            files => files,
        })?;
        Ok(rendered)
    }

    /// Comment asking the author for the details the analysis found missing.
    pub fn clarification(&self, analysis: &TicketAnalysis) -> Result<String> {
        let rendered = self
            .env
            .get_template("clarification")?
            .render(context! { analysis => analysis })?;
        Ok(rendered)
    }

    pub fn pull_request(&self, body: &PullRequestBody<'_>) -> Result<String> {
        let rendered = self.env.get_template("pull_request")?.render(context! {
            item => body.item,
            closes => body.item.source == crate::core::types::WorkItemSource::Issue,
            description => body.item.description(),
            strategy => body.strategy,
            attempts => body.attempts,
            quality_status => body.quality_status,
            cost => format!("{:.2}", body.cost),
            tokens => body.tokens,
            checklist => non_empty(body.checklist),
            warning => body.warning,
        })?;
        Ok(rendered)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::types::{RiskLevel, WorkItemSource};

    fn item() -> WorkItem {
        WorkItem {
            number: 42,
            title: "Add dark mode".to_string(),
            body: "Toggle in settings".to_string(),
            labels: vec!["ui".to_string()],
            source: WorkItemSource::Issue,
        }
    }

    fn strategy() -> ImplementationStrategy {
        ImplementationStrategy {
            name: "Minimal toggle".to_string(),
            approach: "Add a CSS class switch".to_string(),
            pros: vec![],
            cons: vec![],
            complexity: 2,
            risk: RiskLevel::Low,
            time_estimate: "1 hour".to_string(),
        }
    }

    #[test]
    fn system_prompt_omits_empty_sections() {
        let engine = PromptEngine::new();
        let prompt = engine.system("A shop", "  ", 60).expect("render");
        assert!(prompt.contains("# PROJECT CONTEXT\nA shop"));
        assert!(!prompt.contains("CODING STANDARDS"));
        assert!(prompt.contains("60 seconds"));
    }

    #[test]
    fn implement_prompt_asks_for_plan_first() {
        let engine = PromptEngine::new();
        let prompt = engine
            .implement(&item(), &strategy(), None, &["src/app.ts".to_string()])
            .expect("render");
        assert!(prompt.contains("# WORK ITEM #42"));
        assert!(prompt.contains("# STRATEGY: Minimal toggle"));
        assert!(prompt.contains("\"files_to_read\""));
        assert!(prompt.contains("- src/app.ts"));
    }

    /// Retry prompts carry feedback but not the project context.
    #[test]
    fn retry_prompt_carries_only_feedback() {
        let engine = PromptEngine::new();
        let prompt = engine
            .retry(&item(), "Minimal toggle", 2, 3, "- [CRITICAL] Syntax Valid: bad\n")
            .expect("render");
        assert!(prompt.contains("attempt 2 of 3"));
        assert!(prompt.contains("- [CRITICAL] Syntax Valid: bad"));
        assert!(!prompt.contains("PROJECT CONTEXT"));
    }

    #[test]
    fn corrective_prompt_embeds_schema() {
        let engine = PromptEngine::new();
        let prompt = engine.corrective("Invalid response format").expect("render");
        assert!(prompt.starts_with("ERROR: Invalid response format"));
        assert!(prompt.contains("\"read_file\""));
    }

    #[test]
    fn pull_request_body_closes_issues_and_warns() {
        let engine = PromptEngine::new();
        let work = item();
        let body = engine
            .pull_request(&PullRequestBody {
                item: &work,
                strategy: "Minimal toggle",
                attempts: 2,
                quality_status: "needs review",
                cost: 0.1234,
                tokens: 900,
                checklist: "- Tests Pass (required): FAIL - Tests failed\n",
                warning: Some("verification did not pass"),
            })
            .expect("render");
        assert!(body.contains("Closes #42"));
        assert!(body.contains("$0.12"));
        assert!(body.contains("verification did not pass"));

        let manual = WorkItem {
            source: WorkItemSource::Manual,
            ..item()
        };
        let body = engine
            .pull_request(&PullRequestBody {
                item: &manual,
                strategy: "s",
                attempts: 1,
                quality_status: "passed",
                cost: 0.0,
                tokens: 0,
                checklist: "",
                warning: None,
            })
            .expect("render");
        assert!(!body.contains("Closes"));
        assert!(!body.contains("Quality notice"));
    }
}
