//! End-to-end orchestrator scenarios against a throwaway git repository.
//!
//! The model, tool runner and tracker are scripted; git is real.

use autopilot::core::budget::BudgetLimits;
use autopilot::core::sanitize::Sanitizer;
use autopilot::exit_codes;
use autopilot::governor::ResourceGovernor;
use autopilot::io::config::AutopilotConfig;
use autopilot::io::git::Git;
use autopilot::io::outcome_log::load_outcomes;
use autopilot::orchestrator::{Collaborators, RunReport, RunSetup, RunStatus, run_work_item};
use autopilot::test_support::{
    RecordingTracker, ScriptedModel, ScriptedToolRunner, TestRepo, work_item,
};

const CLEAR: &str = r#"{"clarity_score": 92, "is_implementable": true, "estimated_complexity": 3,
    "implementation_strategy": "Add the file", "risk_level": "low"}"#;
const THREE_STRATEGIES: &str = r#"{"strategies": [
    {"name": "Minimal", "approach": "one file", "complexity": 1, "risk": "low"},
    {"name": "Moderate", "approach": "file plus docs", "complexity": 2, "risk": "low"},
    {"name": "Thorough", "approach": "file, docs and tests", "complexity": 3, "risk": "low"}]}"#;
const WRITE_AND_DONE: &str = r#"```json
[{"action": "write_file", "path": "src/greeting.txt", "content": "hello\n"},
 {"action": "commit", "message": "feat: add greeting"},
 {"action": "done", "summary": "greeting added"}]
```"#;
const DONE_ONLY: &str = r#"[{"action": "done", "summary": "nothing to change"}]"#;
const APPROVE: &str = r#"{"code_quality_passed": true, "requirements_met": true,
    "ui_functional": "n/a", "issues": [], "summary": "meets the request"}"#;
const REJECT: &str = r#"{"code_quality_passed": true, "requirements_met": false,
    "ui_functional": "n/a", "issues": ["greeting is not capitalized"], "summary": "incomplete"}"#;

struct Harness {
    repo: TestRepo,
    state: tempfile::TempDir,
    config: AutopilotConfig,
    sanitizer: Sanitizer,
    tools: ScriptedToolRunner,
    tracker: RecordingTracker,
}

impl Harness {
    fn new() -> Self {
        let mut config = AutopilotConfig::default();
        config.project = "scenarios".to_string();
        config.agent.incremental_validation = false;
        Self {
            repo: TestRepo::new().expect("repo"),
            state: tempfile::tempdir().expect("tempdir"),
            config,
            sanitizer: Sanitizer::default(),
            tools: ScriptedToolRunner::new(),
            tracker: RecordingTracker::new(),
        }
    }

    fn run(&self, model: &ScriptedModel, number: u64) -> RunReport {
        let mut governor = ResourceGovernor::new(
            "gpt-4o",
            BudgetLimits::default(),
            self.state.path().join("usage.json"),
        );
        let setup = RunSetup {
            config: &self.config,
            root: self.repo.path(),
            sanitizer: &self.sanitizer,
            context: "A tiny demo repository.",
            standards: "Keep changes small.",
            outcome_log: self.state.path().join("implementations.jsonl"),
        };
        let deps = Collaborators {
            model,
            tools: &self.tools,
            tracker: &self.tracker,
        };
        let item = work_item(number, "Add a greeting", "Create src/greeting.txt saying Hello.");
        run_work_item(&setup, &deps, &mut governor, &item).expect("run")
    }

    fn on_base_branch(&self) -> bool {
        Git::new(self.repo.path()).current_branch().expect("branch") == "main"
    }
}

/// Scenario A: clarity 40 against a threshold of 70 halts with a clarification
/// comment and no implementation attempt.
#[test]
fn unclear_issue_requests_clarification() {
    let harness = Harness::new();
    let model = ScriptedModel::new([r#"{"clarity_score": 40, "is_implementable": false,
        "missing_information": ["Which file should change"],
        "questions_for_author": ["Where should the greeting appear?"]}"#]);

    let report = harness.run(&model, 31);

    assert_eq!(report.status.exit_code(), exit_codes::CLARIFICATION);
    assert_eq!(report.outcome, None);
    assert_eq!(model.requests().len(), 1);
    let comments = harness.tracker.comments();
    assert_eq!(comments.len(), 1);
    assert_eq!(comments[0].0, 31);
    assert!(comments[0].1.contains("Where should the greeting appear?"));
    assert!(comments[0].1.contains("Which file should change"));
    assert!(harness.tracker.published().is_empty());
    assert!(
        !Git::new(harness.repo.path())
            .branch_exists("autopilot/issue-31")
            .expect("show-ref")
    );
    assert!(harness.on_base_branch());
}

/// Scenario B: the first two strategies fail review on all three attempts,
/// the third passes first time. Seven attempts in total.
#[test]
fn third_strategy_succeeds_after_two_exhausted() {
    let harness = Harness::new();
    let mut replies = vec![CLEAR, THREE_STRATEGIES];
    for _ in 0..6 {
        replies.extend([WRITE_AND_DONE, REJECT]);
    }
    replies.extend([WRITE_AND_DONE, APPROVE]);
    let model = ScriptedModel::new(replies);

    let report = harness.run(&model, 7);

    assert_eq!(
        report.status,
        RunStatus::Published {
            url: "https://example.test/pull/1".to_string(),
            verified: true,
        }
    );
    let outcome = report.outcome.expect("outcome");
    assert!(outcome.success);
    assert!(outcome.quality_passed);
    assert_eq!(outcome.attempts, 7);
    assert_eq!(outcome.strategy_used.as_deref(), Some("Thorough"));
    assert_eq!(outcome.error_messages.len(), 6);
    assert_eq!(model.remaining(), 0);

    let prompts = model.prompts();
    assert!(prompts[2].contains("# STRATEGY: Minimal"));
    assert!(prompts[4].contains("attempt 2 of 3"));
    assert!(prompts[8].contains("# STRATEGY: Moderate"));
    assert!(prompts[14].contains("# STRATEGY: Thorough"));

    let published = harness.tracker.published();
    assert_eq!(published.len(), 1);
    assert!(published[0].body.contains("Thorough"));
    assert!(harness.on_base_branch());

    let records = load_outcomes(&harness.state.path().join("implementations.jsonl")).expect("load");
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].issue_number, 7);
    assert_eq!(records[0].outcome.attempts, 7);
}

/// Scenario E: no attempt ever commits, so nothing is verified or published.
#[test]
fn no_commits_anywhere_fails_without_pull_request() {
    let harness = Harness::new();
    let mut replies = vec![CLEAR, THREE_STRATEGIES];
    replies.extend([DONE_ONLY; 9]);
    let model = ScriptedModel::new(replies);

    let report = harness.run(&model, 44);

    assert_eq!(report.status.exit_code(), exit_codes::FAILED);
    let outcome = report.outcome.expect("outcome");
    assert!(!outcome.success);
    assert_eq!(outcome.attempts, 9);
    assert!(!outcome.error_messages.is_empty());
    assert!(
        outcome
            .error_messages
            .iter()
            .any(|m| m.contains("produced no commits"))
    );
    assert_eq!(outcome.pr_url, None);
    assert!(harness.tracker.published().is_empty());
    assert!(model.prompts()[3].contains("No commits were made"));
    assert!(harness.on_base_branch());
}
