//! Per-work-item state machine.
//!
//! analyze, pick strategies, then for each strategy in rank order run up to
//! `max_attempts_per_strategy` implement/verify rounds. The first verified
//! attempt is published. When every strategy is exhausted the best verified
//! checkpoint is published with a quality warning, or the run fails.
//!
//! Every path, including errors, leaves the working tree on the base branch.

use std::path::{Path, PathBuf};
use std::time::Instant;

use anyhow::{Error, Result};
use tracing::{error, info, instrument, warn};

use crate::actions::ActionRunner;
use crate::agent::{Agent, DriveOutcome, DriverEnv, drive};
use crate::analyze::{analyze_ticket, should_proceed};
use crate::checkpoint::CheckpointManager;
use crate::core::quality::QualityReport;
use crate::core::sanitize::Sanitizer;
use crate::core::types::{
    GateLevel, GateResult, ImplementationOutcome, TicketAnalysis, WorkItem, WorkItemSource,
};
use crate::exit_codes;
use crate::gates::QualityGateEngine;
use crate::governor::{QuotaExceededError, ResourceGovernor};
use crate::incremental::IncrementalValidator;
use crate::io::config::AutopilotConfig;
use crate::io::git::{CHECKPOINT_PREFIX, DiffStat, Git};
use crate::io::model::Model;
use crate::io::outcome_log::{OutcomeRecord, append_outcome};
use crate::io::prompt::{PromptEngine, PullRequestBody};
use crate::io::tools::ToolRunner;
use crate::io::tracker::{PullRequest, Tracker};
use crate::io::workspace::Workspace;
use crate::review::{ReviewRequest, review_changes};
use crate::strategy::{StrategyRequest, generate_strategies, rank};

const VERIFIED_PREFIX: &str = "verified_";
/// Files listed in the first implementation prompt.
const PROMPT_FILE_LIMIT: usize = 200;
const NO_COMMITS_FEEDBACK: &str = "No commits were made relative to the base branch. \
Make the required changes and save them with a `commit` action before `done`.";
const EXHAUSTED_WARNING: &str = "Verification did not pass for any strategy. \
This is the best attempt, published for human review.";
const NEEDS_REVIEW_WARNING: &str =
    "Some required or recommended checks failed. Review them before merging.";

/// Fixed inputs for a run.
#[derive(Debug, Clone)]
pub struct RunSetup<'a> {
    pub config: &'a AutopilotConfig,
    /// Repository root; also the agent's workspace.
    pub root: &'a Path,
    pub sanitizer: &'a Sanitizer,
    pub context: &'a str,
    pub standards: &'a str,
    pub outcome_log: PathBuf,
}

/// External collaborators the run talks to.
pub struct Collaborators<'a, M: Model, R: ToolRunner, T: Tracker> {
    pub model: &'a M,
    pub tools: &'a R,
    pub tracker: &'a T,
}

#[derive(Debug, Clone, PartialEq)]
pub enum RunStatus {
    Published {
        url: String,
        /// False when published after exhaustion with a quality warning.
        verified: bool,
    },
    /// Halted before implementation. The comment was posted for issues only.
    ClarificationRequested {
        clarity: u8,
        comment: String,
        posted: bool,
    },
    Failed {
        reason: String,
    },
    QuotaExceeded {
        reason: String,
    },
}

impl RunStatus {
    pub fn exit_code(&self) -> i32 {
        match self {
            Self::Published { .. } => exit_codes::OK,
            Self::ClarificationRequested { .. } => exit_codes::CLARIFICATION,
            Self::Failed { .. } => exit_codes::FAILED,
            Self::QuotaExceeded { .. } => exit_codes::QUOTA,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct RunReport {
    pub status: RunStatus,
    /// `None` when the run halted for clarification.
    pub outcome: Option<ImplementationOutcome>,
}

/// Bookkeeping that survives an error mid-run.
#[derive(Debug, Default)]
struct Progress {
    attempts: u32,
    strategy: Option<String>,
    quality_passed: bool,
    errors: Vec<String>,
}

enum Halt {
    Clarification {
        clarity: u8,
        comment: String,
        posted: bool,
    },
    Published {
        url: String,
        verified: bool,
    },
    Exhausted,
}

/// Process one work item end to end.
///
/// Fails only when the repository cannot be prepared (dirty tree, missing
/// base branch). Everything after that is reported through [`RunStatus`] and
/// recorded in the outcome log.
#[instrument(skip_all, fields(issue = item.number))]
pub fn run_work_item<M: Model, R: ToolRunner, T: Tracker>(
    setup: &RunSetup<'_>,
    deps: &Collaborators<'_, M, R, T>,
    governor: &mut ResourceGovernor,
    item: &WorkItem,
) -> Result<RunReport> {
    let started = Instant::now();
    let cfg = setup.config;
    let git = Git::new(setup.root);
    git.ensure_clean()?;
    git.checkout_branch(&cfg.base_branch)?;
    let base_sha = git.head_sha()?;
    governor.start_issue(item.number);

    let prompts = PromptEngine::new();
    let system = prompts.system(setup.context, setup.standards, cfg.agent.command_timeout_secs)?;
    let run = Run {
        setup,
        deps,
        item,
        workspace: Workspace::new(setup.root),
        git: git.clone(),
        prompts,
        system,
        branch: format!("{}{}", cfg.branch_prefix, item.number),
        base_sha,
    };
    info!(branch = %run.branch, title = %item.title, "work item started");

    let mut progress = Progress::default();
    let result = run.execute(governor, &mut progress);
    let stat = run.diff_stat();
    return_to_base(&git, &cfg.base_branch);

    let (status, halt_outcome) = match result {
        Ok(Halt::Clarification {
            clarity,
            comment,
            posted,
        }) => {
            info!(clarity, posted, "halted for clarification");
            let status = RunStatus::ClarificationRequested {
                clarity,
                comment,
                posted,
            };
            return Ok(RunReport {
                status,
                outcome: None,
            });
        }
        Ok(Halt::Published { url, verified }) => {
            (RunStatus::Published { url: url.clone(), verified }, Some(url))
        }
        Ok(Halt::Exhausted) => (
            RunStatus::Failed {
                reason: "all strategies exhausted without a publishable change".to_string(),
            },
            None,
        ),
        Err(err) => {
            let reason = setup.sanitizer.sanitize(&format!("{err:#}"));
            error!(err = %reason, "work item failed");
            progress.errors.push(reason.clone());
            (failure_status(&err, reason), None)
        }
    };

    let outcome = ImplementationOutcome {
        success: halt_outcome.is_some(),
        attempts: progress.attempts,
        quality_passed: progress.quality_passed,
        cost: governor.issue_usage().cost,
        duration_secs: started.elapsed().as_secs_f64(),
        files_changed: stat.files_changed,
        lines_added: stat.lines_added,
        lines_removed: stat.lines_removed,
        strategy_used: progress.strategy,
        error_messages: progress.errors,
        pr_url: halt_outcome,
    };
    let record = OutcomeRecord {
        timestamp: chrono::Utc::now().to_rfc3339(),
        project: cfg.project.clone(),
        issue_number: item.number,
        issue_title: item.title.clone(),
        issue_labels: item.labels.clone(),
        outcome: outcome.clone(),
    };
    if let Err(err) = append_outcome(&setup.outcome_log, &record) {
        warn!(err = %err, "failed to record outcome");
    }
    info!(
        success = outcome.success,
        attempts = outcome.attempts,
        cost = outcome.cost,
        "work item finished"
    );
    Ok(RunReport {
        status,
        outcome: Some(outcome),
    })
}

fn failure_status(err: &Error, reason: String) -> RunStatus {
    if err.downcast_ref::<QuotaExceededError>().is_some() {
        RunStatus::QuotaExceeded { reason }
    } else {
        RunStatus::Failed { reason }
    }
}

/// Commit leftovers on the feature branch, then check out `base`.
fn return_to_base(git: &Git, base: &str) {
    match git.current_branch() {
        Ok(branch) if branch == base => return,
        Ok(_) => {}
        Err(err) => warn!(err = %err, "cannot read current branch"),
    }
    let saved = git
        .add_all()
        .and_then(|()| git.commit_staged(&format!("{CHECKPOINT_PREFIX} interrupted: uncommitted work")));
    if let Err(err) = saved {
        warn!(err = %err, "could not save uncommitted work before leaving the branch");
    }
    match git.checkout_branch(base) {
        Ok(()) => info!(base, "returned to base branch"),
        Err(err) => error!(base, err = %err, "failed to return to base branch"),
    }
}

struct Run<'a, M: Model, R: ToolRunner, T: Tracker> {
    setup: &'a RunSetup<'a>,
    deps: &'a Collaborators<'a, M, R, T>,
    item: &'a WorkItem,
    workspace: Workspace,
    git: Git,
    prompts: PromptEngine,
    system: String,
    branch: String,
    base_sha: String,
}

/// A failed verification kept for the exhaustion fallback.
struct Verified {
    checkpoint: String,
    strategy: String,
    report: QualityReport,
}

impl<M: Model, R: ToolRunner, T: Tracker> Run<'_, M, R, T> {
    fn execute(&self, governor: &mut ResourceGovernor, progress: &mut Progress) -> Result<Halt> {
        let analysis = self.analyze(governor)?;
        if let Some(analysis) = &analysis {
            let cfg = &self.setup.config.analysis;
            if !should_proceed(analysis, cfg.min_clarity_score, cfg.allow_assumptions) {
                if cfg.request_clarification {
                    return self.request_clarification(analysis);
                }
                warn!(
                    clarity = analysis.clarity_score,
                    "clarity below threshold, proceeding without clarification"
                );
            }
        }
        self.prepare_branch()?;
        self.implement(governor, analysis.as_ref(), progress)
    }

    fn analyze(&self, governor: &mut ResourceGovernor) -> Result<Option<TicketAnalysis>> {
        if !self.setup.config.analysis.enabled {
            return Ok(None);
        }
        analyze_ticket(
            self.deps.model,
            governor,
            &self.prompts,
            &self.system,
            self.item,
            self.setup.context,
        )
        .map(Some)
    }

    fn request_clarification(&self, analysis: &TicketAnalysis) -> Result<Halt> {
        let comment = self
            .setup
            .sanitizer
            .sanitize(&self.prompts.clarification(analysis)?);
        let posted = match self.item.source {
            WorkItemSource::Issue => {
                self.deps.tracker.comment(self.item.number, &comment)?;
                true
            }
            WorkItemSource::Manual => false,
        };
        Ok(Halt::Clarification {
            clarity: analysis.clarity_score,
            comment,
            posted,
        })
    }

    fn prepare_branch(&self) -> Result<()> {
        if self.git.branch_exists(&self.branch)? {
            warn!(branch = %self.branch, "branch already exists, continuing on it");
            self.git.checkout_branch(&self.branch)
        } else {
            self.git.checkout_new_branch(&self.branch)
        }
    }

    fn implement(
        &self,
        governor: &mut ResourceGovernor,
        analysis: Option<&TicketAnalysis>,
        progress: &mut Progress,
    ) -> Result<Halt> {
        let cfg = self.setup.config;
        let strategies = generate_strategies(
            self.deps.model,
            governor,
            &self.prompts,
            &self.system,
            &StrategyRequest {
                item: self.item,
                context: self.setup.context,
                analysis,
                max: cfg.orchestrator.max_strategies,
            },
        )?;
        let strategies = rank(strategies, &cfg.orchestrator.ranking);
        let files = self.workspace.list(PROMPT_FILE_LIMIT)?;
        let estimate = governor.get_cost_estimate(
            self.setup.context.len(),
            analysis.map_or(5, |a| a.complexity),
        );
        info!(
            tokens = estimate.estimated_tokens,
            cost = estimate.estimated_cost,
            iterations = estimate.estimated_iterations,
            confidence = estimate.confidence,
            "estimated cost"
        );

        let actions = ActionRunner::new(&self.workspace, &self.git, self.setup.sanitizer)
            .with_command_timeout(cfg.command_timeout())
            .with_output_limit(cfg.agent.output_limit_bytes)
            .with_read_limit(cfg.agent.preload_file_chars);
        let validator = IncrementalValidator::new(self.deps.tools, self.setup.root);
        let env = DriverEnv {
            prompts: &self.prompts,
            workspace: &self.workspace,
            actions: &actions,
            validator: cfg.agent.incremental_validation.then_some(&validator),
            preload: cfg.preload_limits(),
            max_iterations: cfg.agent.max_iterations,
        };
        let mut agent = Agent::new(self.deps.model, self.system.clone(), cfg.agent.max_history_pairs)
            .with_expected_output_tokens(cfg.model.expected_output_tokens);
        let mut checkpoints = CheckpointManager::new(self.git.clone());
        let mut verified: Vec<Verified> = Vec::new();
        let max_attempts = cfg.orchestrator.max_attempts_per_strategy;

        for (idx, strategy) in strategies.iter().enumerate() {
            let number = idx + 1;
            info!(strategy = %strategy.name, number, "strategy started");
            let before = checkpoints.create_checkpoint(
                &format!("before_strategy_{number}"),
                &strategy.name,
                0.0,
            );
            let mut feedback: Option<String> = None;

            for attempt in 1..=max_attempts {
                progress.attempts += 1;
                progress.strategy = Some(strategy.name.clone());
                agent.reset(true);
                let prompt = match &feedback {
                    None => self.prompts.implement(self.item, strategy, analysis, &files)?,
                    Some(feedback) => self.prompts.retry(
                        self.item,
                        &strategy.name,
                        attempt,
                        max_attempts,
                        feedback,
                    )?,
                };
                let driven = drive(&mut agent, governor, &env, prompt)?;
                if driven.outcome == DriveOutcome::Exhausted {
                    progress.errors.push(format!(
                        "{}: attempt {attempt} reached the iteration limit without done",
                        strategy.name
                    ));
                }

                if self.usable_commits()? == 0 {
                    warn!(strategy = %strategy.name, attempt, "attempt produced no commits");
                    progress.errors.push(format!(
                        "{}: attempt {attempt} produced no commits",
                        strategy.name
                    ));
                    feedback = Some(NO_COMMITS_FEEDBACK.to_string());
                    continue;
                }

                // Review starts from a clean slate.
                agent.reset(true);
                let report = self.verify(governor)?;
                progress.quality_passed = report.passed;
                if report.passed {
                    let warning = report.needs_review().then_some(NEEDS_REVIEW_WARNING);
                    let url = self.publish(governor, &strategy.name, progress.attempts, &report, warning)?;
                    return Ok(Halt::Published {
                        url,
                        verified: true,
                    });
                }

                progress.errors.push(format!(
                    "{}: attempt {attempt} failed verification: {}",
                    strategy.name,
                    report.summary()
                ));
                let name = format!("{VERIFIED_PREFIX}{number}_{attempt}");
                if checkpoints
                    .create_checkpoint(&name, &report.summary(), report.score())
                    .is_some()
                {
                    verified.push(Verified {
                        checkpoint: name,
                        strategy: strategy.name.clone(),
                        report: report.clone(),
                    });
                }
                feedback = Some(report.feedback());
            }

            info!(strategy = %strategy.name, "strategy exhausted");
            match &before {
                Some(checkpoint) if !checkpoints.rollback_to(checkpoint) => {
                    warn!(checkpoint = %checkpoint.name, "rollback failed, next strategy starts from here");
                }
                Some(_) => {}
                None => warn!("no pre-strategy checkpoint, continuing without rollback"),
            }
        }

        self.publish_best(governor, &checkpoints, &verified, progress)
    }

    /// Publish the highest-scoring verified checkpoint with a warning, if it carries commits.
    fn publish_best(
        &self,
        governor: &ResourceGovernor,
        checkpoints: &CheckpointManager,
        verified: &[Verified],
        progress: &mut Progress,
    ) -> Result<Halt> {
        let best = checkpoints
            .best_with_prefix(VERIFIED_PREFIX)
            .and_then(|cp| {
                verified
                    .iter()
                    .find(|v| v.checkpoint == cp.name)
                    .map(|v| (cp, v))
            });
        let Some((checkpoint, attempt)) = best else {
            progress
                .errors
                .push("all strategies exhausted without usable commits".to_string());
            return Ok(Halt::Exhausted);
        };
        if !checkpoints.rollback_to(checkpoint) || self.usable_commits()? == 0 {
            progress
                .errors
                .push("best attempt could not be restored".to_string());
            return Ok(Halt::Exhausted);
        }
        warn!(
            checkpoint = %checkpoint.name,
            score = checkpoint.score,
            "publishing best attempt with quality warning"
        );
        progress.strategy = Some(attempt.strategy.clone());
        progress.quality_passed = false;
        let url = self.publish(
            governor,
            &attempt.strategy,
            progress.attempts,
            &attempt.report,
            Some(EXHAUSTED_WARNING),
        )?;
        Ok(Halt::Published {
            url,
            verified: false,
        })
    }

    /// Gates (or the legacy combined check) plus the AI review, in one report.
    fn verify(&self, governor: &mut ResourceGovernor) -> Result<QualityReport> {
        let cfg = self.setup.config;
        let engine = QualityGateEngine::new(
            self.deps.tools,
            &self.workspace,
            &self.git,
            self.setup.sanitizer,
            &self.base_sha,
        )
        .with_min_coverage(cfg.quality.min_coverage)
        .with_timeout_cap(cfg.tool_timeout());
        let mut results = if cfg.quality.gates {
            engine.check_all().results
        } else {
            engine.check_legacy()
        };
        if cfg.quality.review {
            let verdict = review_changes(
                self.deps.model,
                governor,
                &self.prompts,
                &self.system,
                &self.workspace,
                &self.git,
                &ReviewRequest {
                    item: self.item,
                    context: self.setup.context,
                    standards: self.setup.standards,
                    base_ref: &self.base_sha,
                },
            )?;
            results.extend(verdict.gate_results().into_iter().map(|result| {
                if cfg.quality.gates {
                    result
                } else {
                    GateResult {
                        level: GateLevel::Critical,
                        ..result
                    }
                }
            }));
        }
        let report = QualityReport::from_results(results);
        info!(passed = report.passed, summary = %report.summary(), "verification finished");
        Ok(report)
    }

    fn publish(
        &self,
        governor: &ResourceGovernor,
        strategy: &str,
        attempts: u32,
        report: &QualityReport,
        warning: Option<&str>,
    ) -> Result<String> {
        let usage = governor.issue_usage();
        let quality_status = if !report.passed {
            "Failed (published for review)"
        } else if report.needs_review() {
            "Passed with warnings"
        } else {
            "Passed"
        };
        let body = self.prompts.pull_request(&PullRequestBody {
            item: self.item,
            strategy,
            attempts,
            quality_status,
            cost: usage.cost,
            tokens: usage.tokens,
            checklist: &report.checklist(),
            warning,
        })?;
        let pr = PullRequest {
            head: self.branch.clone(),
            base: self.setup.config.base_branch.clone(),
            title: format!("[Autopilot] {}", self.item.title),
            body: self.setup.sanitizer.sanitize(&body),
        };
        let url = self.deps.tracker.publish(&pr)?;
        info!(url = %url, "pull request opened");
        Ok(url)
    }

    /// Commits on the branch since base, excluding checkpoint markers.
    fn usable_commits(&self) -> Result<usize> {
        Ok(self
            .git
            .log_since(&self.base_sha)?
            .iter()
            .filter(|entry| !entry.is_checkpoint())
            .count())
    }

    fn diff_stat(&self) -> DiffStat {
        self.git.diff_stat(&self.base_sha).unwrap_or_else(|err| {
            warn!(err = %err, "diff stat unavailable");
            DiffStat::default()
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::budget::BudgetLimits;
    use crate::test_support::{RecordingTracker, ScriptedModel, ScriptedToolRunner, TestRepo, work_item};

    const CLEAR: &str = r#"{"clarity_score": 90, "is_implementable": true, "risk_level": "low"}"#;
    const ONE_STRATEGY: &str = r#"[{"name": "Direct", "approach": "edit", "complexity": 2, "risk": "low"}]"#;
    const WRITE_AND_DONE: &str = r#"[{"action": "write_file", "path": "hello.txt", "content": "hello\n"},
        {"action": "commit", "message": "feat: hello"},
        {"action": "done", "summary": "added hello"}]"#;
    const APPROVE: &str = r#"{"code_quality_passed": true, "requirements_met": true, "ui_functional": "n/a", "issues": [], "summary": "good"}"#;
    const REJECT: &str = r#"{"code_quality_passed": true, "requirements_met": false, "ui_functional": "n/a", "issues": ["wrong file"], "summary": "misses the point"}"#;

    struct Fixture {
        repo: TestRepo,
        state: tempfile::TempDir,
        config: AutopilotConfig,
        sanitizer: Sanitizer,
    }

    fn fixture() -> Fixture {
        let mut config = AutopilotConfig::default();
        config.project = "demo".to_string();
        config.orchestrator.max_strategies = 1;
        config.orchestrator.max_attempts_per_strategy = 2;
        config.agent.incremental_validation = false;
        Fixture {
            repo: TestRepo::new().expect("repo"),
            state: tempfile::tempdir().expect("tempdir"),
            config,
            sanitizer: Sanitizer::new(["ghp_supersecret"]),
        }
    }

    fn run(fx: &Fixture, model: &ScriptedModel, tracker: &RecordingTracker, item: &WorkItem) -> RunReport {
        let tools = ScriptedToolRunner::new();
        let mut governor = ResourceGovernor::new(
            "gpt-4o",
            fx.config.budget,
            fx.state.path().join("usage.json"),
        );
        let setup = RunSetup {
            config: &fx.config,
            root: fx.repo.path(),
            sanitizer: &fx.sanitizer,
            context: "",
            standards: "",
            outcome_log: fx.state.path().join("implementations.jsonl"),
        };
        let deps = Collaborators {
            model,
            tools: &tools,
            tracker,
        };
        run_work_item(&setup, &deps, &mut governor, item).expect("run")
    }

    #[test]
    fn verified_attempt_is_published_and_base_restored() {
        let fx = fixture();
        let model = ScriptedModel::new([CLEAR, ONE_STRATEGY, WRITE_AND_DONE, APPROVE]);
        let tracker = RecordingTracker::new();
        let report = run(&fx, &model, &tracker, &work_item(12, "Say hello", "Add hello.txt"));

        assert_eq!(
            report.status,
            RunStatus::Published {
                url: "https://example.test/pull/1".to_string(),
                verified: true
            }
        );
        let outcome = report.outcome.expect("outcome");
        assert!(outcome.success);
        assert_eq!(outcome.attempts, 1);
        assert_eq!(outcome.strategy_used.as_deref(), Some("Direct"));
        assert_eq!(outcome.files_changed, 1);

        let published = tracker.published();
        assert_eq!(published[0].head, "autopilot/issue-12");
        assert_eq!(published[0].title, "[Autopilot] Say hello");
        assert!(published[0].body.contains("Closes #12"));

        let git = Git::new(fx.repo.path());
        assert_eq!(git.current_branch().expect("branch"), "main");
        assert!(!fx.repo.path().join("hello.txt").exists());
        assert_eq!(model.remaining(), 0);
    }

    /// A failed review feeds back into a retry; exhaustion publishes the best attempt.
    #[test]
    fn exhausted_strategy_publishes_best_attempt_with_warning() {
        let fx = fixture();
        let model = ScriptedModel::new([
            CLEAR,
            ONE_STRATEGY,
            WRITE_AND_DONE,
            REJECT,
            r#"[{"action": "done", "summary": "nothing else to do"}]"#,
            REJECT,
        ]);
        let tracker = RecordingTracker::new();
        let report = run(&fx, &model, &tracker, &work_item(5, "Say hello", ""));

        assert_eq!(
            report.status,
            RunStatus::Published {
                url: "https://example.test/pull/1".to_string(),
                verified: false
            }
        );
        let outcome = report.outcome.expect("outcome");
        assert!(outcome.success);
        assert!(!outcome.quality_passed);
        assert_eq!(outcome.attempts, 2);
        assert_eq!(outcome.error_messages.len(), 2);

        let retry_prompt = &model.prompts()[4];
        assert!(retry_prompt.contains("attempt 2 of 2"));
        assert!(retry_prompt.contains("Requirements not met: misses the point"));
        assert!(tracker.published()[0].body.contains("Quality notice"));
    }

    #[test]
    fn quota_breach_stops_the_run_and_records_failure() {
        let mut fx = fixture();
        fx.config.budget.per_issue_token_limit = 10;
        let model = ScriptedModel::new([CLEAR]);
        let tracker = RecordingTracker::new();
        let report = run(&fx, &model, &tracker, &work_item(8, "Too big", ""));

        assert_eq!(report.status.exit_code(), exit_codes::QUOTA);
        let outcome = report.outcome.expect("outcome");
        assert!(!outcome.success);
        assert!(outcome.error_messages[0].contains("quota exceeded before ticket analysis"));
        assert_eq!(model.requests().len(), 0);
        assert!(tracker.published().is_empty());
    }

    #[test]
    fn manual_ticket_clarification_is_not_posted() {
        let fx = fixture();
        let model = ScriptedModel::new([
            r#"{"clarity_score": 20, "questions_for_author": ["Which page?"]}"#,
        ]);
        let tracker = RecordingTracker::new();
        let mut item = work_item(1_700_000, "Fix it", "");
        item.source = WorkItemSource::Manual;
        let report = run(&fx, &model, &tracker, &item);

        let RunStatus::ClarificationRequested { clarity, comment, posted } = report.status else {
            panic!("expected clarification, got {:?}", report.status);
        };
        assert_eq!(clarity, 20);
        assert!(!posted);
        assert!(comment.contains("Which page?"));
        assert!(tracker.comments().is_empty());
        assert_eq!(report.outcome, None);
    }

    #[test]
    fn dirty_tree_is_rejected_before_any_spend() {
        let fx = fixture();
        fx.repo.write("stray.txt", "x").expect("write");
        let model = ScriptedModel::new([CLEAR]);
        let tracker = RecordingTracker::new();
        let tools = ScriptedToolRunner::new();
        let mut governor = ResourceGovernor::new(
            "gpt-4o",
            BudgetLimits::default(),
            fx.state.path().join("usage.json"),
        );
        let setup = RunSetup {
            config: &fx.config,
            root: fx.repo.path(),
            sanitizer: &fx.sanitizer,
            context: "",
            standards: "",
            outcome_log: fx.state.path().join("implementations.jsonl"),
        };
        let deps = Collaborators {
            model: &model,
            tools: &tools,
            tracker: &tracker,
        };
        let err = run_work_item(&setup, &deps, &mut governor, &work_item(2, "t", ""))
            .expect_err("dirty tree");
        assert!(err.to_string().contains("working tree not clean"));
        assert_eq!(model.remaining(), 1);
    }
}
