//! Combined AI review of an attempt: code quality, requirements and UI in one call.

use std::fs;

use anyhow::Result;
use serde_json::Value;
use tracing::{info, instrument, warn};

use crate::agent::ask;
use crate::core::action::extract_json;
use crate::core::quality::CheckOutcome;
use crate::core::text::{clip, head_chars};
use crate::core::types::{GateLevel, GateResult, WorkItem};
use crate::governor::ResourceGovernor;
use crate::io::git::Git;
use crate::io::model::Model;
use crate::io::prompt::{PromptEngine, ReviewFile};
use crate::io::workspace::Workspace;

const DIFF_CHARS: usize = 6_000;
const FILE_CHARS: usize = 10_000;
const MAX_FILE_BYTES: u64 = 60_000;
const FILES_READ: usize = 5;
const FILES_SHOWN: usize = 3;

pub const REQUIREMENTS_GATE: &str = "Requirements Met";
pub const CODE_QUALITY_GATE: &str = "Code Quality";
pub const UI_GATE: &str = "UI Functional";

/// What the reviewer is looking at.
#[derive(Debug, Clone, Copy)]
pub struct ReviewRequest<'a> {
    pub item: &'a WorkItem,
    pub context: &'a str,
    pub standards: &'a str,
    /// Changes are taken between this ref and the working tree.
    pub base_ref: &'a str,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReviewVerdict {
    /// Nothing reviewable changed.
    NothingToReview,
    /// The reply could not be read; the review does not block.
    Unparseable,
    Reviewed {
        code_quality: bool,
        requirements_met: bool,
        ui_functional: bool,
        issues: Vec<String>,
        summary: String,
    },
}

impl ReviewVerdict {
    pub fn passed(&self) -> bool {
        match self {
            Self::NothingToReview | Self::Unparseable => true,
            Self::Reviewed {
                code_quality,
                requirements_met,
                ui_functional,
                ..
            } => *code_quality && *requirements_met && *ui_functional,
        }
    }

    /// One result per review criterion. Unmet requirements block publication.
    pub fn gate_results(&self) -> Vec<GateResult> {
        let (quality, requirements, ui) = match self {
            Self::NothingToReview => {
                let skip = || CheckOutcome::skipped("No files to review");
                (skip(), skip(), skip())
            }
            Self::Unparseable => {
                let skip = || CheckOutcome::skipped("Could not parse review");
                (skip(), skip(), skip())
            }
            Self::Reviewed {
                code_quality,
                requirements_met,
                ui_functional,
                issues,
                summary,
            } => {
                let detail = (!issues.is_empty()).then(|| issues.join("\n"));
                let judge = |ok: bool, pass: &str, fail: &str| {
                    if ok {
                        CheckOutcome::pass(pass)
                    } else {
                        CheckOutcome::fail(
                            if summary.is_empty() {
                                fail.to_string()
                            } else {
                                format!("{fail}: {summary}")
                            },
                            detail.clone(),
                        )
                    }
                };
                (
                    judge(*code_quality, "Code follows project standards", "Code quality issues"),
                    judge(*requirements_met, "Requirements addressed", "Requirements not met"),
                    judge(*ui_functional, "UI works or not applicable", "UI not functional"),
                )
            }
        };
        vec![
            requirements.into_result(REQUIREMENTS_GATE, GateLevel::Critical),
            quality.into_result(CODE_QUALITY_GATE, GateLevel::Required),
            ui.into_result(UI_GATE, GateLevel::Required),
        ]
    }
}

/// Review the changes since `request.base_ref` with one model call.
///
/// No model call is made when nothing readable changed. Model and quota
/// errors propagate.
#[instrument(skip_all, fields(issue = request.item.number))]
pub fn review_changes<M: Model>(
    model: &M,
    governor: &mut ResourceGovernor,
    prompts: &PromptEngine,
    system: &str,
    workspace: &Workspace,
    git: &Git,
    request: &ReviewRequest<'_>,
) -> Result<ReviewVerdict> {
    let changed = git.diff_name_only(request.base_ref)?;
    let files = review_files(workspace, &changed);
    if files.is_empty() {
        info!("no files to review");
        return Ok(ReviewVerdict::NothingToReview);
    }
    let diff = git.diff(request.base_ref)?;
    let (diff, _) = head_chars(&diff, DIFF_CHARS);
    let prompt = prompts.review(
        request.item,
        request.context,
        request.standards,
        diff,
        &files[..files.len().min(FILES_SHOWN)],
    )?;
    let reply = ask(model, governor, "review", system, &prompt)?;
    let verdict = parse_review(&reply);
    match &verdict {
        ReviewVerdict::Reviewed { summary, .. } => {
            info!(passed = verdict.passed(), summary = %summary, "review finished");
        }
        _ => warn!("review reply unparseable, not blocking"),
    }
    Ok(verdict)
}

fn review_files(workspace: &Workspace, changed: &[String]) -> Vec<ReviewFile> {
    changed
        .iter()
        .take(FILES_READ)
        .filter_map(|path| {
            let full = workspace.resolve(path).ok()?;
            let size = fs::metadata(&full).ok()?.len();
            if size >= MAX_FILE_BYTES {
                return None;
            }
            let content = workspace.read(path).ok()??;
            Some(ReviewFile {
                path: path.clone(),
                content: clip(&content, FILE_CHARS, "\n...(truncated)"),
            })
        })
        .collect()
}

fn parse_review(reply: &str) -> ReviewVerdict {
    let Some(Value::Object(obj)) = extract_json(reply) else {
        return ReviewVerdict::Unparseable;
    };
    let flag = |key: &str| obj.get(key).and_then(Value::as_bool).unwrap_or(true);
    let ui_functional = match obj.get("ui_functional") {
        Some(Value::Bool(ok)) => *ok,
        _ => true,
    };
    ReviewVerdict::Reviewed {
        code_quality: flag("code_quality_passed"),
        requirements_met: flag("requirements_met"),
        ui_functional,
        issues: obj
            .get("issues")
            .and_then(Value::as_array)
            .map(|items| {
                items
                    .iter()
                    .filter_map(Value::as_str)
                    .map(str::to_string)
                    .collect()
            })
            .unwrap_or_default(),
        summary: obj
            .get("summary")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::budget::BudgetLimits;
    use crate::core::quality::QualityReport;
    use crate::test_support::{ScriptedModel, TestRepo, work_item};

    fn review(repo: &TestRepo, base: &str, model: &ScriptedModel) -> ReviewVerdict {
        let state = tempfile::tempdir().expect("tempdir");
        let mut gov = ResourceGovernor::new(
            "gpt-4o",
            BudgetLimits::default(),
            state.path().join("usage.json"),
        );
        let item = work_item(9, "Greeting", "Say hello");
        review_changes(
            model,
            &mut gov,
            &PromptEngine::new(),
            "system",
            &Workspace::new(repo.path()),
            &Git::new(repo.path()),
            &ReviewRequest {
                item: &item,
                context: "",
                standards: "",
                base_ref: base,
            },
        )
        .expect("review")
    }

    #[test]
    fn unmet_requirements_are_critical() {
        let repo = TestRepo::new().expect("repo");
        let base = Git::new(repo.path()).head_sha().expect("sha");
        repo.write("README.md", "hello\n").expect("write");
        repo.commit_all("feat: greet").expect("commit");
        let model = ScriptedModel::new([r#"{"code_quality_passed": true, "requirements_met": false,
            "ui_functional": "n/a", "issues": ["greeting is lowercase"], "summary": "close"}"#]);

        let verdict = review(&repo, &base, &model);
        assert!(!verdict.passed());
        let report = QualityReport::from_results(verdict.gate_results());
        assert!(!report.passed);
        assert_eq!(report.critical_failures[0].name, "Requirements Met");
        assert_eq!(report.critical_failures[0].message, "Requirements not met: close");
        assert_eq!(
            report.critical_failures[0].detail.as_deref(),
            Some("greeting is lowercase")
        );
        assert!(model.prompts()[0].contains("## README.md\n```\nhello"));
    }

    #[test]
    fn nothing_changed_skips_the_model() {
        let repo = TestRepo::new().expect("repo");
        let base = Git::new(repo.path()).head_sha().expect("sha");
        let model = ScriptedModel::new(Vec::<String>::new());
        let verdict = review(&repo, &base, &model);
        assert_eq!(verdict, ReviewVerdict::NothingToReview);
        assert!(model.requests().is_empty());
        assert!(verdict.gate_results().iter().all(|r| r.passed && r.skipped));
    }

    /// Prose instead of JSON does not block publication.
    #[test]
    fn unparseable_review_fails_open() {
        let repo = TestRepo::new().expect("repo");
        let base = Git::new(repo.path()).head_sha().expect("sha");
        repo.write("README.md", "changed\n").expect("write");
        let model = ScriptedModel::new(["Looks good to me!"]);
        let verdict = review(&repo, &base, &model);
        assert_eq!(verdict, ReviewVerdict::Unparseable);
        let report = QualityReport::from_results(verdict.gate_results());
        assert!(report.passed);
        assert_eq!(report.results[0].message, "Could not parse review");
    }

    #[test]
    fn code_quality_failure_is_required_only() {
        let verdict = parse_review(
            r#"{"code_quality_passed": false, "requirements_met": true, "ui_functional": true, "issues": []}"#,
        );
        let report = QualityReport::from_results(verdict.gate_results());
        assert!(report.passed);
        assert_eq!(report.required_failures.len(), 1);
        assert_eq!(report.required_failures[0].message, "Code quality issues");
        assert_eq!(report.required_failures[0].detail, None);
    }
}
