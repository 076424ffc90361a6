//! Issue tracker boundary: fetch issues, post comments, publish pull requests.

use std::path::PathBuf;
use std::process::Command;
use std::time::Duration;

use anyhow::{Context, Result, anyhow};
use serde::Deserialize;
use tracing::{info, instrument};

use crate::core::text::clip;
use crate::core::types::{WorkItem, WorkItemSource};
use crate::io::git::Git;
use crate::io::process::{CommandOutput, run_command_with_timeout};

/// A pull request ready to open.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PullRequest {
    pub head: String,
    pub base: String,
    pub title: String,
    pub body: String,
}

pub trait Tracker {
    fn fetch_issue(&self, number: u64) -> Result<WorkItem>;

    fn comment(&self, number: u64, body: &str) -> Result<()>;

    /// Push the head branch and open the pull request. Returns its URL.
    fn publish(&self, pr: &PullRequest) -> Result<String>;
}

/// Tracker backed by the `gh` CLI and `git push`.
#[derive(Debug, Clone)]
pub struct GhTracker {
    pub workdir: PathBuf,
    /// `owner/name`; `None` lets `gh` infer it from the remote.
    pub repo: Option<String>,
    pub timeout: Duration,
}

#[derive(Debug, Deserialize)]
struct GhIssue {
    number: u64,
    title: String,
    #[serde(default)]
    body: Option<String>,
    #[serde(default)]
    labels: Vec<GhLabel>,
}

#[derive(Debug, Deserialize)]
struct GhLabel {
    name: String,
}

impl GhTracker {
    fn gh(&self, args: &[&str]) -> Result<CommandOutput> {
        let mut cmd = Command::new("gh");
        cmd.args(args).current_dir(&self.workdir);
        if let Some(repo) = &self.repo {
            cmd.args(["--repo", repo]);
        }
        let output = run_command_with_timeout(cmd, None, self.timeout, 1_000_000)
            .with_context(|| format!("run gh {}", args.first().copied().unwrap_or_default()))?;
        if !output.success() {
            return Err(anyhow!(
                "gh {} failed: {}",
                args.join(" "),
                clip(output.stderr_text().trim(), 500, "...")
            ));
        }
        Ok(output)
    }
}

impl Tracker for GhTracker {
    #[instrument(skip_all, fields(number))]
    fn fetch_issue(&self, number: u64) -> Result<WorkItem> {
        let number_arg = number.to_string();
        let output = self.gh(&[
            "issue",
            "view",
            &number_arg,
            "--json",
            "number,title,body,labels",
        ])?;
        parse_issue(&output.stdout_text())
    }

    #[instrument(skip_all, fields(number))]
    fn comment(&self, number: u64, body: &str) -> Result<()> {
        let number_arg = number.to_string();
        self.gh(&["issue", "comment", &number_arg, "--body", body])?;
        info!("comment posted");
        Ok(())
    }

    #[instrument(skip_all, fields(head = %pr.head))]
    fn publish(&self, pr: &PullRequest) -> Result<String> {
        Git::new(&self.workdir).push_branch(&pr.head)?;
        let output = self.gh(&[
            "pr", "create", "--base", &pr.base, "--head", &pr.head, "--title", &pr.title, "--body",
            &pr.body,
        ])?;
        let url = output.stdout_text().trim().to_string();
        info!(url = %url, "pull request opened");
        Ok(url)
    }
}

fn parse_issue(json: &str) -> Result<WorkItem> {
    let issue: GhIssue = serde_json::from_str(json).context("parse gh issue json")?;
    Ok(WorkItem {
        number: issue.number,
        title: issue.title,
        body: issue.body.unwrap_or_default(),
        labels: issue.labels.into_iter().map(|l| l.name).collect(),
        source: WorkItemSource::Issue,
    })
}
