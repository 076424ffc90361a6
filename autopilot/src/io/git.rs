//! Git adapter for the working tree the agent mutates.
//!
//! Checkpoints, rollbacks and "did the agent commit anything" all reduce to a
//! handful of git primitives, so we keep a small, explicit wrapper around `git`
//! subprocess calls.

use std::path::{Path, PathBuf};
use std::process::{Command, Output};

use anyhow::{Context, Result, anyhow};
use tracing::{debug, instrument, warn};

/// Subject prefix marking checkpoint commits.
pub const CHECKPOINT_PREFIX: &str = "[checkpoint]";

/// Parsed `git status --porcelain` entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatusEntry {
    /// 2-letter XY code, or "??" for untracked.
    pub code: String,
    /// Path for the changed file.
    pub path: String,
}

/// One commit from `git log`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogEntry {
    pub sha: String,
    pub subject: String,
}

impl LogEntry {
    pub fn is_checkpoint(&self) -> bool {
        self.subject.starts_with(CHECKPOINT_PREFIX)
    }
}

/// Aggregated `git diff --numstat` totals.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct DiffStat {
    pub files_changed: u32,
    pub lines_added: u32,
    pub lines_removed: u32,
}

/// Wrapper for executing git commands in a working directory.
#[derive(Debug, Clone)]
pub struct Git {
    workdir: PathBuf,
}

impl Git {
    pub fn new(workdir: impl Into<PathBuf>) -> Self {
        Self {
            workdir: workdir.into(),
        }
    }

    pub fn workdir(&self) -> &Path {
        &self.workdir
    }

    /// Return the current branch name (errors on detached HEAD).
    #[instrument(skip_all)]
    pub fn current_branch(&self) -> Result<String> {
        let out = self.run_capture(&["rev-parse", "--abbrev-ref", "HEAD"])?;
        let name = out.trim().to_string();
        if name == "HEAD" {
            warn!("detached HEAD detected");
            return Err(anyhow!("detached HEAD (refuse to run)"));
        }
        debug!(branch = %name, "current branch");
        Ok(name)
    }

    /// Full SHA of HEAD.
    pub fn head_sha(&self) -> Result<String> {
        let out = self.run_capture(&["rev-parse", "HEAD"])?;
        Ok(out.trim().to_string())
    }

    /// Get status entries (including untracked) in porcelain format.
    pub fn status_porcelain(&self) -> Result<Vec<StatusEntry>> {
        let out = self.run_capture(&["status", "--porcelain=v1", "-uall"])?;
        let mut entries = Vec::new();
        for line in out.lines() {
            if line.trim().is_empty() {
                continue;
            }
            entries.push(parse_status_line(line)?);
        }
        Ok(entries)
    }

    /// Ensure the worktree is fully clean (including untracked files).
    #[instrument(skip_all)]
    pub fn ensure_clean(&self) -> Result<()> {
        let entries = self.status_porcelain()?;
        if entries.is_empty() {
            debug!("worktree is clean");
            return Ok(());
        }
        warn!(dirty_count = entries.len(), "worktree not clean");
        let mut msg = String::from("working tree not clean:\n");
        for entry in entries {
            msg.push_str(&format!("{} {}\n", entry.code, entry.path));
        }
        Err(anyhow!(msg.trim_end().to_string()))
    }

    /// Check whether a local branch exists.
    pub fn branch_exists(&self, branch: &str) -> Result<bool> {
        let status = self
            .run(&[
                "show-ref",
                "--verify",
                "--quiet",
                &format!("refs/heads/{branch}"),
            ])?
            .status;
        Ok(status.success())
    }

    /// Create and checkout a new branch at current HEAD.
    #[instrument(skip_all, fields(branch))]
    pub fn checkout_new_branch(&self, branch: &str) -> Result<()> {
        debug!(branch, "creating and checking out new branch");
        self.run_checked(&["checkout", "-b", branch])?;
        Ok(())
    }

    /// Checkout an existing branch.
    #[instrument(skip_all, fields(branch))]
    pub fn checkout_branch(&self, branch: &str) -> Result<()> {
        debug!(branch, "checking out branch");
        self.run_checked(&["checkout", branch])?;
        Ok(())
    }

    /// Stage all changes (respects .gitignore).
    pub fn add_all(&self) -> Result<()> {
        self.run_checked(&["add", "-A"])?;
        Ok(())
    }

    /// True if there is anything staged for commit.
    pub fn has_staged_changes(&self) -> Result<bool> {
        let out = self.run(&["diff", "--cached", "--name-only"])?;
        Ok(!String::from_utf8_lossy(&out.stdout).trim().is_empty())
    }

    /// Commit staged changes with a message.
    ///
    /// If there are no staged changes, this returns Ok(false) and does nothing.
    #[instrument(skip_all)]
    pub fn commit_staged(&self, message: &str) -> Result<bool> {
        if !self.has_staged_changes()? {
            debug!("no staged changes, skipping commit");
            return Ok(false);
        }
        debug!("committing staged changes");
        self.run_checked(&["commit", "-m", message])?;
        Ok(true)
    }

    /// Commit whatever is staged, producing a commit even when nothing is.
    #[instrument(skip_all)]
    pub fn commit_allow_empty(&self, message: &str) -> Result<()> {
        self.run_checked(&["commit", "--allow-empty", "-m", message])?;
        Ok(())
    }

    /// Hard-reset the worktree and index to `sha`, then drop untracked files.
    #[instrument(skip_all, fields(sha))]
    pub fn reset_hard(&self, sha: &str) -> Result<()> {
        debug!(sha, "hard reset");
        self.run_checked(&["reset", "--hard", sha])?;
        self.run_checked(&["clean", "-fd"])?;
        Ok(())
    }

    /// Files changed between `since` and the working tree.
    pub fn diff_name_only(&self, since: &str) -> Result<Vec<String>> {
        let out = self.run_capture(&["diff", "--name-only", since])?;
        Ok(out
            .lines()
            .map(str::trim)
            .filter(|l| !l.is_empty())
            .map(str::to_string)
            .collect())
    }

    /// Unified diff between `since` and the working tree.
    pub fn diff(&self, since: &str) -> Result<String> {
        self.run_capture(&["diff", since])
    }

    /// Line totals between `since` and the working tree.
    pub fn diff_stat(&self, since: &str) -> Result<DiffStat> {
        let out = self.run_capture(&["diff", "--numstat", since])?;
        Ok(parse_numstat(&out))
    }

    /// Commits reachable from HEAD but not from `since`, newest first.
    pub fn log_since(&self, since: &str) -> Result<Vec<LogEntry>> {
        let range = format!("{since}..HEAD");
        let out = self.run_capture(&["log", "--format=%H%x09%s", &range])?;
        Ok(out
            .lines()
            .filter_map(|line| {
                let (sha, subject) = line.split_once('\t')?;
                Some(LogEntry {
                    sha: sha.to_string(),
                    subject: subject.to_string(),
                })
            })
            .collect())
    }

    /// Push `branch` to `origin`, setting upstream.
    #[instrument(skip_all, fields(branch))]
    pub fn push_branch(&self, branch: &str) -> Result<()> {
        self.run_checked(&["push", "-u", "origin", branch])?;
        Ok(())
    }

    fn run_capture(&self, args: &[&str]) -> Result<String> {
        let output = self.run_checked(args)?;
        Ok(String::from_utf8_lossy(&output.stdout).to_string())
    }

    fn run_checked(&self, args: &[&str]) -> Result<Output> {
        let output = self.run(args)?;
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(anyhow!("git {} failed: {}", args.join(" "), stderr.trim()));
        }
        Ok(output)
    }

    fn run(&self, args: &[&str]) -> Result<Output> {
        Command::new("git")
            .args(args)
            .current_dir(&self.workdir)
            .output()
            .with_context(|| format!("spawn git {}", args.join(" ")))
    }
}

fn parse_status_line(line: &str) -> Result<StatusEntry> {
    if let Some(path) = line.strip_prefix("?? ") {
        return Ok(StatusEntry {
            code: "??".to_string(),
            path: path.trim().to_string(),
        });
    }
    if line.len() < 4 {
        return Err(anyhow!("unexpected porcelain line: '{line}'"));
    }
    let code = line[..2].to_string();
    let mut path = line[3..].trim().to_string();
    if let Some((_, new)) = path.split_once("->") {
        path = new.trim().to_string();
    }
    Ok(StatusEntry { code, path })
}

fn parse_numstat(out: &str) -> DiffStat {
    let mut stat = DiffStat::default();
    for line in out.lines() {
        let mut cols = line.split('\t');
        let (Some(added), Some(removed), Some(_path)) = (cols.next(), cols.next(), cols.next())
        else {
            continue;
        };
        stat.files_changed += 1;
        // Binary files report "-" for both columns.
        stat.lines_added += added.parse::<u32>().unwrap_or(0);
        stat.lines_removed += removed.parse::<u32>().unwrap_or(0);
    }
    stat
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::TestRepo;

    #[test]
    fn parses_untracked_line() {
        let e = parse_status_line("?? foo.txt").expect("parse");
        assert_eq!(
            e,
            StatusEntry {
                code: "??".to_string(),
                path: "foo.txt".to_string()
            }
        );
    }

    #[test]
    fn parses_rename_line_uses_new_path() {
        let e = parse_status_line("R  old.txt -> new.txt").expect("parse");
        assert_eq!(e.path, "new.txt");
    }

    #[test]
    fn numstat_sums_lines_and_skips_binary_counts() {
        let stat = parse_numstat("3\t1\tsrc/a.rs\n-\t-\tlogo.png\n10\t0\tREADME.md\n");
        assert_eq!(
            stat,
            DiffStat {
                files_changed: 3,
                lines_added: 13,
                lines_removed: 1,
            }
        );
    }

    #[test]
    fn log_since_lists_new_commits_newest_first() {
        let repo = TestRepo::new().expect("repo");
        let git = Git::new(repo.path());
        let base = git.head_sha().expect("sha");
        git.commit_allow_empty("[checkpoint] before").expect("empty commit");
        repo.write("a.txt", "a\n").expect("write");
        git.add_all().expect("add");
        assert!(git.commit_staged("feat: a").expect("commit"));

        let log = git.log_since(&base).expect("log");
        let subjects: Vec<&str> = log.iter().map(|e| e.subject.as_str()).collect();
        assert_eq!(subjects, vec!["feat: a", "[checkpoint] before"]);
        assert!(log[1].is_checkpoint());
        assert_eq!(git.diff_name_only(&base).expect("diff"), vec!["a.txt"]);
    }

    #[test]
    fn reset_hard_discards_tracked_and_untracked_changes() {
        let repo = TestRepo::new().expect("repo");
        let git = Git::new(repo.path());
        let sha = git.head_sha().expect("sha");
        repo.write("README.md", "changed\n").expect("write");
        repo.write("new/file.txt", "x").expect("write");
        git.reset_hard(&sha).expect("reset");
        assert_eq!(repo.read("README.md").expect("read"), "hi\n");
        assert!(!repo.path().join("new/file.txt").exists());
        git.ensure_clean().expect("clean");
    }
}
