//! Executes validated actions against the workspace and reports back in text.
//!
//! Every action yields one feedback entry prefixed `[ok]`, `[warn]` or
//! `[error]`. Failures never abort the batch; they become feedback the model
//! can react to. A `done` action stops the batch.

use std::time::Duration;

use tracing::{debug, instrument, warn};

use crate::core::action::Action;
use crate::core::sanitize::Sanitizer;
use crate::core::text::{clip, tail_chars};
use crate::io::git::Git;
use crate::io::process::{CommandOutput, run_command_with_timeout, shell_command};
use crate::io::workspace::Workspace;

/// Characters of command output returned to the model (tail kept).
const COMMAND_OUTPUT_CHARS: usize = 2_000;

/// What one batch did.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct BatchReport {
    pub entries: Vec<String>,
    /// Summary of the `done` action, when one ran.
    pub done: Option<String>,
    /// Files written or edited, in order, without duplicates.
    pub touched: Vec<String>,
    pub committed: bool,
    /// Number of actions actually executed.
    pub executed: usize,
}

impl BatchReport {
    pub fn feedback(&self) -> String {
        self.entries.join("\n")
    }

    fn touch(&mut self, path: &str) {
        if !self.touched.iter().any(|p| p == path) {
            self.touched.push(path.to_string());
        }
    }
}

pub struct ActionRunner<'a> {
    workspace: &'a Workspace,
    git: &'a Git,
    sanitizer: &'a Sanitizer,
    command_timeout: Duration,
    output_limit_bytes: usize,
    read_limit_chars: usize,
}

impl<'a> ActionRunner<'a> {
    pub fn new(workspace: &'a Workspace, git: &'a Git, sanitizer: &'a Sanitizer) -> Self {
        Self {
            workspace,
            git,
            sanitizer,
            command_timeout: Duration::from_secs(60),
            output_limit_bytes: 100_000,
            read_limit_chars: 12_000,
        }
    }

    pub fn with_command_timeout(mut self, timeout: Duration) -> Self {
        self.command_timeout = timeout;
        self
    }

    pub fn with_output_limit(mut self, bytes: usize) -> Self {
        self.output_limit_bytes = bytes;
        self
    }

    pub fn with_read_limit(mut self, chars: usize) -> Self {
        self.read_limit_chars = chars;
        self
    }

    /// Run `actions` strictly in order, stopping after `done`.
    #[instrument(skip_all, fields(actions = actions.len()))]
    pub fn execute(&self, actions: &[Action]) -> BatchReport {
        let mut report = BatchReport::default();
        for action in actions {
            report.executed += 1;
            let entry = self.execute_one(action, &mut report);
            report.entries.push(self.sanitizer.sanitize(&entry));
            if report.done.is_some() {
                let skipped = actions.len() - report.executed;
                if skipped > 0 {
                    debug!(skipped, "done short-circuited remaining actions");
                }
                break;
            }
        }
        report
    }

    fn execute_one(&self, action: &Action, report: &mut BatchReport) -> String {
        match action {
            Action::ReadFile { path } => self.read_file(path),
            Action::WriteFile { path, content } => match self.workspace.write(path, content) {
                Ok(()) => {
                    report.touch(path);
                    format!("[ok] wrote {path} ({} chars)", content.chars().count())
                }
                Err(err) => format!("[error] write {path}: {err:#}"),
            },
            Action::EditFile {
                path,
                search,
                replace,
            } => {
                let entry = self.edit_file(path, search, replace);
                if entry.starts_with("[ok]") {
                    report.touch(path);
                }
                entry
            }
            Action::RunCommand { command } => self.run_command(command),
            Action::Commit { message } => {
                let entry = self.commit(message);
                if entry.starts_with("[ok]") {
                    report.committed = true;
                }
                entry
            }
            Action::Done { summary } => {
                report.done = Some(summary.clone());
                if summary.trim().is_empty() {
                    "[ok] done".to_string()
                } else {
                    format!("[ok] done: {}", summary.trim())
                }
            }
            Action::Unknown { tag } => format!("[error] unknown action \"{tag}\""),
        }
    }

    fn read_file(&self, path: &str) -> String {
        match self.workspace.read(path) {
            Ok(Some(content)) => {
                let total = content.chars().count();
                let body = clip(
                    &content,
                    self.read_limit_chars,
                    &format!("\n... (truncated, total: {total} chars)"),
                );
                format!("[ok] read {path}:\n```\n{body}\n```")
            }
            Ok(None) => format!("[error] read {path}: file not found"),
            Err(err) => format!("[error] read {path}: {err:#}"),
        }
    }

    /// Replace the first verbatim occurrence of `search`.
    fn edit_file(&self, path: &str, search: &str, replace: &str) -> String {
        let content = match self.workspace.read(path) {
            Ok(Some(content)) => content,
            Ok(None) => return format!("[error] edit {path}: file not found"),
            Err(err) => return format!("[error] edit {path}: {err:#}"),
        };
        let occurrences = content.matches(search).count();
        if occurrences == 0 {
            return format!("[warn] edit {path}: search text not found, file unchanged");
        }
        let updated = content.replacen(search, replace, 1);
        if let Err(err) = self.workspace.write(path, &updated) {
            return format!("[error] edit {path}: {err:#}");
        }
        if occurrences > 1 {
            format!("[ok] edited {path} (replaced first of {occurrences} occurrences)")
        } else {
            format!("[ok] edited {path}")
        }
    }

    #[instrument(skip_all, fields(command))]
    fn run_command(&self, command: &str) -> String {
        let cmd = shell_command(command, self.workspace.root());
        let output = match run_command_with_timeout(
            cmd,
            None,
            self.command_timeout,
            self.output_limit_bytes,
        ) {
            Ok(output) => output,
            Err(err) => return format!("[error] `{command}` could not start: {err:#}"),
        };
        if output.timed_out {
            warn!(timeout_secs = self.command_timeout.as_secs(), "command timed out");
            return format!(
                "[warn] `{command}` timed out after {:?}",
                self.command_timeout
            );
        }
        let text = combined_output(&output);
        let shown = tail_chars(text.trim(), COMMAND_OUTPUT_CHARS);
        let header = if output.status.success() {
            format!("[ok] `{command}` exited 0")
        } else {
            match output.status.code() {
                Some(code) => format!("[warn] `{command}` exited with status {code}"),
                None => format!("[warn] `{command}` was terminated by a signal"),
            }
        };
        if shown.is_empty() {
            header
        } else {
            format!("{header}\n{shown}")
        }
    }

    fn commit(&self, message: &str) -> String {
        let result = self
            .git
            .add_all()
            .and_then(|()| self.git.commit_staged(message));
        match result {
            Ok(true) => format!("[ok] committed: {message}"),
            Ok(false) => "[warn] nothing to commit".to_string(),
            Err(err) => format!("[error] commit failed: {err:#}"),
        }
    }
}

fn combined_output(output: &CommandOutput) -> String {
    let stdout = output.stdout_text();
    let stderr = output.stderr_text();
    match (stdout.trim().is_empty(), stderr.trim().is_empty()) {
        (_, true) => stdout,
        (true, false) => stderr,
        (false, false) => format!("{stdout}\n{stderr}"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::TestRepo;

    fn runner<'a>(ws: &'a Workspace, git: &'a Git, sanitizer: &'a Sanitizer) -> ActionRunner<'a> {
        ActionRunner::new(ws, git, sanitizer).with_command_timeout(Duration::from_secs(5))
    }

    #[test]
    fn write_then_commit_records_touched_files() {
        let repo = TestRepo::new().expect("repo");
        let ws = Workspace::new(repo.path());
        let git = Git::new(repo.path());
        let sanitizer = Sanitizer::default();
        let report = runner(&ws, &git, &sanitizer).execute(&[
            Action::WriteFile {
                path: "src/lib/util.ts".to_string(),
                content: "export const x = 1;\n".to_string(),
            },
            Action::Commit {
                message: "feat: util".to_string(),
            },
            Action::Commit {
                message: "again".to_string(),
            },
        ]);
        assert_eq!(report.touched, vec!["src/lib/util.ts"]);
        assert!(report.committed);
        assert!(report.entries[1].starts_with("[ok] committed"));
        assert_eq!(report.entries[2], "[warn] nothing to commit");
        assert_eq!(repo.read("src/lib/util.ts").expect("read"), "export const x = 1;\n");
    }

    /// Applying the same edit twice leaves the file unchanged the second time.
    #[test]
    fn repeated_edit_is_a_soft_warning() {
        let repo = TestRepo::new().expect("repo");
        let ws = Workspace::new(repo.path());
        let git = Git::new(repo.path());
        let sanitizer = Sanitizer::default();
        let edit = Action::EditFile {
            path: "README.md".to_string(),
            search: "hi".to_string(),
            replace: "hello".to_string(),
        };
        let report = runner(&ws, &git, &sanitizer).execute(&[edit.clone(), edit]);
        assert_eq!(report.entries[0], "[ok] edited README.md");
        assert_eq!(
            report.entries[1],
            "[warn] edit README.md: search text not found, file unchanged"
        );
        assert_eq!(repo.read("README.md").expect("read"), "hello\n");
    }

    #[test]
    fn edit_replaces_only_first_occurrence() {
        let repo = TestRepo::new().expect("repo");
        repo.write("a.txt", "x x x").expect("write");
        let ws = Workspace::new(repo.path());
        let git = Git::new(repo.path());
        let sanitizer = Sanitizer::default();
        let report = runner(&ws, &git, &sanitizer).execute(&[Action::EditFile {
            path: "a.txt".to_string(),
            search: "x".to_string(),
            replace: "y".to_string(),
        }]);
        assert!(report.entries[0].contains("first of 3"));
        assert_eq!(repo.read("a.txt").expect("read"), "y x x");
    }

    #[test]
    fn done_short_circuits_the_rest_of_the_batch() {
        let repo = TestRepo::new().expect("repo");
        let ws = Workspace::new(repo.path());
        let git = Git::new(repo.path());
        let sanitizer = Sanitizer::default();
        let report = runner(&ws, &git, &sanitizer).execute(&[
            Action::Done {
                summary: "finished".to_string(),
            },
            Action::WriteFile {
                path: "late.txt".to_string(),
                content: "x".to_string(),
            },
        ]);
        assert_eq!(report.done.as_deref(), Some("finished"));
        assert_eq!(report.executed, 1);
        assert!(!repo.path().join("late.txt").exists());
    }

    /// A command that outlives the timeout reports it and the batch continues.
    #[test]
    fn slow_command_reports_timeout_and_batch_continues() {
        let repo = TestRepo::new().expect("repo");
        let ws = Workspace::new(repo.path());
        let git = Git::new(repo.path());
        let sanitizer = Sanitizer::default();
        let report = ActionRunner::new(&ws, &git, &sanitizer)
            .with_command_timeout(Duration::from_millis(300))
            .execute(&[
                Action::RunCommand {
                    command: "sleep 5".to_string(),
                },
                Action::ReadFile {
                    path: "README.md".to_string(),
                },
            ]);
        assert_eq!(report.entries[0], "[warn] `sleep 5` timed out after 300ms");
        assert!(report.entries[1].starts_with("[ok] read README.md"));
    }

    #[test]
    fn failing_command_is_a_warning_with_output() {
        let repo = TestRepo::new().expect("repo");
        let ws = Workspace::new(repo.path());
        let git = Git::new(repo.path());
        let sanitizer = Sanitizer::default();
        let report = runner(&ws, &git, &sanitizer).execute(&[Action::RunCommand {
            command: "echo boom >&2; exit 3".to_string(),
        }]);
        assert_eq!(report.entries[0], "[warn] `echo boom >&2; exit 3` exited with status 3\nboom");
    }

    #[test]
    fn traversal_and_missing_files_are_errors_not_panics() {
        let repo = TestRepo::new().expect("repo");
        let ws = Workspace::new(repo.path());
        let git = Git::new(repo.path());
        let sanitizer = Sanitizer::default();
        let report = runner(&ws, &git, &sanitizer).execute(&[
            Action::WriteFile {
                path: "../escape.txt".to_string(),
                content: "x".to_string(),
            },
            Action::ReadFile {
                path: "missing.txt".to_string(),
            },
        ]);
        assert!(report.entries[0].starts_with("[error] write ../escape.txt"));
        assert_eq!(report.entries[1], "[error] read missing.txt: file not found");
        assert!(report.touched.is_empty());
    }

    #[test]
    fn command_output_is_sanitized() {
        let repo = TestRepo::new().expect("repo");
        let ws = Workspace::new(repo.path());
        let git = Git::new(repo.path());
        let sanitizer = Sanitizer::new(["hunter2-secret-value"]);
        let report = runner(&ws, &git, &sanitizer).execute(&[Action::RunCommand {
            command: "echo hunter2-secret-value".to_string(),
        }]);
        assert!(!report.entries[0].contains("hunter2-secret-value"));
    }
}
