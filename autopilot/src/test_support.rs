//! Test-only collaborators: scripted model, scripted tools, recording tracker
//! and throwaway git repositories.

use std::cell::RefCell;
use std::collections::{HashMap, VecDeque};
use std::fs;
use std::path::Path;
use std::process::Command;

use anyhow::{Context, Result, anyhow};
use tempfile::TempDir;

use crate::core::types::{ImplementationStrategy, Message, RiskLevel, WorkItem, WorkItemSource};
use crate::io::model::{Completion, Model, TokenUsage};
use crate::io::tools::{ToolInvocation, ToolRun, ToolRunner};
use crate::io::tracker::{PullRequest, Tracker};

/// A git repository in a temp directory with one commit on `main`.
pub struct TestRepo {
    dir: TempDir,
}

impl TestRepo {
    pub fn new() -> Result<Self> {
        let dir = tempfile::tempdir().context("create tempdir")?;
        let repo = Self { dir };
        repo.git(&["init", "-q", "-b", "main"])?;
        repo.git(&["config", "user.email", "test@example.com"])?;
        repo.git(&["config", "user.name", "test"])?;
        repo.git(&["config", "commit.gpgsign", "false"])?;
        repo.write("README.md", "hi\n")?;
        repo.git(&["add", "README.md"])?;
        repo.git(&["commit", "-q", "-m", "chore: init"])?;
        Ok(repo)
    }

    pub fn path(&self) -> &Path {
        self.dir.path()
    }

    pub fn write(&self, rel: &str, contents: &str) -> Result<()> {
        let path = self.path().join(rel);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(&path, contents).with_context(|| format!("write {}", path.display()))
    }

    pub fn read(&self, rel: &str) -> Result<String> {
        let path = self.path().join(rel);
        fs::read_to_string(&path).with_context(|| format!("read {}", path.display()))
    }

    /// Stage and commit everything.
    pub fn commit_all(&self, message: &str) -> Result<()> {
        self.git(&["add", "-A"])?;
        self.git(&["commit", "-q", "-m", message])
    }

    pub fn git(&self, args: &[&str]) -> Result<()> {
        let status = Command::new("git")
            .args(args)
            .current_dir(self.path())
            .status()
            .with_context(|| format!("git {}", args.join(" ")))?;
        if !status.success() {
            return Err(anyhow!("git {} failed", args.join(" ")));
        }
        Ok(())
    }
}

/// A model that answers from a fixed queue of replies and records every request.
pub struct ScriptedModel {
    name: String,
    replies: RefCell<VecDeque<Completion>>,
    requests: RefCell<Vec<Vec<Message>>>,
}

impl ScriptedModel {
    pub fn new<I, S>(replies: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            name: "gpt-4o".to_string(),
            replies: RefCell::new(
                replies
                    .into_iter()
                    .map(|text| Completion {
                        text: text.into(),
                        usage: Some(TokenUsage {
                            input_tokens: 100,
                            output_tokens: 50,
                        }),
                    })
                    .collect(),
            ),
            requests: RefCell::new(Vec::new()),
        }
    }

    pub fn requests(&self) -> Vec<Vec<Message>> {
        self.requests.borrow().clone()
    }

    /// Last message of every request, in call order.
    pub fn prompts(&self) -> Vec<String> {
        self.requests
            .borrow()
            .iter()
            .filter_map(|messages| messages.last().map(|m| m.content.clone()))
            .collect()
    }

    pub fn remaining(&self) -> usize {
        self.replies.borrow().len()
    }
}

impl Model for ScriptedModel {
    fn name(&self) -> &str {
        &self.name
    }

    fn complete(&self, messages: &[Message]) -> Result<Completion> {
        self.requests.borrow_mut().push(messages.to_vec());
        self.replies
            .borrow_mut()
            .pop_front()
            .ok_or_else(|| anyhow!("scripted model has no more replies"))
    }
}

/// Answers tool invocations by command-line prefix.
///
/// Each prefix holds a queue; the last entry repeats once the queue drains.
/// Unscripted invocations report [`ToolRun::Missing`].
#[derive(Default)]
pub struct ScriptedToolRunner {
    scripts: RefCell<Vec<(String, VecDeque<ToolRun>)>>,
    calls: RefCell<Vec<String>>,
}

impl ScriptedToolRunner {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(self, prefix: &str, run: ToolRun) -> Self {
        self.push(prefix, run);
        self
    }

    pub fn push(&self, prefix: &str, run: ToolRun) {
        let mut scripts = self.scripts.borrow_mut();
        match scripts.iter_mut().find(|(p, _)| p == prefix) {
            Some((_, queue)) => queue.push_back(run),
            None => scripts.push((prefix.to_string(), VecDeque::from([run]))),
        }
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.borrow().clone()
    }
}

impl ToolRunner for ScriptedToolRunner {
    fn run(&self, _workdir: &Path, invocation: &ToolInvocation) -> Result<ToolRun> {
        let line = invocation.display();
        self.calls.borrow_mut().push(line.clone());
        let mut scripts = self.scripts.borrow_mut();
        let Some((_, queue)) = scripts.iter_mut().find(|(p, _)| line.starts_with(p.as_str()))
        else {
            return Ok(ToolRun::Missing);
        };
        let run = if queue.len() > 1 {
            queue.pop_front()
        } else {
            queue.front().cloned()
        };
        Ok(run.unwrap_or(ToolRun::Missing))
    }
}

pub fn tool_ok() -> ToolRun {
    ToolRun::Completed {
        success: true,
        stdout: String::new(),
        stderr: String::new(),
    }
}

pub fn tool_failed(stderr: &str) -> ToolRun {
    ToolRun::Completed {
        success: false,
        stdout: String::new(),
        stderr: stderr.to_string(),
    }
}

/// Tracker that serves canned issues and records everything it is asked to do.
#[derive(Default)]
pub struct RecordingTracker {
    issues: HashMap<u64, WorkItem>,
    comments: RefCell<Vec<(u64, String)>>,
    published: RefCell<Vec<PullRequest>>,
}

impl RecordingTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_issue(mut self, item: WorkItem) -> Self {
        self.issues.insert(item.number, item);
        self
    }

    pub fn comments(&self) -> Vec<(u64, String)> {
        self.comments.borrow().clone()
    }

    pub fn published(&self) -> Vec<PullRequest> {
        self.published.borrow().clone()
    }
}

impl Tracker for RecordingTracker {
    fn fetch_issue(&self, number: u64) -> Result<WorkItem> {
        self.issues
            .get(&number)
            .cloned()
            .ok_or_else(|| anyhow!("issue #{number} not found"))
    }

    fn comment(&self, number: u64, body: &str) -> Result<()> {
        self.comments.borrow_mut().push((number, body.to_string()));
        Ok(())
    }

    fn publish(&self, pr: &PullRequest) -> Result<String> {
        let mut published = self.published.borrow_mut();
        published.push(pr.clone());
        Ok(format!("https://example.test/pull/{}", published.len()))
    }
}

pub fn work_item(number: u64, title: &str, body: &str) -> WorkItem {
    WorkItem {
        number,
        title: title.to_string(),
        body: body.to_string(),
        labels: Vec::new(),
        source: WorkItemSource::Issue,
    }
}

pub fn strategy(name: &str, complexity: u8, risk: RiskLevel) -> ImplementationStrategy {
    ImplementationStrategy {
        name: name.to_string(),
        approach: format!("{name} approach"),
        pros: Vec::new(),
        cons: Vec::new(),
        complexity,
        risk,
        time_estimate: "1 hour".to_string(),
    }
}
