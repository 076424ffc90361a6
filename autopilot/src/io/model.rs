//! Model abstraction for chat completions.
//!
//! The [`Model`] trait decouples the conversation driver from the completion
//! backend. [`CommandModel`] pipes the conversation as JSON into a configured
//! command; tests use scripted models that return predetermined replies.

use std::path::PathBuf;
use std::process::Command;
use std::time::Duration;

use anyhow::{Context, Result, anyhow};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, instrument, warn};

use crate::core::text::clip;
use crate::core::types::Message;
use crate::io::process::run_command_with_timeout;

/// Provider-reported token counts for one completion.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct TokenUsage {
    pub input_tokens: u64,
    pub output_tokens: u64,
}

/// A single text completion. Refusals and empty content arrive as `""`.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Completion {
    pub text: String,
    pub usage: Option<TokenUsage>,
}

pub trait Model {
    /// Identifier used for pricing.
    fn name(&self) -> &str;

    fn complete(&self, messages: &[Message]) -> Result<Completion>;
}

/// Request document written to the completion command's stdin.
#[derive(Debug, Serialize)]
struct CompletionRequest<'a> {
    model: &'a str,
    messages: &'a [Message],
}

/// Structured reply a completion command may print instead of plain text.
#[derive(Debug, Deserialize)]
struct CompletionReply {
    #[serde(default)]
    content: Option<String>,
    #[serde(default)]
    usage: Option<TokenUsage>,
}

/// Model backed by an external command (e.g. a small script calling a provider API).
#[derive(Debug, Clone)]
pub struct CommandModel {
    pub name: String,
    pub command: Vec<String>,
    pub workdir: PathBuf,
    pub timeout: Duration,
    pub output_limit_bytes: usize,
}

impl Model for CommandModel {
    fn name(&self) -> &str {
        &self.name
    }

    #[instrument(skip_all, fields(model = %self.name, messages = messages.len()))]
    fn complete(&self, messages: &[Message]) -> Result<Completion> {
        let (program, args) = self
            .command
            .split_first()
            .ok_or_else(|| anyhow!("model.command is empty"))?;
        let request = serde_json::to_vec(&CompletionRequest {
            model: &self.name,
            messages,
        })
        .context("serialize completion request")?;

        info!("requesting completion");
        let mut cmd = Command::new(program);
        cmd.args(args).current_dir(&self.workdir);
        let output = run_command_with_timeout(
            cmd,
            Some(&request),
            self.timeout,
            self.output_limit_bytes,
        )
        .with_context(|| format!("run model command {program}"))?;

        if output.timed_out {
            warn!(timeout_secs = self.timeout.as_secs(), "model command timed out");
            return Err(anyhow!("model command timed out after {:?}", self.timeout));
        }
        if !output.status.success() {
            warn!(exit_code = ?output.status.code(), "model command failed");
            return Err(anyhow!(
                "model command failed with status {:?}: {}",
                output.status.code(),
                clip(output.stderr_text().trim(), 500, "...")
            ));
        }
        let completion = parse_completion(&output.stdout_text());
        debug!(chars = completion.text.len(), "completion received");
        Ok(completion)
    }
}

/// Interpret command stdout: a JSON object with a `content` key, or otherwise the raw text.
fn parse_completion(stdout: &str) -> Completion {
    let structured = serde_json::from_str::<serde_json::Value>(stdout.trim())
        .ok()
        .filter(|value| value.get("content").is_some())
        .and_then(|value| serde_json::from_value::<CompletionReply>(value).ok());
    match structured {
        Some(reply) => Completion {
            text: reply.content.unwrap_or_default(),
            usage: reply.usage,
        },
        None => Completion {
            text: stdout.to_string(),
            usage: None,
        },
    }
}
