//! Chat session and the action-loop conversation driver.
//!
//! [`Agent`] owns one bounded conversation and gates every model call on the
//! resource governor. [`drive`] runs the plan/actions state machine on top of
//! it until the model signals `done` or the iteration ceiling is reached.

use anyhow::{Context, Result};
use tracing::{debug, info, instrument, warn};

use crate::actions::ActionRunner;
use crate::core::action::{Reply, parse_reply};
use crate::core::conversation::{Conversation, estimate_tokens};
use crate::governor::ResourceGovernor;
use crate::incremental::IncrementalValidator;
use crate::io::model::Model;
use crate::io::prompt::PromptEngine;
use crate::io::tools::ToolRunner;
use crate::io::workspace::{PreloadLimits, Workspace};

/// A model plus the conversation it is having.
pub struct Agent<'a, M: Model> {
    model: &'a M,
    conversation: Conversation,
    expected_output_tokens: u64,
}

impl<'a, M: Model> Agent<'a, M> {
    pub fn new(model: &'a M, system: impl Into<String>, max_pairs: usize) -> Self {
        Self {
            model,
            conversation: Conversation::with_system(system, max_pairs),
            expected_output_tokens: 2_000,
        }
    }

    pub fn with_expected_output_tokens(mut self, tokens: u64) -> Self {
        self.expected_output_tokens = tokens;
        self
    }

    /// Clear the history. With `keep_system` the project context survives.
    pub fn reset(&mut self, keep_system: bool) {
        self.conversation.reset(keep_system);
        debug!(keep_system, "conversation reset");
    }

    /// Check quota, call the model with `prompt` appended and record usage.
    ///
    /// Fails with [`QuotaExceededError`](crate::governor::QuotaExceededError)
    /// before any spend when a ceiling would be crossed. The history only
    /// changes once the model has answered.
    pub fn send(
        &mut self,
        governor: &mut ResourceGovernor,
        operation: &str,
        prompt: &str,
    ) -> Result<String> {
        let mut pending = self.conversation.clone();
        pending.push_user(prompt);
        let estimate = pending.estimated_tokens() + self.expected_output_tokens;
        governor.ensure_quota(operation, estimate)?;

        let completion = self
            .model
            .complete(&pending.messages())
            .with_context(|| format!("model completion for {operation}"))?;
        let (input, output) = match completion.usage {
            Some(usage) => (usage.input_tokens, usage.output_tokens),
            None => (pending.estimated_tokens(), estimate_tokens(&completion.text)),
        };
        governor.record_usage(input, output)?;
        debug!(model = self.model.name(), operation, input, output, "completion recorded");
        pending.push_assistant(completion.text.clone());
        self.conversation = pending;
        Ok(completion.text)
    }
}

/// One-shot call with no history beyond `prompt`.
pub fn ask<M: Model>(
    model: &M,
    governor: &mut ResourceGovernor,
    operation: &str,
    system: &str,
    prompt: &str,
) -> Result<String> {
    Agent::new(model, system, 1).send(governor, operation, prompt)
}

/// How a driver run ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DriveOutcome {
    Done { summary: String },
    /// Iteration ceiling reached without `done`. Not an error.
    Exhausted,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DriveReport {
    pub outcome: DriveOutcome,
    pub iterations: u32,
    pub actions_executed: usize,
    pub corrections: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum DriverState {
    AwaitingPlan,
    AwaitingActions,
}

/// Everything the driver acts through.
pub struct DriverEnv<'a, R: ToolRunner> {
    pub prompts: &'a PromptEngine,
    pub workspace: &'a Workspace,
    pub actions: &'a ActionRunner<'a>,
    /// Per-file checks after mutating actions; `None` disables them.
    pub validator: Option<&'a IncrementalValidator<'a, R>>,
    pub preload: PreloadLimits,
    pub max_iterations: u32,
}

/// Run the plan/actions loop starting from `prompt`.
///
/// Malformed replies, batches without a valid action and a second plan get a
/// corrective message and count only toward the iteration ceiling.
#[instrument(skip_all, fields(max_iterations = env.max_iterations))]
pub fn drive<M: Model, R: ToolRunner>(
    agent: &mut Agent<'_, M>,
    governor: &mut ResourceGovernor,
    env: &DriverEnv<'_, R>,
    prompt: String,
) -> Result<DriveReport> {
    let mut state = DriverState::AwaitingPlan;
    let mut next = prompt;
    let mut report = DriveReport {
        outcome: DriveOutcome::Exhausted,
        iterations: 0,
        actions_executed: 0,
        corrections: 0,
    };

    while report.iterations < env.max_iterations {
        report.iterations += 1;
        let reply = agent.send(governor, "implementation", &next)?;
        next = match parse_reply(&reply) {
            Reply::Plan(_) if state == DriverState::AwaitingActions => {
                warn!(iteration = report.iterations, "plan repeated after acceptance");
                report.corrections += 1;
                env.prompts.corrective(
                    "The plan was already accepted. Use read_file actions to see more files.",
                )?
            }
            Reply::Plan(plan) => {
                info!(
                    iteration = report.iterations,
                    files = plan.files_to_read.len(),
                    "plan received"
                );
                state = DriverState::AwaitingActions;
                if plan.files_to_read.is_empty() {
                    "Plan accepted. No files were requested.\n\nRespond with a JSON array of actions:"
                        .to_string()
                } else {
                    let contents = env.workspace.preload(&plan.files_to_read, env.preload);
                    format!(
                        "Plan accepted. Requested files:\n\n{contents}\n\nRespond with a JSON array of actions:"
                    )
                }
            }
            Reply::Unparseable { reason } => {
                warn!(iteration = report.iterations, reason = %reason, "unparseable reply");
                report.corrections += 1;
                env.prompts
                    .corrective(&format!("Invalid response format ({reason})."))?
            }
            Reply::Actions(batch) if !batch.has_valid() => {
                warn!(
                    iteration = report.iterations,
                    rejected = batch.rejected.len(),
                    "no valid actions in reply"
                );
                report.corrections += 1;
                let mut reason = String::from("No valid actions in your response.");
                for note in batch.rejection_notes() {
                    reason.push('\n');
                    reason.push_str(&note);
                }
                env.prompts.corrective(&reason)?
            }
            Reply::Actions(batch) => {
                state = DriverState::AwaitingActions;
                let batch_report = env.actions.execute(&batch.actions);
                report.actions_executed += batch_report.executed;
                debug!(
                    iteration = report.iterations,
                    executed = batch_report.executed,
                    rejected = batch.rejected.len(),
                    "batch executed"
                );
                if let Some(summary) = batch_report.done {
                    info!(iterations = report.iterations, "agent signalled done");
                    report.outcome = DriveOutcome::Done { summary };
                    return Ok(report);
                }
                let mut feedback = batch_report.entries.join("\n");
                for note in batch.rejection_notes() {
                    feedback.push('\n');
                    feedback.push_str(&note);
                }
                if let Some(validator) = env.validator
                    && !batch_report.touched.is_empty()
                    && let Some(findings) = validator.validate_files(&batch_report.touched).render()
                {
                    feedback.push_str("\n\n");
                    feedback.push_str(&findings);
                }
                format!("{feedback}\n\nContinue with next actions as JSON array:")
            }
        };
    }

    warn!(iterations = report.iterations, "iteration ceiling reached without done");
    Ok(report)
}
