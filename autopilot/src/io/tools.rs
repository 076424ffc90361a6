//! Tool invocation seam for quality gates and incremental validation.
//!
//! The [`ToolRunner`] trait decouples gate logic from process spawning. Tests use
//! scripted runners that answer by program name without touching the system.

use std::path::Path;
use std::process::Command;
use std::time::Duration;

use anyhow::Result;
use tracing::{debug, instrument};

use crate::io::process::{is_not_found, run_command_with_timeout};

/// A program plus arguments, run in the workspace root.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ToolInvocation {
    pub program: String,
    pub args: Vec<String>,
    pub timeout: Duration,
}

impl ToolInvocation {
    pub fn new(program: &str, args: &[&str], timeout: Duration) -> Self {
        Self {
            program: program.to_string(),
            args: args.iter().map(|a| (*a).to_string()).collect(),
            timeout,
        }
    }

    /// `program arg1 arg2`, for messages and scripted matching.
    pub fn display(&self) -> String {
        let mut out = self.program.clone();
        for arg in &self.args {
            out.push(' ');
            out.push_str(arg);
        }
        out
    }
}

/// How a tool invocation ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ToolRun {
    Completed {
        success: bool,
        stdout: String,
        stderr: String,
    },
    TimedOut,
    /// The program is not installed.
    Missing,
}

pub trait ToolRunner {
    fn run(&self, workdir: &Path, invocation: &ToolInvocation) -> Result<ToolRun>;
}

/// Runs tools as real child processes.
#[derive(Debug, Clone)]
pub struct ProcessToolRunner {
    pub output_limit_bytes: usize,
}

impl Default for ProcessToolRunner {
    fn default() -> Self {
        Self {
            output_limit_bytes: 200_000,
        }
    }
}

impl ToolRunner for ProcessToolRunner {
    #[instrument(skip_all, fields(tool = %invocation.program))]
    fn run(&self, workdir: &Path, invocation: &ToolInvocation) -> Result<ToolRun> {
        let mut cmd = Command::new(&invocation.program);
        cmd.args(&invocation.args).current_dir(workdir);
        let output = match run_command_with_timeout(
            cmd,
            None,
            invocation.timeout,
            self.output_limit_bytes,
        ) {
            Ok(output) => output,
            Err(err) if is_not_found(&err) => {
                debug!("tool not installed");
                return Ok(ToolRun::Missing);
            }
            Err(err) => return Err(err),
        };
        if output.timed_out {
            return Ok(ToolRun::TimedOut);
        }
        Ok(ToolRun::Completed {
            success: output.status.success(),
            stdout: output.stdout_text(),
            stderr: output.stderr_text(),
        })
    }
}
