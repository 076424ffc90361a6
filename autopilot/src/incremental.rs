//! Quick per-file checks after the model writes or edits files.
//!
//! Findings are appended to the feedback turn so the model can fix mistakes
//! before verification. Missing tools and timeouts are ignored.

use std::path::Path;
use std::time::Duration;

use tracing::{debug, warn};

use crate::core::text::clip;
use crate::io::tools::{ToolInvocation, ToolRun, ToolRunner};

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Findings {
    pub errors: Vec<String>,
    pub warnings: Vec<String>,
}

impl Findings {
    pub fn is_empty(&self) -> bool {
        self.errors.is_empty() && self.warnings.is_empty()
    }

    /// Text block appended to the feedback turn; `None` when nothing was found.
    pub fn render(&self) -> Option<String> {
        if self.is_empty() {
            return None;
        }
        let mut out = String::from("Incremental validation:");
        for error in &self.errors {
            out.push_str("\n[error] ");
            out.push_str(error);
        }
        for warning in &self.warnings {
            out.push_str("\n[warn] ");
            out.push_str(warning);
        }
        Some(out)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Severity {
    Error,
    Warning,
}

/// Checks selected by file extension. Rust sources are left to the gate engine.
fn checks_for(file: &str, timeout: Duration) -> Vec<(Severity, ToolInvocation)> {
    let Some(ext) = Path::new(file).extension().and_then(|e| e.to_str()) else {
        return Vec::new();
    };
    match ext {
        "py" => vec![
            (
                Severity::Error,
                ToolInvocation::new("python3", &["-m", "py_compile", file], timeout),
            ),
            (
                Severity::Warning,
                ToolInvocation::new("flake8", &["--max-line-length=120", file], timeout),
            ),
        ],
        "ts" | "tsx" => vec![
            (
                Severity::Error,
                ToolInvocation::new(
                    "npx",
                    &["--no-install", "tsc", "--noEmit", "--skipLibCheck", file],
                    timeout,
                ),
            ),
            (
                Severity::Warning,
                ToolInvocation::new("npx", &["--no-install", "eslint", file], timeout),
            ),
        ],
        "js" | "jsx" | "mjs" | "cjs" => vec![
            (
                Severity::Error,
                ToolInvocation::new("node", &["--check", file], timeout),
            ),
            (
                Severity::Warning,
                ToolInvocation::new("npx", &["--no-install", "eslint", file], timeout),
            ),
        ],
        _ => Vec::new(),
    }
}

pub struct IncrementalValidator<'a, R: ToolRunner> {
    tools: &'a R,
    workdir: &'a Path,
    timeout: Duration,
}

impl<'a, R: ToolRunner> IncrementalValidator<'a, R> {
    pub fn new(tools: &'a R, workdir: &'a Path) -> Self {
        Self {
            tools,
            workdir,
            timeout: Duration::from_secs(30),
        }
    }

    pub fn validate_files(&self, files: &[String]) -> Findings {
        let mut findings = Findings::default();
        for file in files {
            if !self.workdir.join(file).is_file() {
                continue;
            }
            for (severity, invocation) in checks_for(file, self.timeout) {
                let run = match self.tools.run(self.workdir, &invocation) {
                    Ok(run) => run,
                    Err(err) => {
                        warn!(tool = %invocation.program, err = %err, "incremental check failed to run");
                        continue;
                    }
                };
                let ToolRun::Completed {
                    success: false,
                    stdout,
                    stderr,
                } = run
                else {
                    continue;
                };
                let output = if stderr.trim().is_empty() { stdout } else { stderr };
                let message = format!("{file}: {}", clip(output.trim(), 500, "..."));
                debug!(file = %file, ?severity, "incremental finding");
                match severity {
                    Severity::Error => findings.errors.push(message),
                    Severity::Warning => findings.warnings.push(message),
                }
            }
        }
        findings
    }
}
