//! Tiered quality gates run against the workspace after an attempt.
//!
//! Each gate picks its tool from the project markers found in the workspace.
//! A project without an applicable tool gets a passing "skipped" result; a gate
//! that errors out becomes a failed result carrying the error text.

use std::fs;
use std::path::Path;
use std::time::Duration;

use anyhow::{Context, Result};
use serde_json::Value;
use tracing::{debug, info, instrument, warn};

use crate::core::quality::{CheckOutcome, QualityReport, risky_files};
use crate::core::sanitize::Sanitizer;
use crate::core::text::{clip, tail_chars};
use crate::core::types::{GateLevel, GateResult};
use crate::io::git::Git;
use crate::io::tools::{ToolInvocation, ToolRun, ToolRunner};
use crate::io::workspace::Workspace;

const DETAIL_CHARS: usize = 500;
/// Python syntax checks are skipped for larger trees and capped per run.
const PY_TREE_LIMIT: usize = 100;
const PY_CHECK_LIMIT: usize = 20;
const README_MIN_CHARS: usize = 100;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GateId {
    Security,
    Syntax,
    BreakingChanges,
    Types,
    Tests,
    Build,
    Lint,
    Coverage,
    Complexity,
    Documentation,
}

impl GateId {
    pub const ALL: [GateId; 10] = [
        GateId::Security,
        GateId::Syntax,
        GateId::BreakingChanges,
        GateId::Types,
        GateId::Tests,
        GateId::Build,
        GateId::Lint,
        GateId::Coverage,
        GateId::Complexity,
        GateId::Documentation,
    ];

    pub fn name(self) -> &'static str {
        match self {
            Self::Security => "Security Check",
            Self::Syntax => "Syntax Check",
            Self::BreakingChanges => "Breaking Changes",
            Self::Types => "Type Check",
            Self::Tests => "Tests Pass",
            Self::Build => "Build Success",
            Self::Lint => "Lint Check",
            Self::Coverage => "Test Coverage",
            Self::Complexity => "Code Complexity",
            Self::Documentation => "Documentation",
        }
    }

    pub fn level(self) -> GateLevel {
        match self {
            Self::Security | Self::Syntax | Self::BreakingChanges => GateLevel::Critical,
            Self::Types | Self::Tests | Self::Build | Self::Lint => GateLevel::Required,
            Self::Coverage | Self::Complexity | Self::Documentation => GateLevel::Recommended,
        }
    }

    /// Upper bound on the gate's tool run, before the configured cap.
    fn timeout_secs(self) -> u64 {
        match self {
            Self::Security => 60,
            Self::Tests | Self::Coverage => 180,
            Self::Build => 300,
            _ => 120,
        }
    }
}

/// Manifest and config files that select gate tooling.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ProjectMarkers {
    pub package_json: bool,
    pub npm_scripts: Vec<String>,
    pub tsconfig: bool,
    pub eslint: bool,
    pub requirements_txt: bool,
    pub mypy: bool,
    pub pytest: bool,
    pub flake8: bool,
    pub cargo: bool,
}

impl ProjectMarkers {
    pub fn detect(root: &Path) -> Self {
        let has = |name: &str| root.join(name).is_file();
        let npm_scripts = if has("package.json") {
            npm_scripts(&root.join("package.json"))
        } else {
            Vec::new()
        };
        Self {
            package_json: has("package.json"),
            npm_scripts,
            tsconfig: has("tsconfig.json"),
            eslint: has(".eslintrc.json") || has(".eslintrc.js") || has("eslint.config.js"),
            requirements_txt: has("requirements.txt"),
            mypy: has("mypy.ini") || has("pyproject.toml"),
            pytest: has("pytest.ini"),
            flake8: has(".flake8") || has("setup.cfg"),
            cargo: has("Cargo.toml"),
        }
    }

    pub fn has_script(&self, name: &str) -> bool {
        self.npm_scripts.iter().any(|s| s == name)
    }
}

fn npm_scripts(path: &Path) -> Vec<String> {
    let parsed = fs::read_to_string(path)
        .ok()
        .and_then(|raw| serde_json::from_str::<Value>(&raw).ok());
    match parsed {
        Some(pkg) => pkg
            .get("scripts")
            .and_then(Value::as_object)
            .map(|scripts| scripts.keys().cloned().collect())
            .unwrap_or_default(),
        None => {
            warn!(path = %path.display(), "package.json unreadable, assuming no scripts");
            Vec::new()
        }
    }
}

/// What a tool run means for one gate.
#[derive(Clone, Copy)]
struct Verdict<'a> {
    label: &'a str,
    pass: &'a str,
    fail: &'a str,
    /// Keep the end of the output (test and build logs) rather than the start.
    tail: bool,
}

pub struct QualityGateEngine<'a, R: ToolRunner> {
    tools: &'a R,
    workspace: &'a Workspace,
    git: &'a Git,
    sanitizer: &'a Sanitizer,
    base_ref: String,
    min_coverage: f64,
    timeout_cap: Duration,
}

impl<'a, R: ToolRunner> QualityGateEngine<'a, R> {
    pub fn new(
        tools: &'a R,
        workspace: &'a Workspace,
        git: &'a Git,
        sanitizer: &'a Sanitizer,
        base_ref: &str,
    ) -> Self {
        Self {
            tools,
            workspace,
            git,
            sanitizer,
            base_ref: base_ref.to_string(),
            min_coverage: 80.0,
            timeout_cap: Duration::from_secs(300),
        }
    }

    pub fn with_min_coverage(mut self, pct: f64) -> Self {
        self.min_coverage = pct;
        self
    }

    pub fn with_timeout_cap(mut self, cap: Duration) -> Self {
        self.timeout_cap = cap;
        self
    }

    /// Run every gate and fold the results into a report.
    #[instrument(skip_all)]
    pub fn check_all(&self) -> QualityReport {
        let markers = ProjectMarkers::detect(self.workspace.root());
        let results = GateId::ALL
            .iter()
            .map(|gate| self.run_gate(*gate, &markers))
            .collect();
        let report = QualityReport::from_results(results);
        info!(summary = %report.summary(), passed = report.passed, "quality gates finished");
        report
    }

    pub fn check_level(&self, level: GateLevel) -> Vec<GateResult> {
        let markers = ProjectMarkers::detect(self.workspace.root());
        GateId::ALL
            .iter()
            .filter(|gate| gate.level() == level)
            .map(|gate| self.run_gate(*gate, &markers))
            .collect()
    }

    /// Type check, tests and build, each treated as blocking.
    pub fn check_legacy(&self) -> Vec<GateResult> {
        let markers = ProjectMarkers::detect(self.workspace.root());
        [GateId::Types, GateId::Tests, GateId::Build]
            .iter()
            .map(|gate| GateResult {
                level: GateLevel::Critical,
                ..self.run_gate(*gate, &markers)
            })
            .collect()
    }

    pub fn run_gate(&self, gate: GateId, markers: &ProjectMarkers) -> GateResult {
        let outcome = match self.check(gate, markers) {
            Ok(outcome) => outcome,
            Err(err) => {
                warn!(gate = gate.name(), err = %err, "gate execution failed");
                CheckOutcome::fail(
                    format!("Gate execution failed: {}", self.sanitizer.sanitize(&format!("{err:#}"))),
                    None,
                )
            }
        };
        let result = outcome.into_result(gate.name(), gate.level());
        debug!(
            gate = gate.name(),
            passed = result.passed,
            skipped = result.skipped,
            "gate checked"
        );
        result
    }

    fn check(&self, gate: GateId, markers: &ProjectMarkers) -> Result<CheckOutcome> {
        match gate {
            GateId::Security => self.check_security(markers),
            GateId::Syntax => self.check_syntax(markers),
            GateId::BreakingChanges => self.check_breaking_changes(),
            GateId::Types => self.check_types(markers),
            GateId::Tests => self.check_tests(markers),
            GateId::Build => self.check_build(markers),
            GateId::Lint => self.check_lint(markers),
            GateId::Coverage => self.check_coverage(markers),
            GateId::Complexity => Ok(CheckOutcome::skipped("Complexity check not implemented")),
            GateId::Documentation => self.check_documentation(),
        }
    }

    fn check_security(&self, markers: &ProjectMarkers) -> Result<CheckOutcome> {
        let verdict = Verdict {
            label: "Security check",
            pass: "No high/critical vulnerabilities",
            fail: "Security vulnerabilities found",
            tail: false,
        };
        if markers.package_json {
            return self.tool(GateId::Security, "npm", &["audit", "--audit-level=high"], &verdict);
        }
        if markers.cargo {
            return self.tool(GateId::Security, "cargo", &["audit", "--quiet"], &verdict);
        }
        if markers.requirements_txt {
            return Ok(CheckOutcome::skipped("No Python vulnerability scanner configured"));
        }
        Ok(CheckOutcome::skipped("No security scan configured"))
    }

    fn check_syntax(&self, markers: &ProjectMarkers) -> Result<CheckOutcome> {
        let verdict = Verdict {
            label: "Syntax check",
            pass: "No syntax errors",
            fail: "Syntax errors found",
            tail: false,
        };
        if markers.tsconfig {
            return self.tool(
                GateId::Syntax,
                "npx",
                &["tsc", "--noEmit"],
                &Verdict {
                    fail: "TypeScript syntax errors",
                    ..verdict
                },
            );
        }
        if markers.cargo {
            return self.tool(GateId::Syntax, "cargo", &["check", "--quiet"], &verdict);
        }
        let python: Vec<String> = self
            .workspace
            .list(usize::MAX)?
            .into_iter()
            .filter(|f| f.ends_with(".py"))
            .collect();
        if python.is_empty() {
            return Ok(CheckOutcome::skipped("No syntax check configured"));
        }
        if python.len() >= PY_TREE_LIMIT {
            return Ok(CheckOutcome::skipped("Too many Python files for a syntax pass"));
        }
        for file in python.iter().take(PY_CHECK_LIMIT) {
            let outcome = self.tool(
                GateId::Syntax,
                "python3",
                &["-m", "py_compile", file],
                &Verdict {
                    fail: &format!("Syntax error in {file}"),
                    ..verdict
                },
            )?;
            if !matches!(outcome, CheckOutcome::Pass { .. }) {
                return Ok(outcome);
            }
        }
        Ok(CheckOutcome::pass("No syntax errors"))
    }

    fn check_breaking_changes(&self) -> Result<CheckOutcome> {
        let changed = self
            .git
            .diff_name_only(&self.base_ref)
            .context("list changed files")?;
        let risky = risky_files(&changed);
        if risky.is_empty() {
            return Ok(CheckOutcome::pass("No breaking changes detected"));
        }
        Ok(CheckOutcome::fail(
            "Potential breaking changes detected",
            Some(format!(
                "Files with potential breaking changes:\n{}",
                risky.join("\n")
            )),
        ))
    }

    fn check_types(&self, markers: &ProjectMarkers) -> Result<CheckOutcome> {
        let verdict = Verdict {
            label: "Type check",
            pass: "Type check passed",
            fail: "Type check failed",
            tail: false,
        };
        if markers.tsconfig {
            return self.tool(GateId::Types, "npx", &["tsc", "--noEmit"], &verdict);
        }
        if markers.mypy {
            return self.tool(GateId::Types, "mypy", &["."], &verdict);
        }
        if markers.cargo {
            return Ok(CheckOutcome::skipped("Type checking covered by cargo check"));
        }
        Ok(CheckOutcome::skipped("No type checking configured"))
    }

    fn check_tests(&self, markers: &ProjectMarkers) -> Result<CheckOutcome> {
        let verdict = Verdict {
            label: "Tests",
            pass: "Tests passed",
            fail: "Tests failed",
            tail: true,
        };
        if markers.has_script("test") {
            return self.tool(GateId::Tests, "npm", &["test"], &verdict);
        }
        if markers.pytest {
            return self.tool(GateId::Tests, "pytest", &[], &verdict);
        }
        if markers.cargo {
            return self.tool(GateId::Tests, "cargo", &["test", "--quiet"], &verdict);
        }
        Ok(CheckOutcome::skipped("No tests configured"))
    }

    fn check_build(&self, markers: &ProjectMarkers) -> Result<CheckOutcome> {
        let verdict = Verdict {
            label: "Build",
            pass: "Build succeeded",
            fail: "Build failed",
            tail: true,
        };
        if markers.has_script("build") {
            return self.tool(GateId::Build, "npm", &["run", "build"], &verdict);
        }
        if markers.cargo {
            return self.tool(GateId::Build, "cargo", &["build", "--quiet"], &verdict);
        }
        Ok(CheckOutcome::skipped("No build configured"))
    }

    fn check_lint(&self, markers: &ProjectMarkers) -> Result<CheckOutcome> {
        let verdict = Verdict {
            label: "Lint check",
            pass: "Lint check passed",
            fail: "Lint errors found",
            tail: false,
        };
        if markers.eslint {
            return self.tool(GateId::Lint, "npx", &["eslint", "."], &verdict);
        }
        if markers.flake8 {
            return self.tool(GateId::Lint, "flake8", &["."], &verdict);
        }
        if markers.cargo {
            return self.tool(
                GateId::Lint,
                "cargo",
                &["clippy", "--quiet", "--", "-D", "warnings"],
                &verdict,
            );
        }
        Ok(CheckOutcome::skipped("No linter configured"))
    }

    fn check_coverage(&self, markers: &ProjectMarkers) -> Result<CheckOutcome> {
        if !markers.has_script("test") {
            return Ok(CheckOutcome::skipped("Coverage check skipped"));
        }
        let invocation = self.invocation(
            GateId::Coverage,
            "npm",
            &["test", "--", "--coverage", "--coverageReporters=json-summary"],
        );
        match self.tools.run(self.workspace.root(), &invocation)? {
            ToolRun::TimedOut => return Ok(CheckOutcome::skipped("Coverage check timed out")),
            ToolRun::Missing => return Ok(CheckOutcome::skipped("Coverage check skipped: npm not installed")),
            ToolRun::Completed { .. } => {}
        }
        let summary = self.workspace.root().join("coverage/coverage-summary.json");
        let Ok(raw) = fs::read_to_string(&summary) else {
            return Ok(CheckOutcome::skipped("Coverage report not found"));
        };
        let data: Value = serde_json::from_str(&raw)
            .with_context(|| format!("parse {}", summary.display()))?;
        let pct = data
            .pointer("/total/lines/pct")
            .and_then(Value::as_f64)
            .unwrap_or(0.0);
        let min = self.min_coverage;
        if pct < min {
            Ok(CheckOutcome::fail(format!("Coverage {pct}% < {min}%"), None))
        } else {
            Ok(CheckOutcome::pass(format!("Coverage {pct}% >= {min}%")))
        }
    }

    fn check_documentation(&self) -> Result<CheckOutcome> {
        match self.workspace.read("README.md")? {
            None => Ok(CheckOutcome::fail("README.md missing", None)),
            Some(text) if text.chars().count() <= README_MIN_CHARS => {
                Ok(CheckOutcome::fail("README is too short", None))
            }
            Some(_) => Ok(CheckOutcome::pass("Documentation exists")),
        }
    }

    fn invocation(&self, gate: GateId, program: &str, args: &[&str]) -> ToolInvocation {
        let timeout = Duration::from_secs(gate.timeout_secs()).min(self.timeout_cap);
        ToolInvocation::new(program, args, timeout)
    }

    fn tool(
        &self,
        gate: GateId,
        program: &str,
        args: &[&str],
        verdict: &Verdict<'_>,
    ) -> Result<CheckOutcome> {
        let invocation = self.invocation(gate, program, args);
        let run = self.tools.run(self.workspace.root(), &invocation)?;
        if cargo_subcommand_missing(program, &run) {
            let subcommand = args.first().copied().unwrap_or_default();
            return Ok(CheckOutcome::skipped(format!(
                "{} skipped: {program} {subcommand} not installed",
                verdict.label
            )));
        }
        Ok(match run {
            ToolRun::Missing => {
                CheckOutcome::skipped(format!("{} skipped: {program} not installed", verdict.label))
            }
            ToolRun::TimedOut => CheckOutcome::fail(format!("{} timed out", verdict.label), None),
            ToolRun::Completed { success: true, .. } => CheckOutcome::pass(verdict.pass),
            ToolRun::Completed {
                success: false,
                stdout,
                stderr,
            } => {
                let output = match (stdout.trim().is_empty(), stderr.trim().is_empty()) {
                    (_, true) => stdout,
                    (true, false) => stderr,
                    (false, false) => format!("{stdout}\n{stderr}"),
                };
                let output = output.trim();
                let detail = if verdict.tail {
                    tail_chars(output, DETAIL_CHARS).to_string()
                } else {
                    clip(output, DETAIL_CHARS, "...")
                };
                CheckOutcome::fail(
                    verdict.fail,
                    (!detail.is_empty()).then(|| self.sanitizer.sanitize(&detail)),
                )
            }
        })
    }
}

/// Cargo exits 101 with "no such command" when a plugin such as
/// `cargo-audit` is not installed.
fn cargo_subcommand_missing(program: &str, run: &ToolRun) -> bool {
    match run {
        ToolRun::Completed {
            success: false,
            stderr,
            ..
        } if program == "cargo" => {
            stderr.contains("no such command") || stderr.contains("no such subcommand")
        }
        _ => false,
    }
}
