//! Verdict rules for a verification pass.
//!
//! Gates report a tri-state [`CheckOutcome`]; [`QualityReport`] folds those
//! results into severity buckets. Only critical failures fail the report.

use crate::core::text::clip;
use crate::core::types::{GateLevel, GateResult};

/// What a single check concluded.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CheckOutcome {
    Pass {
        message: String,
    },
    Fail {
        message: String,
        detail: Option<String>,
    },
    /// No applicable tool or configuration; reported as a passing result.
    Skipped {
        reason: String,
    },
}

impl CheckOutcome {
    pub fn pass(message: impl Into<String>) -> Self {
        Self::Pass {
            message: message.into(),
        }
    }

    pub fn fail(message: impl Into<String>, detail: Option<String>) -> Self {
        Self::Fail {
            message: message.into(),
            detail,
        }
    }

    pub fn skipped(reason: impl Into<String>) -> Self {
        Self::Skipped {
            reason: reason.into(),
        }
    }

    pub fn into_result(self, name: &str, level: GateLevel) -> GateResult {
        let (passed, skipped, message, detail) = match self {
            Self::Pass { message } => (true, false, message, None),
            Self::Fail { message, detail } => (false, false, message, detail),
            Self::Skipped { reason } => (true, true, reason, None),
        };
        GateResult {
            name: name.to_string(),
            level,
            passed,
            skipped,
            message,
            detail,
        }
    }
}

/// Aggregated results of one verification pass.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QualityReport {
    pub results: Vec<GateResult>,
    pub critical_failures: Vec<GateResult>,
    pub required_failures: Vec<GateResult>,
    pub recommended_failures: Vec<GateResult>,
    /// False if and only if some critical gate failed.
    pub passed: bool,
}

impl QualityReport {
    pub fn from_results(results: Vec<GateResult>) -> Self {
        let failures_at = |level: GateLevel| -> Vec<GateResult> {
            results
                .iter()
                .filter(|r| r.level == level && !r.passed)
                .cloned()
                .collect()
        };
        let critical_failures = failures_at(GateLevel::Critical);
        let required_failures = failures_at(GateLevel::Required);
        let recommended_failures = failures_at(GateLevel::Recommended);
        let passed = critical_failures.is_empty();
        Self {
            results,
            critical_failures,
            required_failures,
            recommended_failures,
            passed,
        }
    }

    /// Passed, but with non-blocking failures a reviewer should see.
    pub fn needs_review(&self) -> bool {
        self.passed && !(self.required_failures.is_empty() && self.recommended_failures.is_empty())
    }

    /// Percentage of gates that passed, 0 to 100.
    pub fn score(&self) -> f64 {
        if self.results.is_empty() {
            return 100.0;
        }
        let passed = self.results.iter().filter(|r| r.passed).count();
        passed as f64 * 100.0 / self.results.len() as f64
    }

    pub fn summary(&self) -> String {
        let passed = self.results.iter().filter(|r| r.passed).count();
        let skipped = self.results.iter().filter(|r| r.skipped).count();
        format!(
            "{passed}/{} checks passed ({skipped} skipped); {} critical, {} required, {} recommended failures",
            self.results.len(),
            self.critical_failures.len(),
            self.required_failures.len(),
            self.recommended_failures.len()
        )
    }

    /// Failure list fed back to the model on retry.
    pub fn feedback(&self) -> String {
        let mut lines = Vec::new();
        for (label, bucket) in [
            ("CRITICAL", &self.critical_failures),
            ("REQUIRED", &self.required_failures),
            ("RECOMMENDED", &self.recommended_failures),
        ] {
            for result in bucket {
                lines.push(format!("- [{label}] {}: {}", result.name, result.message));
                if let Some(detail) = &result.detail {
                    lines.push(format!("  {}", clip(detail.trim(), 500, "...")));
                }
            }
        }
        if lines.is_empty() {
            "All checks passed".to_string()
        } else {
            lines.join("\n")
        }
    }

    /// Markdown checklist used in pull request bodies.
    pub fn checklist(&self) -> String {
        let mut out = String::new();
        for result in &self.results {
            let mark = if result.skipped {
                "skipped"
            } else if result.passed {
                "pass"
            } else {
                "FAIL"
            };
            out.push_str(&format!(
                "- {} ({}): {} - {}\n",
                result.name,
                result.level.as_str(),
                mark,
                result.message
            ));
        }
        out
    }
}

/// Matched against lowercased paths.
const BREAKING_PATTERNS: [&str; 7] = [
    "migration",
    "schema",
    "package.json",
    "requirements.txt",
    "cargo.toml",
    "cargo.lock",
    ".env.example",
];

/// Changed files whose names suggest a potentially breaking change.
pub fn risky_files(changed: &[String]) -> Vec<String> {
    changed
        .iter()
        .filter(|file| {
            let lower = file.to_lowercase();
            BREAKING_PATTERNS.iter().any(|p| lower.contains(p))
        })
        .cloned()
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn result(name: &str, level: GateLevel, passed: bool) -> GateResult {
        if passed {
            CheckOutcome::pass("ok").into_result(name, level)
        } else {
            CheckOutcome::fail("broken", None).into_result(name, level)
        }
    }

    /// A required test failure is bucketed but does not fail the report.
    #[test]
    fn required_failure_does_not_block() {
        let report = QualityReport::from_results(vec![
            result("Security Check", GateLevel::Critical, true),
            result("Tests Pass", GateLevel::Required, false),
            result("Documentation", GateLevel::Recommended, true),
        ]);
        assert!(report.passed);
        assert!(report.needs_review());
        let names: Vec<&str> = report
            .required_failures
            .iter()
            .map(|r| r.name.as_str())
            .collect();
        assert_eq!(names, vec!["Tests Pass"]);
    }

    /// `passed` is false exactly when some critical gate failed.
    #[test]
    fn passed_iff_no_critical_failure() {
        let levels = [GateLevel::Critical, GateLevel::Required, GateLevel::Recommended];
        for mask in 0u8..8 {
            let results: Vec<GateResult> = levels
                .iter()
                .enumerate()
                .map(|(i, level)| result(&format!("g{i}"), *level, (mask & (1 << i)) == 0))
                .collect();
            let report = QualityReport::from_results(results);
            let critical_failed = (mask & 1) != 0;
            assert_eq!(report.passed, !critical_failed, "mask {mask:03b}");
        }
    }

    #[test]
    fn skipped_is_passing_but_distinguishable() {
        let skipped = CheckOutcome::skipped("no linter configured")
            .into_result("Lint Check", GateLevel::Required);
        assert!(skipped.passed);
        assert!(skipped.skipped);
        let report = QualityReport::from_results(vec![skipped]);
        assert!(report.summary().contains("1 skipped"));
        assert_eq!(report.score(), 100.0);
    }

    #[test]
    fn feedback_lists_failures_by_severity() {
        let report = QualityReport::from_results(vec![
            result("Lint Check", GateLevel::Required, false),
            result("Syntax Check", GateLevel::Critical, false),
        ]);
        let feedback = report.feedback();
        let critical = feedback.find("[CRITICAL] Syntax Check").expect("critical line");
        let required = feedback.find("[REQUIRED] Lint Check").expect("required line");
        assert!(critical < required);
        assert_eq!(report.score(), 0.0);
    }

    #[test]
    fn risky_files_match_breaking_patterns() {
        let changed = vec![
            "db/Migrations/001_init.sql".to_string(),
            "src/app.ts".to_string(),
            "package.json".to_string(),
        ];
        assert_eq!(
            risky_files(&changed),
            vec!["db/Migrations/001_init.sql".to_string(), "package.json".to_string()]
        );
    }

    #[test]
    fn cargo_manifest_changes_are_risky() {
        let changed = vec![
            "Cargo.toml".to_string(),
            "crates/core/Cargo.toml".to_string(),
            "Cargo.lock".to_string(),
            "src/cargo_helpers.rs".to_string(),
        ];
        assert_eq!(
            risky_files(&changed),
            vec![
                "Cargo.toml".to_string(),
                "crates/core/Cargo.toml".to_string(),
                "Cargo.lock".to_string(),
            ]
        );
    }
}
