//! Append-only implementation outcome log (`implementations.jsonl`).
//!
//! One JSON object per line. Records are never rewritten; insights are
//! computed by reading the whole log.

use std::collections::HashMap;
use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::Path;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::core::types::ImplementationOutcome;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OutcomeRecord {
    /// RFC 3339.
    pub timestamp: String,
    pub project: String,
    pub issue_number: u64,
    pub issue_title: String,
    #[serde(default)]
    pub issue_labels: Vec<String>,
    pub outcome: ImplementationOutcome,
}

pub fn append_outcome(path: &Path, record: &OutcomeRecord) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)
            .with_context(|| format!("create directory {}", parent.display()))?;
    }
    let mut line = serde_json::to_string(record).context("serialize outcome record")?;
    line.push('\n');
    let mut file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .with_context(|| format!("open {}", path.display()))?;
    file.write_all(line.as_bytes())
        .with_context(|| format!("append {}", path.display()))?;
    debug!(issue = record.issue_number, "outcome recorded");
    Ok(())
}

/// Read every parseable record; malformed lines are skipped with a warning.
pub fn load_outcomes(path: &Path) -> Result<Vec<OutcomeRecord>> {
    if !path.exists() {
        return Ok(Vec::new());
    }
    let contents = fs::read_to_string(path).with_context(|| format!("read {}", path.display()))?;
    let mut records = Vec::new();
    for (idx, line) in contents.lines().enumerate() {
        if line.trim().is_empty() {
            continue;
        }
        match serde_json::from_str(line) {
            Ok(record) => records.push(record),
            Err(e) => warn!(line = idx + 1, err = %e, "skipping malformed outcome record"),
        }
    }
    Ok(records)
}

/// Aggregates over one project's outcome history.
#[derive(Debug, Clone, PartialEq)]
pub struct ProjectInsights {
    pub total: usize,
    pub success_rate: f64,
    pub avg_attempts: f64,
    pub avg_cost: f64,
    pub avg_duration_secs: f64,
    /// Most frequent error messages, most common first (top 5).
    pub common_failures: Vec<(String, usize)>,
    /// Strategies behind successful runs, most common first (top 3).
    pub best_strategies: Vec<(String, usize)>,
}

pub fn project_insights(records: &[OutcomeRecord], project: &str) -> Option<ProjectInsights> {
    let scoped: Vec<&OutcomeRecord> = records.iter().filter(|r| r.project == project).collect();
    if scoped.is_empty() {
        return None;
    }
    let total = scoped.len();
    let n = total as f64;
    let successes = scoped.iter().filter(|r| r.outcome.success).count();

    let mut failures: HashMap<&str, usize> = HashMap::new();
    let mut strategies: HashMap<&str, usize> = HashMap::new();
    for record in &scoped {
        for err in &record.outcome.error_messages {
            *failures.entry(err.as_str()).or_default() += 1;
        }
        if record.outcome.success
            && let Some(strategy) = &record.outcome.strategy_used
        {
            *strategies.entry(strategy.as_str()).or_default() += 1;
        }
    }

    Some(ProjectInsights {
        total,
        success_rate: successes as f64 / n,
        avg_attempts: scoped.iter().map(|r| f64::from(r.outcome.attempts)).sum::<f64>() / n,
        avg_cost: scoped.iter().map(|r| r.outcome.cost).sum::<f64>() / n,
        avg_duration_secs: scoped.iter().map(|r| r.outcome.duration_secs).sum::<f64>() / n,
        common_failures: top_counts(failures, 5),
        best_strategies: top_counts(strategies, 3),
    })
}

/// Hints for a new issue drawn from past issues sharing its labels.
pub fn label_suggestions(records: &[OutcomeRecord], labels: &[String]) -> Vec<String> {
    let mut out = Vec::new();
    for label in labels {
        let related: Vec<&OutcomeRecord> = records
            .iter()
            .filter(|r| r.issue_labels.iter().any(|l| l == label))
            .collect();
        if related.len() < 2 {
            continue;
        }
        let successes = related.iter().filter(|r| r.outcome.success).count();
        let rate = successes as f64 / related.len() as f64;
        if rate < 0.5 {
            out.push(format!(
                "Issues labelled '{label}' succeeded {:.0}% of the time; consider clarifying scope first",
                rate * 100.0
            ));
        }
        let mut strategies: HashMap<&str, usize> = HashMap::new();
        for record in related.iter().filter(|r| r.outcome.success) {
            if let Some(s) = &record.outcome.strategy_used {
                *strategies.entry(s.as_str()).or_default() += 1;
            }
        }
        if let Some((strategy, _)) = top_counts(strategies, 1).into_iter().next() {
            out.push(format!(
                "For '{label}' issues, '{strategy}' has worked best"
            ));
        }
    }
    out
}

fn top_counts(counts: HashMap<&str, usize>, limit: usize) -> Vec<(String, usize)> {
    let mut list: Vec<(String, usize)> = counts
        .into_iter()
        .map(|(k, v)| (k.to_string(), v))
        .collect();
    list.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
    list.truncate(limit);
    list
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(project: &str, success: bool, strategy: &str, errors: &[&str]) -> OutcomeRecord {
        OutcomeRecord {
            timestamp: "2026-01-01T00:00:00Z".to_string(),
            project: project.to_string(),
            issue_number: 1,
            issue_title: "t".to_string(),
            issue_labels: vec!["ui".to_string()],
            outcome: ImplementationOutcome {
                success,
                attempts: if success { 1 } else { 3 },
                cost: 1.0,
                duration_secs: 10.0,
                strategy_used: Some(strategy.to_string()),
                error_messages: errors.iter().map(|e| (*e).to_string()).collect(),
                ..ImplementationOutcome::default()
            },
        }
    }

    #[test]
    fn append_then_load_skips_malformed_lines() {
        let temp = tempfile::tempdir().expect("tempdir");
        let path = temp.path().join("log/implementations.jsonl");
        append_outcome(&path, &record("shop", true, "minimal", &[])).expect("append");
        fs::OpenOptions::new()
            .append(true)
            .open(&path)
            .expect("open")
            .write_all(b"garbage\n")
            .expect("write");
        append_outcome(&path, &record("shop", false, "big", &["boom"])).expect("append");
        let records = load_outcomes(&path).expect("load");
        assert_eq!(records.len(), 2);
        assert!(!records[1].outcome.success);
    }

    #[test]
    fn insights_aggregate_one_project() {
        let records = vec![
            record("shop", true, "minimal", &[]),
            record("shop", true, "minimal", &[]),
            record("shop", false, "big", &["tests failed", "no commits"]),
            record("shop", false, "big", &["tests failed"]),
            record("other", true, "x", &[]),
        ];
        let insights = project_insights(&records, "shop").expect("insights");
        assert_eq!(insights.total, 4);
        assert!((insights.success_rate - 0.5).abs() < 1e-9);
        assert!((insights.avg_attempts - 2.0).abs() < 1e-9);
        assert_eq!(insights.common_failures[0], ("tests failed".to_string(), 2));
        assert_eq!(insights.best_strategies, vec![("minimal".to_string(), 2)]);
        assert!(project_insights(&records, "none").is_none());
    }

    #[test]
    fn label_suggestions_flag_low_success_labels() {
        let records = vec![
            record("shop", false, "big", &["x"]),
            record("shop", false, "big", &["x"]),
            record("shop", true, "minimal", &[]),
        ];
        let hints = label_suggestions(&records, &["ui".to_string()]);
        assert!(hints[0].contains("33%"));
        assert!(hints[1].contains("minimal"));
    }
}
