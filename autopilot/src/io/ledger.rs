//! Per-day usage ledger (`usage.json`) shared across invocations.
//!
//! The file maps `YYYY-MM-DD` to usage counters. It is read leniently: a
//! missing or corrupt ledger counts as zero usage. There is no file locking;
//! concurrent autopilot processes can lose each other's updates.

use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::core::types::Usage;
use crate::io::config::write_atomic;

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct UsageLedger {
    days: BTreeMap<String, Usage>,
}

impl UsageLedger {
    pub fn day(&self, date: &str) -> Usage {
        self.days.get(date).copied().unwrap_or_default()
    }

    pub fn record(&mut self, date: &str, tokens: u64, cost: f64) {
        self.days
            .entry(date.to_string())
            .or_default()
            .record(tokens, cost);
    }

    /// The most recent `days` entries, newest first.
    pub fn recent(&self, days: usize) -> Vec<(String, Usage)> {
        self.days
            .iter()
            .rev()
            .take(days)
            .map(|(date, usage)| (date.clone(), *usage))
            .collect()
    }
}

/// Load the ledger; missing or unreadable data yields an empty ledger.
pub fn load_ledger(path: &Path) -> UsageLedger {
    let contents = match fs::read_to_string(path) {
        Ok(contents) => contents,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return UsageLedger::default(),
        Err(e) => {
            warn!(path = %path.display(), err = %e, "usage ledger unreadable, treating as empty");
            return UsageLedger::default();
        }
    };
    match serde_json::from_str(&contents) {
        Ok(ledger) => ledger,
        Err(e) => {
            warn!(path = %path.display(), err = %e, "usage ledger corrupt, treating as empty");
            UsageLedger::default()
        }
    }
}

pub fn write_ledger(path: &Path, ledger: &UsageLedger) -> Result<()> {
    let mut buf = serde_json::to_string_pretty(ledger).context("serialize usage ledger")?;
    buf.push('\n');
    write_atomic(path, &buf)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_and_corrupt_ledgers_are_empty() {
        let temp = tempfile::tempdir().expect("tempdir");
        let path = temp.path().join("usage.json");
        assert_eq!(load_ledger(&path), UsageLedger::default());
        fs::write(&path, "{not json").expect("write");
        assert_eq!(load_ledger(&path), UsageLedger::default());
    }

    #[test]
    fn records_accumulate_per_day_and_persist() {
        let temp = tempfile::tempdir().expect("tempdir");
        let path = temp.path().join("state/usage.json");
        let mut ledger = UsageLedger::default();
        ledger.record("2026-01-01", 100, 0.5);
        ledger.record("2026-01-01", 50, 0.25);
        ledger.record("2026-01-02", 10, 0.1);
        write_ledger(&path, &ledger).expect("write");

        let loaded = load_ledger(&path);
        let day = loaded.day("2026-01-01");
        assert_eq!(day.tokens, 150);
        assert_eq!(day.calls, 2);
        assert!((day.cost - 0.75).abs() < 1e-9);
        let recent: Vec<String> = loaded.recent(5).into_iter().map(|(d, _)| d).collect();
        assert_eq!(recent, vec!["2026-01-02", "2026-01-01"]);

        let raw: serde_json::Value =
            serde_json::from_str(&fs::read_to_string(&path).expect("read")).expect("json");
        assert_eq!(raw["2026-01-02"]["api_calls"], 1);
    }
}
