//! Resource governor: token and cost accounting with budget enforcement.
//!
//! Usage is tracked per call, per issue and per calendar day. The per-day
//! totals live in the usage ledger and survive across invocations; the
//! per-issue totals reset whenever tracking starts for a new issue.

use std::fmt;
use std::path::PathBuf;

use anyhow::Result;
use tracing::{debug, info, warn};

use crate::core::budget::{
    AlertLevel, BudgetLimits, ModelPricing, QuotaBreach, daily_alert, estimate_issue_cost,
    pricing_for,
};
use crate::core::types::{CostEstimate, Usage};
use crate::io::ledger::{UsageLedger, load_ledger, write_ledger};

/// A budget ceiling stopped further spend on the current issue.
///
/// Recover with `anyhow::Error::downcast_ref::<QuotaExceededError>()`.
#[derive(Debug, Clone, PartialEq)]
pub struct QuotaExceededError {
    pub operation: String,
    pub breach: QuotaBreach,
}

impl fmt::Display for QuotaExceededError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "quota exceeded before {}: {}", self.operation, self.breach)
    }
}

impl std::error::Error for QuotaExceededError {}

/// Current calendar day in local time, `YYYY-MM-DD`.
pub fn local_date() -> String {
    chrono::Local::now().format("%Y-%m-%d").to_string()
}

pub struct ResourceGovernor {
    limits: BudgetLimits,
    pricing: ModelPricing,
    ledger_path: PathBuf,
    ledger: UsageLedger,
    clock: fn() -> String,
    issue_number: Option<u64>,
    issue: Usage,
    session: Usage,
    alerted: Option<AlertLevel>,
}

impl ResourceGovernor {
    /// Load the ledger at `ledger_path`; missing or corrupt data counts as zero usage.
    pub fn new(model: &str, limits: BudgetLimits, ledger_path: impl Into<PathBuf>) -> Self {
        let ledger_path = ledger_path.into();
        let ledger = load_ledger(&ledger_path);
        Self {
            limits,
            pricing: pricing_for(model),
            ledger_path,
            ledger,
            clock: local_date,
            issue_number: None,
            issue: Usage::default(),
            session: Usage::default(),
            alerted: None,
        }
    }

    /// Replace the date source. Day rollover is detected by comparing its output.
    pub fn with_clock(mut self, clock: fn() -> String) -> Self {
        self.clock = clock;
        self
    }

    pub fn pricing(&self) -> ModelPricing {
        self.pricing
    }

    /// Reset per-issue counters.
    pub fn start_issue(&mut self, number: u64) {
        self.issue_number = Some(number);
        self.issue = Usage::default();
        debug!(issue = number, "issue usage tracking started");
    }

    pub fn issue_usage(&self) -> Usage {
        self.issue
    }

    pub fn session_usage(&self) -> Usage {
        self.session
    }

    pub fn daily_usage(&self) -> Usage {
        self.ledger.day(&(self.clock)())
    }

    /// The first ceiling `estimated_tokens` more would cross, if any.
    pub fn quota_breach(&self, estimated_tokens: u64) -> Option<QuotaBreach> {
        let estimated_cost = self.pricing.blended_cost(estimated_tokens);
        crate::core::budget::check_quota(
            &self.limits,
            &self.daily_usage(),
            &self.issue,
            estimated_tokens,
            estimated_cost,
        )
        .err()
    }

    /// True when `estimated_tokens` more fit under every ceiling.
    pub fn check_quota(&self, operation: &str, estimated_tokens: u64) -> bool {
        match self.quota_breach(estimated_tokens) {
            None => true,
            Some(breach) => {
                warn!(operation, breach = %breach, "quota check denied");
                false
            }
        }
    }

    /// Like [`check_quota`](Self::check_quota), as an error callers can propagate.
    pub fn ensure_quota(&self, operation: &str, estimated_tokens: u64) -> Result<()> {
        match self.quota_breach(estimated_tokens) {
            None => Ok(()),
            Some(breach) => {
                warn!(operation, breach = %breach, "quota check denied");
                Err(QuotaExceededError {
                    operation: operation.to_string(),
                    breach,
                }
                .into())
            }
        }
    }

    /// Record one model call at every scope and persist the daily ledger.
    ///
    /// Returns the call's cost.
    pub fn record_usage(&mut self, input_tokens: u64, output_tokens: u64) -> Result<f64> {
        let tokens = input_tokens + output_tokens;
        let cost = self.pricing.cost(input_tokens, output_tokens);
        let today = (self.clock)();
        self.ledger.record(&today, tokens, cost);
        self.issue.record(tokens, cost);
        self.session.record(tokens, cost);
        write_ledger(&self.ledger_path, &self.ledger)?;
        debug!(
            tokens,
            cost,
            issue_tokens = self.issue.tokens,
            daily_tokens = self.ledger.day(&today).tokens,
            "usage recorded"
        );
        self.emit_alert(&today);
        Ok(cost)
    }

    pub fn get_cost_estimate(&self, context_size: usize, complexity: u8) -> CostEstimate {
        estimate_issue_cost(&self.pricing, context_size, complexity)
    }

    /// Daily usage for the most recent `days` ledger entries, newest first.
    pub fn daily_report(&self, days: usize) -> Vec<(String, Usage)> {
        self.ledger.recent(days)
    }

    fn emit_alert(&mut self, today: &str) {
        let level = daily_alert(&self.limits, &self.ledger.day(today));
        if level <= self.alerted {
            return;
        }
        self.alerted = level;
        let daily = self.ledger.day(today);
        match level {
            Some(AlertLevel::Critical) => warn!(
                tokens = daily.tokens,
                cost = daily.cost,
                "daily usage above 90% of budget"
            ),
            Some(AlertLevel::Warning) => info!(
                tokens = daily.tokens,
                cost = daily.cost,
                "daily usage above 80% of budget"
            ),
            None => {}
        }
    }
}
