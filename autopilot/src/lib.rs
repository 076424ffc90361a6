//! LLM-driven issue-to-pull-request autopilot.
//!
//! A work item (tracked issue or pasted ticket) is analyzed, turned into a few
//! ranked implementation strategies, and implemented by a model speaking a small
//! JSON action protocol. Each attempt is verified by tiered quality gates and a
//! combined AI review before a pull request is opened.
//!
//! - **[`core`]**: pure, deterministic logic (action parsing, ranking, budgets,
//!   quality aggregation, redaction). No I/O.
//! - **[`io`]**: side effects (git, processes, workspace files, model and
//!   tracker backends, prompts, config, ledgers).
//!
//! [`orchestrator`] composes the two per work item; [`agent`] owns the
//! conversation loop it drives.

pub mod actions;
pub mod agent;
pub mod analyze;
pub mod checkpoint;
pub mod core;
pub mod exit_codes;
pub mod gates;
pub mod governor;
pub mod incremental;
pub mod io;
pub mod logging;
pub mod orchestrator;
pub mod review;
pub mod strategy;
#[cfg(any(test, feature = "test-support"))]
pub mod test_support;
