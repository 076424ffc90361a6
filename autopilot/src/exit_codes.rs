//! Stable exit codes for autopilot CLI commands.

/// Command succeeded (pull request opened, report printed).
pub const OK: i32 = 0;
/// Invalid input or configuration, or an infrastructure error.
pub const INVALID: i32 = 1;
/// Every strategy was exhausted and nothing was published.
pub const FAILED: i32 = 2;
/// The work item was too unclear; clarification was requested instead.
pub const CLARIFICATION: i32 = 3;
/// A daily or per-issue budget ceiling stopped the run.
pub const QUOTA: i32 = 4;
