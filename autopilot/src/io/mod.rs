//! Side-effecting adapters: git, processes, the workspace, the model and persisted state.

pub mod config;
pub mod git;
pub mod ledger;
pub mod model;
pub mod outcome_log;
pub mod process;
pub mod prompt;
pub mod tools;
pub mod tracker;
pub mod workspace;
