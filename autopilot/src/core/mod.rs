//! Deterministic, pure logic shared by the autopilot.
//!
//! Core modules must be free of I/O side effects. They operate on in-memory
//! data structures and return deterministic outputs suitable for tests.

pub mod action;
pub mod budget;
pub mod conversation;
pub mod quality;
pub mod ranking;
pub mod sanitize;
pub mod text;
pub mod ticket;
pub mod types;
