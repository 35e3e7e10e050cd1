//! Shared utilities for caretaker
//!
//! This crate provides:
//! - ID types (RuleId, AppKey, RunId)
//! - Time utilities (mockable wall clock, time-of-day)
//! - Default paths for config, data, and log directories

mod ids;
mod paths;
mod time;

pub use ids::*;
pub use paths::*;
pub use time::*;
