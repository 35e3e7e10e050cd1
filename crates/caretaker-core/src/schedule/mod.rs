//! Periodic maintenance scheduling
//!
//! A single coordinator task owns the run state. Ticks, wake events and
//! user requests are messages to it, so two callers can never both observe
//! "idle" and start overlapping runs.

mod due;
mod engine;
mod task;

pub use due::*;
pub use engine::*;
pub use task::*;
