//! Core of caretaker
//!
//! This crate contains:
//! - Rule evaluation against OS lifecycle events
//! - Remediation primitives (restart-with-poll, escalating-quit)
//! - The single-flight maintenance scheduler
//! - Notification delivery with permission handling
//! - The `Reactor` root that wires them to host collaborators

mod actions;
mod catalog;
mod events;
mod notify;
mod reactor;
mod report;
mod rules;
mod schedule;

pub use actions::*;
pub use catalog::*;
pub use events::*;
pub use notify::NotificationGateway;
pub use reactor::*;
pub use report::*;
pub use rules::*;
pub use schedule::*;
