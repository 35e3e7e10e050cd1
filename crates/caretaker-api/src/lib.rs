//! Domain types shared across caretaker
//!
//! This crate defines the vocabulary used between configuration, the host
//! adapters and the core:
//! - Application descriptors
//! - OS lifecycle events
//! - Rules and their remediation actions
//! - Maintenance schedule policy

mod events;
mod types;

pub use events::*;
pub use types::*;
