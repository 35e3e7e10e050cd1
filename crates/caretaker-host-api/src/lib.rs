//! Collaborator trait interfaces for caretaker
//!
//! This crate defines the boundary between the reactor core and the
//! platform: process lookup and termination, shell command execution,
//! user notifications and OS lifecycle events. It contains no platform
//! code itself; scripted mocks are provided for tests.

mod command;
mod mock;
mod process;
mod traits;

pub use command::*;
pub use mock::*;
pub use process::*;
pub use traits::*;
