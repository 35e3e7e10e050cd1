//! Linux host adapter for caretaker
//!
//! Provides:
//! - A process directory over /proc with SIGTERM/SIGKILL termination
//! - Detached application launch, including .desktop entries
//! - Shell command execution with process-group timeouts
//! - Desktop notifications via notify-send
//! - Process exit and resume-from-suspend detection by polling

mod command;
mod events;
mod notify;
mod process;

pub use command::*;
pub use events::*;
pub use notify::*;
pub use process::*;
