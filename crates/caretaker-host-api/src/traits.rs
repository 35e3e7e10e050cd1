//! Collaborator traits

use async_trait::async_trait;
use caretaker_api::{AppDescriptor, OsEvent, PermissionStatus};
use std::path::Path;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::mpsc;

use crate::{CommandOutput, CommandResult, ProcessInfo};

/// Errors from host operations
#[derive(Debug, Error)]
pub enum HostError {
    #[error("Launch failed: {0}")]
    LaunchFailed(String),

    #[error("Signal failed: {0}")]
    SignalFailed(String),

    #[error("Event source already started")]
    AlreadyStarted,

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Internal error: {0}")]
    Internal(String),
}

pub type HostResult<T> = Result<T, HostError>;

/// Errors from notification delivery
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum NotifyError {
    #[error("Notification permission denied")]
    PermissionDenied,

    #[error("Notification delivery failed: {0}")]
    Delivery(String),
}

pub type NotifyResult<T> = Result<T, NotifyError>;

/// Looks up, terminates and launches processes
#[async_trait]
pub trait ProcessDirectory: Send + Sync {
    /// Snapshot of the running processes
    fn running(&self) -> Vec<ProcessInfo>;

    /// Whether `pid` still refers to a live process
    fn is_alive(&self, pid: u32) -> bool;

    /// Running instances of `app`
    fn instances(&self, app: &AppDescriptor) -> Vec<ProcessInfo> {
        self.running()
            .into_iter()
            .filter(|p| p.is_instance_of(app))
            .collect()
    }

    fn is_running(&self, app: &AppDescriptor) -> bool {
        !self.instances(app).is_empty()
    }

    /// Ask `process` to exit. Returns true once the process is confirmed gone.
    async fn terminate(&self, process: &ProcessInfo, force: bool) -> bool;

    /// Open `app` from its location
    async fn launch(&self, app: &AppDescriptor) -> HostResult<()>;

    /// Derive a bundle identifier from an application location
    fn resolve_bundle_id(&self, location: &Path) -> Option<String> {
        Some(location.to_string_lossy().into_owned())
    }
}

/// Runs external command lines with a hard deadline
#[async_trait]
pub trait CommandRunner: Send + Sync {
    /// Run `cmdline`. On timeout the command is killed and
    /// `CommandError::TimedOut` is returned with any partial output.
    async fn run(&self, cmdline: &str, timeout: Duration) -> CommandResult<CommandOutput>;
}

/// OS user-notification service
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn authorization_status(&self) -> PermissionStatus;

    /// Prompt for permission. The result is observed by re-reading
    /// `authorization_status`.
    async fn request_authorization(&self);

    async fn post(&self, title: &str, body: &str) -> NotifyResult<()>;
}

/// Source of OS lifecycle events
#[async_trait]
pub trait EventSource: Send + Sync {
    /// Install observers and return the event stream
    async fn start(&self) -> HostResult<mpsc::UnboundedReceiver<OsEvent>>;

    /// Remove all observers. The stream ends once this returns.
    async fn stop(&self);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn notify_error_display() {
        assert_eq!(
            NotifyError::PermissionDenied.to_string(),
            "Notification permission denied"
        );
    }
}
