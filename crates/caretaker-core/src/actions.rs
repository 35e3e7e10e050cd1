//! Remediation primitives: restart-with-poll and escalating-quit

use caretaker_api::AppDescriptor;
use caretaker_host_api::{CommandError, CommandRunner, ProcessDirectory, ProcessInfo};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::time::Instant;
use tracing::{debug, info, warn};

/// Errors from remediation actions
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ActionError {
    /// The target could not be opened. Not retried.
    #[error("Failed to launch {app}: {reason}")]
    LaunchFailed { app: String, reason: String },

    /// The target did not exit within the restart wait bound
    #[error("{app} still running after {}s", .waited.as_secs())]
    StillRunning { app: String, waited: Duration },

    /// Every quit step was attempted and the process is still alive
    #[error("{name} (pid {pid}) survived terminate, force-terminate and kill")]
    QuitEscalationExhausted { name: String, pid: u32 },

    /// An external command exceeded its deadline
    #[error("Command '{command}' timed out after {}s", .timeout.as_secs())]
    CommandTimedOut { command: String, timeout: Duration },
}

pub type ActionResult<T> = Result<T, ActionError>;

/// Step of the escalation ladder that took effect
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QuitStep {
    Graceful,
    Forced,
    Killed,
}

/// Timing knobs for the executor
#[derive(Debug, Clone, Copy)]
pub struct ExecutorSettings {
    pub restart_poll: Duration,
    pub restart_max_wait: Duration,
    pub command_timeout: Duration,
}

impl Default for ExecutorSettings {
    fn default() -> Self {
        Self {
            restart_poll: Duration::from_millis(200),
            restart_max_wait: Duration::from_secs(30),
            command_timeout: Duration::from_secs(600),
        }
    }
}

/// Executes remediation primitives against the process directory.
///
/// Both primitives are idempotent and report nothing themselves; callers
/// turn the returned result into exactly one outcome report.
#[derive(Clone)]
pub struct ActionExecutor {
    directory: Arc<dyn ProcessDirectory>,
    runner: Arc<dyn CommandRunner>,
    settings: ExecutorSettings,
}

impl ActionExecutor {
    pub fn new(
        directory: Arc<dyn ProcessDirectory>,
        runner: Arc<dyn CommandRunner>,
        settings: ExecutorSettings,
    ) -> Self {
        Self {
            directory,
            runner,
            settings,
        }
    }

    pub fn directory(&self) -> &Arc<dyn ProcessDirectory> {
        &self.directory
    }

    pub fn runner(&self) -> &Arc<dyn CommandRunner> {
        &self.runner
    }

    pub fn settings(&self) -> ExecutorSettings {
        self.settings
    }

    /// Wait until `target` is no longer running, then launch it once.
    pub async fn restart_with_poll(&self, target: &AppDescriptor) -> ActionResult<()> {
        let started = Instant::now();
        let deadline = started + self.settings.restart_max_wait;

        while self.directory.is_running(target) {
            if Instant::now() >= deadline {
                return Err(ActionError::StillRunning {
                    app: target.display_name.clone(),
                    waited: started.elapsed(),
                });
            }
            debug!(app = %target, "Waiting for previous instance to exit");
            tokio::time::sleep(self.settings.restart_poll).await;
        }

        self.launch(target).await
    }

    /// Launch `target` once
    pub async fn launch(&self, target: &AppDescriptor) -> ActionResult<()> {
        self.directory
            .launch(target)
            .await
            .map_err(|e| ActionError::LaunchFailed {
                app: target.display_name.clone(),
                reason: e.to_string(),
            })?;
        info!(app = %target, "Launched");
        Ok(())
    }

    /// Quit every running process matching `predicate`.
    ///
    /// Returns one result per matched process; an empty vec means nothing
    /// matched.
    pub async fn escalating_quit<F>(
        &self,
        predicate: F,
    ) -> Vec<(ProcessInfo, ActionResult<QuitStep>)>
    where
        F: Fn(&ProcessInfo) -> bool,
    {
        let targets: Vec<ProcessInfo> = self
            .directory
            .running()
            .into_iter()
            .filter(|p| predicate(p))
            .collect();

        let mut results = Vec::with_capacity(targets.len());
        for process in targets {
            let result = self.quit_process(&process).await;
            results.push((process, result));
        }
        results
    }

    async fn quit_process(&self, process: &ProcessInfo) -> ActionResult<QuitStep> {
        if self.directory.terminate(process, false).await {
            debug!(pid = process.pid, name = %process.name, "Quit gracefully");
            return Ok(QuitStep::Graceful);
        }

        if self.directory.terminate(process, true).await {
            debug!(pid = process.pid, name = %process.name, "Force-terminated");
            return Ok(QuitStep::Forced);
        }

        let command = format!("kill -9 {}", process.pid);
        match self
            .runner
            .run(&command, self.settings.command_timeout)
            .await
        {
            Ok(_) => debug!(pid = process.pid, "Kill issued"),
            Err(CommandError::TimedOut { timeout, .. }) => {
                return Err(ActionError::CommandTimedOut { command, timeout });
            }
            Err(e) => warn!(pid = process.pid, error = %e, "Kill command failed"),
        }

        if self.directory.is_alive(process.pid) {
            warn!(pid = process.pid, name = %process.name, "Process survived kill");
            return Err(ActionError::QuitEscalationExhausted {
                name: process.name.clone(),
                pid: process.pid,
            });
        }

        Ok(QuitStep::Killed)
    }
}
