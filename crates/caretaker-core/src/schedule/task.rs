//! The maintenance task: package-update check and upgrade

use caretaker_config::MaintenanceConfig;
use caretaker_host_api::{CommandError, CommandRunner};
use caretaker_store::LogSource;
use std::fmt;
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::Reporter;

/// Why a maintenance run was started
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunKind {
    /// Due-ness check on a tick or wake
    Scheduled,
    /// User asked to check now
    Manual,
    /// User asked to upgrade
    Upgrade,
}

impl RunKind {
    /// Whether completion of this run advances `last_completed_at`
    pub fn records_completion(self) -> bool {
        matches!(self, RunKind::Scheduled | RunKind::Manual)
    }
}

impl fmt::Display for RunKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            RunKind::Scheduled => "scheduled",
            RunKind::Manual => "manual",
            RunKind::Upgrade => "upgrade",
        };
        f.write_str(s)
    }
}

/// Result of a completed maintenance run
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TaskOutcome {
    /// The check listed pending updates
    UpdatesAvailable(Vec<String>),
    /// The check found nothing to update
    UpToDate,
    /// The upgrade command finished
    Upgraded { output: String },
    /// A command exceeded its deadline and was killed
    TimedOut { command: String },
    /// A command failed to start or exited unsuccessfully
    Failed { command: String, message: String },
}

impl TaskOutcome {
    /// One-line summary persisted with the schedule snapshot
    pub fn summary(&self) -> String {
        match self {
            TaskOutcome::UpdatesAvailable(pending) => {
                format!("{} updates available", pending.len())
            }
            TaskOutcome::UpToDate => "No updates".to_string(),
            TaskOutcome::Upgraded { .. } => "Upgrade finished".to_string(),
            TaskOutcome::TimedOut { command } => format!("'{}' timed out", command),
            TaskOutcome::Failed { command, .. } => format!("'{}' failed", command),
        }
    }
}

/// Run the package check: optional refresh, then the check command.
pub async fn run_check(runner: Arc<dyn CommandRunner>, config: MaintenanceConfig) -> TaskOutcome {
    if let Some(refresh) = &config.refresh_command {
        debug!(command = %refresh, "Refreshing package metadata");
        if let Err(e) = runner.run(refresh, config.timeout).await {
            return command_failure(refresh, e);
        }
    }

    debug!(command = %config.check_command, "Checking for updates");
    match runner.run(&config.check_command, config.timeout).await {
        Ok(output) => {
            let pending = output.lines();
            if pending.is_empty() {
                TaskOutcome::UpToDate
            } else {
                TaskOutcome::UpdatesAvailable(pending)
            }
        }
        Err(e) => command_failure(&config.check_command, e),
    }
}

/// Run the upgrade command
pub async fn run_upgrade(runner: Arc<dyn CommandRunner>, config: MaintenanceConfig) -> TaskOutcome {
    info!(command = %config.upgrade_command, "Upgrading packages");
    match runner.run(&config.upgrade_command, config.timeout).await {
        Ok(output) => TaskOutcome::Upgraded {
            output: output.stdout,
        },
        Err(e) => command_failure(&config.upgrade_command, e),
    }
}

fn command_failure(command: &str, err: CommandError) -> TaskOutcome {
    warn!(command, error = %err, "Maintenance command failed");
    match err {
        CommandError::TimedOut { .. } => TaskOutcome::TimedOut {
            command: command.to_string(),
        },
        CommandError::ExecFailed { message, .. } => TaskOutcome::Failed {
            command: command.to_string(),
            message,
        },
    }
}

/// Turn an accepted outcome into log lines and notifications
pub async fn report_outcome(reporter: &Reporter, kind: RunKind, outcome: &TaskOutcome) {
    let log = |message: &str| reporter.log(LogSource::Maintenance, message);

    match outcome {
        TaskOutcome::UpdatesAvailable(pending) => {
            let body = format!(
                "Found {} packages to update: {}",
                pending.len(),
                pending.join(", ")
            );
            log(&body);
            reporter.notify("Updates Available", &body).await;
        }
        TaskOutcome::UpToDate => {
            if kind == RunKind::Manual {
                log("No updates found");
                reporter
                    .notify("No Updates", "All packages are up to date")
                    .await;
            } else {
                debug!("No updates found");
            }
        }
        TaskOutcome::Upgraded { output } => {
            let upgraded: Vec<&str> = output
                .lines()
                .map(str::trim)
                .filter(|l| !l.is_empty())
                .collect();
            let body = if upgraded.is_empty() {
                "Upgrade finished".to_string()
            } else {
                format!("Upgrade finished: {}", upgraded.join("; "))
            };
            log(&body);
            reporter.notify("Upgrade Finished", "Packages have been upgraded").await;
        }
        TaskOutcome::TimedOut { command } => {
            let title = if kind == RunKind::Upgrade {
                "Upgrade Timed Out"
            } else {
                "Update Check Timed Out"
            };
            let body = format!("'{}' did not finish in time", command);
            log(&body);
            reporter.notify(title, &body).await;
        }
        TaskOutcome::Failed { command, message } => {
            log(&format!("'{}' failed: {}", command, message));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use caretaker_host_api::{MockCommandRunner, MockReply};
    use std::time::Duration;

    fn config() -> MaintenanceConfig {
        MaintenanceConfig {
            refresh_command: Some("pkg refresh".into()),
            check_command: "pkg outdated".into(),
            upgrade_command: "pkg upgrade".into(),
            timeout: Duration::from_secs(60),
            ..MaintenanceConfig::default()
        }
    }

    #[tokio::test]
    async fn check_reports_pending_lines() {
        let runner = Arc::new(MockCommandRunner::new());
        runner.reply("pkg outdated", MockReply::stdout("git\n\nnode\n"));

        let outcome = run_check(runner.clone(), config()).await;
        assert_eq!(
            outcome,
            TaskOutcome::UpdatesAvailable(vec!["git".into(), "node".into()])
        );
        assert_eq!(runner.calls(), vec!["pkg refresh", "pkg outdated"]);
    }

    #[tokio::test]
    async fn empty_check_is_up_to_date() {
        let runner = Arc::new(MockCommandRunner::new());
        let mut config = config();
        config.refresh_command = None;

        assert_eq!(run_check(runner.clone(), config).await, TaskOutcome::UpToDate);
        assert_eq!(runner.calls(), vec!["pkg outdated"]);
    }

    #[tokio::test(start_paused = true)]
    async fn refresh_timeout_skips_check() {
        let runner = Arc::new(MockCommandRunner::new());
        runner.reply(
            "pkg refresh",
            MockReply::stdout("").delayed(Duration::from_secs(120)),
        );

        let outcome = run_check(runner.clone(), config()).await;
        assert_eq!(
            outcome,
            TaskOutcome::TimedOut {
                command: "pkg refresh".into()
            }
        );
        assert_eq!(runner.calls_starting_with("pkg outdated"), 0);
    }

    #[tokio::test]
    async fn failing_check_is_failed() {
        let runner = Arc::new(MockCommandRunner::new());
        runner.reply("pkg outdated", MockReply::failure("no network"));

        let outcome = run_check(runner, config()).await;
        assert!(matches!(outcome, TaskOutcome::Failed { .. }));
    }

    #[test]
    fn only_checks_record_completion() {
        assert!(RunKind::Scheduled.records_completion());
        assert!(RunKind::Manual.records_completion());
        assert!(!RunKind::Upgrade.records_completion());
    }
}
