//! Maintenance coordinator

use caretaker_api::ScheduleConfig;
use caretaker_config::MaintenanceConfig;
use caretaker_host_api::CommandRunner;
use caretaker_store::ScheduleSnapshot;
use caretaker_util::RunId;
use chrono::{DateTime, Local};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::{RunKind, TaskOutcome, is_due, report_outcome, run_check, run_upgrade};
use crate::{CoreEvent, Reporter};

/// Store key of the package-update check
pub const MAINTENANCE_TASK: &str = "package-check";

/// Interval between due-ness checks
pub const SCHEDULE_TICK: Duration = Duration::from_secs(60);

/// Reply to a start request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunRequest {
    Started(RunId),
    /// Another run is in flight; nothing was started
    AlreadyRunning(RunKind),
    /// The coordinator has shut down
    Unavailable,
}

/// Snapshot of the coordinator state
#[derive(Debug, Clone)]
pub struct TaskStatus {
    pub running: Option<RunKind>,
    pub last_completed_at: Option<DateTime<Local>>,
    pub schedule: ScheduleConfig,
    /// Whether a scheduled run would start on the next tick
    pub due: bool,
}

impl TaskStatus {
    pub fn is_running(&self) -> bool {
        self.running.is_some()
    }
}

enum Command {
    TryStart,
    Start {
        kind: RunKind,
        reply: oneshot::Sender<RunRequest>,
    },
    UpdatePolicy(MaintenanceConfig),
    Status(oneshot::Sender<TaskStatus>),
    Shutdown,
}

struct Completion {
    run_id: RunId,
    kind: RunKind,
    /// `None` when the run observed cancellation
    outcome: Option<TaskOutcome>,
}

struct InFlight {
    run_id: RunId,
    kind: RunKind,
    cancel: CancellationToken,
}

/// Cloneable handle to the coordinator
#[derive(Clone)]
pub struct ScheduleHandle {
    tx: mpsc::UnboundedSender<Command>,
}

impl ScheduleHandle {
    /// Start a scheduled run if one is due and none is in flight
    pub fn try_start(&self) {
        let _ = self.tx.send(Command::TryStart);
    }

    /// Check for updates now, regardless of due-ness
    pub async fn run_now(&self) -> RunRequest {
        self.start(RunKind::Manual).await
    }

    pub async fn upgrade(&self) -> RunRequest {
        self.start(RunKind::Upgrade).await
    }

    async fn start(&self, kind: RunKind) -> RunRequest {
        let (reply, rx) = oneshot::channel();
        if self.tx.send(Command::Start { kind, reply }).is_err() {
            return RunRequest::Unavailable;
        }
        rx.await.unwrap_or(RunRequest::Unavailable)
    }

    /// Replace the maintenance policy
    pub fn update_policy(&self, config: MaintenanceConfig) {
        let _ = self.tx.send(Command::UpdatePolicy(config));
    }

    pub async fn status(&self) -> Option<TaskStatus> {
        let (reply, rx) = oneshot::channel();
        self.tx.send(Command::Status(reply)).ok()?;
        rx.await.ok()
    }

    /// Cancel any in-flight run and stop the coordinator
    pub fn shutdown(&self) {
        let _ = self.tx.send(Command::Shutdown);
    }
}

/// Owns `TaskRunState` for the maintenance task
pub struct ScheduleEngine {
    config: MaintenanceConfig,
    last_completed_at: Option<DateTime<Local>>,
    current: Option<InFlight>,
    runner: Arc<dyn CommandRunner>,
    reporter: Reporter,
    tick: Duration,
    done_tx: mpsc::UnboundedSender<Completion>,
}

impl ScheduleEngine {
    /// Restore persisted state and spawn the coordinator
    pub fn spawn(
        config: MaintenanceConfig,
        runner: Arc<dyn CommandRunner>,
        reporter: Reporter,
        tick: Duration,
    ) -> (ScheduleHandle, JoinHandle<()>) {
        let last_completed_at = match reporter.store().load_schedule(MAINTENANCE_TASK) {
            Ok(snapshot) => snapshot.and_then(|s| s.last_completed_at),
            Err(e) => {
                warn!(error = %e, "Failed to load schedule state, treating as never run");
                None
            }
        };
        info!(
            last_completed_at = ?last_completed_at,
            frequency = ?config.schedule.frequency,
            enabled = config.schedule.enabled,
            "Maintenance schedule initialized"
        );

        let (tx, rx) = mpsc::unbounded_channel();
        let (done_tx, done_rx) = mpsc::unbounded_channel();
        let engine = Self {
            config,
            last_completed_at,
            current: None,
            runner,
            reporter,
            tick,
            done_tx,
        };

        let task = tokio::spawn(engine.run(rx, done_rx));
        (ScheduleHandle { tx }, task)
    }

    async fn run(
        mut self,
        mut commands: mpsc::UnboundedReceiver<Command>,
        mut done: mpsc::UnboundedReceiver<Completion>,
    ) {
        let mut ticker = tokio::time::interval(self.tick);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = ticker.tick() => self.try_start(),
                command = commands.recv() => match command {
                    None | Some(Command::Shutdown) => break,
                    Some(Command::TryStart) => self.try_start(),
                    Some(Command::Start { kind, reply }) => {
                        let _ = reply.send(self.start(kind));
                    }
                    Some(Command::UpdatePolicy(config)) => {
                        if self.update_policy(config) {
                            ticker.reset_immediately();
                        }
                    }
                    Some(Command::Status(reply)) => {
                        let _ = reply.send(self.status());
                    }
                },
                Some(completion) = done.recv() => self.on_completion(completion),
            }
        }

        self.cancel_current("shutdown");
        info!("Maintenance coordinator stopped");
    }

    fn try_start(&mut self) {
        if !self.config.schedule.enabled {
            return;
        }
        if let Some(current) = &self.current {
            debug!(kind = %current.kind, "Run in flight, skipping due check");
            return;
        }
        if is_due(caretaker_util::now(), self.last_completed_at, &self.config.schedule) {
            self.start(RunKind::Scheduled);
        }
    }

    fn start(&mut self, kind: RunKind) -> RunRequest {
        if let Some(current) = &self.current {
            info!(requested = %kind, running = %current.kind, "Maintenance run already in flight");
            return RunRequest::AlreadyRunning(current.kind);
        }

        let run_id = RunId::new();
        let cancel = CancellationToken::new();
        let token = cancel.clone();
        let runner = self.runner.clone();
        let config = self.config.clone();
        let done = self.done_tx.clone();

        tokio::spawn(async move {
            let work = async move {
                match kind {
                    RunKind::Upgrade => run_upgrade(runner, config).await,
                    RunKind::Scheduled | RunKind::Manual => run_check(runner, config).await,
                }
            };
            let outcome = tokio::select! {
                _ = token.cancelled() => None,
                outcome = work => Some(outcome),
            };
            let _ = done.send(Completion {
                run_id,
                kind,
                outcome,
            });
        });

        info!(run_id = %run_id, kind = %kind, "Maintenance run started");
        self.current = Some(InFlight {
            run_id,
            kind,
            cancel,
        });
        self.reporter.emit(CoreEvent::TaskStarted { run_id, kind });
        RunRequest::Started(run_id)
    }

    fn on_completion(&mut self, completion: Completion) {
        let Completion {
            run_id,
            kind,
            outcome,
        } = completion;

        match &self.current {
            Some(current) if current.run_id == run_id => {}
            _ => {
                debug!(run_id = %run_id, "Ignoring completion of a superseded run");
                return;
            }
        }
        self.current = None;

        let Some(outcome) = outcome else {
            self.reporter.emit(CoreEvent::TaskCancelled { run_id, kind });
            return;
        };

        if kind.records_completion() {
            let now = caretaker_util::now();
            let completed = match self.last_completed_at {
                Some(previous) if previous > now => previous,
                _ => now,
            };
            self.last_completed_at = Some(completed);

            let snapshot = ScheduleSnapshot {
                last_completed_at: Some(completed),
                last_outcome: Some(outcome.summary()),
            };
            if let Err(e) = self.reporter.store().save_schedule(MAINTENANCE_TASK, &snapshot) {
                warn!(error = %e, "Failed to persist schedule state");
            }
        }

        info!(
            run_id = %run_id,
            kind = %kind,
            outcome = %outcome.summary(),
            "Maintenance run completed"
        );
        self.reporter.emit(CoreEvent::TaskCompleted {
            run_id,
            kind,
            outcome: outcome.clone(),
            last_completed_at: self.last_completed_at,
        });

        let reporter = self.reporter.clone();
        tokio::spawn(async move {
            report_outcome(&reporter, kind, &outcome).await;
        });
    }

    /// Returns true when the schedule itself changed
    fn update_policy(&mut self, config: MaintenanceConfig) -> bool {
        let changed = config.schedule != self.config.schedule;
        self.config = config;

        if changed {
            info!(
                enabled = self.config.schedule.enabled,
                frequency = ?self.config.schedule.frequency,
                time = %self.config.schedule.time_of_day,
                weekday = %self.config.schedule.weekday,
                "Maintenance schedule changed"
            );
            if self
                .current
                .as_ref()
                .is_some_and(|c| c.kind.records_completion())
            {
                self.cancel_current("schedule changed");
            }
        }
        changed
    }

    fn cancel_current(&mut self, reason: &str) {
        if let Some(current) = self.current.take() {
            current.cancel.cancel();
            info!(
                run_id = %current.run_id,
                kind = %current.kind,
                reason,
                "Maintenance run cancelled"
            );
            self.reporter.emit(CoreEvent::TaskCancelled {
                run_id: current.run_id,
                kind: current.kind,
            });
        }
    }

    fn status(&self) -> TaskStatus {
        let schedule = self.config.schedule;
        TaskStatus {
            running: self.current.as_ref().map(|c| c.kind),
            last_completed_at: self.last_completed_at,
            schedule,
            due: schedule.enabled
                && is_due(caretaker_util::now(), self.last_completed_at, &schedule),
        }
    }
}
