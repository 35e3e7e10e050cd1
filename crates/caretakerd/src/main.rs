//! caretakerd - The caretaker background service
//!
//! This is the main entry point for the caretakerd service.
//! It wires together all the components:
//! - Configuration loading and reload
//! - Store initialization
//! - Linux host collaborators
//! - The core reactor (rules and maintenance scheduling)
//! - Signal handling

use anyhow::{Context, Result};
use caretaker_api::{Frequency, ScheduleConfig};
use caretaker_config::{Policy, load_config};
use caretaker_core::{
    Collaborators, CoreEvent, MAINTENANCE_TASK, Reactor, RunRequest, is_due,
};
use caretaker_host_linux::{
    NotifySendNotifier, PollingEventSource, ProcDirectory, ShellCommandRunner,
};
use caretaker_store::{LogEntry, LogSource, SqliteStore, Store};
use caretaker_util::{DATABASE_FILENAME, default_config_path, format_datetime_full};
use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::signal::unix::{SignalKind, signal};
use tracing::{debug, info, warn};
use tracing_subscriber::EnvFilter;

/// caretakerd - Keeps desktop apps and helper processes in line
#[derive(Parser, Debug)]
#[command(name = "caretakerd")]
#[command(about = "Process remediation rules and scheduled maintenance checks", long_about = None)]
struct Args {
    /// Configuration file path (default: ~/.config/caretaker/config.toml)
    #[arg(short, long, env = "CARETAKER_CONFIG", default_value_os_t = default_config_path())]
    config: PathBuf,

    /// Data directory override (or set CARETAKER_DATA_DIR env var)
    #[arg(short, long, env = "CARETAKER_DATA_DIR")]
    data_dir: Option<PathBuf>,

    /// Log level
    #[arg(short, long, default_value = "info")]
    log_level: String,

    #[command(subcommand)]
    command: Option<Cmd>,
}

#[derive(Subcommand, Debug)]
enum Cmd {
    /// Run the service (default)
    Run,

    /// Print or clear the event log
    Log {
        /// Number of entries to show
        #[arg(short = 'n', long, default_value_t = 50)]
        limit: usize,

        /// Delete all entries
        #[arg(long)]
        clear: bool,
    },

    /// Show the maintenance schedule state
    Status,
}

/// Load the policy, falling back to defaults when no file exists yet
fn load_policy(path: &Path) -> Result<Policy> {
    if !path.exists() {
        warn!(config_path = %path.display(), "No configuration file, using defaults");
        return Ok(Policy::default());
    }

    let policy = load_config(path)
        .with_context(|| format!("Failed to load config from {:?}", path))?;
    info!(
        config_path = %path.display(),
        app_count = policy.apps.len(),
        rule_count = policy.rules.len(),
        "Configuration loaded"
    );
    Ok(policy)
}

fn open_store(args: &Args, policy: &Policy) -> Result<Arc<SqliteStore>> {
    let data_dir = args
        .data_dir
        .clone()
        .unwrap_or_else(|| policy.service.data_dir.clone());

    std::fs::create_dir_all(&data_dir)
        .with_context(|| format!("Failed to create data directory {:?}", data_dir))?;

    let db_path = data_dir.join(DATABASE_FILENAME);
    let store = SqliteStore::open(&db_path)
        .with_context(|| format!("Failed to open database {:?}", db_path))?;

    debug!(db_path = %db_path.display(), "Store initialized");
    Ok(Arc::new(store))
}

fn describe_schedule(schedule: &ScheduleConfig) -> String {
    let cadence = match schedule.frequency {
        Frequency::Hourly => "hourly".to_string(),
        Frequency::Daily => format!("daily at {}", schedule.time_of_day),
        Frequency::Weekly => format!("weekly on {} at {}", schedule.weekday, schedule.time_of_day),
    };
    if schedule.enabled {
        cadence
    } else {
        format!("{} (disabled)", cadence)
    }
}

fn describe_request(request: &RunRequest) -> String {
    match request {
        RunRequest::Started(run_id) => format!("started run {}", run_id),
        RunRequest::AlreadyRunning(kind) => format!("{} run already in progress", kind),
        RunRequest::Unavailable => "scheduler unavailable".to_string(),
    }
}

/// Main service state
struct Service {
    config_path: PathBuf,
    reactor: Reactor,
    store: Arc<SqliteStore>,
}

impl Service {
    fn new(args: &Args, policy: Policy, store: Arc<SqliteStore>) -> Self {
        let directory = Arc::new(ProcDirectory::new());
        let runner = Arc::new(ShellCommandRunner::new(policy.service.shell.clone()));
        let notifier = Arc::new(NotifySendNotifier::new(runner.clone()));
        let source = Arc::new(PollingEventSource::new(
            directory.clone(),
            policy.service.process_poll,
        ));

        let reactor = Reactor::new(
            &policy,
            Collaborators {
                directory,
                runner,
                notifier,
                source,
                store: store.clone(),
            },
        );

        Self {
            config_path: args.config.clone(),
            reactor,
            store,
        }
    }

    async fn run(self) -> Result<()> {
        self.reactor
            .start_watch()
            .await
            .context("Failed to start watching OS events")?;

        let mut core_events = self.reactor.subscribe();

        // Set up signal handlers
        let mut sigterm =
            signal(SignalKind::terminate()).context("Failed to create SIGTERM handler")?;
        let mut sigint =
            signal(SignalKind::interrupt()).context("Failed to create SIGINT handler")?;
        let mut sighup = signal(SignalKind::hangup()).context("Failed to create SIGHUP handler")?;
        let mut sigusr1 =
            signal(SignalKind::user_defined1()).context("Failed to create SIGUSR1 handler")?;
        let mut sigusr2 =
            signal(SignalKind::user_defined2()).context("Failed to create SIGUSR2 handler")?;

        info!("Service running");

        loop {
            tokio::select! {
                _ = sigterm.recv() => {
                    info!("Received SIGTERM, shutting down gracefully");
                    break;
                }
                _ = sigint.recv() => {
                    info!("Received SIGINT, shutting down gracefully");
                    break;
                }

                // Signal: SIGHUP - reload configuration
                _ = sighup.recv() => {
                    self.reload().await;
                }

                // Signal: SIGUSR1 - check for updates now
                _ = sigusr1.recv() => {
                    match self.reactor.run_now().await {
                        Ok(request) => {
                            info!(result = %describe_request(&request), "Manual check requested")
                        }
                        Err(e) => warn!(error = %e, "Manual check unavailable"),
                    }
                }

                // Signal: SIGUSR2 - run the upgrade command
                _ = sigusr2.recv() => {
                    match self.reactor.upgrade().await {
                        Ok(request) => {
                            info!(result = %describe_request(&request), "Upgrade requested")
                        }
                        Err(e) => warn!(error = %e, "Upgrade unavailable"),
                    }
                }

                event = core_events.recv() => {
                    match event {
                        Ok(event) => Self::handle_core_event(&event),
                        Err(tokio::sync::broadcast::error::RecvError::Lagged(skipped)) => {
                            debug!(skipped, "Core event subscriber lagged");
                        }
                        Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
                    }
                }
            }
        }

        info!("Shutting down caretakerd");
        self.reactor.stop_watch().await;
        info!("Shutdown complete");
        Ok(())
    }

    async fn reload(&self) {
        info!(config_path = %self.config_path.display(), "Reloading configuration");
        match load_config(&self.config_path) {
            Ok(policy) => self.reactor.reload(&policy).await,
            Err(e) => {
                warn!(error = %e, "Configuration reload failed, keeping current configuration");
                let entry = LogEntry::new(
                    LogSource::Service,
                    format!("Configuration reload failed: {}", e),
                );
                if let Err(e) = self.store.append_log(entry) {
                    warn!(error = %e, "Failed to record reload failure");
                }
            }
        }
    }

    fn handle_core_event(event: &CoreEvent) {
        match event {
            CoreEvent::RuleApplied {
                rule_id,
                success,
                summary,
            } => debug!(rule_id = %rule_id, success, summary = %summary, "Rule applied"),
            CoreEvent::TaskStarted { run_id, kind } => {
                debug!(run_id = %run_id, kind = %kind, "Maintenance run started")
            }
            CoreEvent::TaskCompleted {
                run_id, outcome, ..
            } => debug!(run_id = %run_id, outcome = %outcome.summary(), "Maintenance run finished"),
            CoreEvent::TaskCancelled { run_id, kind } => {
                debug!(run_id = %run_id, kind = %kind, "Maintenance run cancelled")
            }
            CoreEvent::NotificationsDenied => {
                warn!("Notifications are unavailable; events are only written to the log")
            }
            CoreEvent::PolicyReloaded { rule_count } => {
                debug!(rule_count, "Policy reload applied")
            }
        }
    }
}

fn print_log(store: &dyn Store, limit: usize, clear: bool) -> Result<()> {
    if clear {
        store.clear_logs().context("Failed to clear event log")?;
        println!("Event log cleared");
        return Ok(());
    }

    let mut entries = store.recent_logs(limit).context("Failed to read event log")?;
    if entries.is_empty() {
        println!("Event log is empty");
        return Ok(());
    }

    entries.reverse();
    for entry in entries {
        println!("{}", entry);
    }
    Ok(())
}

fn status_lines(store: &dyn Store, policy: &Policy) -> Result<Vec<String>> {
    let healthy = store.is_healthy();
    let snapshot = store
        .load_schedule(MAINTENANCE_TASK)
        .context("Failed to read schedule state")?
        .unwrap_or_default();
    let schedule = &policy.maintenance.schedule;
    let due = schedule.enabled
        && is_due(caretaker_util::now(), snapshot.last_completed_at, schedule);

    Ok(vec![
        format!("Database:       {}", if healthy { "ok" } else { "unavailable" }),
        format!("Schedule:       {}", describe_schedule(schedule)),
        format!(
            "Last completed: {}",
            snapshot
                .last_completed_at
                .as_ref()
                .map(format_datetime_full)
                .unwrap_or_else(|| "never".to_string())
        ),
        format!(
            "Last outcome:   {}",
            snapshot.last_outcome.as_deref().unwrap_or("none")
        ),
        format!("Due now:        {}", if due { "yes" } else { "no" }),
    ])
}

fn print_status(store: &dyn Store, policy: &Policy) -> Result<()> {
    for line in status_lines(store, policy)? {
        println!("{}", line);
    }
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Initialize logging
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&args.log_level));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .init();

    let policy = load_policy(&args.config)?;
    let store = open_store(&args, &policy)?;

    match args.command {
        Some(Cmd::Log { limit, clear }) => print_log(store.as_ref(), limit, clear),
        Some(Cmd::Status) => print_status(store.as_ref(), &policy),
        Some(Cmd::Run) | None => {
            info!(version = env!("CARGO_PKG_VERSION"), "caretakerd starting");
            let service = Service::new(&args, policy, store);
            service.run().await
        }
    }
}
