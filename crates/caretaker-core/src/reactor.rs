//! The composed root: wires collaborators, rules and the scheduler

use caretaker_api::{EventKind, OsEvent};
use caretaker_config::{MaintenanceConfig, Policy};
use caretaker_host_api::{CommandRunner, EventSource, HostError, Notifier, ProcessDirectory};
use caretaker_store::{LogSource, Store};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use thiserror::Error;
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::{
    ActionExecutor, AppCatalog, CoreEvent, ExecutorSettings, NotificationGateway, Reporter,
    RuleEngine, RuleSettings, RunRequest, SCHEDULE_TICK, ScheduleEngine, ScheduleHandle,
    TaskStatus,
};

/// Errors from the reactor control surface
#[derive(Debug, Error)]
pub enum ReactorError {
    #[error("Reactor is not watching")]
    NotWatching,

    #[error("Reactor is already watching")]
    AlreadyWatching,

    #[error("Event source error: {0}")]
    Host(#[from] HostError),
}

pub type ReactorResult<T> = Result<T, ReactorError>;

/// External services the reactor depends on
#[derive(Clone)]
pub struct Collaborators {
    pub directory: Arc<dyn ProcessDirectory>,
    pub runner: Arc<dyn CommandRunner>,
    pub notifier: Arc<dyn Notifier>,
    pub source: Arc<dyn EventSource>,
    pub store: Arc<dyn Store>,
}

/// Tasks and handles that exist only while watching
struct Watch {
    cancel: CancellationToken,
    schedule: ScheduleHandle,
    schedule_task: JoinHandle<()>,
    pump: JoinHandle<()>,
    ticker: JoinHandle<()>,
}

/// Constructed once at startup and shared by reference.
///
/// `start_watch` installs OS observers and timers; `stop_watch` removes
/// them all. Nothing runs in the background outside that window.
pub struct Reactor {
    rules: RuleEngine,
    catalog: Arc<AppCatalog>,
    reporter: Reporter,
    runner: Arc<dyn CommandRunner>,
    source: Arc<dyn EventSource>,
    maintenance: Mutex<MaintenanceConfig>,
    rule_tick: Duration,
    schedule_tick: Duration,
    events: broadcast::Sender<CoreEvent>,
    watch: tokio::sync::Mutex<Option<Watch>>,
}

impl Reactor {
    pub fn new(policy: &Policy, collaborators: Collaborators) -> Self {
        let (events, _) = broadcast::channel(256);

        let gateway = Arc::new(NotificationGateway::new(
            collaborators.notifier,
            policy.notifications.enabled,
        ));
        let reporter = Reporter::new(collaborators.store, gateway, events.clone());
        let catalog = Arc::new(AppCatalog::new(
            policy.apps.clone(),
            collaborators.directory.clone(),
        ));
        let executor = ActionExecutor::new(
            collaborators.directory,
            collaborators.runner.clone(),
            executor_settings(policy),
        );
        let rules = RuleEngine::new(
            policy.rules.clone(),
            rule_settings(policy),
            catalog.clone(),
            executor,
            reporter.clone(),
        );

        Self {
            rules,
            catalog,
            reporter,
            runner: collaborators.runner,
            source: collaborators.source,
            maintenance: Mutex::new(policy.maintenance.clone()),
            rule_tick: policy.service.rule_tick,
            schedule_tick: SCHEDULE_TICK,
            events,
            watch: tokio::sync::Mutex::new(None),
        }
    }

    /// Override the maintenance due-check interval
    pub fn with_schedule_tick(mut self, tick: Duration) -> Self {
        self.schedule_tick = tick;
        self
    }

    pub fn subscribe(&self) -> broadcast::Receiver<CoreEvent> {
        self.events.subscribe()
    }

    pub fn rules(&self) -> &RuleEngine {
        &self.rules
    }

    pub async fn is_watching(&self) -> bool {
        self.watch.lock().await.is_some()
    }

    /// Install OS observers, the rule ticker and the maintenance scheduler
    pub async fn start_watch(&self) -> ReactorResult<()> {
        let mut watch = self.watch.lock().await;
        if watch.is_some() {
            return Err(ReactorError::AlreadyWatching);
        }

        let stream = self.source.start().await?;
        let (schedule, schedule_task) = ScheduleEngine::spawn(
            self.maintenance_config(),
            self.runner.clone(),
            self.reporter.clone(),
            self.schedule_tick,
        );

        let cancel = CancellationToken::new();
        let pump = tokio::spawn(pump_events(
            stream,
            self.rules.clone(),
            self.catalog.clone(),
            schedule.clone(),
            cancel.clone(),
        ));
        let ticker = tokio::spawn(tick_rules(self.rules.clone(), self.rule_tick, cancel.clone()));

        *watch = Some(Watch {
            cancel,
            schedule,
            schedule_task,
            pump,
            ticker,
        });

        self.reporter.log(LogSource::Service, "Watching started");
        Ok(())
    }

    /// Remove every observer and timer. Safe to call when not watching.
    pub async fn stop_watch(&self) {
        let Some(watch) = self.watch.lock().await.take() else {
            return;
        };

        self.source.stop().await;
        watch.cancel.cancel();
        watch.schedule.shutdown();

        for (name, task) in [
            ("event pump", watch.pump),
            ("rule ticker", watch.ticker),
            ("scheduler", watch.schedule_task),
        ] {
            if let Err(e) = task.await {
                warn!(task = name, error = %e, "Background task ended abnormally");
            }
        }

        self.reporter.log(LogSource::Service, "Watching stopped");
    }

    /// Entry point for a single OS event. Returns the spawned rule actions.
    pub async fn on_event(&self, event: OsEvent) -> Vec<JoinHandle<()>> {
        let schedule = self.schedule().await.ok();
        dispatch(&self.rules, &self.catalog, schedule.as_ref(), event)
    }

    /// Check for updates now
    pub async fn run_now(&self) -> ReactorResult<RunRequest> {
        Ok(self.schedule().await?.run_now().await)
    }

    /// Run the upgrade command now
    pub async fn upgrade(&self) -> ReactorResult<RunRequest> {
        Ok(self.schedule().await?.upgrade().await)
    }

    pub async fn status(&self) -> ReactorResult<TaskStatus> {
        self.schedule()
            .await?
            .status()
            .await
            .ok_or(ReactorError::NotWatching)
    }

    /// Apply a new policy without restarting. Running actions finish with
    /// the rules they started with.
    pub async fn reload(&self, policy: &Policy) {
        self.catalog.reload(policy.apps.clone());
        self.rules.reload(policy.rules.clone(), rule_settings(policy));
        self.reporter
            .gateway()
            .set_enabled(policy.notifications.enabled);

        *self.maintenance.lock().unwrap_or_else(|e| e.into_inner()) = policy.maintenance.clone();
        if let Ok(schedule) = self.schedule().await {
            schedule.update_policy(policy.maintenance.clone());
        }

        if policy.service.rule_tick != self.rule_tick {
            warn!("rule_tick_seconds changes take effect after restart");
        }

        let rule_count = policy.rules.len();
        info!(rule_count, "Policy reloaded");
        self.reporter.log(LogSource::Service, "Configuration reloaded");
        self.reporter.emit(CoreEvent::PolicyReloaded { rule_count });
    }

    async fn schedule(&self) -> ReactorResult<ScheduleHandle> {
        self.watch
            .lock()
            .await
            .as_ref()
            .map(|w| w.schedule.clone())
            .ok_or(ReactorError::NotWatching)
    }

    fn maintenance_config(&self) -> MaintenanceConfig {
        self.maintenance
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }
}

fn rule_settings(policy: &Policy) -> RuleSettings {
    RuleSettings {
        settle_delay: policy.service.settle_delay,
        notify_on_rule: policy.notifications.notify_on_rule,
    }
}

fn executor_settings(policy: &Policy) -> ExecutorSettings {
    ExecutorSettings {
        restart_poll: policy.service.restart_poll,
        restart_max_wait: policy.service.restart_max_wait,
        command_timeout: policy.service.command_timeout,
    }
}

fn dispatch(
    rules: &RuleEngine,
    catalog: &AppCatalog,
    schedule: Option<&ScheduleHandle>,
    event: OsEvent,
) -> Vec<JoinHandle<()>> {
    let event = match event {
        OsEvent::ProcessTerminated { app } => OsEvent::ProcessTerminated {
            app: catalog.identify(app),
        },
        other => other,
    };
    debug!(event = %event.kind(), "OS event");

    if event.kind() == EventKind::SystemDidWake
        && let Some(schedule) = schedule
    {
        schedule.try_start();
    }

    rules.on_event(&event)
}

async fn pump_events(
    mut stream: mpsc::UnboundedReceiver<OsEvent>,
    rules: RuleEngine,
    catalog: Arc<AppCatalog>,
    schedule: ScheduleHandle,
    cancel: CancellationToken,
) {
    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            event = stream.recv() => match event {
                Some(event) => {
                    dispatch(&rules, &catalog, Some(&schedule), event);
                }
                None => {
                    debug!("Event stream closed");
                    break;
                }
            },
        }
    }
}

async fn tick_rules(rules: RuleEngine, period: Duration, cancel: CancellationToken) {
    let mut ticker = tokio::time::interval_at(tokio::time::Instant::now() + period, period);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = ticker.tick() => {
                rules.on_event(&OsEvent::TimerTick);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use caretaker_api::{Action, AppDescriptor, Frequency, Rule};
    use caretaker_config::AppEntry;
    use caretaker_host_api::{
        MockCommandRunner, MockEventSource, MockNotifier, MockProcessDirectory,
    };
    use caretaker_store::SqliteStore;
    use caretaker_util::{AppKey, RuleId};

    fn app(key: &str, name: &str) -> AppEntry {
        AppEntry {
            key: AppKey::new(key),
            name: name.into(),
            location: format!("/usr/bin/{}", name).into(),
            bundle_id: None,
        }
    }

    fn launch_rule(trigger: EventKind, subjects: &[&str]) -> Rule {
        Rule {
            id: RuleId::new("keep-switcher"),
            trigger,
            enabled: true,
            subjects: subjects.iter().map(|s| AppKey::new(*s)).collect(),
            action: Action::LaunchIfAbsent {
                app: AppKey::new("switcher"),
            },
        }
    }

    fn policy(rules: Vec<Rule>) -> Policy {
        let mut policy = Policy {
            apps: vec![app("settings", "gnome-control-center"), app("switcher", "switcher")],
            rules,
            ..Policy::default()
        };
        policy.maintenance.schedule.enabled = false;
        policy.maintenance.refresh_command = None;
        policy
    }

    struct Harness {
        directory: Arc<MockProcessDirectory>,
        runner: Arc<MockCommandRunner>,
        source: Arc<MockEventSource>,
        reactor: Reactor,
        events: broadcast::Receiver<CoreEvent>,
    }

    impl Harness {
        fn new(policy: &Policy) -> Self {
            let directory = Arc::new(MockProcessDirectory::new());
            let runner = Arc::new(MockCommandRunner::new());
            let source = Arc::new(MockEventSource::new());
            let reactor = Reactor::new(
                policy,
                Collaborators {
                    directory: directory.clone(),
                    runner: runner.clone(),
                    notifier: Arc::new(MockNotifier::authorized()),
                    source: source.clone(),
                    store: Arc::new(SqliteStore::in_memory().unwrap()),
                },
            );
            let events = reactor.subscribe();
            Self {
                directory,
                runner,
                source,
                reactor,
                events,
            }
        }

        async fn next_rule_applied(&mut self) -> String {
            loop {
                if let CoreEvent::RuleApplied { summary, .. } = self.events.recv().await.unwrap() {
                    return summary;
                }
            }
        }
    }

    #[tokio::test(start_paused = true)]
    async fn watch_lifecycle() {
        let h = Harness::new(&policy(vec![]));

        assert!(matches!(h.reactor.run_now().await, Err(ReactorError::NotWatching)));

        h.reactor.start_watch().await.unwrap();
        assert!(h.source.is_started());
        assert!(h.reactor.is_watching().await);
        assert!(matches!(
            h.reactor.start_watch().await,
            Err(ReactorError::AlreadyWatching)
        ));

        h.reactor.stop_watch().await;
        assert!(!h.reactor.is_watching().await);
        assert_eq!(h.source.stop_count(), 1);
        assert!(!h.source.emit(OsEvent::TimerTick));

        // A second stop is a no-op
        h.reactor.stop_watch().await;
        assert_eq!(h.source.stop_count(), 1);
        assert!(matches!(h.reactor.status().await, Err(ReactorError::NotWatching)));
    }

    #[tokio::test(start_paused = true)]
    async fn terminated_app_triggers_matching_rule() {
        let mut h = Harness::new(&policy(vec![launch_rule(
            EventKind::ProcessTerminated,
            &["settings"],
        )]));
        h.reactor.start_watch().await.unwrap();

        let observed = AppDescriptor::new(
            "gnome-control-center",
            "/usr/bin/gnome-control-center",
            "pid-4242",
        );
        assert!(h.source.emit(OsEvent::ProcessTerminated { app: observed }));

        assert_eq!(h.next_rule_applied().await, "switcher started");
        assert_eq!(h.directory.launch_count(), 1);

        h.reactor.stop_watch().await;
    }

    #[tokio::test(start_paused = true)]
    async fn unrelated_termination_is_ignored() {
        let h = Harness::new(&policy(vec![launch_rule(
            EventKind::ProcessTerminated,
            &["settings"],
        )]));
        h.reactor.start_watch().await.unwrap();

        let observed = AppDescriptor::new("gedit", "/usr/bin/gedit", "/usr/bin/gedit");
        h.source.emit(OsEvent::ProcessTerminated { app: observed });
        tokio::time::sleep(Duration::from_secs(10)).await;

        assert_eq!(h.directory.launch_count(), 0);
        h.reactor.stop_watch().await;
    }

    #[tokio::test(start_paused = true)]
    async fn timer_rules_run_only_while_watching() {
        let h = Harness::new(&policy(vec![launch_rule(EventKind::TimerTick, &[])]));
        h.reactor.start_watch().await.unwrap();

        tokio::time::sleep(Duration::from_secs(6)).await;
        assert_eq!(h.directory.launch_count(), 1);

        h.reactor.stop_watch().await;
        for process in h.directory.running() {
            h.directory.exit(process.pid);
        }
        tokio::time::sleep(Duration::from_secs(30)).await;
        assert_eq!(h.directory.launch_count(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn direct_events_route_without_watching() {
        let h = Harness::new(&policy(vec![launch_rule(EventKind::SystemDidWake, &[])]));

        for handle in h.reactor.on_event(OsEvent::SystemDidWake).await {
            handle.await.unwrap();
        }

        assert_eq!(h.directory.launch_count(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn manual_check_through_reactor() {
        let mut h = Harness::new(&policy(vec![]));
        h.reactor.start_watch().await.unwrap();

        let RunRequest::Started(run_id) = h.reactor.run_now().await.unwrap() else {
            panic!("manual run should start");
        };
        loop {
            if let CoreEvent::TaskCompleted { run_id: done, .. } = h.events.recv().await.unwrap() {
                assert_eq!(done, run_id);
                break;
            }
        }

        assert_eq!(h.runner.calls(), vec!["brew outdated --quiet".to_string()]);
        h.reactor.stop_watch().await;
    }

    #[tokio::test(start_paused = true)]
    async fn reload_reaches_rules_and_schedule() {
        let mut h = Harness::new(&policy(vec![]));
        h.reactor.start_watch().await.unwrap();

        let mut next = policy(vec![launch_rule(EventKind::TimerTick, &[])]);
        next.maintenance.schedule.frequency = Frequency::Daily;
        h.reactor.reload(&next).await;

        assert_eq!(h.reactor.rules().rules().len(), 1);
        loop {
            if let CoreEvent::PolicyReloaded { rule_count } = h.events.recv().await.unwrap() {
                assert_eq!(rule_count, 1);
                break;
            }
        }

        let status = h.reactor.status().await.unwrap();
        assert_eq!(status.schedule.frequency, Frequency::Daily);

        h.reactor.stop_watch().await;
    }
}
