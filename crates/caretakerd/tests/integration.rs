//! Integration tests for caretakerd
//!
//! These tests drive a reactor built from a parsed configuration through
//! the mock host collaborators and a file-backed store.

use caretaker_api::{Action, EventKind, Frequency, OsEvent, PermissionStatus, Rule};
use caretaker_config::{Policy, parse_config};
use caretaker_core::{Collaborators, CoreEvent, MAINTENANCE_TASK, Reactor, RunRequest};
use caretaker_host_api::{
    DirectoryCall, MockCommandRunner, MockEventSource, MockNotifier, MockProcessDirectory,
    MockReply, ProcessInfo,
};
use caretaker_store::{SqliteStore, Store};
use caretaker_util::{AppKey, RuleId};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;

const CONFIG: &str = r#"
    config_version = 1

    [service]
    settle_delay_ms = 500

    [[apps]]
    key = "settings"
    name = "gnome-control-center"
    location = "/usr/bin/gnome-control-center"

    [[apps]]
    key = "bluetooth"
    name = "blueman-applet"
    location = "/usr/bin/blueman-applet"

    [[apps]]
    key = "switcher"
    name = "switcher"
    location = "/usr/bin/switcher"

    [[rules]]
    id = "restart-switcher"
    trigger = "process_terminated"
    subjects = ["settings"]
    action = { type = "restart_companion", companion = "switcher", guard = "bluetooth" }

    [maintenance]
    enabled = false
    check_command = "pkg outdated"
    upgrade_command = "pkg upgrade"
"#;

struct Daemon {
    directory: Arc<MockProcessDirectory>,
    runner: Arc<MockCommandRunner>,
    notifier: Arc<MockNotifier>,
    source: Arc<MockEventSource>,
    store: Arc<SqliteStore>,
    reactor: Reactor,
    events: broadcast::Receiver<CoreEvent>,
}

impl Daemon {
    fn start(policy: &Policy, db_path: &Path, notifier: MockNotifier) -> Self {
        let directory = Arc::new(MockProcessDirectory::new());
        let runner = Arc::new(MockCommandRunner::new());
        let notifier = Arc::new(notifier);
        let source = Arc::new(MockEventSource::new());
        let store = Arc::new(SqliteStore::open(db_path).unwrap());

        let reactor = Reactor::new(
            policy,
            Collaborators {
                directory: directory.clone(),
                runner: runner.clone(),
                notifier: notifier.clone(),
                source: source.clone(),
                store: store.clone(),
            },
        );
        let events = reactor.subscribe();

        Self {
            directory,
            runner,
            notifier,
            source,
            store,
            reactor,
            events,
        }
    }

    async fn next_event<F: Fn(&CoreEvent) -> bool>(&mut self, wanted: F) -> CoreEvent {
        loop {
            let event = self.events.recv().await.unwrap();
            if wanted(&event) {
                return event;
            }
        }
    }

    fn logs(&self) -> Vec<String> {
        let mut entries = self.store.recent_logs(100).unwrap();
        entries.reverse();
        entries.into_iter().map(|e| e.message).collect()
    }
}

fn with_maintenance(enabled: bool) -> Policy {
    let mut policy = parse_config(CONFIG).unwrap();
    policy.maintenance.schedule.enabled = enabled;
    policy.maintenance.refresh_command = None;
    policy
}

#[tokio::test(start_paused = true)]
async fn terminated_settings_restarts_switcher() {
    let temp = tempfile::tempdir().unwrap();
    let policy = parse_config(CONFIG).unwrap();
    let mut daemon = Daemon::start(
        &policy,
        &temp.path().join("caretaker.db"),
        MockNotifier::authorized(),
    );

    let bluetooth = ProcessInfo::new(0, "blueman-applet").with_exe("/usr/bin/blueman-applet");
    daemon.directory.spawn_app(&bluetooth.to_descriptor());
    let old = daemon.directory.spawn("switcher");

    daemon.reactor.start_watch().await.unwrap();

    let settings = ProcessInfo::new(4242, "gnome-control-center")
        .with_exe("/usr/bin/gnome-control-center");
    assert!(daemon.source.emit(OsEvent::ProcessTerminated {
        app: settings.to_descriptor(),
    }));

    let event = daemon
        .next_event(|e| matches!(e, CoreEvent::RuleApplied { .. }))
        .await;
    assert!(matches!(event, CoreEvent::RuleApplied { success: true, .. }));

    assert_eq!(
        daemon.directory.calls(),
        vec![
            DirectoryCall::Terminate {
                pid: old.pid,
                force: false
            },
            DirectoryCall::Launch {
                name: "switcher".into()
            },
        ]
    );
    assert_eq!(
        daemon.notifier.posted(),
        vec![("Rule Applied".to_string(), "switcher restarted".to_string())]
    );

    daemon.reactor.stop_watch().await;
    assert_eq!(
        daemon.logs(),
        vec!["Watching started", "switcher restarted", "Watching stopped"]
    );
}

#[tokio::test(start_paused = true)]
async fn completion_time_survives_restart() {
    let temp = tempfile::tempdir().unwrap();
    let db_path = temp.path().join("caretaker.db");
    let policy = with_maintenance(true);

    {
        let mut daemon = Daemon::start(&policy, &db_path, MockNotifier::authorized());
        daemon
            .runner
            .reply("pkg outdated", MockReply::stdout("git\nnode\n"));
        daemon.reactor.start_watch().await.unwrap();

        daemon
            .next_event(|e| matches!(e, CoreEvent::TaskCompleted { .. }))
            .await;
        tokio::time::sleep(Duration::from_millis(1)).await;

        assert_eq!(
            daemon.notifier.posted(),
            vec![(
                "Updates Available".to_string(),
                "Found 2 packages to update: git, node".to_string()
            )]
        );
        daemon.reactor.stop_watch().await;
    }

    let daemon = Daemon::start(&policy, &db_path, MockNotifier::authorized());
    let snapshot = daemon.store.load_schedule(MAINTENANCE_TASK).unwrap().unwrap();
    assert!(snapshot.last_completed_at.is_some());

    daemon.reactor.start_watch().await.unwrap();
    tokio::time::sleep(Duration::from_secs(300)).await;

    assert!(daemon.runner.calls().is_empty());
    let status = daemon.reactor.status().await.unwrap();
    assert!(!status.due);
    assert_eq!(status.last_completed_at, snapshot.last_completed_at);

    daemon.reactor.stop_watch().await;
}

#[tokio::test(start_paused = true)]
async fn denied_notifications_fall_back_to_the_log() {
    let temp = tempfile::tempdir().unwrap();
    let policy = with_maintenance(false);
    let mut daemon = Daemon::start(
        &policy,
        &temp.path().join("caretaker.db"),
        MockNotifier::new(PermissionStatus::Denied),
    );
    daemon.runner.reply("pkg outdated", MockReply::stdout("git"));
    daemon.reactor.start_watch().await.unwrap();

    assert!(matches!(
        daemon.reactor.run_now().await.unwrap(),
        RunRequest::Started(_)
    ));
    daemon
        .next_event(|e| matches!(e, CoreEvent::NotificationsDenied))
        .await;

    assert!(daemon.notifier.posted().is_empty());
    assert!(
        daemon
            .logs()
            .contains(&"Found 1 packages to update: git".to_string())
    );

    daemon.reactor.stop_watch().await;
}

#[tokio::test(start_paused = true)]
async fn reload_installs_new_rules() {
    let temp = tempfile::tempdir().unwrap();
    let daemon = Daemon::start(
        &with_maintenance(false),
        &temp.path().join("caretaker.db"),
        MockNotifier::authorized(),
    );
    daemon.reactor.start_watch().await.unwrap();

    let mut reloaded = with_maintenance(false);
    reloaded.maintenance.schedule.frequency = Frequency::Daily;
    reloaded.rules.push(Rule {
        id: RuleId::new("keep-switcher"),
        trigger: EventKind::TimerTick,
        enabled: true,
        subjects: vec![],
        action: Action::LaunchIfAbsent {
            app: AppKey::new("switcher"),
        },
    });

    daemon.reactor.reload(&reloaded).await;
    tokio::time::sleep(Duration::from_secs(6)).await;

    assert_eq!(daemon.directory.launch_count(), 1);
    let status = daemon.reactor.status().await.unwrap();
    assert_eq!(status.schedule.frequency, Frequency::Daily);
    assert_eq!(daemon.reactor.rules().rules().len(), 2);

    daemon.reactor.stop_watch().await;
}
