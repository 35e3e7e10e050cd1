//! Rule evaluation against OS events

use caretaker_api::{Action, AppDescriptor, OsEvent, Rule};
use caretaker_host_api::{CommandError, ProcessInfo};
use caretaker_store::LogSource;
use caretaker_util::{AppKey, RuleId};
use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex, RwLock};
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::{ActionError, ActionExecutor, AppCatalog, CoreEvent, QuitStep, Reporter};

const TITLE_APPLIED: &str = "Rule Applied";
const TITLE_FAILED: &str = "Rule Failed";
const TITLE_HIGH_CPU: &str = "High CPU Usage";

/// Rule engine settings that can change on reload
#[derive(Debug, Clone, Copy)]
pub struct RuleSettings {
    /// Delay before cleanup and force-quit actions after a termination
    pub settle_delay: Duration,
    /// Whether applied rules produce notifications
    pub notify_on_rule: bool,
}

impl Default for RuleSettings {
    fn default() -> Self {
        Self {
            settle_delay: Duration::from_millis(2000),
            notify_on_rule: true,
        }
    }
}

/// What a single rule invocation produced
#[derive(Debug, Clone)]
enum Outcome {
    /// Nothing to do for this event
    Skipped(&'static str),
    Done {
        log: String,
        notification: Option<(&'static str, String)>,
        success: bool,
    },
}

impl Outcome {
    fn applied(log: String, body: String) -> Self {
        Outcome::Done {
            log,
            notification: Some((TITLE_APPLIED, body)),
            success: true,
        }
    }

    fn failed_silently(log: String) -> Self {
        Outcome::Done {
            log,
            notification: None,
            success: false,
        }
    }

    fn failed_visibly(log: String) -> Self {
        Outcome::Done {
            notification: Some((TITLE_FAILED, log.clone())),
            log,
            success: false,
        }
    }
}

/// Evaluates rules for each observed event and runs the matching actions.
///
/// Rules are evaluated in declaration order; every match gets its own task
/// so a slow action never delays another.
#[derive(Clone)]
pub struct RuleEngine {
    inner: Arc<Inner>,
}

struct Inner {
    rules: RwLock<Arc<Vec<Rule>>>,
    settings: RwLock<RuleSettings>,
    catalog: Arc<AppCatalog>,
    executor: ActionExecutor,
    reporter: Reporter,
    /// When each CPU rule's process first exceeded its threshold
    cpu_above_since: Mutex<HashMap<RuleId, Instant>>,
}

impl RuleEngine {
    pub fn new(
        rules: Vec<Rule>,
        settings: RuleSettings,
        catalog: Arc<AppCatalog>,
        executor: ActionExecutor,
        reporter: Reporter,
    ) -> Self {
        info!(rule_count = rules.len(), "Rule engine initialized");
        Self {
            inner: Arc::new(Inner {
                rules: RwLock::new(Arc::new(rules)),
                settings: RwLock::new(settings),
                catalog,
                executor,
                reporter,
                cpu_above_since: Mutex::new(HashMap::new()),
            }),
        }
    }

    /// Swap the rule set. Actions already running keep their old rule.
    pub fn reload(&self, rules: Vec<Rule>, settings: RuleSettings) {
        let rule_count = rules.len();
        *self.inner.rules.write().unwrap_or_else(|e| e.into_inner()) = Arc::new(rules);
        *self.inner.settings.write().unwrap_or_else(|e| e.into_inner()) = settings;
        self.inner
            .cpu_above_since
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clear();
        info!(rule_count, "Rules reloaded");
    }

    pub fn rules(&self) -> Arc<Vec<Rule>> {
        self.inner
            .rules
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    /// Evaluate every enabled rule against `event` and start the matching
    /// actions. Returns the spawned action tasks.
    pub fn on_event(&self, event: &OsEvent) -> Vec<JoinHandle<()>> {
        let rules = self.rules();
        let kind = event.kind();
        let mut handles = Vec::new();

        for rule in rules.iter().filter(|r| r.enabled && r.trigger == kind) {
            if !self.subjects_match(rule, event) {
                continue;
            }

            debug!(rule_id = %rule.id, event = %kind, "Rule matched");
            let engine = self.clone();
            let rule = rule.clone();
            let event = event.clone();
            handles.push(tokio::spawn(async move {
                engine.apply(rule, event).await;
            }));
        }

        handles
    }

    fn subjects_match(&self, rule: &Rule, event: &OsEvent) -> bool {
        let Some(terminated) = event.subject() else {
            return true;
        };
        if rule.subjects.is_empty() {
            return true;
        }
        rule.subjects
            .iter()
            .filter_map(|key| self.inner.catalog.resolve(key))
            .any(|subject| subject.identifies(terminated))
    }

    fn settings(&self) -> RuleSettings {
        *self.inner.settings.read().unwrap_or_else(|e| e.into_inner())
    }

    async fn apply(&self, rule: Rule, event: OsEvent) {
        let outcome = match &rule.action {
            Action::RestartCompanion { companion, guard } => {
                self.restart_companion(companion, guard).await
            }
            Action::ForceQuitNamedService { service, exclude } => {
                self.force_quit_service(service, exclude, event.subject()).await
            }
            Action::CleanupOrphanedHelpers { helpers, aliases } => match event.subject() {
                Some(terminated) => self.cleanup_helpers(helpers, aliases, terminated).await,
                None => Outcome::Skipped("no terminated app"),
            },
            Action::LaunchIfAbsent { app } => self.launch_if_absent(app).await,
            Action::AlertHighCpu {
                process,
                threshold_percent,
                sustained,
            } => {
                self.alert_high_cpu(&rule.id, process, *threshold_percent, *sustained)
                    .await
            }
        };

        self.report(&rule.id, outcome).await;
    }

    async fn report(&self, rule_id: &RuleId, outcome: Outcome) {
        match outcome {
            Outcome::Skipped(reason) => {
                debug!(rule_id = %rule_id, reason, "Rule skipped");
            }
            Outcome::Done {
                log,
                notification,
                success,
            } => {
                let reporter = &self.inner.reporter;
                reporter.log(LogSource::Rule, &log);
                if let Some((title, body)) = notification
                    && self.settings().notify_on_rule
                {
                    reporter.notify(title, &body).await;
                }
                reporter.emit(CoreEvent::RuleApplied {
                    rule_id: rule_id.clone(),
                    success,
                    summary: log,
                });
            }
        }
    }

    async fn restart_companion(&self, companion: &AppKey, guard: &AppKey) -> Outcome {
        let catalog = &self.inner.catalog;
        let (Some(companion), Some(guard)) = (catalog.resolve(companion), catalog.resolve(guard))
        else {
            return Outcome::Skipped("unknown app");
        };

        let directory = self.inner.executor.directory();
        if !directory.is_running(&guard) {
            debug!(guard = %guard, "Guard not running, companion left alone");
            return Outcome::Skipped("guard not running");
        }

        let instances = directory.instances(&companion);
        if instances.is_empty() {
            debug!(companion = %companion, "Companion not running, nothing to restart");
            return Outcome::Skipped("companion not running");
        }
        for instance in instances {
            directory.terminate(&instance, false).await;
        }

        let name = &companion.display_name;
        match self.inner.executor.restart_with_poll(&companion).await {
            Ok(()) => {
                Outcome::applied(format!("{} restarted", name), format!("{} restarted", name))
            }
            Err(ActionError::LaunchFailed { reason, .. }) => {
                warn!(app = %name, reason = %reason, "Restart failed");
                Outcome::failed_visibly(format!("{} restart failed", name))
            }
            Err(e) => {
                warn!(app = %name, error = %e, "Restart failed");
                Outcome::failed_silently(format!("{} restart failed", name))
            }
        }
    }

    /// Wait for OS teardown, then confirm no sibling instance survives
    async fn settle(&self, terminated: &AppDescriptor) -> bool {
        tokio::time::sleep(self.settings().settle_delay).await;
        let sibling = !self.inner.executor.directory().instances(terminated).is_empty();
        if sibling {
            debug!(app = %terminated, "Another instance is still running");
        }
        !sibling
    }

    async fn force_quit_service(
        &self,
        service: &str,
        exclude: &[String],
        terminated: Option<&AppDescriptor>,
    ) -> Outcome {
        if let Some(terminated) = terminated
            && !self.settle(terminated).await
        {
            return Outcome::Skipped("sibling instance running");
        }

        let results = self
            .inner
            .executor
            .escalating_quit(|p| {
                p.name.contains(service) && !exclude.iter().any(|e| p.name.contains(e.as_str()))
            })
            .await;

        quit_outcome(&results, |name| {
            Outcome::applied(format!("Quit {}", name), format!("{} quit", name))
        })
    }

    async fn cleanup_helpers(
        &self,
        helpers: &[String],
        aliases: &BTreeMap<String, String>,
        terminated: &AppDescriptor,
    ) -> Outcome {
        if !self.settle(terminated).await {
            return Outcome::Skipped("sibling instance running");
        }

        let app_name = aliases
            .get(&terminated.display_name)
            .map(String::as_str)
            .unwrap_or(&terminated.display_name);

        let results = self
            .inner
            .executor
            .escalating_quit(|p| {
                p.name.contains(app_name) && helpers.iter().any(|h| p.name.contains(h.as_str()))
            })
            .await;

        quit_outcome(&results, |name| {
            Outcome::applied(
                format!("Clean up {} remains.", name),
                format!("{} helpers quit", name),
            )
        })
    }

    async fn launch_if_absent(&self, app: &AppKey) -> Outcome {
        let Some(app) = self.inner.catalog.resolve(app) else {
            return Outcome::Skipped("unknown app");
        };
        if self.inner.executor.directory().is_running(&app) {
            return Outcome::Skipped("already running");
        }

        let name = &app.display_name;
        match self.inner.executor.launch(&app).await {
            Ok(()) => Outcome::applied(format!("{} started", name), format!("{} started", name)),
            Err(e) => {
                warn!(app = %name, error = %e, "Launch failed");
                Outcome::failed_visibly(format!("{} start failed", name))
            }
        }
    }

    async fn alert_high_cpu(
        &self,
        rule_id: &RuleId,
        process: &str,
        threshold: f64,
        sustained: Duration,
    ) -> Outcome {
        let target = self
            .inner
            .executor
            .directory()
            .running()
            .into_iter()
            .find(|p| p.name == process);

        let reading = match target {
            Some(p) => match self.sample_cpu(&p).await {
                Ok(reading) => reading,
                Err(e) => {
                    self.clear_cpu_counter(rule_id);
                    return Outcome::failed_visibly(e.to_string());
                }
            },
            None => None,
        };

        let now = Instant::now();
        let mut above_since = self
            .inner
            .cpu_above_since
            .lock()
            .unwrap_or_else(|e| e.into_inner());

        match reading {
            Some(percent) if percent > threshold => {
                let since = *above_since.entry(rule_id.clone()).or_insert(now);
                if now.duration_since(since) >= sustained {
                    above_since.remove(rule_id);
                    let message = format!("{} uses high CPU!", process);
                    Outcome::Done {
                        notification: Some((TITLE_HIGH_CPU, message.clone())),
                        log: message,
                        success: true,
                    }
                } else {
                    Outcome::Skipped("below sustained duration")
                }
            }
            _ => {
                above_since.remove(rule_id);
                Outcome::Skipped("below threshold")
            }
        }
    }

    fn clear_cpu_counter(&self, rule_id: &RuleId) {
        self.inner
            .cpu_above_since
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .remove(rule_id);
    }

    /// CPU percentage of `process`, `None` when it vanished or the output
    /// could not be parsed
    async fn sample_cpu(&self, process: &ProcessInfo) -> Result<Option<f64>, ActionError> {
        let command = format!("ps -o %cpu= -p {}", process.pid);
        let timeout = self.inner.executor.settings().command_timeout;
        match self.inner.executor.runner().run(&command, timeout).await {
            Ok(output) => Ok(output.stdout.trim().parse::<f64>().ok()),
            Err(CommandError::TimedOut { timeout, .. }) => {
                Err(ActionError::CommandTimedOut { command, timeout })
            }
            Err(e) => {
                debug!(pid = process.pid, error = %e, "CPU sample failed");
                Ok(None)
            }
        }
    }
}

/// Fold per-process quit results into a single outcome named after the first
/// matched process
fn quit_outcome(
    results: &[(ProcessInfo, Result<QuitStep, ActionError>)],
    on_success: impl Fn(&str) -> Outcome,
) -> Outcome {
    let Some((first, _)) = results.first() else {
        return Outcome::Skipped("no matching process");
    };
    let name = first.name.as_str();

    for (process, result) in results {
        match result {
            Ok(step) => debug!(pid = process.pid, ?step, "Process quit"),
            Err(e) => warn!(pid = process.pid, error = %e, "Process quit failed"),
        }
    }

    let timed_out = results.iter().find_map(|(_, r)| match r {
        Err(e @ ActionError::CommandTimedOut { .. }) => Some(e),
        _ => None,
    });
    if let Some(e) = timed_out {
        return Outcome::failed_visibly(e.to_string());
    }
    if results.iter().any(|(_, r)| r.is_err()) {
        return Outcome::failed_silently(format!("Can not quit {}.", name));
    }
    on_success(name)
}
