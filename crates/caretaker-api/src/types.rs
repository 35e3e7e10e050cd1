//! Shared domain types

use caretaker_util::{AppKey, RuleId, WallClock};
use chrono::Weekday;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

/// A resolved application reference.
///
/// Identity is `bundle_id`; `display_name` is what the OS reports as the
/// process name and `location` is where the application is launched from.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppDescriptor {
    pub display_name: String,
    pub location: PathBuf,
    pub bundle_id: String,
}

impl AppDescriptor {
    pub fn new(
        display_name: impl Into<String>,
        location: impl Into<PathBuf>,
        bundle_id: impl Into<String>,
    ) -> Self {
        Self {
            display_name: display_name.into(),
            location: location.into(),
            bundle_id: bundle_id.into(),
        }
    }

    /// Whether this descriptor, used as a rule subject, identifies `other`.
    ///
    /// Matches on equal bundle ids, or when `other`'s display name contains
    /// this display name. Comparison is case-sensitive.
    pub fn identifies(&self, other: &AppDescriptor) -> bool {
        if !self.bundle_id.is_empty() && self.bundle_id == other.bundle_id {
            return true;
        }
        !self.display_name.is_empty() && other.display_name.contains(&self.display_name)
    }
}

impl PartialEq for AppDescriptor {
    fn eq(&self, other: &Self) -> bool {
        self.bundle_id == other.bundle_id
    }
}

impl Eq for AppDescriptor {}

impl fmt::Display for AppDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.display_name)
    }
}

/// Kind of OS-level event a rule can be bound to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    ProcessTerminated,
    SystemWillSleep,
    SystemDidWake,
    TimerTick,
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            EventKind::ProcessTerminated => "process_terminated",
            EventKind::SystemWillSleep => "system_will_sleep",
            EventKind::SystemDidWake => "system_did_wake",
            EventKind::TimerTick => "timer_tick",
        };
        f.write_str(s)
    }
}

/// Tag of a remediation action, without its parameters
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionKind {
    RestartCompanion,
    ForceQuitNamedService,
    CleanupOrphanedHelpers,
    LaunchIfAbsent,
    AlertHighCpu,
}

/// A remediation action with its parameters
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Action {
    /// Restart `companion` once `guard` is confirmed running
    RestartCompanion { companion: AppKey, guard: AppKey },

    /// Escalating quit of every process whose name contains `service`,
    /// skipping names that contain an `exclude` entry
    ForceQuitNamedService {
        service: String,
        #[serde(default)]
        exclude: Vec<String>,
    },

    /// Escalating quit of helper processes left behind by the terminated app
    CleanupOrphanedHelpers {
        helpers: Vec<String>,
        /// Terminated display name -> process-name prefix used by its helpers
        #[serde(default)]
        aliases: BTreeMap<String, String>,
    },

    /// Launch `app` when it is not running
    LaunchIfAbsent { app: AppKey },

    /// Alert when `process` stays above `threshold_percent` CPU for `sustained`
    AlertHighCpu {
        process: String,
        threshold_percent: f64,
        sustained: Duration,
    },
}

impl Action {
    pub fn kind(&self) -> ActionKind {
        match self {
            Action::RestartCompanion { .. } => ActionKind::RestartCompanion,
            Action::ForceQuitNamedService { .. } => ActionKind::ForceQuitNamedService,
            Action::CleanupOrphanedHelpers { .. } => ActionKind::CleanupOrphanedHelpers,
            Action::LaunchIfAbsent { .. } => ActionKind::LaunchIfAbsent,
            Action::AlertHighCpu { .. } => ActionKind::AlertHighCpu,
        }
    }
}

/// A configured (trigger, action, subjects) tuple
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Rule {
    pub id: RuleId,
    pub trigger: EventKind,
    pub enabled: bool,
    /// Apps whose termination triggers the rule. Empty matches any app.
    pub subjects: Vec<AppKey>,
    pub action: Action,
}

/// How often the maintenance task should run
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Frequency {
    #[default]
    Hourly,
    Daily,
    Weekly,
}

/// Maintenance schedule policy
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScheduleConfig {
    pub enabled: bool,
    pub frequency: Frequency,
    pub time_of_day: WallClock,
    pub weekday: Weekday,
}

impl Default for ScheduleConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            frequency: Frequency::Hourly,
            time_of_day: WallClock::default(),
            weekday: Weekday::Mon,
        }
    }
}

/// Notification permission as reported by the OS notification service
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PermissionStatus {
    NotDetermined,
    Denied,
    Authorized,
    Provisional,
}

impl PermissionStatus {
    pub fn allows_delivery(self) -> bool {
        matches!(self, PermissionStatus::Authorized | PermissionStatus::Provisional)
    }
}
