//! Validated policy structures

use crate::schema::{
    RawAction, RawApp, RawConfig, RawMaintenance, RawNotifications, RawRule, RawServiceConfig,
};
use crate::validation::{parse_time, parse_weekday};
use caretaker_api::{Action, Rule, ScheduleConfig};
use caretaker_util::{AppKey, RuleId, WallClock, default_data_dir};
use std::path::PathBuf;
use std::time::Duration;

const DEFAULT_COMMAND_TIMEOUT: Duration = Duration::from_secs(600);

/// Validated policy ready for use by the core
#[derive(Debug, Clone, Default)]
pub struct Policy {
    pub service: ServiceConfig,
    pub notifications: NotificationConfig,
    pub apps: Vec<AppEntry>,
    /// Rules in declaration order
    pub rules: Vec<Rule>,
    pub maintenance: MaintenanceConfig,
}

impl Policy {
    /// Convert from raw config (after validation)
    pub fn from_raw(raw: RawConfig) -> Self {
        let service = ServiceConfig::from_raw(raw.service);
        let maintenance = MaintenanceConfig::from_raw(raw.maintenance, service.command_timeout);

        Self {
            notifications: NotificationConfig::from_raw(raw.notifications),
            apps: raw.apps.into_iter().map(AppEntry::from_raw).collect(),
            rules: raw.rules.into_iter().map(convert_rule).collect(),
            service,
            maintenance,
        }
    }

    pub fn enabled_rules(&self) -> impl Iterator<Item = &Rule> {
        self.rules.iter().filter(|r| r.enabled)
    }
}

/// Service configuration
#[derive(Debug, Clone)]
pub struct ServiceConfig {
    pub data_dir: PathBuf,
    pub shell: PathBuf,
    pub command_timeout: Duration,
    pub rule_tick: Duration,
    pub settle_delay: Duration,
    pub restart_poll: Duration,
    pub restart_max_wait: Duration,
    pub process_poll: Duration,
}

impl ServiceConfig {
    fn from_raw(raw: RawServiceConfig) -> Self {
        let defaults = Self::default();
        Self {
            data_dir: raw.data_dir.unwrap_or(defaults.data_dir),
            shell: raw.shell.unwrap_or(defaults.shell),
            command_timeout: raw
                .command_timeout_seconds
                .map(Duration::from_secs)
                .unwrap_or(defaults.command_timeout),
            rule_tick: raw
                .rule_tick_seconds
                .map(Duration::from_secs)
                .unwrap_or(defaults.rule_tick),
            settle_delay: raw
                .settle_delay_ms
                .map(Duration::from_millis)
                .unwrap_or(defaults.settle_delay),
            restart_poll: raw
                .restart_poll_ms
                .map(Duration::from_millis)
                .unwrap_or(defaults.restart_poll),
            restart_max_wait: raw
                .restart_max_wait_seconds
                .map(Duration::from_secs)
                .unwrap_or(defaults.restart_max_wait),
            process_poll: raw
                .process_poll_ms
                .map(Duration::from_millis)
                .unwrap_or(defaults.process_poll),
        }
    }
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            data_dir: default_data_dir(),
            shell: PathBuf::from("/bin/sh"),
            command_timeout: DEFAULT_COMMAND_TIMEOUT,
            rule_tick: Duration::from_secs(5),
            settle_delay: Duration::from_millis(2000),
            restart_poll: Duration::from_millis(200),
            restart_max_wait: Duration::from_secs(30),
            process_poll: Duration::from_millis(500),
        }
    }
}

/// Notification configuration
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NotificationConfig {
    pub enabled: bool,
    pub notify_on_rule: bool,
}

impl NotificationConfig {
    fn from_raw(raw: RawNotifications) -> Self {
        Self {
            enabled: raw.enabled.unwrap_or(true),
            notify_on_rule: raw.notify_on_rule.unwrap_or(true),
        }
    }
}

impl Default for NotificationConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            notify_on_rule: true,
        }
    }
}

/// A well-known application, not yet resolved
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AppEntry {
    pub key: AppKey,
    pub name: String,
    pub location: PathBuf,
    pub bundle_id: Option<String>,
}

impl AppEntry {
    fn from_raw(raw: RawApp) -> Self {
        Self {
            key: AppKey::new(raw.key),
            name: raw.name,
            location: raw.location,
            bundle_id: raw.bundle_id,
        }
    }
}

/// Maintenance task configuration
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MaintenanceConfig {
    pub schedule: ScheduleConfig,
    pub refresh_command: Option<String>,
    pub check_command: String,
    pub upgrade_command: String,
    pub timeout: Duration,
}

impl MaintenanceConfig {
    fn from_raw(raw: RawMaintenance, default_timeout: Duration) -> Self {
        let defaults = ScheduleConfig::default();
        let time_of_day = raw
            .time
            .as_deref()
            .and_then(|t| parse_time(t).ok())
            .and_then(|(h, m)| WallClock::new(h, m))
            .unwrap_or(defaults.time_of_day);
        let weekday = raw
            .weekday
            .as_deref()
            .and_then(|d| parse_weekday(d).ok())
            .unwrap_or(defaults.weekday);

        Self {
            schedule: ScheduleConfig {
                enabled: raw.enabled.unwrap_or(defaults.enabled),
                frequency: raw.frequency.unwrap_or(defaults.frequency),
                time_of_day,
                weekday,
            },
            refresh_command: match raw.refresh_command {
                Some(cmd) => Some(cmd),
                None if raw.check_command.is_none() => Some("brew update".into()),
                None => None,
            },
            check_command: raw
                .check_command
                .unwrap_or_else(|| "brew outdated --quiet".into()),
            upgrade_command: raw.upgrade_command.unwrap_or_else(|| "brew upgrade".into()),
            timeout: raw
                .timeout_seconds
                .map(Duration::from_secs)
                .unwrap_or(default_timeout),
        }
    }
}

impl Default for MaintenanceConfig {
    fn default() -> Self {
        Self::from_raw(RawMaintenance::default(), DEFAULT_COMMAND_TIMEOUT)
    }
}

fn convert_rule(raw: RawRule) -> Rule {
    Rule {
        id: RuleId::new(raw.id),
        trigger: raw.trigger,
        enabled: raw.enabled,
        subjects: raw.subjects.into_iter().map(AppKey::new).collect(),
        action: convert_action(raw.action),
    }
}

fn convert_action(raw: RawAction) -> Action {
    match raw {
        RawAction::RestartCompanion { companion, guard } => Action::RestartCompanion {
            companion: AppKey::new(companion),
            guard: AppKey::new(guard),
        },
        RawAction::ForceQuitNamedService { service, exclude } => {
            Action::ForceQuitNamedService { service, exclude }
        }
        RawAction::CleanupOrphanedHelpers { helpers, aliases } => {
            Action::CleanupOrphanedHelpers { helpers, aliases }
        }
        RawAction::LaunchIfAbsent { app } => Action::LaunchIfAbsent {
            app: AppKey::new(app),
        },
        RawAction::AlertHighCpu {
            process,
            threshold_percent,
            sustained_seconds,
        } => Action::AlertHighCpu {
            process,
            threshold_percent,
            sustained: Duration::from_secs(sustained_seconds),
        },
    }
}
