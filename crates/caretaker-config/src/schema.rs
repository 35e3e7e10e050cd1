//! Raw configuration schema (as parsed from TOML)

use caretaker_api::{EventKind, Frequency};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::PathBuf;

/// Raw configuration as parsed from TOML
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RawConfig {
    /// Config schema version
    pub config_version: u32,

    /// Service-level settings
    #[serde(default)]
    pub service: RawServiceConfig,

    /// User notification settings
    #[serde(default)]
    pub notifications: RawNotifications,

    /// Well-known applications referenced by rules
    #[serde(default)]
    pub apps: Vec<RawApp>,

    /// Remediation rules, in evaluation order
    #[serde(default)]
    pub rules: Vec<RawRule>,

    /// Periodic maintenance task
    #[serde(default)]
    pub maintenance: RawMaintenance,
}

/// Service-level settings
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct RawServiceConfig {
    /// Data directory for the store
    pub data_dir: Option<PathBuf>,

    /// Shell used to run commands (default: /bin/sh)
    pub shell: Option<PathBuf>,

    /// Default hard timeout for external commands
    pub command_timeout_seconds: Option<u64>,

    /// Interval between timer ticks delivered to rules
    pub rule_tick_seconds: Option<u64>,

    /// Delay before cleanup actions run after a termination
    pub settle_delay_ms: Option<u64>,

    /// Poll interval while waiting for a restarted app to exit
    pub restart_poll_ms: Option<u64>,

    /// Upper bound on that wait
    pub restart_max_wait_seconds: Option<u64>,

    /// Process table poll interval for the event source
    pub process_poll_ms: Option<u64>,
}

/// Notification settings
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct RawNotifications {
    pub enabled: Option<bool>,

    /// Notify when a rule is applied
    pub notify_on_rule: Option<bool>,
}

/// Raw application reference
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RawApp {
    /// Key used by rules to refer to this app
    pub key: String,

    /// Display name as reported by the process table
    pub name: String,

    /// Executable or .desktop file
    pub location: PathBuf,

    /// Stable identity; derived from the location when omitted
    pub bundle_id: Option<String>,
}

/// Raw rule definition
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RawRule {
    pub id: String,

    pub trigger: EventKind,

    #[serde(default = "default_true")]
    pub enabled: bool,

    /// App keys; empty matches any app
    #[serde(default)]
    pub subjects: Vec<String>,

    pub action: RawAction,
}

/// Raw action definition
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum RawAction {
    RestartCompanion {
        companion: String,
        guard: String,
    },
    ForceQuitNamedService {
        service: String,
        #[serde(default)]
        exclude: Vec<String>,
    },
    CleanupOrphanedHelpers {
        helpers: Vec<String>,
        #[serde(default)]
        aliases: BTreeMap<String, String>,
    },
    LaunchIfAbsent {
        app: String,
    },
    AlertHighCpu {
        process: String,
        threshold_percent: f64,
        sustained_seconds: u64,
    },
}

/// Raw maintenance task settings
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct RawMaintenance {
    pub enabled: Option<bool>,

    pub frequency: Option<Frequency>,

    /// Time of day as "HH:MM"
    pub time: Option<String>,

    /// Weekday name for weekly schedules
    pub weekday: Option<String>,

    /// Run before the check, e.g. to refresh package metadata
    pub refresh_command: Option<String>,

    /// Prints one pending update per line
    pub check_command: Option<String>,

    pub upgrade_command: Option<String>,

    /// Overrides the service command timeout for maintenance commands
    pub timeout_seconds: Option<u64>,
}

fn default_true() -> bool {
    true
}
