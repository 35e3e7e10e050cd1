//! Configuration parsing and validation for caretaker
//!
//! Supports TOML configuration with:
//! - Versioned schema
//! - Well-known app definitions
//! - Remediation rules bound to OS events
//! - Maintenance schedule and commands
//! - Validation with clear error messages

mod policy;
mod schema;
mod validation;

pub use policy::*;
pub use schema::*;
pub use validation::*;

use std::path::Path;
use thiserror::Error;

/// Configuration errors
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    ReadError(#[from] std::io::Error),

    #[error("Failed to parse TOML: {0}")]
    ParseError(#[from] toml::de::Error),

    #[error("Validation failed: {errors:?}")]
    ValidationFailed { errors: Vec<ValidationError> },

    #[error("Unsupported config version: {0}")]
    UnsupportedVersion(u32),
}

pub type ConfigResult<T> = Result<T, ConfigError>;

/// Current supported config version
pub const CURRENT_CONFIG_VERSION: u32 = 1;

/// Load and validate configuration from a TOML file
pub fn load_config(path: impl AsRef<Path>) -> ConfigResult<Policy> {
    let path = path.as_ref();
    let content = std::fs::read_to_string(path)?;
    let policy = parse_config(&content)?;
    tracing::debug!(
        path = %path.display(),
        apps = policy.apps.len(),
        rules = policy.rules.len(),
        "Loaded configuration"
    );
    Ok(policy)
}

/// Parse and validate configuration from a TOML string
pub fn parse_config(content: &str) -> ConfigResult<Policy> {
    let raw: RawConfig = toml::from_str(content)?;

    if raw.config_version != CURRENT_CONFIG_VERSION {
        return Err(ConfigError::UnsupportedVersion(raw.config_version));
    }

    let errors = validate_config(&raw);
    if !errors.is_empty() {
        return Err(ConfigError::ValidationFailed { errors });
    }

    Ok(Policy::from_raw(raw))
}

#[cfg(test)]
mod tests {
    use super::*;
    use caretaker_api::{Action, EventKind, Frequency};
    use caretaker_util::{AppKey, WallClock};
    use chrono::Weekday;
    use std::io::Write;
    use std::time::Duration;

    const SAMPLE: &str = r#"
        config_version = 1

        [service]
        rule_tick_seconds = 10
        settle_delay_ms = 1500

        [notifications]
        notify_on_rule = false

        [[apps]]
        key = "settings"
        name = "gnome-control-center"
        location = "/usr/share/applications/org.gnome.Settings.desktop"

        [[apps]]
        key = "switcher"
        name = "switcher"
        location = "/usr/bin/switcher"
        bundle_id = "com.example.switcher"

        [[rules]]
        id = "restart-switcher"
        trigger = "process_terminated"
        subjects = ["settings"]
        action = { type = "restart_companion", companion = "switcher", guard = "settings" }

        [[rules]]
        id = "quit-sync"
        trigger = "system_will_sleep"
        enabled = false
        action = { type = "force_quit_named_service", service = "syncd", exclude = ["syncd-agent"] }

        [[rules]]
        id = "cpu"
        trigger = "timer_tick"
        action = { type = "alert_high_cpu", process = "Xorg", threshold_percent = 90.0, sustained_seconds = 120 }

        [maintenance]
        frequency = "weekly"
        time = "07:30"
        weekday = "friday"
        check_command = "apt list --upgradable"
    "#;

    #[test]
    fn parse_full_config() {
        let policy = parse_config(SAMPLE).unwrap();

        assert_eq!(policy.apps.len(), 2);
        assert_eq!(policy.rules.len(), 3);
        assert_eq!(policy.enabled_rules().count(), 2);
        assert_eq!(policy.service.rule_tick, Duration::from_secs(10));
        assert_eq!(policy.service.settle_delay, Duration::from_millis(1500));
        assert_eq!(policy.service.restart_poll, Duration::from_millis(200));
        assert!(policy.notifications.enabled);
        assert!(!policy.notifications.notify_on_rule);

        let rule = &policy.rules[0];
        assert_eq!(rule.trigger, EventKind::ProcessTerminated);
        assert_eq!(rule.subjects, vec![AppKey::new("settings")]);
        assert!(matches!(rule.action, Action::RestartCompanion { .. }));

        match &policy.rules[2].action {
            Action::AlertHighCpu { sustained, .. } => {
                assert_eq!(*sustained, Duration::from_secs(120))
            }
            other => panic!("unexpected action {:?}", other),
        }

        let schedule = policy.maintenance.schedule;
        assert_eq!(schedule.frequency, Frequency::Weekly);
        assert_eq!(schedule.time_of_day, WallClock::new(7, 30).unwrap());
        assert_eq!(schedule.weekday, Weekday::Fri);
        assert_eq!(policy.maintenance.check_command, "apt list --upgradable");
        assert_eq!(policy.maintenance.refresh_command, None);
        assert_eq!(policy.maintenance.timeout, Duration::from_secs(600));
    }

    #[test]
    fn defaults_for_minimal_config() {
        let policy = parse_config("config_version = 1").unwrap();
        assert!(policy.rules.is_empty());
        assert!(policy.maintenance.schedule.enabled);
        assert_eq!(policy.maintenance.schedule.frequency, Frequency::Hourly);
        assert_eq!(
            policy.maintenance.refresh_command.as_deref(),
            Some("brew update")
        );
        assert_eq!(policy.maintenance.check_command, "brew outdated --quiet");
    }

    #[test]
    fn reject_wrong_version() {
        let result = parse_config("config_version = 99");
        assert!(matches!(result, Err(ConfigError::UnsupportedVersion(99))));
    }

    #[test]
    fn reject_unknown_trigger() {
        let config = r#"
            config_version = 1

            [[rules]]
            id = "x"
            trigger = "on_login"
            action = { type = "force_quit_named_service", service = "a" }
        "#;
        assert!(matches!(
            parse_config(config),
            Err(ConfigError::ParseError(_))
        ));
    }

    #[test]
    fn load_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(SAMPLE.as_bytes()).unwrap();

        let policy = load_config(file.path()).unwrap();
        assert_eq!(policy.rules.len(), 3);
        assert!(load_config("/nonexistent/caretaker.toml").is_err());
    }
}
