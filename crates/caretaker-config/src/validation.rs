//! Configuration validation

use crate::schema::{RawAction, RawConfig, RawMaintenance, RawRule};
use caretaker_api::EventKind;
use chrono::Weekday;
use std::collections::HashSet;
use thiserror::Error;

/// Validation error
#[derive(Debug, Clone, Error)]
pub enum ValidationError {
    #[error("Rule '{rule_id}': {message}")]
    RuleError { rule_id: String, message: String },

    #[error("App '{key}': {message}")]
    AppError { key: String, message: String },

    #[error("Duplicate rule ID: {0}")]
    DuplicateRuleId(String),

    #[error("Duplicate app key: {0}")]
    DuplicateAppKey(String),

    #[error("Invalid time format '{value}': {message}")]
    InvalidTimeFormat { value: String, message: String },

    #[error("Invalid weekday: {0}")]
    InvalidWeekday(String),

    #[error("Maintenance config error: {0}")]
    MaintenanceError(String),

    #[error("Service config error: {0}")]
    ServiceError(String),
}

/// Validate a raw configuration
pub fn validate_config(config: &RawConfig) -> Vec<ValidationError> {
    let mut errors = Vec::new();

    let mut app_keys = HashSet::new();
    for app in &config.apps {
        if !app_keys.insert(app.key.as_str()) {
            errors.push(ValidationError::DuplicateAppKey(app.key.clone()));
        }
        if app.name.is_empty() {
            errors.push(ValidationError::AppError {
                key: app.key.clone(),
                message: "name cannot be empty".into(),
            });
        }
        if app.location.as_os_str().is_empty() {
            errors.push(ValidationError::AppError {
                key: app.key.clone(),
                message: "location cannot be empty".into(),
            });
        }
    }

    let mut rule_ids = HashSet::new();
    for rule in &config.rules {
        if !rule_ids.insert(rule.id.as_str()) {
            errors.push(ValidationError::DuplicateRuleId(rule.id.clone()));
        }
        errors.extend(validate_rule(rule, &app_keys));
    }

    errors.extend(validate_maintenance(&config.maintenance));

    let service = &config.service;
    for (name, value) in [
        ("command_timeout_seconds", service.command_timeout_seconds),
        ("rule_tick_seconds", service.rule_tick_seconds),
        ("restart_poll_ms", service.restart_poll_ms),
        ("process_poll_ms", service.process_poll_ms),
    ] {
        if value == Some(0) {
            errors.push(ValidationError::ServiceError(format!(
                "{} must be positive",
                name
            )));
        }
    }

    errors
}

fn validate_rule(rule: &RawRule, app_keys: &HashSet<&str>) -> Vec<ValidationError> {
    let mut errors = Vec::new();
    let mut rule_error = |message: String| {
        errors.push(ValidationError::RuleError {
            rule_id: rule.id.clone(),
            message,
        });
    };

    for subject in &rule.subjects {
        if !app_keys.contains(subject.as_str()) {
            rule_error(format!("unknown subject app '{}'", subject));
        }
    }

    match &rule.action {
        RawAction::RestartCompanion { companion, guard } => {
            for key in [companion, guard] {
                if !app_keys.contains(key.as_str()) {
                    rule_error(format!("unknown app '{}'", key));
                }
            }
        }
        RawAction::ForceQuitNamedService { service, exclude } => {
            if service.is_empty() {
                rule_error("service cannot be empty".into());
            }
            if exclude.iter().any(|e| e.is_empty()) {
                rule_error("exclude entries cannot be empty".into());
            }
        }
        RawAction::CleanupOrphanedHelpers { helpers, .. } => {
            if helpers.is_empty() || helpers.iter().any(|h| h.is_empty()) {
                rule_error("helpers must be a non-empty list of names".into());
            }
            if rule.trigger != EventKind::ProcessTerminated {
                rule_error(
                    "cleanup_orphaned_helpers requires the process_terminated trigger".into(),
                );
            }
        }
        RawAction::LaunchIfAbsent { app } => {
            if !app_keys.contains(app.as_str()) {
                rule_error(format!("unknown app '{}'", app));
            }
        }
        RawAction::AlertHighCpu {
            process,
            threshold_percent,
            sustained_seconds,
        } => {
            if process.is_empty() {
                rule_error("process cannot be empty".into());
            }
            if !(*threshold_percent > 0.0) {
                rule_error("threshold_percent must be positive".into());
            }
            if *sustained_seconds == 0 {
                rule_error("sustained_seconds must be positive".into());
            }
        }
    }

    errors
}

fn validate_maintenance(maintenance: &RawMaintenance) -> Vec<ValidationError> {
    let mut errors = Vec::new();

    if let Some(time) = &maintenance.time
        && let Err(e) = parse_time(time)
    {
        errors.push(ValidationError::InvalidTimeFormat {
            value: time.clone(),
            message: e,
        });
    }

    if let Some(weekday) = &maintenance.weekday
        && parse_weekday(weekday).is_err()
    {
        errors.push(ValidationError::InvalidWeekday(weekday.clone()));
    }

    for (name, command) in [
        ("refresh_command", &maintenance.refresh_command),
        ("check_command", &maintenance.check_command),
        ("upgrade_command", &maintenance.upgrade_command),
    ] {
        if command.as_deref().is_some_and(|c| c.trim().is_empty()) {
            errors.push(ValidationError::MaintenanceError(format!(
                "{} cannot be empty",
                name
            )));
        }
    }

    if maintenance.timeout_seconds == Some(0) {
        errors.push(ValidationError::MaintenanceError(
            "timeout_seconds must be positive".into(),
        ));
    }

    errors
}

/// Parse HH:MM time format
pub fn parse_time(s: &str) -> Result<(u8, u8), String> {
    let parts: Vec<&str> = s.split(':').collect();
    if parts.len() != 2 {
        return Err("Expected HH:MM format".into());
    }

    let hour: u8 = parts[0].parse().map_err(|_| "Invalid hour".to_string())?;
    let minute: u8 = parts[1]
        .parse()
        .map_err(|_| "Invalid minute".to_string())?;

    if hour >= 24 {
        return Err("Hour must be 0-23".into());
    }
    if minute >= 60 {
        return Err("Minute must be 0-59".into());
    }

    Ok((hour, minute))
}

/// Parse a weekday name ("mon", "Monday", ...)
pub fn parse_weekday(s: &str) -> Result<Weekday, String> {
    match s.to_lowercase().as_str() {
        "mon" | "monday" => Ok(Weekday::Mon),
        "tue" | "tuesday" => Ok(Weekday::Tue),
        "wed" | "wednesday" => Ok(Weekday::Wed),
        "thu" | "thursday" => Ok(Weekday::Thu),
        "fri" | "friday" => Ok(Weekday::Fri),
        "sat" | "saturday" => Ok(Weekday::Sat),
        "sun" | "sunday" => Ok(Weekday::Sun),
        other => Err(format!("Unknown day: {}", other)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::RawApp;

    fn base_config() -> RawConfig {
        RawConfig {
            config_version: 1,
            service: Default::default(),
            notifications: Default::default(),
            apps: vec![RawApp {
                key: "code".into(),
                name: "code".into(),
                location: "/usr/bin/code".into(),
                bundle_id: None,
            }],
            rules: vec![],
            maintenance: Default::default(),
        }
    }

    fn rule(id: &str, trigger: EventKind, action: RawAction) -> RawRule {
        RawRule {
            id: id.into(),
            trigger,
            enabled: true,
            subjects: vec![],
            action,
        }
    }

    #[test]
    fn test_parse_time() {
        assert_eq!(parse_time("09:00").unwrap(), (9, 0));
        assert_eq!(parse_time("23:59").unwrap(), (23, 59));

        assert!(parse_time("24:00").is_err());
        assert!(parse_time("12:60").is_err());
        assert!(parse_time("noon").is_err());
    }

    #[test]
    fn test_parse_weekday() {
        assert_eq!(parse_weekday("monday").unwrap(), Weekday::Mon);
        assert_eq!(parse_weekday("Sun").unwrap(), Weekday::Sun);
        assert!(parse_weekday("someday").is_err());
    }

    #[test]
    fn test_duplicate_rule_id_detection() {
        let mut config = base_config();
        let action = RawAction::ForceQuitNamedService {
            service: "nsurlsessiond".into(),
            exclude: vec![],
        };
        config.rules = vec![
            rule("quit", EventKind::SystemWillSleep, action.clone()),
            rule("quit", EventKind::SystemDidWake, action),
        ];

        let errors = validate_config(&config);
        assert!(
            errors
                .iter()
                .any(|e| matches!(e, ValidationError::DuplicateRuleId(_)))
        );
    }

    #[test]
    fn test_unknown_app_references() {
        let mut config = base_config();
        let mut restart = rule(
            "restart",
            EventKind::ProcessTerminated,
            RawAction::RestartCompanion {
                companion: "switcher".into(),
                guard: "code".into(),
            },
        );
        restart.subjects = vec!["browser".into()];
        config.rules = vec![restart];

        let errors = validate_config(&config);
        assert_eq!(errors.len(), 2);
    }

    #[test]
    fn test_cleanup_requires_termination_trigger() {
        let mut config = base_config();
        config.rules = vec![rule(
            "cleanup",
            EventKind::SystemDidWake,
            RawAction::CleanupOrphanedHelpers {
                helpers: vec!["Helper".into()],
                aliases: Default::default(),
            },
        )];

        let errors = validate_config(&config);
        assert_eq!(errors.len(), 1);
        assert!(errors[0].to_string().contains("process_terminated"));
    }

    #[test]
    fn test_cpu_threshold_must_be_positive() {
        let mut config = base_config();
        config.rules = vec![rule(
            "cpu",
            EventKind::TimerTick,
            RawAction::AlertHighCpu {
                process: "WindowServer".into(),
                threshold_percent: 0.0,
                sustained_seconds: 60,
            },
        )];

        assert_eq!(validate_config(&config).len(), 1);
    }

    #[test]
    fn test_maintenance_validation() {
        let mut config = base_config();
        config.maintenance.time = Some("9am".into());
        config.maintenance.weekday = Some("funday".into());
        config.maintenance.check_command = Some("  ".into());

        let errors = validate_config(&config);
        assert_eq!(errors.len(), 3);
    }
}
