//! Config validation CLI tool
//!
//! Validates a caretaker configuration file and reports any errors.

use caretaker_api::{Action, Frequency};
use caretaker_config::ConfigError;
use caretaker_util::default_config_path;
use std::path::PathBuf;
use std::process::ExitCode;

fn main() -> ExitCode {
    let args: Vec<String> = std::env::args().collect();

    let config_path = match args.get(1) {
        Some(path) => PathBuf::from(path),
        None => {
            let default_path = default_config_path();
            eprintln!("Usage: validate-config [config-file]");
            eprintln!();
            eprintln!("Validates a caretaker configuration file.");
            eprintln!();
            eprintln!("If no path is provided, uses: {}", default_path.display());
            return ExitCode::from(2);
        }
    };

    if !config_path.exists() {
        eprintln!("Error: Configuration file not found: {}", config_path.display());
        return ExitCode::from(1);
    }

    match caretaker_config::load_config(&config_path) {
        Ok(policy) => {
            println!("✓ Configuration is valid");
            println!();
            println!("Summary:");
            println!("  Config version: {}", caretaker_config::CURRENT_CONFIG_VERSION);
            println!("  Apps: {}", policy.apps.len());
            println!("  Rules: {}", policy.rules.len());

            if !policy.rules.is_empty() {
                println!();
                println!("Rules:");
                for rule in &policy.rules {
                    let action = match &rule.action {
                        Action::RestartCompanion { companion, guard } => {
                            format!("restart {} (guard {})", companion, guard)
                        }
                        Action::ForceQuitNamedService { service, .. } => {
                            format!("force quit '{}'", service)
                        }
                        Action::CleanupOrphanedHelpers { helpers, .. } => {
                            format!("clean up {}", helpers.join(", "))
                        }
                        Action::LaunchIfAbsent { app } => format!("launch {}", app),
                        Action::AlertHighCpu {
                            process,
                            threshold_percent,
                            ..
                        } => format!("cpu alert {} > {}%", process, threshold_percent),
                    };
                    let state = if rule.enabled { "" } else { " (disabled)" };
                    println!("  - {} [{}]: {}{}", rule.id, rule.trigger, action, state);
                }
            }

            let schedule = policy.maintenance.schedule;
            let when = match schedule.frequency {
                Frequency::Hourly => "hourly".to_string(),
                Frequency::Daily => format!("daily at {}", schedule.time_of_day),
                Frequency::Weekly => {
                    format!("weekly on {} at {}", schedule.weekday, schedule.time_of_day)
                }
            };
            println!();
            println!(
                "Maintenance: {}{}",
                when,
                if schedule.enabled { "" } else { " (disabled)" }
            );
            println!("  check: {}", policy.maintenance.check_command);

            ExitCode::SUCCESS
        }
        Err(e) => {
            eprintln!("✗ Configuration validation failed");
            eprintln!();
            match &e {
                ConfigError::ReadError(io_err) => {
                    eprintln!("Failed to read file: {}", io_err);
                }
                ConfigError::ParseError(parse_err) => {
                    eprintln!("TOML parse error:");
                    eprintln!("  {}", parse_err);
                }
                ConfigError::ValidationFailed { errors } => {
                    eprintln!("Validation errors ({}):", errors.len());
                    for err in errors {
                        eprintln!("  - {}", err);
                    }
                }
                ConfigError::UnsupportedVersion(ver) => {
                    eprintln!(
                        "Unsupported config version: {} (expected {})",
                        ver,
                        caretaker_config::CURRENT_CONFIG_VERSION
                    );
                }
            }
            ExitCode::from(1)
        }
    }
}
