//! Event log entries

use chrono::{DateTime, Local};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Which part of the service produced a log entry
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogSource {
    Rule,
    Maintenance,
    Service,
}

impl LogSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            LogSource::Rule => "rule",
            LogSource::Maintenance => "maintenance",
            LogSource::Service => "service",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "rule" => Some(LogSource::Rule),
            "maintenance" => Some(LogSource::Maintenance),
            "service" => Some(LogSource::Service),
            _ => None,
        }
    }
}

impl fmt::Display for LogSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A line in the event log
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogEntry {
    /// Row id, assigned on append
    pub id: i64,
    pub timestamp: DateTime<Local>,
    pub source: LogSource,
    pub message: String,
}

impl LogEntry {
    pub fn new(source: LogSource, message: impl Into<String>) -> Self {
        Self {
            id: 0,
            timestamp: caretaker_util::now(),
            source,
            message: message.into(),
        }
    }
}

impl fmt::Display for LogEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}: {}",
            self.timestamp.format("%Y-%m-%d %H:%M:%S"),
            self.message
        )
    }
}
