//! Store trait definitions

use chrono::{DateTime, Local};
use serde::{Deserialize, Serialize};

use crate::{LogEntry, StoreResult};

/// Main store trait
pub trait Store: Send + Sync {
    // Event log

    /// Append an entry to the event log
    fn append_log(&self, entry: LogEntry) -> StoreResult<()>;

    /// Most recent entries, newest first
    fn recent_logs(&self, limit: usize) -> StoreResult<Vec<LogEntry>>;

    /// Remove every log entry
    fn clear_logs(&self) -> StoreResult<()>;

    // Schedule state

    /// Load the persisted state of a scheduled task
    fn load_schedule(&self, task: &str) -> StoreResult<Option<ScheduleSnapshot>>;

    /// Persist the state of a scheduled task
    fn save_schedule(&self, task: &str, snapshot: &ScheduleSnapshot) -> StoreResult<()>;

    // Health

    fn is_healthy(&self) -> bool;
}

/// Persisted state of a periodic task
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ScheduleSnapshot {
    /// Last completed run. `None` means the task never ran.
    pub last_completed_at: Option<DateTime<Local>>,

    /// Short summary of the last outcome
    #[serde(default)]
    pub last_outcome: Option<String>,
}
