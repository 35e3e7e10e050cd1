//! Core events broadcast to observers

use caretaker_util::{RuleId, RunId};
use chrono::{DateTime, Local};

use crate::{RunKind, TaskOutcome};

/// Events emitted by the core
#[derive(Debug, Clone)]
pub enum CoreEvent {
    /// A rule's action finished
    RuleApplied {
        rule_id: RuleId,
        success: bool,
        summary: String,
    },

    /// A maintenance run started
    TaskStarted { run_id: RunId, kind: RunKind },

    /// A maintenance run finished and its outcome was recorded
    TaskCompleted {
        run_id: RunId,
        kind: RunKind,
        outcome: TaskOutcome,
        last_completed_at: Option<DateTime<Local>>,
    },

    /// A maintenance run was cancelled before completing
    TaskCancelled { run_id: RunId, kind: RunKind },

    /// The user has disabled notifications
    NotificationsDenied,

    /// Configuration was reloaded
    PolicyReloaded { rule_count: usize },
}
