//! OS lifecycle events delivered to the core

use serde::{Deserialize, Serialize};

use crate::{AppDescriptor, EventKind};

/// An observed OS event. No payload beyond process identity is carried.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum OsEvent {
    /// An application process has terminated
    ProcessTerminated { app: AppDescriptor },

    /// The system is about to sleep
    SystemWillSleep,

    /// The system woke from sleep
    SystemDidWake,

    /// Periodic tick driving timer rules
    TimerTick,
}

impl OsEvent {
    pub fn kind(&self) -> EventKind {
        match self {
            OsEvent::ProcessTerminated { .. } => EventKind::ProcessTerminated,
            OsEvent::SystemWillSleep => EventKind::SystemWillSleep,
            OsEvent::SystemDidWake => EventKind::SystemDidWake,
            OsEvent::TimerTick => EventKind::TimerTick,
        }
    }

    /// The terminated app, for `ProcessTerminated`
    pub fn subject(&self) -> Option<&AppDescriptor> {
        match self {
            OsEvent::ProcessTerminated { app } => Some(app),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn terminated_event_carries_subject() {
        let app = AppDescriptor::new("Safari", "/Applications/Safari.app", "com.apple.Safari");
        let event = OsEvent::ProcessTerminated { app: app.clone() };
        assert_eq!(event.kind(), EventKind::ProcessTerminated);
        assert_eq!(event.subject(), Some(&app));
        assert_eq!(OsEvent::SystemDidWake.subject(), None);
    }
}
