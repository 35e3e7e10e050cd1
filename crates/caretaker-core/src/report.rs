//! Outcome reporting to the event log and the user

use caretaker_host_api::NotifyError;
use caretaker_store::{LogEntry, LogSource, Store};
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::{info, warn};

use crate::notify::log_delivery_error;
use crate::{CoreEvent, NotificationGateway};

/// Writes outcomes to the event log and forwards user-facing messages to
/// the notification gateway. Never fails: collaborator errors are logged.
#[derive(Clone)]
pub struct Reporter {
    store: Arc<dyn Store>,
    gateway: Arc<NotificationGateway>,
    events: broadcast::Sender<CoreEvent>,
}

impl Reporter {
    pub fn new(
        store: Arc<dyn Store>,
        gateway: Arc<NotificationGateway>,
        events: broadcast::Sender<CoreEvent>,
    ) -> Self {
        Self {
            store,
            gateway,
            events,
        }
    }

    /// Append a line to the event log
    pub fn log(&self, source: LogSource, message: &str) {
        info!(source = %source, "{}", message);
        if let Err(e) = self.store.append_log(LogEntry::new(source, message)) {
            warn!(error = %e, "Failed to append to event log");
        }
    }

    /// Show a notification. Permission problems are surfaced as a core event.
    pub async fn notify(&self, title: &str, body: &str) {
        if let Err(e) = self.gateway.deliver(title, body).await {
            log_delivery_error(title, &e);
            if e == NotifyError::PermissionDenied {
                let _ = self.events.send(CoreEvent::NotificationsDenied);
            }
        }
    }

    pub fn emit(&self, event: CoreEvent) {
        let _ = self.events.send(event);
    }

    pub fn store(&self) -> &Arc<dyn Store> {
        &self.store
    }

    pub fn gateway(&self) -> &Arc<NotificationGateway> {
        &self.gateway
    }
}
