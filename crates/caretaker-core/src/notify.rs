//! Notification delivery with permission handling

use caretaker_api::PermissionStatus;
use caretaker_host_api::{Notifier, NotifyError, NotifyResult};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tracing::{debug, warn};

/// Single entry point for user notifications.
///
/// Permission lifecycle: an undetermined status triggers one permission
/// request followed by exactly one re-check; denied never posts.
pub struct NotificationGateway {
    notifier: Arc<dyn Notifier>,
    enabled: AtomicBool,
}

impl NotificationGateway {
    pub fn new(notifier: Arc<dyn Notifier>, enabled: bool) -> Self {
        Self {
            notifier,
            enabled: AtomicBool::new(enabled),
        }
    }

    pub fn set_enabled(&self, enabled: bool) {
        self.enabled.store(enabled, Ordering::SeqCst);
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::SeqCst)
    }

    /// Deliver a notification, requesting permission first if needed
    pub async fn deliver(&self, title: &str, body: &str) -> NotifyResult<()> {
        if !self.is_enabled() {
            debug!(title, "Notifications disabled, skipping");
            return Ok(());
        }

        let mut status = self.notifier.authorization_status().await;
        if status == PermissionStatus::NotDetermined {
            debug!("Notification permission undetermined, requesting");
            self.notifier.request_authorization().await;
            status = self.notifier.authorization_status().await;
        }

        match status {
            PermissionStatus::Authorized | PermissionStatus::Provisional => {
                self.notifier.post(title, body).await
            }
            PermissionStatus::Denied | PermissionStatus::NotDetermined => {
                Err(NotifyError::PermissionDenied)
            }
        }
    }
}

impl std::fmt::Debug for NotificationGateway {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NotificationGateway")
            .field("enabled", &self.is_enabled())
            .finish()
    }
}

/// Log a delivery failure the way every caller does
pub(crate) fn log_delivery_error(title: &str, err: &NotifyError) {
    match err {
        NotifyError::PermissionDenied => {
            warn!(title, "Notification not shown: permission denied")
        }
        NotifyError::Delivery(msg) => warn!(title, error = %msg, "Notification delivery failed"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use caretaker_host_api::MockNotifier;

    fn gateway(notifier: &Arc<MockNotifier>) -> NotificationGateway {
        NotificationGateway::new(notifier.clone(), true)
    }

    #[tokio::test]
    async fn authorized_posts_immediately() {
        let notifier = Arc::new(MockNotifier::authorized());
        gateway(&notifier).deliver("Title", "Body").await.unwrap();

        assert_eq!(notifier.request_count(), 0);
        assert_eq!(notifier.posted(), vec![("Title".into(), "Body".into())]);
    }

    #[tokio::test]
    async fn provisional_posts_immediately() {
        let notifier = Arc::new(MockNotifier::new(PermissionStatus::Provisional));
        gateway(&notifier).deliver("Title", "Body").await.unwrap();
        assert_eq!(notifier.posted().len(), 1);
    }

    #[tokio::test]
    async fn denied_never_posts() {
        let notifier = Arc::new(MockNotifier::new(PermissionStatus::Denied));
        let result = gateway(&notifier).deliver("Title", "Body").await;

        assert_eq!(result, Err(NotifyError::PermissionDenied));
        assert_eq!(notifier.request_count(), 0);
        assert!(notifier.posted().is_empty());
    }

    #[tokio::test]
    async fn undetermined_requests_then_posts() {
        let notifier = Arc::new(MockNotifier::new(PermissionStatus::NotDetermined));
        *notifier.status_after_request.lock().unwrap() = PermissionStatus::Authorized;

        gateway(&notifier).deliver("Title", "Body").await.unwrap();
        assert_eq!(notifier.request_count(), 1);
        assert_eq!(notifier.posted().len(), 1);
    }

    #[tokio::test]
    async fn undetermined_after_request_retries_once_only() {
        let notifier = Arc::new(MockNotifier::new(PermissionStatus::NotDetermined));

        let result = gateway(&notifier).deliver("Title", "Body").await;
        assert_eq!(result, Err(NotifyError::PermissionDenied));
        assert_eq!(notifier.request_count(), 1);
        assert!(notifier.posted().is_empty());
    }

    #[tokio::test]
    async fn disabled_gateway_is_silent() {
        let notifier = Arc::new(MockNotifier::new(PermissionStatus::NotDetermined));
        let gateway = NotificationGateway::new(notifier.clone(), false);

        gateway.deliver("Title", "Body").await.unwrap();
        assert_eq!(notifier.request_count(), 0);
        assert!(notifier.posted().is_empty());
    }
}
