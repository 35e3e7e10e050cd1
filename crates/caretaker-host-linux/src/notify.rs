//! Desktop notifications through notify-send

use async_trait::async_trait;
use caretaker_api::PermissionStatus;
use caretaker_host_api::{CommandRunner, Notifier, NotifyError, NotifyResult};
use std::borrow::Cow;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tracing::{debug, info};

const NOTIFY_PROGRAM: &str = "notify-send";
const NOTIFY_TIMEOUT: Duration = Duration::from_secs(10);

/// Posts notifications with `notify-send`.
///
/// There is no permission prompt on Linux. Authorization is "determined"
/// by probing for the program once; a missing program counts as denied.
pub struct NotifySendNotifier {
    runner: Arc<dyn CommandRunner>,
    app_name: String,
    status: Mutex<PermissionStatus>,
}

impl NotifySendNotifier {
    pub fn new(runner: Arc<dyn CommandRunner>) -> Self {
        Self {
            runner,
            app_name: "caretaker".into(),
            status: Mutex::new(PermissionStatus::NotDetermined),
        }
    }

    fn set_status(&self, status: PermissionStatus) {
        *self.status.lock().unwrap_or_else(|e| e.into_inner()) = status;
    }
}

#[async_trait]
impl Notifier for NotifySendNotifier {
    async fn authorization_status(&self) -> PermissionStatus {
        *self.status.lock().unwrap_or_else(|e| e.into_inner())
    }

    async fn request_authorization(&self) {
        let lookup = format!("command -v {}", NOTIFY_PROGRAM);
        let status = match self.runner.run(&lookup, NOTIFY_TIMEOUT).await {
            Ok(_) => PermissionStatus::Authorized,
            Err(e) => {
                info!(error = %e, "{} unavailable, notifications disabled", NOTIFY_PROGRAM);
                PermissionStatus::Denied
            }
        };
        self.set_status(status);
    }

    async fn post(&self, title: &str, body: &str) -> NotifyResult<()> {
        let cmdline = format!(
            "{} --app-name={} {} {}",
            NOTIFY_PROGRAM,
            shell_escape::escape(Cow::Borrowed(self.app_name.as_str())),
            shell_escape::escape(Cow::Borrowed(title)),
            shell_escape::escape(Cow::Borrowed(body)),
        );

        self.runner
            .run(&cmdline, NOTIFY_TIMEOUT)
            .await
            .map_err(|e| NotifyError::Delivery(e.to_string()))?;

        debug!(title, "Notification posted");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use caretaker_host_api::{MockCommandRunner, MockReply};

    #[tokio::test]
    async fn program_lookup_decides_authorization() {
        let runner = Arc::new(MockCommandRunner::new());
        let notifier = NotifySendNotifier::new(runner.clone());
        assert_eq!(
            notifier.authorization_status().await,
            PermissionStatus::NotDetermined
        );

        notifier.request_authorization().await;
        assert_eq!(
            notifier.authorization_status().await,
            PermissionStatus::Authorized
        );
        assert_eq!(runner.calls(), vec!["command -v notify-send".to_string()]);
    }

    #[tokio::test]
    async fn missing_program_is_denied() {
        let runner = Arc::new(MockCommandRunner::new());
        runner.reply("command -v", MockReply::failure("not found"));
        let notifier = NotifySendNotifier::new(runner);

        notifier.request_authorization().await;
        assert_eq!(notifier.authorization_status().await, PermissionStatus::Denied);
    }

    #[tokio::test]
    async fn post_escapes_arguments() {
        let runner = Arc::new(MockCommandRunner::new());
        let notifier = NotifySendNotifier::new(runner.clone());

        notifier
            .post("Updates Available", "Found 1 packages to update: it's")
            .await
            .unwrap();

        assert_eq!(
            runner.calls(),
            vec![
                "notify-send --app-name=caretaker 'Updates Available' 'Found 1 packages to update: it'\\''s'"
                    .to_string()
            ]
        );
    }

    #[tokio::test]
    async fn failed_post_is_delivery_error() {
        let runner = Arc::new(MockCommandRunner::new());
        runner.reply("notify-send", MockReply::failure("no bus"));
        let notifier = NotifySendNotifier::new(runner);

        let err = notifier.post("t", "b").await.unwrap_err();
        assert!(matches!(err, NotifyError::Delivery(_)));
    }
}
