use async_trait::async_trait;
use tracing::info;

/// Outbound notification seam. Delivery (email/SMS) lives outside this
/// crate; ledger callers invoke this on milestones such as an order being
/// fully paid.
#[async_trait]
pub trait NotificationSender: Send + Sync {
    async fn notify(&self, recipient: &str, template: &str, context: serde_json::Value);
}

/// Default sender that only records the notification in the log stream.
#[derive(Debug, Default, Clone, Copy)]
pub struct LoggingNotificationSender;

#[async_trait]
impl NotificationSender for LoggingNotificationSender {
    async fn notify(&self, recipient: &str, template: &str, context: serde_json::Value) {
        info!(recipient, template, %context, "notification");
    }
}

/// Test doubles, shared with the integration suites.
pub mod testing {
    use super::*;
    use std::sync::{Arc, Mutex};

    /// Captures notifications for assertions.
    #[derive(Debug, Default, Clone)]
    pub struct RecordingNotificationSender {
        pub sent: Arc<Mutex<Vec<(String, String)>>>,
    }

    #[async_trait]
    impl NotificationSender for RecordingNotificationSender {
        async fn notify(&self, recipient: &str, template: &str, _context: serde_json::Value) {
            self.sent
                .lock()
                .unwrap()
                .push((recipient.to_string(), template.to_string()));
        }
    }
}
