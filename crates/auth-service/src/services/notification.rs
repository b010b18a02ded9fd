//! Delivery of one-time login codes.

use async_trait::async_trait;
use common::identity::SubjectRecord;
use common::secret::SecretString;
use tracing::info;

/// Delivers a login code to a subject's contact address.
///
/// Delivery is fire-and-forget: the caller does not wait on it and failures
/// are the sender's to log.
#[async_trait]
pub trait NotificationSender: Send + Sync {
    async fn send_login_code(&self, recipient: &SubjectRecord, code: &SecretString);
}

/// Sender that only logs that a code was sent. Never logs the code.
#[derive(Debug, Default, Clone)]
pub struct LoggingNotificationSender;

#[async_trait]
impl NotificationSender for LoggingNotificationSender {
    async fn send_login_code(&self, recipient: &SubjectRecord, _code: &SecretString) {
        info!(
            target: "auth.notify",
            role = %recipient.role,
            "Login code dispatched"
        );
    }
}
