//! Offline notification hook
//!
//! Called after a message is persisted for every addressed user that has no
//! live socket. Push providers are wired in by implementing [`OfflineNotifier`].

use crate::models::MessageView;

#[axum::async_trait]
pub trait OfflineNotifier: Send + Sync {
    async fn notify(&self, user_id: &str, message: &MessageView);
}

/// Default notifier: records the notification in the log
#[derive(Debug, Default)]
pub struct LogNotifier;

#[axum::async_trait]
impl OfflineNotifier for LogNotifier {
    async fn notify(&self, user_id: &str, message: &MessageView) {
        let from = message
            .sender
            .as_ref()
            .map(|s| s.name.as_str())
            .unwrap_or("unknown");

        tracing::info!(
            user = %user_id,
            message_id = %message.message.id,
            kind = %message.message.kind,
            "Offline notification: new message from {}",
            from
        );
    }
}
