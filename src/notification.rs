//! Notifications
//!
//! Best-effort user notifications. Delivery happens after the ledger change
//! is committed and never affects the outcome of the operation.

use async_trait::async_trait;
use uuid::Uuid;

/// Something a user should hear about
#[derive(Debug, Clone, PartialEq)]
pub enum Notification {
    TransferCreated { transfer_id: Uuid, reference: String },
    TransferCompleted { transfer_id: Uuid, reference: String },
    TransferCancelled { transfer_id: Uuid, reference: String },
    TransferFailed { transfer_id: Uuid, reference: String, reason: String },
    MoneyRequested { request_id: Uuid, requester_id: Uuid },
    MoneyRequestPaid { request_id: Uuid, payer_id: Uuid },
}

impl Notification {
    /// Short event name, used as the log/message subject
    pub fn kind(&self) -> &'static str {
        match self {
            Notification::TransferCreated { .. } => "transfer.created",
            Notification::TransferCompleted { .. } => "transfer.completed",
            Notification::TransferCancelled { .. } => "transfer.cancelled",
            Notification::TransferFailed { .. } => "transfer.failed",
            Notification::MoneyRequested { .. } => "money_request.created",
            Notification::MoneyRequestPaid { .. } => "money_request.paid",
        }
    }
}

#[derive(Debug, thiserror::Error)]
#[error("notification delivery failed: {0}")]
pub struct NotificationError(pub String);

#[async_trait]
pub trait NotificationService: Send + Sync {
    async fn notify(&self, user_id: Uuid, notification: Notification) -> Result<(), NotificationError>;
}

/// Writes notifications to the log instead of delivering them
#[derive(Debug, Default, Clone)]
pub struct LogNotifier;

#[async_trait]
impl NotificationService for LogNotifier {
    async fn notify(&self, user_id: Uuid, notification: Notification) -> Result<(), NotificationError> {
        tracing::info!(
            user_id = %user_id,
            kind = notification.kind(),
            ?notification,
            "Notification"
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_notification_kind() {
        let n = Notification::MoneyRequestPaid {
            request_id: Uuid::new_v4(),
            payer_id: Uuid::new_v4(),
        };
        assert_eq!(n.kind(), "money_request.paid");
    }

    #[tokio::test]
    async fn test_log_notifier_never_fails() {
        let result = LogNotifier
            .notify(
                Uuid::new_v4(),
                Notification::TransferCreated {
                    transfer_id: Uuid::new_v4(),
                    reference: "TRF-1".to_string(),
                },
            )
            .await;
        assert!(result.is_ok());
    }
}
