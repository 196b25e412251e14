//! Out-of-band notification delivery seam.
//!
//! Notifications are persisted before they reach a sink; delivery is best
//! effort and a sink error never rolls back the stored record.

use crate::types::Notification;
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum DeliveryError {
    #[error("delivery queue is full")]
    QueueFull,
    #[error("delivery channel closed")]
    Closed,
    #[error("transport failed: {0}")]
    Transport(String),
}

pub trait NotificationSink: Send + Sync {
    /// Hand off a persisted notification. Must not block.
    fn deliver(&self, notification: &Notification) -> Result<(), DeliveryError>;
}

/// Sink that only records the hand-off in the log.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogSink;

impl NotificationSink for LogSink {
    fn deliver(&self, notification: &Notification) -> Result<(), DeliveryError> {
        tracing::info!(
            id = %notification.id,
            student_id = notification.student_id,
            kind = %notification.kind,
            title = %notification.title,
            "notification handed off"
        );
        Ok(())
    }
}
