//! Notification delivery loop.
//!
//! Notifications arrive over the engine's bounded channel. Anything the
//! channel dropped, or that another process wrote to the database, is picked
//! up from the unsent backlog on every tick. `sent_at` is stamped once, so a
//! notification seen on both paths is delivered once.

use rollcall_core::Notification;
use rollcall_engine::{NotificationCenter, Rollcall};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;

const BACKLOG_BATCH: usize = 100;

pub async fn run(rollcall: Arc<Rollcall>, mut rx: mpsc::Receiver<Notification>, every: Duration) {
    let mut ticker = tokio::time::interval(every);
    loop {
        tokio::select! {
            received = rx.recv() => match received {
                Some(notification) => {
                    deliver_blocking(rollcall.notifications.clone(), notification).await;
                }
                None => {
                    tracing::warn!("notification channel closed; delivery loop exiting");
                    return;
                }
            },
            _ = ticker.tick() => {
                let engine = rollcall.clone();
                match tokio::task::spawn_blocking(move || drain_backlog(&engine.notifications)).await {
                    Ok(0) => {}
                    Ok(delivered) => tracing::info!(delivered, "backlog delivered"),
                    Err(e) => tracing::error!(error = %e, "backlog task panicked"),
                }
            }
        }
    }
}

/// [`deliver`] on the blocking pool, since stamping writes to the database.
pub async fn deliver_blocking(center: Arc<NotificationCenter>, notification: Notification) -> bool {
    let id = notification.id;
    match tokio::task::spawn_blocking(move || deliver(&center, &notification)).await {
        Ok(delivered) => delivered,
        Err(e) => {
            tracing::error!(id = %id, error = %e, "delivery task panicked");
            false
        }
    }
}

/// Stamp and log one notification. Returns false if it was already sent.
pub fn deliver(center: &NotificationCenter, notification: &Notification) -> bool {
    match center.mark_sent(notification.id) {
        Ok(true) => {
            tracing::info!(
                id = %notification.id,
                student_id = notification.student_id,
                kind = %notification.kind,
                title = %notification.title,
                "notification delivered"
            );
            true
        }
        Ok(false) => false,
        Err(e) => {
            tracing::warn!(id = %notification.id, error = %e, "could not stamp delivery");
            false
        }
    }
}

/// Deliver every persisted notification still lacking `sent_at`.
pub fn drain_backlog(center: &NotificationCenter) -> usize {
    let mut delivered = 0;
    loop {
        let batch = match center.pending_delivery(BACKLOG_BATCH) {
            Ok(batch) => batch,
            Err(e) => {
                tracing::warn!(error = %e, "cannot read notification backlog");
                return delivered;
            }
        };
        let progress = batch.iter().filter(|n| deliver(center, n)).count();
        delivered += progress;
        if batch.len() < BACKLOG_BATCH || progress == 0 {
            return delivered;
        }
    }
}
