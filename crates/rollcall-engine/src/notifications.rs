//! Notification read side, explicit triggers and the hand-off to delivery.

use crate::messages;
use rollcall_core::{
    AttendanceError, AttendanceResult, Clock, DeliveryError, Notification, NotificationSink,
    Roster, SessionId, StudentId,
};
use rollcall_store::Store;
use serde::Serialize;
use std::sync::Arc;
use tokio::sync::mpsc;
use uuid::Uuid;

/// Sink backed by a bounded channel. Never blocks: a full queue is reported
/// and the notification stays unsent in the store for the next drain.
#[derive(Clone)]
pub struct ChannelSink {
    tx: mpsc::Sender<Notification>,
}

impl ChannelSink {
    pub fn new(capacity: usize) -> (Self, mpsc::Receiver<Notification>) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        (Self { tx }, rx)
    }
}

impl NotificationSink for ChannelSink {
    fn deliver(&self, notification: &Notification) -> Result<(), DeliveryError> {
        self.tx.try_send(notification.clone()).map_err(|e| match e {
            mpsc::error::TrySendError::Full(_) => DeliveryError::QueueFull,
            mpsc::error::TrySendError::Closed(_) => DeliveryError::Closed,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ReminderReport {
    pub session_id: SessionId,
    /// Students that received a new reminder.
    pub reminded: Vec<StudentId>,
    /// Students without a record that had already been reminded.
    pub already_reminded: usize,
}

pub struct NotificationCenter {
    store: Arc<Store>,
    roster: Arc<dyn Roster>,
    clock: Arc<dyn Clock>,
    sink: Arc<dyn NotificationSink>,
}

impl NotificationCenter {
    pub fn new(
        store: Arc<Store>,
        roster: Arc<dyn Roster>,
        clock: Arc<dyn Clock>,
        sink: Arc<dyn NotificationSink>,
    ) -> Self {
        Self {
            store,
            roster,
            clock,
            sink,
        }
    }

    /// A student's notifications, newest first.
    pub fn list(&self, student_id: StudentId, unread_only: bool) -> AttendanceResult<Vec<Notification>> {
        if !self.store.student_exists(student_id)? {
            return Err(AttendanceError::not_found("student", student_id));
        }
        Ok(self.store.notifications_for_student(student_id, unread_only)?)
    }

    /// Mark one notification read. Re-reading keeps the first `read_at`.
    pub fn mark_read(&self, id: Uuid) -> AttendanceResult<Notification> {
        match self.store.mark_notification_read(id, self.clock.now())? {
            None => return Err(AttendanceError::not_found("notification", id)),
            Some(changed) => tracing::debug!(%id, changed, "notification read"),
        }
        self.store
            .notification(id)?
            .ok_or_else(|| AttendanceError::not_found("notification", id))
    }

    /// Returns how many notifications were unread.
    pub fn mark_all_read(&self, student_id: StudentId) -> AttendanceResult<usize> {
        if !self.store.student_exists(student_id)? {
            return Err(AttendanceError::not_found("student", student_id));
        }
        let changed = self
            .store
            .mark_all_notifications_read(student_id, self.clock.now())?;
        tracing::info!(student_id, changed, "notifications marked read");
        Ok(changed)
    }

    /// Remind every roster student without a record while the session is open.
    pub fn remind(&self, session_id: &SessionId) -> AttendanceResult<ReminderReport> {
        let now = self.clock.now();
        let session = self
            .store
            .session(session_id)?
            .ok_or_else(|| AttendanceError::not_found("session", session_id))?;
        if !session.is_open_at(now) {
            return Err(AttendanceError::SessionClosed(session_id.clone()));
        }
        let course = self
            .store
            .course(session.course_id)?
            .ok_or_else(|| AttendanceError::not_found("course", session.course_id))?;

        let recorded: Vec<StudentId> = self
            .store
            .records_for_session(session_id)?
            .into_iter()
            .map(|r| r.student_id)
            .collect();

        let mut report = ReminderReport {
            session_id: session_id.clone(),
            reminded: Vec::new(),
            already_reminded: 0,
        };
        for student_id in self.roster.roster(session.course_id)? {
            if recorded.contains(&student_id) {
                continue;
            }
            let notice = messages::reminder(student_id, &course, &session, now);
            if self.publish(&notice)? {
                report.reminded.push(student_id);
            } else {
                report.already_reminded += 1;
            }
        }
        tracing::info!(
            session_id = %session_id,
            reminded = report.reminded.len(),
            already_reminded = report.already_reminded,
            "reminders sent"
        );
        Ok(report)
    }

    /// Persisted notifications not yet confirmed delivered, oldest first.
    pub fn pending_delivery(&self, limit: usize) -> AttendanceResult<Vec<Notification>> {
        Ok(self.store.unsent_notifications(limit)?)
    }

    pub fn mark_sent(&self, id: Uuid) -> AttendanceResult<bool> {
        Ok(self.store.mark_notification_sent(id, self.clock.now())?)
    }

    /// Persist `notification` unless its dedup key exists, then hand it off.
    /// Returns whether it was new.
    pub fn publish(&self, notification: &Notification) -> AttendanceResult<bool> {
        let created = self.store.insert_notification(notification)?;
        if created {
            self.hand_off(notification);
        }
        Ok(created)
    }

    /// Best-effort delivery of an already persisted notification.
    pub(crate) fn hand_off(&self, notification: &Notification) {
        if let Err(e) = self.sink.deliver(notification) {
            tracing::warn!(
                id = %notification.id,
                student_id = notification.student_id,
                kind = %notification.kind,
                error = %e,
                "notification hand-off failed; left pending"
            );
        }
    }
}
