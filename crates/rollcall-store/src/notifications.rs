//! Persisted notifications and their read/sent transitions.

use crate::attendance::insert_notification_if_absent;
use crate::codec::{opt_timestamp, parsed, timestamp, to_millis};
use crate::error::StoreResult;
use crate::store::Store;
use chrono::{DateTime, Utc};
use rollcall_core::{Notification, SessionId, StudentId};
use rusqlite::{params, OptionalExtension, Row};
use uuid::Uuid;

const NOTIFICATION_SELECT_SQL: &str = "SELECT
    id, student_id, kind, title, message, session_id, course_id,
    window_key, is_read, created_at, read_at, sent_at
FROM notifications";

fn notification_from_row(row: &Row<'_>) -> rusqlite::Result<Notification> {
    Ok(Notification {
        id: parsed::<Uuid>(row, 0)?,
        student_id: row.get(1)?,
        kind: parsed(row, 2)?,
        title: row.get(3)?,
        message: row.get(4)?,
        session_id: row.get::<_, Option<String>>(5)?.map(SessionId::from),
        course_id: row.get(6)?,
        window_key: row.get(7)?,
        is_read: row.get(8)?,
        created_at: timestamp(row, 9)?,
        read_at: opt_timestamp(row, 10)?,
        sent_at: opt_timestamp(row, 11)?,
    })
}

impl Store {
    /// Persist a notification unless its dedup key already exists.
    ///
    /// Returns false when a matching absence, reminder or low-attendance
    /// notification was stored earlier.
    pub fn insert_notification(&self, notification: &Notification) -> StoreResult<bool> {
        insert_notification_if_absent(&self.conn(), notification)
    }

    pub fn notification(&self, id: Uuid) -> StoreResult<Option<Notification>> {
        let conn = self.conn();
        Ok(conn
            .query_row(
                &format!("{NOTIFICATION_SELECT_SQL} WHERE id = ?1"),
                [id.to_string()],
                notification_from_row,
            )
            .optional()?)
    }

    /// A student's notifications, newest first.
    pub fn notifications_for_student(
        &self,
        student_id: StudentId,
        unread_only: bool,
    ) -> StoreResult<Vec<Notification>> {
        let conn = self.conn();
        let mut stmt = conn.prepare(&format!(
            "{NOTIFICATION_SELECT_SQL}
             WHERE student_id = ?1 AND (?2 = 0 OR is_read = 0)
             ORDER BY created_at DESC, rowid DESC"
        ))?;
        let rows = stmt
            .query_map(params![student_id, unread_only], notification_from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    pub fn notifications_for_session(&self, session_id: &SessionId) -> StoreResult<Vec<Notification>> {
        let conn = self.conn();
        let mut stmt = conn.prepare(&format!(
            "{NOTIFICATION_SELECT_SQL} WHERE session_id = ?1 ORDER BY created_at, rowid"
        ))?;
        let rows = stmt
            .query_map([session_id.as_str()], notification_from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    /// Flip the read flag once.
    ///
    /// `None` for an unknown id, `Some(false)` if it was already read.
    pub fn mark_notification_read(&self, id: Uuid, at: DateTime<Utc>) -> StoreResult<Option<bool>> {
        let conn = self.conn();
        let changed = conn.execute(
            "UPDATE notifications SET is_read = 1, read_at = ?2 WHERE id = ?1 AND is_read = 0",
            params![id.to_string(), to_millis(at)],
        )?;
        if changed == 1 {
            return Ok(Some(true));
        }
        let exists: bool = conn.query_row(
            "SELECT EXISTS(SELECT 1 FROM notifications WHERE id = ?1)",
            [id.to_string()],
            |row| row.get(0),
        )?;
        Ok(exists.then_some(false))
    }

    /// Returns how many notifications changed from unread to read.
    pub fn mark_all_notifications_read(&self, student_id: StudentId, at: DateTime<Utc>) -> StoreResult<usize> {
        let conn = self.conn();
        Ok(conn.execute(
            "UPDATE notifications SET is_read = 1, read_at = ?2 WHERE student_id = ?1 AND is_read = 0",
            params![student_id, to_millis(at)],
        )?)
    }

    /// Notifications the delivery loop has not confirmed, oldest first.
    pub fn unsent_notifications(&self, limit: usize) -> StoreResult<Vec<Notification>> {
        let conn = self.conn();
        let mut stmt = conn.prepare(&format!(
            "{NOTIFICATION_SELECT_SQL} WHERE sent_at IS NULL ORDER BY created_at, rowid LIMIT ?1"
        ))?;
        let rows = stmt
            .query_map([i64::try_from(limit).unwrap_or(i64::MAX)], notification_from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    /// Stamp `sent_at` unless already set. Returns whether it changed.
    pub fn mark_notification_sent(&self, id: Uuid, at: DateTime<Utc>) -> StoreResult<bool> {
        let conn = self.conn();
        let changed = conn.execute(
            "UPDATE notifications SET sent_at = ?2 WHERE id = ?1 AND sent_at IS NULL",
            params![id.to_string(), to_millis(at)],
        )?;
        Ok(changed == 1)
    }
}
