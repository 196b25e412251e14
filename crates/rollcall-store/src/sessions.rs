//! Session rows. Open/closed is never stored; only the explicit close flag is.

use crate::codec::{opt_timestamp, parsed, timestamp, to_millis};
use crate::error::StoreResult;
use crate::store::Store;
use chrono::{DateTime, Utc};
use rollcall_core::{CourseId, Session, SessionId};
use rusqlite::{params, Connection, OptionalExtension, Row};

const SESSION_SELECT_SQL: &str = "SELECT
    id, course_id, faculty_id, session_date, start_time, end_time,
    capture_method, explicitly_closed, created_at, reconciled_at
FROM sessions";

/// Course order: date, then start time, then id for ties.
const COURSE_ORDER: &str = "(session_date, start_time, id) <= (?2, ?3, ?4)";

fn session_from_row(row: &Row<'_>) -> rusqlite::Result<Session> {
    Ok(Session {
        id: SessionId::from(row.get::<_, String>(0)?),
        course_id: row.get(1)?,
        faculty_id: row.get(2)?,
        date: parsed(row, 3)?,
        start_time: parsed(row, 4)?,
        end_time: parsed(row, 5)?,
        capture: parsed(row, 6)?,
        explicitly_closed: row.get(7)?,
        created_at: timestamp(row, 8)?,
        reconciled_at: opt_timestamp(row, 9)?,
    })
}

pub(crate) fn load_session(conn: &Connection, id: &SessionId) -> StoreResult<Option<Session>> {
    Ok(conn
        .query_row(
            &format!("{SESSION_SELECT_SQL} WHERE id = ?1"),
            [id.as_str()],
            session_from_row,
        )
        .optional()?)
}

impl Store {
    pub fn insert_session(&self, session: &Session) -> StoreResult<()> {
        let conn = self.conn();
        conn.execute(
            "INSERT INTO sessions (
                id, course_id, faculty_id, session_date, start_time, end_time,
                capture_method, explicitly_closed, created_at, reconciled_at
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
            params![
                session.id.as_str(),
                session.course_id,
                session.faculty_id,
                session.date.to_string(),
                session.start_time.to_string(),
                session.end_time.to_string(),
                session.capture.as_str(),
                session.explicitly_closed,
                to_millis(session.created_at),
                session.reconciled_at.map(to_millis),
            ],
        )?;
        Ok(())
    }

    pub fn session(&self, id: &SessionId) -> StoreResult<Option<Session>> {
        load_session(&self.conn(), id)
    }

    /// Sessions of a course in course order.
    pub fn sessions_for_course(&self, course_id: CourseId) -> StoreResult<Vec<Session>> {
        let conn = self.conn();
        let mut stmt = conn.prepare(&format!(
            "{SESSION_SELECT_SQL} WHERE course_id = ?1 ORDER BY session_date, start_time, id"
        ))?;
        let sessions = stmt
            .query_map([course_id], session_from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(sessions)
    }

    /// Set the explicit close flag.
    ///
    /// `None` if the session does not exist, `Some(false)` if it was already
    /// flagged.
    pub fn close_session(&self, id: &SessionId) -> StoreResult<Option<bool>> {
        let conn = self.conn();
        let changed = conn.execute(
            "UPDATE sessions SET explicitly_closed = 1 WHERE id = ?1 AND explicitly_closed = 0",
            [id.as_str()],
        )?;
        if changed == 1 {
            return Ok(Some(true));
        }
        let exists: bool = conn.query_row(
            "SELECT EXISTS(SELECT 1 FROM sessions WHERE id = ?1)",
            [id.as_str()],
            |row| row.get(0),
        )?;
        Ok(exists.then_some(false))
    }

    pub fn mark_reconciled(&self, id: &SessionId, at: DateTime<Utc>) -> StoreResult<bool> {
        let conn = self.conn();
        let changed = conn.execute(
            "UPDATE sessions SET reconciled_at = ?2 WHERE id = ?1",
            params![id.as_str(), to_millis(at)],
        )?;
        Ok(changed == 1)
    }

    /// Sessions that reconciliation has not stamped yet, oldest first.
    pub fn unreconciled_sessions(&self) -> StoreResult<Vec<Session>> {
        let conn = self.conn();
        let mut stmt = conn.prepare(&format!(
            "{SESSION_SELECT_SQL} WHERE reconciled_at IS NULL ORDER BY session_date, end_time, id"
        ))?;
        let sessions = stmt
            .query_map([], session_from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(sessions)
    }

    /// Up to `count` course sessions ending with `session`, newest first.
    pub fn trailing_sessions(&self, session: &Session, count: usize) -> StoreResult<Vec<SessionId>> {
        let conn = self.conn();
        let mut stmt = conn.prepare(&format!(
            "SELECT id FROM sessions WHERE course_id = ?1 AND {COURSE_ORDER}
             ORDER BY session_date DESC, start_time DESC, id DESC
             LIMIT ?5"
        ))?;
        let ids = stmt
            .query_map(
                params![
                    session.course_id,
                    session.date.to_string(),
                    session.start_time.to_string(),
                    session.id.as_str(),
                    i64::try_from(count).unwrap_or(i64::MAX),
                ],
                |row| row.get::<_, String>(0).map(SessionId::from),
            )?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(ids)
    }

    /// One-based position of `session` among its course's sessions in
    /// creation order, id breaking ties. Sessions created later, even with an
    /// earlier date, never move it.
    pub fn creation_ordinal(&self, session: &Session) -> StoreResult<u64> {
        let conn = self.conn();
        let position: i64 = conn.query_row(
            "SELECT COUNT(*) FROM sessions
             WHERE course_id = ?1 AND (created_at, id) <= (?2, ?3)",
            params![
                session.course_id,
                to_millis(session.created_at),
                session.id.as_str(),
            ],
            |row| row.get(0),
        )?;
        Ok(position.max(0) as u64)
    }
}
