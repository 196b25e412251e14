//! The attendance ledger: one row per (session, student).
//!
//! Writers open `BEGIN IMMEDIATE` transactions, so the session-open check
//! and the write are atomic with respect to every other connection. The
//! composite primary key makes a duplicate insert impossible; a losing
//! concurrent insert becomes an update.

use crate::codec::{parsed, timestamp, to_millis};
use crate::directory::student_exists;
use crate::error::{StoreError, StoreResult};
use crate::sessions::load_session;
use crate::store::Store;
use chrono::{DateTime, Utc};
use rollcall_core::{
    AttendanceError, AttendanceRecord, AttendanceResult, AttendanceStatus, Course, CourseId,
    Location, MarkOutcome, Notification, Session, SessionId, StudentId, VerificationMethod,
};
use rusqlite::{params, params_from_iter, Connection, OptionalExtension, Row, TransactionBehavior};
use serde::Serialize;

const RECORD_SELECT_SQL: &str = "SELECT
    session_id, student_id, status, method, marked_at, updated_at,
    confidence, latitude, longitude, note, system_generated
FROM attendance_records";

/// Field values applied by a create-or-update.
#[derive(Debug, Clone, PartialEq)]
pub struct RecordWrite {
    pub status: AttendanceStatus,
    pub method: VerificationMethod,
    pub confidence: Option<f32>,
    pub location: Option<Location>,
    pub note: Option<String>,
}

/// One overwrite of an existing record.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Amendment {
    pub session_id: SessionId,
    pub student_id: StudentId,
    pub previous_status: AttendanceStatus,
    pub previous_method: VerificationMethod,
    pub new_status: AttendanceStatus,
    pub new_method: VerificationMethod,
    pub amended_at: DateTime<Utc>,
}

/// What reconciliation persisted for one missing student.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct AbsenceOutcome {
    pub record_created: bool,
    pub notification_created: bool,
}

fn record_from_row(row: &Row<'_>) -> rusqlite::Result<AttendanceRecord> {
    let latitude: Option<f64> = row.get(7)?;
    let longitude: Option<f64> = row.get(8)?;
    Ok(AttendanceRecord {
        session_id: SessionId::from(row.get::<_, String>(0)?),
        student_id: row.get(1)?,
        status: parsed(row, 2)?,
        method: parsed(row, 3)?,
        marked_at: timestamp(row, 4)?,
        updated_at: timestamp(row, 5)?,
        confidence: row.get(6)?,
        location: latitude.zip(longitude).map(|(lat, lon)| Location::new(lat, lon)),
        note: row.get(9)?,
        system_generated: row.get(10)?,
    })
}

fn load_record(
    conn: &Connection,
    session_id: &SessionId,
    student_id: StudentId,
) -> StoreResult<Option<AttendanceRecord>> {
    Ok(conn
        .query_row(
            &format!("{RECORD_SELECT_SQL} WHERE session_id = ?1 AND student_id = ?2"),
            params![session_id.as_str(), student_id],
            record_from_row,
        )
        .optional()?)
}

/// Insert if absent. Returns whether a row was inserted.
fn insert_record_if_absent(
    conn: &Connection,
    session_id: &SessionId,
    student_id: StudentId,
    write: &RecordWrite,
    at: DateTime<Utc>,
    system_generated: bool,
) -> StoreResult<bool> {
    let at = to_millis(at);
    let inserted = conn.execute(
        "INSERT INTO attendance_records (
            session_id, student_id, status, method, marked_at, updated_at,
            confidence, latitude, longitude, note, system_generated
        ) VALUES (?1, ?2, ?3, ?4, ?5, ?5, ?6, ?7, ?8, ?9, ?10)
        ON CONFLICT(session_id, student_id) DO NOTHING",
        params![
            session_id.as_str(),
            student_id,
            write.status.as_str(),
            write.method.as_str(),
            at,
            write.confidence,
            write.location.map(|l| l.latitude),
            write.location.map(|l| l.longitude),
            write.note,
            system_generated,
        ],
    )?;
    Ok(inserted == 1)
}

pub(crate) fn insert_notification_if_absent(
    conn: &Connection,
    notification: &Notification,
) -> StoreResult<bool> {
    let inserted = conn.execute(
        "INSERT INTO notifications (
            id, student_id, kind, title, message, session_id, course_id,
            window_key, is_read, created_at, read_at, sent_at
        ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)
        ON CONFLICT DO NOTHING",
        params![
            notification.id.to_string(),
            notification.student_id,
            notification.kind.as_str(),
            notification.title,
            notification.message,
            notification.session_id.as_ref().map(SessionId::as_str),
            notification.course_id,
            notification.window_key,
            notification.is_read,
            to_millis(notification.created_at),
            notification.read_at.map(to_millis),
            notification.sent_at.map(to_millis),
        ],
    )?;
    Ok(inserted == 1)
}

fn upsert_in_tx(
    conn: &mut Connection,
    session_id: &SessionId,
    student_id: StudentId,
    write: &RecordWrite,
    now: DateTime<Utc>,
) -> StoreResult<AttendanceResult<MarkOutcome>> {
    let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;

    let Some(session) = load_session(&tx, session_id)? else {
        return Ok(Err(AttendanceError::not_found("session", session_id)));
    };
    if !session.is_open_at(now) {
        return Ok(Err(AttendanceError::SessionClosed(session_id.clone())));
    }
    if !student_exists(&tx, student_id)? {
        return Ok(Err(AttendanceError::not_found("student", student_id)));
    }

    let created = insert_record_if_absent(&tx, session_id, student_id, write, now, false)?;
    if !created {
        let (previous_status, previous_method): (String, String) = tx.query_row(
            "SELECT status, method FROM attendance_records WHERE session_id = ?1 AND student_id = ?2",
            params![session_id.as_str(), student_id],
            |row| Ok((row.get(0)?, row.get(1)?)),
        )?;
        tx.execute(
            "UPDATE attendance_records
             SET status = ?3, method = ?4, confidence = ?5, latitude = ?6, longitude = ?7,
                 note = ?8, updated_at = ?9, system_generated = 0
             WHERE session_id = ?1 AND student_id = ?2",
            params![
                session_id.as_str(),
                student_id,
                write.status.as_str(),
                write.method.as_str(),
                write.confidence,
                write.location.map(|l| l.latitude),
                write.location.map(|l| l.longitude),
                write.note,
                to_millis(now),
            ],
        )?;
        tx.execute(
            "INSERT INTO attendance_amendments (
                session_id, student_id, previous_status, previous_method,
                new_status, new_method, amended_at
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            params![
                session_id.as_str(),
                student_id,
                previous_status,
                previous_method,
                write.status.as_str(),
                write.method.as_str(),
                to_millis(now),
            ],
        )?;
    }

    let record = load_record(&tx, session_id, student_id)?.ok_or_else(|| {
        StoreError::Corrupt(format!("record ({session_id}, {student_id}) vanished mid-transaction"))
    })?;
    tx.commit()?;
    Ok(Ok(MarkOutcome { record, created }))
}

impl Store {
    /// Create or overwrite the record for (session, student) at `now`.
    ///
    /// Fails with `NotFound` for an unknown session or student and with
    /// `SessionClosed` when the session is not open at `now`; both are
    /// checked inside the write transaction. Enrollment is the caller's
    /// concern. An overwrite keeps `marked_at` and appends an amendment.
    pub fn upsert_attendance(
        &self,
        session_id: &SessionId,
        student_id: StudentId,
        write: &RecordWrite,
        now: DateTime<Utc>,
    ) -> AttendanceResult<MarkOutcome> {
        let mut conn = self.conn();
        upsert_in_tx(&mut conn, session_id, student_id, write, now)?
    }

    /// Insert a system-generated absence stamped at the session end, plus its
    /// notification, in one transaction. Existing rows are left untouched, and
    /// the notification is only written when the record was.
    pub fn record_absence(
        &self,
        session: &Session,
        student_id: StudentId,
        notice: &Notification,
    ) -> StoreResult<AbsenceOutcome> {
        let mut conn = self.conn();
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
        let absent = RecordWrite {
            status: AttendanceStatus::Absent,
            method: VerificationMethod::Manual,
            confidence: None,
            location: None,
            note: None,
        };
        let record_created =
            insert_record_if_absent(&tx, &session.id, student_id, &absent, session.ends_at(), true)?;
        let notification_created = record_created && insert_notification_if_absent(&tx, notice)?;
        tx.commit()?;
        Ok(AbsenceOutcome {
            record_created,
            notification_created,
        })
    }

    pub fn attendance_record(
        &self,
        session_id: &SessionId,
        student_id: StudentId,
    ) -> StoreResult<Option<AttendanceRecord>> {
        load_record(&self.conn(), session_id, student_id)
    }

    /// All records of a session, ordered by student.
    pub fn records_for_session(&self, session_id: &SessionId) -> StoreResult<Vec<AttendanceRecord>> {
        let conn = self.conn();
        let mut stmt = conn.prepare(&format!(
            "{RECORD_SELECT_SQL} WHERE session_id = ?1 ORDER BY student_id"
        ))?;
        let records = stmt
            .query_map([session_id.as_str()], record_from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(records)
    }

    /// A student's records, most recent session first.
    pub fn history_for_student(
        &self,
        student_id: StudentId,
        limit: usize,
    ) -> StoreResult<Vec<AttendanceRecord>> {
        let conn = self.conn();
        let mut stmt = conn.prepare(
            "SELECT a.session_id, a.student_id, a.status, a.method, a.marked_at, a.updated_at,
                    a.confidence, a.latitude, a.longitude, a.note, a.system_generated
             FROM attendance_records a
             JOIN sessions s ON s.id = a.session_id
             WHERE a.student_id = ?1
             ORDER BY s.session_date DESC, s.start_time DESC, s.id DESC
             LIMIT ?2",
        )?;
        let records = stmt
            .query_map(
                params![student_id, i64::try_from(limit).unwrap_or(i64::MAX)],
                record_from_row,
            )?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(records)
    }

    /// A student's statuses joined with the owning course, optionally for one course.
    pub fn statuses_by_course(
        &self,
        student_id: StudentId,
        course_id: Option<CourseId>,
    ) -> StoreResult<Vec<(Course, AttendanceStatus)>> {
        let conn = self.conn();
        let mut stmt = conn.prepare(
            "SELECT c.id, c.code, c.name, c.faculty_id, a.status
             FROM attendance_records a
             JOIN sessions s ON s.id = a.session_id
             JOIN courses c ON c.id = s.course_id
             WHERE a.student_id = ?1 AND (?2 IS NULL OR c.id = ?2)
             ORDER BY c.code, c.id",
        )?;
        let rows = stmt
            .query_map(params![student_id, course_id], |row| {
                Ok((
                    Course {
                        id: row.get(0)?,
                        code: row.get(1)?,
                        name: row.get(2)?,
                        faculty_id: row.get(3)?,
                    },
                    parsed::<AttendanceStatus>(row, 4)?,
                ))
            })?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    /// Every (student, status) ordered by student. With a course, only
    /// records in its sessions from students enrolled in it.
    pub fn statuses_by_student(
        &self,
        course_id: Option<CourseId>,
    ) -> StoreResult<Vec<(StudentId, AttendanceStatus)>> {
        let conn = self.conn();
        let mut stmt = conn.prepare(
            "SELECT a.student_id, a.status
             FROM attendance_records a
             JOIN sessions s ON s.id = a.session_id
             WHERE ?1 IS NULL
                OR (s.course_id = ?1 AND EXISTS (
                    SELECT 1 FROM enrollments e
                    WHERE e.course_id = ?1 AND e.student_id = a.student_id))
             ORDER BY a.student_id",
        )?;
        let rows = stmt
            .query_map(params![course_id], |row| {
                Ok((row.get(0)?, parsed::<AttendanceStatus>(row, 1)?))
            })?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    /// Every (student, status) recorded in any of `sessions`.
    pub fn statuses_in_sessions(
        &self,
        sessions: &[SessionId],
    ) -> StoreResult<Vec<(StudentId, AttendanceStatus)>> {
        if sessions.is_empty() {
            return Ok(Vec::new());
        }
        let placeholders = vec!["?"; sessions.len()].join(", ");
        let conn = self.conn();
        let mut stmt = conn.prepare(&format!(
            "SELECT student_id, status FROM attendance_records WHERE session_id IN ({placeholders})"
        ))?;
        let rows = stmt
            .query_map(params_from_iter(sessions.iter().map(SessionId::as_str)), |row| {
                Ok((row.get::<_, StudentId>(0)?, parsed::<AttendanceStatus>(row, 1)?))
            })?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    /// Overwrite history of one record, oldest first.
    pub fn amendments(
        &self,
        session_id: &SessionId,
        student_id: StudentId,
    ) -> StoreResult<Vec<Amendment>> {
        let conn = self.conn();
        let mut stmt = conn.prepare(
            "SELECT session_id, student_id, previous_status, previous_method,
                    new_status, new_method, amended_at
             FROM attendance_amendments
             WHERE session_id = ?1 AND student_id = ?2
             ORDER BY id",
        )?;
        let rows = stmt
            .query_map(params![session_id.as_str(), student_id], |row| {
                Ok(Amendment {
                    session_id: SessionId::from(row.get::<_, String>(0)?),
                    student_id: row.get(1)?,
                    previous_status: parsed(row, 2)?,
                    previous_method: parsed(row, 3)?,
                    new_status: parsed(row, 4)?,
                    new_method: parsed(row, 5)?,
                    amended_at: timestamp(row, 6)?,
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }
}
