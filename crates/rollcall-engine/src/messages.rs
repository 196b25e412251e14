//! Notification wording.

use chrono::{DateTime, Utc};
use rollcall_core::{AttendanceRecord, Course, Notification, NotificationKind, Session, StudentId};

fn day(session: &Session) -> String {
    session.date.format("%B %d, %Y").to_string()
}

fn for_session(mut n: Notification, session: &Session) -> Notification {
    n.session_id = Some(session.id.clone());
    n.course_id = Some(session.course_id);
    n
}

pub(crate) fn absence(
    student_id: StudentId,
    course: &Course,
    session: &Session,
    at: DateTime<Utc>,
) -> Notification {
    let n = Notification::new(
        student_id,
        NotificationKind::Absence,
        format!("Absence Alert: {}", course.code),
        format!(
            "You have been marked absent for {} - {} on {}. If this is an error, please contact your instructor.",
            course.code,
            course.name,
            day(session)
        ),
        at,
    );
    for_session(n, session)
}

pub(crate) fn low_attendance(
    student_id: StudentId,
    course: &Course,
    percentage: f64,
    threshold: f64,
    window_key: String,
    at: DateTime<Utc>,
) -> Notification {
    let mut n = Notification::new(
        student_id,
        NotificationKind::LowAttendance,
        format!("Low Attendance Warning: {}", course.code),
        format!(
            "Your recent attendance in {} is {percentage:.1}%, below the required {threshold:.0}%. Please attend regularly.",
            course.code
        ),
        at,
    );
    n.course_id = Some(course.id);
    n.window_key = Some(window_key);
    n
}

pub(crate) fn confirmation(
    course: &Course,
    session: &Session,
    record: &AttendanceRecord,
    at: DateTime<Utc>,
) -> Notification {
    let confidence = record
        .confidence
        .map(|c| format!(" (confidence {c:.1})"))
        .unwrap_or_default();
    let n = Notification::new(
        record.student_id,
        NotificationKind::Confirmation,
        format!("Attendance Confirmed: {}", course.code),
        format!(
            "Your attendance has been marked as {} for {} on {} via {}{confidence} at {}.",
            record.status,
            course.code,
            day(session),
            record.method,
            record.marked_at.format("%H:%M UTC")
        ),
        at,
    );
    for_session(n, session)
}

pub(crate) fn reminder(
    student_id: StudentId,
    course: &Course,
    session: &Session,
    at: DateTime<Utc>,
) -> Notification {
    let n = Notification::new(
        student_id,
        NotificationKind::Reminder,
        format!("Attendance Reminder: {}", course.code),
        format!(
            "Attendance for {} on {} closes at {} UTC and has not been recorded for you yet.",
            course.code,
            day(session),
            session.end_time.format("%H:%M")
        ),
        at,
    );
    for_session(n, session)
}
