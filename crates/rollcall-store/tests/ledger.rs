use chrono::{DateTime, Duration, NaiveDate, NaiveTime, TimeZone, Utc};
use rollcall_core::{
    AttendanceError, AttendanceStatus, CaptureMethod, Embedding, Location, Notification,
    NotificationKind, Roster, Session, SessionId, StudentId, VerificationMethod,
};
use rollcall_store::{RecordWrite, Store};

struct Fixture {
    store: Store,
    course_id: i64,
    students: Vec<StudentId>,
}

fn at(h: u32, m: u32) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2026, 3, 2, h, m, 0).unwrap()
}

fn fixture(students: usize) -> Fixture {
    let store = Store::open_in_memory().unwrap();
    let faculty = store.insert_faculty("Ada Byron", "ada@uni.edu").unwrap();
    let course = store.insert_course("CS101", "Intro to Computing", faculty.id).unwrap();
    let students = (0..students)
        .map(|i| {
            let s = store
                .insert_student(&format!("R{i:03}"), "Student", &format!("{i}"), "s@uni.edu")
                .unwrap();
            store.enroll(course.id, s.id).unwrap();
            s.id
        })
        .collect();
    Fixture {
        store,
        course_id: course.id,
        students,
    }
}

fn session(fx: &Fixture, id: &str, day: u32, closed: bool) -> Session {
    let mut session = session_row(fx, id, day);
    session.explicitly_closed = closed;
    fx.store.insert_session(&session).unwrap();
    session
}

fn session_row(fx: &Fixture, id: &str, day: u32) -> Session {
    Session {
        id: SessionId::from(id),
        course_id: fx.course_id,
        faculty_id: 1,
        date: NaiveDate::from_ymd_opt(2026, 3, day).unwrap(),
        start_time: NaiveTime::from_hms_opt(9, 0, 0).unwrap(),
        end_time: NaiveTime::from_hms_opt(10, 0, 0).unwrap(),
        capture: CaptureMethod::Manual,
        explicitly_closed: false,
        created_at: at(8, 0),
        reconciled_at: None,
    }
}

fn write(status: AttendanceStatus) -> RecordWrite {
    RecordWrite {
        status,
        method: VerificationMethod::Manual,
        confidence: None,
        location: None,
        note: None,
    }
}

#[test]
fn session_roundtrip_preserves_fields() {
    let fx = fixture(0);
    let s = session(&fx, "s-1", 2, false);
    let loaded = fx.store.session(&s.id).unwrap().unwrap();
    assert_eq!(loaded, s);
    assert!(fx.store.session(&SessionId::from("nope")).unwrap().is_none());
}

#[test]
fn close_session_reports_transition_once() {
    let fx = fixture(0);
    let s = session(&fx, "s-1", 2, false);
    assert_eq!(fx.store.close_session(&s.id).unwrap(), Some(true));
    assert_eq!(fx.store.close_session(&s.id).unwrap(), Some(false));
    assert_eq!(fx.store.close_session(&SessionId::from("ghost")).unwrap(), None);
    assert!(fx.store.session(&s.id).unwrap().unwrap().explicitly_closed);
}

#[test]
fn upsert_creates_then_overwrites_and_audits() {
    let fx = fixture(1);
    let s = session(&fx, "s-1", 2, false);
    let student = fx.students[0];

    let first = fx
        .store
        .upsert_attendance(&s.id, student, &write(AttendanceStatus::Present), at(9, 5))
        .unwrap();
    assert!(first.created);

    let mut late = write(AttendanceStatus::Late);
    late.location = Some(Location::new(51.5, -0.12));
    late.note = Some("bus strike".into());
    let second = fx.store.upsert_attendance(&s.id, student, &late, at(9, 20)).unwrap();
    assert!(!second.created);
    assert_eq!(second.record.status, AttendanceStatus::Late);
    assert_eq!(second.record.marked_at, at(9, 5));
    assert_eq!(second.record.updated_at, at(9, 20));
    assert_eq!(second.record.location, Some(Location::new(51.5, -0.12)));

    let amendments = fx.store.amendments(&s.id, student).unwrap();
    assert_eq!(amendments.len(), 1);
    assert_eq!(amendments[0].previous_status, AttendanceStatus::Present);
    assert_eq!(amendments[0].new_status, AttendanceStatus::Late);
    assert_eq!(fx.store.records_for_session(&s.id).unwrap().len(), 1);
}

#[test]
fn upsert_checks_session_inside_transaction() {
    let fx = fixture(1);
    let open = session(&fx, "s-open", 2, false);
    let closed = session(&fx, "s-closed", 2, true);
    let student = fx.students[0];
    let present = write(AttendanceStatus::Present);

    let err = fx.store.upsert_attendance(&closed.id, student, &present, at(9, 5)).unwrap_err();
    assert_eq!(err, AttendanceError::SessionClosed(closed.id.clone()));

    let err = fx.store.upsert_attendance(&open.id, student, &present, at(10, 0)).unwrap_err();
    assert_eq!(err, AttendanceError::SessionClosed(open.id.clone()));

    let err = fx
        .store
        .upsert_attendance(&SessionId::from("ghost"), student, &present, at(9, 5))
        .unwrap_err();
    assert!(matches!(err, AttendanceError::NotFound { entity: "session", .. }));

    let err = fx.store.upsert_attendance(&open.id, 999, &present, at(9, 5)).unwrap_err();
    assert!(matches!(err, AttendanceError::NotFound { entity: "student", .. }));
    assert!(fx.store.records_for_session(&open.id).unwrap().is_empty());
}

#[test]
fn record_absence_is_insert_only() {
    let fx = fixture(1);
    let s = session(&fx, "s-1", 2, true);
    let missing = fx.students[0];

    let mut notice = Notification::new(missing, NotificationKind::Absence, "Absent", "You missed CS101", at(10, 1));
    notice.session_id = Some(s.id.clone());
    let outcome = fx.store.record_absence(&s, missing, &notice).unwrap();
    assert!(outcome.record_created && outcome.notification_created);

    let record = fx.store.attendance_record(&s.id, missing).unwrap().unwrap();
    assert_eq!(record.status, AttendanceStatus::Absent);
    assert!(record.system_generated);
    assert_eq!(record.marked_at, s.ends_at());

    let mut again = notice.clone();
    again.id = uuid::Uuid::new_v4();
    let outcome = fx.store.record_absence(&s, missing, &again).unwrap();
    assert!(!outcome.record_created && !outcome.notification_created);
    assert_eq!(fx.store.notifications_for_session(&s.id).unwrap().len(), 1);
}

#[test]
fn absence_notifications_are_unique_per_session() {
    let fx = fixture(1);
    let s = session(&fx, "s-1", 2, true);
    let student = fx.students[0];
    let make = || {
        let mut n = Notification::new(student, NotificationKind::Absence, "Absent", "missed", at(10, 1));
        n.session_id = Some(s.id.clone());
        n
    };
    assert!(fx.store.insert_notification(&make()).unwrap());
    assert!(!fx.store.insert_notification(&make()).unwrap());

    // Confirmations carry no dedup key.
    let confirm = || Notification::new(student, NotificationKind::Confirmation, "Marked", "ok", at(9, 1));
    assert!(fx.store.insert_notification(&confirm()).unwrap());
    assert!(fx.store.insert_notification(&confirm()).unwrap());
}

#[test]
fn read_and_sent_transitions() {
    let fx = fixture(1);
    let student = fx.students[0];
    let second = Notification::new(student, NotificationKind::Confirmation, "Marked", "ok", at(9, 30));
    let mut reminder = Notification::new(student, NotificationKind::Reminder, "Reminder", "mark in", at(9, 0));
    reminder.session_id = Some(session(&fx, "s-1", 2, false).id);
    fx.store.insert_notification(&reminder).unwrap();
    fx.store.insert_notification(&second).unwrap();

    let listed = fx.store.notifications_for_student(student, false).unwrap();
    assert_eq!(listed.iter().map(|n| n.id).collect::<Vec<_>>(), vec![second.id, reminder.id]);

    assert_eq!(fx.store.mark_notification_read(reminder.id, at(11, 0)).unwrap(), Some(true));
    assert_eq!(fx.store.mark_notification_read(reminder.id, at(12, 0)).unwrap(), Some(false));
    assert_eq!(fx.store.mark_notification_read(uuid::Uuid::new_v4(), at(12, 0)).unwrap(), None);
    let read = fx.store.notification(reminder.id).unwrap().unwrap();
    assert_eq!(read.read_at, Some(at(11, 0)));

    assert_eq!(fx.store.notifications_for_student(student, true).unwrap().len(), 1);
    assert_eq!(fx.store.mark_all_notifications_read(student, at(12, 0)).unwrap(), 1);
    assert_eq!(fx.store.mark_all_notifications_read(student, at(12, 0)).unwrap(), 0);

    assert_eq!(fx.store.unsent_notifications(10).unwrap().len(), 2);
    assert!(fx.store.mark_notification_sent(second.id, at(12, 5)).unwrap());
    assert!(!fx.store.mark_notification_sent(second.id, at(12, 6)).unwrap());
    assert_eq!(fx.store.unsent_notifications(10).unwrap().len(), 1);
}

#[test]
fn roster_is_ordered_by_roll_number() {
    let fx = fixture(3);
    assert_eq!(fx.store.roster(fx.course_id).unwrap(), fx.students);
    assert!(fx.store.is_enrolled(fx.course_id, fx.students[1]).unwrap());
    assert!(!fx.store.is_enrolled(fx.course_id, 999).unwrap());
    assert!(!fx.store.enroll(fx.course_id, fx.students[0]).unwrap());
}

#[test]
fn face_candidates_only_include_registered_students() {
    let fx = fixture(2);
    let mut embedding = Embedding::new(vec![0.6, 0.8]);
    embedding.model_version = Some("w600k_r50".into());
    assert!(fx.store.set_face_embedding(fx.students[1], &embedding).unwrap());
    assert!(!fx.store.set_face_embedding(999, &embedding).unwrap());

    let candidates = fx.store.face_candidates(fx.course_id).unwrap();
    assert_eq!(candidates.len(), 1);
    assert_eq!(candidates[0].student_id, fx.students[1]);
    assert_eq!(candidates[0].embedding, embedding);

    let student = fx.store.student(fx.students[1]).unwrap().unwrap();
    assert_eq!(student.embedding, Some(embedding));
}

#[test]
fn trailing_window_follows_course_order() {
    let fx = fixture(1);
    let sessions: Vec<Session> = (2..=6)
        .map(|day| session(&fx, &format!("s-{day}"), day, true))
        .collect();

    let window = fx.store.trailing_sessions(&sessions[3], 3).unwrap();
    assert_eq!(
        window,
        vec![sessions[3].id.clone(), sessions[2].id.clone(), sessions[1].id.clone()]
    );
    assert_eq!(fx.store.creation_ordinal(&sessions[0]).unwrap(), 1);
    assert_eq!(fx.store.creation_ordinal(&sessions[4]).unwrap(), 5);

    assert_eq!(fx.store.unreconciled_sessions().unwrap().len(), 5);
    fx.store.mark_reconciled(&sessions[0].id, at(11, 0) + Duration::days(1)).unwrap();
    assert_eq!(fx.store.unreconciled_sessions().unwrap().len(), 4);
}

#[test]
fn student_statuses_grouped_by_course() {
    let fx = fixture(1);
    let student = fx.students[0];
    let s1 = session(&fx, "s-1", 2, false);
    let s2 = session(&fx, "s-2", 3, false);
    fx.store
        .upsert_attendance(&s1.id, student, &write(AttendanceStatus::Present), at(9, 5))
        .unwrap();
    fx.store
        .upsert_attendance(
            &s2.id,
            student,
            &write(AttendanceStatus::Excused),
            at(9, 5) + Duration::days(1),
        )
        .unwrap();

    let rows = fx.store.statuses_by_course(student, None).unwrap();
    assert_eq!(rows.len(), 2);
    assert!(rows.iter().all(|(course, _)| course.code == "CS101"));
    assert!(fx.store.statuses_by_course(student, Some(999)).unwrap().is_empty());

    let history = fx.store.history_for_student(student, 1).unwrap();
    assert_eq!(history.len(), 1);
    assert_eq!(history[0].session_id, s2.id);

    let window = fx.store.statuses_in_sessions(&[s1.id.clone(), s2.id.clone()]).unwrap();
    assert_eq!(window.len(), 2);
}

#[test]
fn statuses_by_student_respects_enrollment() {
    let fx = fixture(2);
    let outsider = fx
        .store
        .insert_student("X001", "Visiting", "Student", "x@uni.edu")
        .unwrap()
        .id;
    let s = session(&fx, "s-1", 2, false);
    for (student, status) in [
        (fx.students[1], AttendanceStatus::Absent),
        (outsider, AttendanceStatus::Late),
        (fx.students[0], AttendanceStatus::Present),
    ] {
        fx.store.upsert_attendance(&s.id, student, &write(status), at(9, 5)).unwrap();
    }

    let everyone = fx.store.statuses_by_student(None).unwrap();
    assert_eq!(
        everyone,
        vec![
            (fx.students[0], AttendanceStatus::Present),
            (fx.students[1], AttendanceStatus::Absent),
            (outsider, AttendanceStatus::Late),
        ]
    );
    let enrolled = fx.store.statuses_by_student(Some(fx.course_id)).unwrap();
    assert_eq!(enrolled.len(), 2);
    assert!(enrolled.iter().all(|(student, _)| *student != outsider));
    assert!(fx.store.statuses_by_student(Some(999)).unwrap().is_empty());
}

#[test]
fn creation_ordinal_ignores_backdated_sessions() {
    let fx = fixture(1);
    let third = session(&fx, "s-c", 4, false);
    let fourth = session(&fx, "s-d", 5, false);
    assert_eq!(fx.store.creation_ordinal(&fourth).unwrap(), 2);

    let mut backdated = session_row(&fx, "s-a", 2);
    backdated.created_at = at(8, 0) + Duration::days(10);
    fx.store.insert_session(&backdated).unwrap();

    assert_eq!(fx.store.creation_ordinal(&third).unwrap(), 1);
    assert_eq!(fx.store.creation_ordinal(&fourth).unwrap(), 2);
    assert_eq!(fx.store.creation_ordinal(&backdated).unwrap(), 3);
    // The trailing window still reads by date.
    assert_eq!(
        fx.store.trailing_sessions(&third, 2).unwrap(),
        vec![third.id.clone(), backdated.id.clone()]
    );
}
