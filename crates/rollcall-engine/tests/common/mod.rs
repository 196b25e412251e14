#![allow(dead_code)]

use chrono::{DateTime, Duration, NaiveDate, NaiveTime, TimeZone, Utc};
use rollcall_core::{
    AttendanceStatus, CaptureMethod, Clock, DeliveryError, FaceExtractor, ManualClock,
    MarkRequest, Notification, NotificationKind, NotificationSink, Roster, Session, StudentId,
};
use rollcall_engine::{spawn_extractor, Config, OpenSession, Rollcall, Wiring};
use rollcall_store::Store;
use rollcall_vision::StubExtractor;
use std::sync::{Arc, Mutex};
use std::time::Duration as StdDuration;

/// Sink that remembers every hand-off.
#[derive(Default)]
pub struct RecordingSink {
    delivered: Mutex<Vec<Notification>>,
}

impl RecordingSink {
    pub fn delivered(&self) -> Vec<Notification> {
        self.delivered.lock().unwrap().clone()
    }

    pub fn count(&self, kind: NotificationKind) -> usize {
        self.delivered().iter().filter(|n| n.kind == kind).count()
    }
}

impl NotificationSink for RecordingSink {
    fn deliver(&self, notification: &Notification) -> Result<(), DeliveryError> {
        self.delivered.lock().unwrap().push(notification.clone());
        Ok(())
    }
}

pub fn monday(hour: u32, minute: u32) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2026, 3, 2, hour, minute, 0).unwrap()
}

/// One faculty member teaching one course with a roster of students.
pub struct Campus {
    pub rollcall: Rollcall,
    pub store: Arc<Store>,
    pub clock: Arc<ManualClock>,
    pub sink: Arc<RecordingSink>,
    pub faculty_id: i64,
    pub course_id: i64,
    pub students: Vec<StudentId>,
}

impl Campus {
    pub fn new(roster_size: usize) -> Self {
        Self::build(roster_size, Config::default(), Box::new(StubExtractor::new(8)))
    }

    pub fn build(roster_size: usize, config: Config, extractor: Box<dyn FaceExtractor>) -> Self {
        Self::build_with(roster_size, config, extractor, |store| store as Arc<dyn Roster>)
    }

    /// Like [`Campus::build`] with the engine reading enrollment from the
    /// roster `roster` returns.
    pub fn build_with(
        roster_size: usize,
        config: Config,
        extractor: Box<dyn FaceExtractor>,
        roster: impl FnOnce(Arc<Store>) -> Arc<dyn Roster>,
    ) -> Self {
        let store = Arc::new(Store::open_in_memory().unwrap());
        let clock = Arc::new(ManualClock::new(monday(8, 55)));
        let sink = Arc::new(RecordingSink::default());

        let faculty = store.insert_faculty("Grace Hopper", "grace@uni.edu").unwrap();
        let course = store.insert_course("CS101", "Intro to Computing", faculty.id).unwrap();
        let students = (0..roster_size)
            .map(|i| {
                let student = store
                    .insert_student(&format!("R{i:03}"), "Student", &format!("No{i}"), "s@uni.edu")
                    .unwrap();
                store.enroll(course.id, student.id).unwrap();
                student.id
            })
            .collect();

        let extractor = spawn_extractor(extractor, StdDuration::from_millis(config.face.extract_timeout_ms)).unwrap();
        let wiring = Wiring::new(store.clone())
            .with_clock(clock.clone())
            .with_sink(sink.clone())
            .with_roster(roster(store.clone()));
        Self {
            rollcall: Rollcall::assemble(&config, wiring, extractor),
            store,
            clock,
            sink,
            faculty_id: faculty.id,
            course_id: course.id,
            students,
        }
    }

    /// Open a 09:00-10:00 session `days` after Monday.
    pub fn open_session(&self, days: i64) -> Session {
        self.rollcall
            .sessions
            .open(&OpenSession {
                course_id: self.course_id,
                faculty_id: self.faculty_id,
                date: NaiveDate::from_ymd_opt(2026, 3, 2).unwrap() + Duration::days(days),
                start_time: NaiveTime::from_hms_opt(9, 0, 0).unwrap(),
                end_time: NaiveTime::from_hms_opt(10, 0, 0).unwrap(),
                capture: CaptureMethod::Manual,
            })
            .unwrap()
    }

    /// Move the clock into the session's hour.
    pub fn enter(&self, session: &Session) {
        self.clock.set(session.starts_at() + Duration::minutes(5));
    }

    /// Move the clock past the session's end.
    pub fn leave(&self, session: &Session) {
        self.clock.set(session.ends_at() + Duration::minutes(1));
    }

    pub fn mark(&self, session: &Session, student: StudentId, status: AttendanceStatus) {
        self.rollcall
            .ledger
            .mark(&MarkRequest::new(session.id.clone(), student, status))
            .unwrap();
    }

    pub fn now(&self) -> DateTime<Utc> {
        self.clock.now()
    }
}
