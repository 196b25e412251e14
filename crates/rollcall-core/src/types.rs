//! Attendance domain types.
//!
//! Status, method and kind values are closed enumerations. Their wire form is
//! the snake_case string returned by `as_str()`, and parsing anything else is
//! a validation error raised before any state change.

use crate::error::AttendanceError;
use crate::face::Embedding;
use chrono::{DateTime, NaiveDate, NaiveTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

pub type StudentId = i64;
pub type CourseId = i64;
pub type FacultyId = i64;

/// Opaque unique session identifier (UUID v4 text on creation).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SessionId(String);

impl SessionId {
    pub fn generate() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for SessionId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

impl From<String> for SessionId {
    fn from(value: String) -> Self {
        Self(value)
    }
}

macro_rules! wire_enum {
    ($(#[$meta:meta])* $name:ident, $what:literal { $($variant:ident => $wire:literal),+ $(,)? }) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
        #[serde(rename_all = "snake_case")]
        pub enum $name {
            $($variant),+
        }

        impl $name {
            pub const ALL: &'static [$name] = &[$($name::$variant),+];

            pub fn as_str(self) -> &'static str {
                match self {
                    $($name::$variant => $wire),+
                }
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(self.as_str())
            }
        }

        impl FromStr for $name {
            type Err = AttendanceError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                match s {
                    $($wire => Ok($name::$variant),)+
                    other => Err(AttendanceError::Validation(format!(
                        concat!("unknown ", $what, " `{}`"),
                        other
                    ))),
                }
            }
        }
    };
}

wire_enum!(
    /// Attendance outcome for one student in one session.
    AttendanceStatus, "attendance status" {
        Present => "present",
        Absent => "absent",
        Late => "late",
        Excused => "excused",
    }
);

wire_enum!(
    /// How an attendance record was verified.
    VerificationMethod, "verification method" {
        Manual => "manual",
        FaceRecognition => "face_recognition",
        MobileGps => "mobile_gps",
        QrScan => "qr_scan",
    }
);

wire_enum!(
    /// Capture method a session was opened for.
    CaptureMethod, "capture method" {
        Manual => "manual",
        Face => "face",
        Qr => "qr",
        Gps => "gps",
    }
);

wire_enum!(
    NotificationKind, "notification type" {
        Absence => "absence",
        LowAttendance => "low_attendance",
        Confirmation => "confirmation",
        Reminder => "reminder",
    }
);

impl AttendanceStatus {
    /// Present and late both count as attended.
    pub fn is_attended(self) -> bool {
        matches!(self, Self::Present | Self::Late)
    }
}

/// GPS coordinates attached to a mobile submission.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Location {
    pub latitude: f64,
    pub longitude: f64,
}

impl Location {
    pub fn new(latitude: f64, longitude: f64) -> Self {
        Self {
            latitude,
            longitude,
        }
    }

    pub fn validate(&self) -> Result<(), AttendanceError> {
        if !(-90.0..=90.0).contains(&self.latitude) {
            return Err(AttendanceError::Validation(format!(
                "latitude {} outside [-90, 90]",
                self.latitude
            )));
        }
        if !(-180.0..=180.0).contains(&self.longitude) {
            return Err(AttendanceError::Validation(format!(
                "longitude {} outside [-180, 180]",
                self.longitude
            )));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Faculty {
    pub id: FacultyId,
    pub name: String,
    pub email: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Course {
    pub id: CourseId,
    pub code: String,
    pub name: String,
    pub faculty_id: FacultyId,
}

/// A student and their optional reference face embedding.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Student {
    pub id: StudentId,
    pub roll_number: String,
    pub first_name: String,
    pub last_name: String,
    pub email: String,
    pub embedding: Option<Embedding>,
}

impl Student {
    pub fn full_name(&self) -> String {
        format!("{} {}", self.first_name, self.last_name)
    }
}

/// Effective state of a session at a point in time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionState {
    Open,
    Closed,
}

/// One course meeting during which attendance can be recorded.
///
/// Date and times are interpreted as UTC. Whether the session is open is
/// always derived from the close flag and the clock, never stored.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Session {
    pub id: SessionId,
    pub course_id: CourseId,
    pub faculty_id: FacultyId,
    pub date: NaiveDate,
    pub start_time: NaiveTime,
    pub end_time: NaiveTime,
    pub capture: CaptureMethod,
    pub explicitly_closed: bool,
    pub created_at: DateTime<Utc>,
    /// Set once absentee reconciliation has completed for this session.
    pub reconciled_at: Option<DateTime<Utc>>,
}

impl Session {
    pub fn starts_at(&self) -> DateTime<Utc> {
        self.date.and_time(self.start_time).and_utc()
    }

    pub fn ends_at(&self) -> DateTime<Utc> {
        self.date.and_time(self.end_time).and_utc()
    }

    pub fn is_open_at(&self, now: DateTime<Utc>) -> bool {
        !self.explicitly_closed && now < self.ends_at()
    }

    pub fn state_at(&self, now: DateTime<Utc>) -> SessionState {
        if self.is_open_at(now) {
            SessionState::Open
        } else {
            SessionState::Closed
        }
    }
}

/// The single ledger entry for a (session, student) pair.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AttendanceRecord {
    pub session_id: SessionId,
    pub student_id: StudentId,
    pub status: AttendanceStatus,
    pub method: VerificationMethod,
    /// Time of the first mark; preserved across overwrites.
    pub marked_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    /// Face match confidence in [0, 100], only for `FaceRecognition`.
    pub confidence: Option<f32>,
    pub location: Option<Location>,
    pub note: Option<String>,
    /// Inserted by absentee reconciliation rather than by a caller.
    pub system_generated: bool,
}

/// Input to a single ledger mark.
#[derive(Debug, Clone, PartialEq)]
pub struct MarkRequest {
    pub session_id: SessionId,
    pub student_id: StudentId,
    pub status: AttendanceStatus,
    pub method: Option<VerificationMethod>,
    pub location: Option<Location>,
    pub note: Option<String>,
}

impl MarkRequest {
    pub fn new(session_id: SessionId, student_id: StudentId, status: AttendanceStatus) -> Self {
        Self {
            session_id,
            student_id,
            status,
            method: None,
            location: None,
            note: None,
        }
    }

    pub fn with_method(mut self, method: VerificationMethod) -> Self {
        self.method = Some(method);
        self
    }

    pub fn with_location(mut self, location: Location) -> Self {
        self.location = Some(location);
        self
    }

    pub fn with_note(mut self, note: impl Into<String>) -> Self {
        self.note = Some(note.into());
        self
    }
}

/// Result of an idempotent create-or-update.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MarkOutcome {
    pub record: AttendanceRecord,
    pub created: bool,
}

/// Persisted notification for one student.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Notification {
    pub id: Uuid,
    pub student_id: StudentId,
    pub kind: NotificationKind,
    pub title: String,
    pub message: String,
    pub session_id: Option<SessionId>,
    pub course_id: Option<CourseId>,
    /// Evaluation window key, only for `LowAttendance`.
    pub window_key: Option<String>,
    pub is_read: bool,
    pub created_at: DateTime<Utc>,
    pub read_at: Option<DateTime<Utc>>,
    pub sent_at: Option<DateTime<Utc>>,
}

impl Notification {
    pub fn new(
        student_id: StudentId,
        kind: NotificationKind,
        title: impl Into<String>,
        message: impl Into<String>,
        created_at: DateTime<Utc>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            student_id,
            kind,
            title: title.into(),
            message: message.into(),
            session_id: None,
            course_id: None,
            window_key: None,
            is_read: false,
            created_at,
            read_at: None,
            sent_at: None,
        }
    }
}
