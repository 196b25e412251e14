//! rollcall-core: attendance domain model and matching primitives.
//!
//! Holds the types shared by every Rollcall crate: sessions, attendance
//! records, notifications, the face-matching math, and the collaborator
//! traits (clock, roster, extraction backend, notification sink) that the
//! engine is wired against.

pub mod clock;
pub mod error;
pub mod face;
pub mod notify;
pub mod roster;
pub mod tally;
pub mod types;

pub use clock::{Clock, ManualClock, SystemClock};
pub use error::{AttendanceError, AttendanceResult};
pub use face::{
    confidence_floor, confidence_for, largest_face, sort_largest_first, BoundingBox,
    DetectedFace, DistanceMetric, Embedding, ExtractError, FaceCandidate, FaceExtractor,
    MatchResult, Matcher, NearestMatcher, ProbeFace,
};
pub use notify::{DeliveryError, LogSink, NotificationSink};
pub use roster::Roster;
pub use tally::{attendance_percentage, Tally};
pub use types::{
    AttendanceRecord, AttendanceStatus, CaptureMethod, Course, CourseId, Faculty, FacultyId,
    Location, MarkOutcome, MarkRequest, Notification, NotificationKind, Session, SessionId,
    SessionState, Student, StudentId, VerificationMethod,
};
