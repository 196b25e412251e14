//! rollcall-engine: attendance recording and reconciliation.
//!
//! Components, leaf first:
//!
//! - [`SessionManager`] opens and closes sessions; open/closed is derived
//!   from the close flag and the clock.
//! - [`AttendanceLedger`] creates or overwrites the single record per
//!   (session, student).
//! - [`FaceMatcher`] identifies a probe face among enrolled students and
//!   records face-verified presence.
//! - [`StatsAggregator`] derives counts and percentages from the ledger.
//! - [`AbsenteeDetector`] turns "no record" into explicit absences after a
//!   session closes and raises notifications.
//! - [`NotificationCenter`] serves and updates persisted notifications.
//!
//! [`Rollcall`] wires all of them to one store.

pub mod absentee;
pub mod config;
pub mod extractor;
pub mod face;
pub mod ledger;
mod messages;
pub mod notifications;
mod rollcall;
pub mod session;
pub mod stats;

pub use absentee::{AbsenteeDetector, ReconcileReport};
pub use config::{Config, ConfigError};
pub use extractor::{spawn_extractor, ExtractorHandle};
pub use face::{FaceMatch, FaceMatcher, FaceRegistration, GroupIdentification, Identification, MatchPolicy};
pub use ledger::{AttendanceLedger, BulkItem, BulkItemResult, BulkReport};
pub use notifications::{ChannelSink, NotificationCenter, ReminderReport};
pub use rollcall::{EngineError, Rollcall, Wiring};
pub use session::{CloseOutcome, OpenSession, SessionManager, SessionView};
pub use stats::{
    CourseStats, LowAttendance, LowAttendanceReport, SessionStats, StatsAggregator, StudentStats,
};
