//! Session lifecycle.

use crate::absentee::{AbsenteeDetector, ReconcileReport};
use chrono::{NaiveDate, NaiveTime};
use rollcall_core::{
    AttendanceError, AttendanceResult, CaptureMethod, Clock, CourseId, FacultyId, Session,
    SessionId, SessionState,
};
use rollcall_store::Store;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Parameters for opening a session. Times are UTC.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OpenSession {
    pub course_id: CourseId,
    pub faculty_id: FacultyId,
    pub date: NaiveDate,
    pub start_time: NaiveTime,
    pub end_time: NaiveTime,
    pub capture: CaptureMethod,
}

/// A session together with its state at the time it was read.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SessionView {
    #[serde(flatten)]
    pub session: Session,
    pub state: SessionState,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CloseOutcome {
    pub session: SessionView,
    pub already_closed: bool,
    /// Present when this call closed the session and reconciliation ran.
    pub reconciliation: Option<ReconcileReport>,
}

pub struct SessionManager {
    store: Arc<Store>,
    clock: Arc<dyn Clock>,
    absentees: Arc<AbsenteeDetector>,
}

impl SessionManager {
    pub fn new(store: Arc<Store>, clock: Arc<dyn Clock>, absentees: Arc<AbsenteeDetector>) -> Self {
        Self {
            store,
            clock,
            absentees,
        }
    }

    pub fn open(&self, request: &OpenSession) -> AttendanceResult<Session> {
        if request.end_time <= request.start_time {
            return Err(AttendanceError::Validation(format!(
                "end time {} must be after start time {}",
                request.end_time, request.start_time
            )));
        }
        let course = self
            .store
            .course(request.course_id)?
            .ok_or_else(|| AttendanceError::not_found("course", request.course_id))?;
        if self.store.faculty(request.faculty_id)?.is_none() {
            return Err(AttendanceError::not_found("faculty", request.faculty_id));
        }
        if course.faculty_id != request.faculty_id {
            return Err(AttendanceError::Unauthorized {
                faculty_id: request.faculty_id,
                course_id: course.id,
            });
        }

        let session = Session {
            id: SessionId::generate(),
            course_id: course.id,
            faculty_id: request.faculty_id,
            date: request.date,
            start_time: request.start_time,
            end_time: request.end_time,
            capture: request.capture,
            explicitly_closed: false,
            created_at: self.clock.now(),
            reconciled_at: None,
        };
        self.store.insert_session(&session)?;
        tracing::info!(
            session_id = %session.id,
            course = %course.code,
            date = %session.date,
            start = %session.start_time,
            end = %session.end_time,
            capture = %session.capture,
            "session opened"
        );
        Ok(session)
    }

    /// Close a session and reconcile its absentees.
    ///
    /// Closing an already closed session changes nothing. If reconciliation
    /// fails the close still stands and the daemon sweep retries it.
    pub fn close(&self, session_id: &SessionId) -> AttendanceResult<CloseOutcome> {
        let first_close = self
            .store
            .close_session(session_id)?
            .ok_or_else(|| AttendanceError::not_found("session", session_id))?;

        let reconciliation = if first_close {
            tracing::info!(session_id = %session_id, "session closed");
            match self.absentees.run(session_id) {
                Ok(report) => Some(report),
                Err(e) => {
                    tracing::warn!(session_id = %session_id, error = %e, "reconciliation after close failed");
                    None
                }
            }
        } else {
            tracing::debug!(session_id = %session_id, "session already closed");
            None
        };

        Ok(CloseOutcome {
            session: self.get(session_id)?,
            already_closed: !first_close,
            reconciliation,
        })
    }

    /// Open iff not explicitly closed and the end time has not been reached.
    pub fn is_open(&self, session: &Session) -> bool {
        session.is_open_at(self.clock.now())
    }

    pub fn view(&self, session: Session) -> SessionView {
        let state = session.state_at(self.clock.now());
        SessionView { session, state }
    }

    pub fn get(&self, session_id: &SessionId) -> AttendanceResult<SessionView> {
        let session = self
            .store
            .session(session_id)?
            .ok_or_else(|| AttendanceError::not_found("session", session_id))?;
        Ok(self.view(session))
    }

    pub fn list_for_course(&self, course_id: CourseId) -> AttendanceResult<Vec<SessionView>> {
        if self.store.course(course_id)?.is_none() {
            return Err(AttendanceError::not_found("course", course_id));
        }
        Ok(self
            .store
            .sessions_for_course(course_id)?
            .into_iter()
            .map(|s| self.view(s))
            .collect())
    }
}
