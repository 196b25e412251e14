//! The attendance ledger: idempotent create-or-update per (session, student).

use rollcall_core::{
    AttendanceError, AttendanceRecord, AttendanceResult, AttendanceStatus, Clock, MarkOutcome,
    MarkRequest, Roster, SessionId, StudentId, VerificationMethod,
};
use rollcall_store::{Amendment, RecordWrite, Store};
use serde::{Deserialize, Serialize, Serializer};
use std::sync::Arc;

/// One entry of a bulk submission.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BulkItem {
    pub student_id: StudentId,
    pub status: AttendanceStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub method: Option<VerificationMethod>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BulkItemResult {
    pub student_id: StudentId,
    pub status: AttendanceStatus,
    pub created: bool,
    #[serde(
        skip_serializing_if = "Option::is_none",
        serialize_with = "error_as_text"
    )]
    pub error: Option<AttendanceError>,
}

impl BulkItemResult {
    pub fn is_ok(&self) -> bool {
        self.error.is_none()
    }
}

fn error_as_text<S: Serializer>(error: &Option<AttendanceError>, s: S) -> Result<S::Ok, S::Error> {
    match error {
        Some(e) => s.serialize_str(&e.to_string()),
        None => s.serialize_none(),
    }
}

/// Per-item results in input order.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BulkReport {
    pub session_id: SessionId,
    pub results: Vec<BulkItemResult>,
    pub succeeded: usize,
}

pub struct AttendanceLedger {
    store: Arc<Store>,
    roster: Arc<dyn Roster>,
    clock: Arc<dyn Clock>,
}

impl AttendanceLedger {
    pub fn new(store: Arc<Store>, roster: Arc<dyn Roster>, clock: Arc<dyn Clock>) -> Self {
        Self {
            store,
            roster,
            clock,
        }
    }

    /// Create or overwrite the record for one student.
    ///
    /// Manual is the default method. Face marks are rejected here because
    /// they carry a confidence; they go through the face matcher.
    pub fn mark(&self, request: &MarkRequest) -> AttendanceResult<MarkOutcome> {
        let method = request.method.unwrap_or(VerificationMethod::Manual);
        if method == VerificationMethod::FaceRecognition {
            return Err(AttendanceError::Validation(
                "face_recognition marks must be submitted through face matching".into(),
            ));
        }
        if let Some(location) = &request.location {
            location.validate()?;
        }
        let write = RecordWrite {
            status: request.status,
            method,
            confidence: None,
            location: request.location,
            note: request.note.clone(),
        };
        self.apply(&request.session_id, request.student_id, &write)
    }

    pub(crate) fn apply(
        &self,
        session_id: &SessionId,
        student_id: StudentId,
        write: &RecordWrite,
    ) -> AttendanceResult<MarkOutcome> {
        let now = self.clock.now();
        let session = self
            .store
            .session(session_id)?
            .ok_or_else(|| AttendanceError::not_found("session", session_id))?;
        if !session.is_open_at(now) {
            return Err(AttendanceError::SessionClosed(session_id.clone()));
        }
        if !self.store.student_exists(student_id)? {
            return Err(AttendanceError::not_found("student", student_id));
        }
        if !self.roster.is_enrolled(session.course_id, student_id)? {
            return Err(AttendanceError::NotEnrolled {
                student_id,
                course_id: session.course_id,
            });
        }

        // Open state and existence are re-checked inside the write transaction.
        let outcome = self.store.upsert_attendance(session_id, student_id, write, now)?;
        tracing::info!(
            session_id = %session_id,
            student_id,
            status = %outcome.record.status,
            method = %outcome.record.method,
            created = outcome.created,
            "attendance marked"
        );
        Ok(outcome)
    }

    /// Apply many marks to one session.
    ///
    /// An unknown or closed session rejects the whole call. After that every
    /// item succeeds or fails on its own; results keep input order.
    pub fn bulk_mark(&self, session_id: &SessionId, items: &[BulkItem]) -> AttendanceResult<BulkReport> {
        let session = self
            .store
            .session(session_id)?
            .ok_or_else(|| AttendanceError::not_found("session", session_id))?;
        if !session.is_open_at(self.clock.now()) {
            return Err(AttendanceError::SessionClosed(session_id.clone()));
        }

        let results: Vec<BulkItemResult> = items
            .iter()
            .map(|item| {
                let mut request = MarkRequest::new(session_id.clone(), item.student_id, item.status);
                request.method = item.method;
                match self.mark(&request) {
                    Ok(outcome) => BulkItemResult {
                        student_id: item.student_id,
                        status: item.status,
                        created: outcome.created,
                        error: None,
                    },
                    Err(e) => {
                        tracing::debug!(
                            session_id = %session_id,
                            student_id = item.student_id,
                            error = %e,
                            "bulk item rejected"
                        );
                        BulkItemResult {
                            student_id: item.student_id,
                            status: item.status,
                            created: false,
                            error: Some(e),
                        }
                    }
                }
            })
            .collect();

        let succeeded = results.iter().filter(|r| r.is_ok()).count();
        tracing::info!(
            session_id = %session_id,
            items = items.len(),
            succeeded,
            "bulk mark applied"
        );
        Ok(BulkReport {
            session_id: session_id.clone(),
            results,
            succeeded,
        })
    }

    pub fn records_for_session(&self, session_id: &SessionId) -> AttendanceResult<Vec<AttendanceRecord>> {
        if self.store.session(session_id)?.is_none() {
            return Err(AttendanceError::not_found("session", session_id));
        }
        Ok(self.store.records_for_session(session_id)?)
    }

    /// Most recent first.
    pub fn history_for_student(
        &self,
        student_id: StudentId,
        limit: usize,
    ) -> AttendanceResult<Vec<AttendanceRecord>> {
        if !self.store.student_exists(student_id)? {
            return Err(AttendanceError::not_found("student", student_id));
        }
        Ok(self.store.history_for_student(student_id, limit)?)
    }

    pub fn amendments(
        &self,
        session_id: &SessionId,
        student_id: StudentId,
    ) -> AttendanceResult<Vec<Amendment>> {
        Ok(self.store.amendments(session_id, student_id)?)
    }
}
