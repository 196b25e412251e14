use crate::types::{CourseId, FacultyId, SessionId, StudentId};
use thiserror::Error;

/// Errors surfaced by attendance operations.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum AttendanceError {
    #[error("validation failed: {0}")]
    Validation(String),
    #[error("{entity} not found: {id}")]
    NotFound { entity: &'static str, id: String },
    #[error("faculty {faculty_id} does not own course {course_id}")]
    Unauthorized {
        faculty_id: FacultyId,
        course_id: CourseId,
    },
    #[error("session {0} is closed")]
    SessionClosed(SessionId),
    #[error("session {0} is still open")]
    SessionOpen(SessionId),
    #[error("student {student_id} is not enrolled in course {course_id}")]
    NotEnrolled {
        student_id: StudentId,
        course_id: CourseId,
    },
    #[error("no face detected in probe image")]
    NoFaceDetected,
    #[error("confidence {confidence:.1} does not exceed the acceptance floor {floor:.1}")]
    LowConfidence { confidence: f32, floor: f32 },
    #[error("storage error: {0}")]
    Storage(String),
}

impl AttendanceError {
    pub fn not_found(entity: &'static str, id: impl ToString) -> Self {
        Self::NotFound {
            entity,
            id: id.to_string(),
        }
    }

    /// Recognition failures are expected outcomes of probing, not faults.
    pub fn is_recognition_failure(&self) -> bool {
        matches!(self, Self::NoFaceDetected | Self::LowConfidence { .. })
    }
}

pub type AttendanceResult<T> = Result<T, AttendanceError>;
