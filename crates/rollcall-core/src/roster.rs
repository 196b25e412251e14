use crate::error::AttendanceResult;
use crate::types::{CourseId, StudentId};

/// Source of truth for course enrollment. The engine only reads it.
pub trait Roster: Send + Sync {
    /// Students enrolled in the course, ordered by roll number.
    fn roster(&self, course_id: CourseId) -> AttendanceResult<Vec<StudentId>>;

    fn is_enrolled(&self, course_id: CourseId, student_id: StudentId) -> AttendanceResult<bool> {
        Ok(self.roster(course_id)?.contains(&student_id))
    }
}
