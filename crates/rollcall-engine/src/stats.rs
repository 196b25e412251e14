//! Live attendance statistics. Nothing here is stored; every call re-reads
//! the ledger.

use rollcall_core::{AttendanceError, AttendanceResult, CourseId, SessionId, StudentId, Tally};
use rollcall_store::Store;
use serde::Serialize;
use std::sync::Arc;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SessionStats {
    pub session_id: SessionId,
    pub course_id: CourseId,
    #[serde(flatten)]
    pub tally: Tally,
    pub percentage: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CourseStats {
    pub course_id: CourseId,
    pub code: String,
    pub name: String,
    #[serde(flatten)]
    pub tally: Tally,
    pub percentage: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StudentStats {
    pub student_id: StudentId,
    /// Ordered by course code.
    pub courses: Vec<CourseStats>,
    pub overall: Tally,
    pub percentage: f64,
}

/// A student whose attendance fell below the report threshold.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LowAttendance {
    pub student_id: StudentId,
    #[serde(flatten)]
    pub tally: Tally,
    pub percentage: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LowAttendanceReport {
    pub course_id: Option<CourseId>,
    pub threshold: f64,
    pub count: usize,
    /// Ordered by student id.
    pub students: Vec<LowAttendance>,
}

pub struct StatsAggregator {
    store: Arc<Store>,
}

impl StatsAggregator {
    pub fn new(store: Arc<Store>) -> Self {
        Self { store }
    }

    pub fn session_stats(&self, session_id: &SessionId) -> AttendanceResult<SessionStats> {
        let session = self
            .store
            .session(session_id)?
            .ok_or_else(|| AttendanceError::not_found("session", session_id))?;
        let tally: Tally = self
            .store
            .records_for_session(session_id)?
            .into_iter()
            .map(|r| r.status)
            .collect();
        Ok(SessionStats {
            session_id: session.id,
            course_id: session.course_id,
            percentage: tally.percentage(),
            tally,
        })
    }

    /// Per-course and overall tallies over every session the student has a
    /// record for, optionally restricted to one course.
    pub fn student_stats(
        &self,
        student_id: StudentId,
        course_id: Option<CourseId>,
    ) -> AttendanceResult<StudentStats> {
        if !self.store.student_exists(student_id)? {
            return Err(AttendanceError::not_found("student", student_id));
        }

        let mut courses: Vec<CourseStats> = Vec::new();
        for (course, status) in self.store.statuses_by_course(student_id, course_id)? {
            // Rows arrive grouped by course.
            match courses.last_mut() {
                Some(last) if last.course_id == course.id => last.tally.record(status),
                _ => {
                    let mut tally = Tally::default();
                    tally.record(status);
                    courses.push(CourseStats {
                        course_id: course.id,
                        code: course.code,
                        name: course.name,
                        tally,
                        percentage: 0.0,
                    });
                }
            }
        }

        let mut overall = Tally::default();
        for course in &mut courses {
            course.percentage = course.tally.percentage();
            overall.merge(&course.tally);
        }
        Ok(StudentStats {
            student_id,
            courses,
            percentage: overall.percentage(),
            overall,
        })
    }

    /// Students with at least one record whose attendance is strictly below
    /// `threshold` percent. With a course, only its enrolled students and
    /// the records of its sessions count.
    pub fn low_attendance(
        &self,
        course_id: Option<CourseId>,
        threshold: f64,
    ) -> AttendanceResult<LowAttendanceReport> {
        if !threshold.is_finite() || !(0.0..=100.0).contains(&threshold) {
            return Err(AttendanceError::Validation(format!(
                "threshold {threshold} outside [0, 100]"
            )));
        }
        if let Some(id) = course_id {
            if self.store.course(id)?.is_none() {
                return Err(AttendanceError::not_found("course", id));
            }
        }

        let mut tallies: Vec<(StudentId, Tally)> = Vec::new();
        for (student_id, status) in self.store.statuses_by_student(course_id)? {
            // Rows arrive grouped by student.
            match tallies.last_mut() {
                Some((last, tally)) if *last == student_id => tally.record(status),
                _ => {
                    let mut tally = Tally::default();
                    tally.record(status);
                    tallies.push((student_id, tally));
                }
            }
        }

        let students: Vec<LowAttendance> = tallies
            .into_iter()
            .filter(|(_, tally)| {
                tally.total > 0
                    && 100.0 * f64::from(tally.attended()) / f64::from(tally.total) < threshold
            })
            .map(|(student_id, tally)| LowAttendance {
                student_id,
                percentage: tally.percentage(),
                tally,
            })
            .collect();
        tracing::debug!(course_id = ?course_id, threshold, flagged = students.len(), "low attendance report");
        Ok(LowAttendanceReport {
            course_id,
            threshold,
            count: students.len(),
            students,
        })
    }
}
