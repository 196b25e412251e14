//! Absentee reconciliation.
//!
//! After a session closes, every roster student without a record gets a
//! system-generated absent record and an absence notification, each pair in
//! its own transaction. Both inserts are conditional, so a second run over
//! the same session creates nothing.

use crate::config::AbsenteeConfig;
use crate::messages;
use crate::notifications::NotificationCenter;
use rollcall_core::{
    AttendanceError, AttendanceResult, Clock, Course, Roster, Session, SessionId, StudentId, Tally,
};
use rollcall_store::Store;
use serde::Serialize;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ReconcileReport {
    pub session_id: SessionId,
    pub roster_size: usize,
    /// Students that received a new absent record.
    pub absences_created: Vec<StudentId>,
    pub notifications_created: usize,
    /// Students warned for low attendance in this run.
    pub low_attendance_warnings: Vec<StudentId>,
    /// Evaluation window the warnings were keyed on.
    pub window_key: String,
    /// Per-student steps that failed and were skipped.
    pub failures: usize,
}

pub struct AbsenteeDetector {
    store: Arc<Store>,
    roster: Arc<dyn Roster>,
    clock: Arc<dyn Clock>,
    notifications: Arc<NotificationCenter>,
    config: AbsenteeConfig,
}

impl AbsenteeDetector {
    pub fn new(
        store: Arc<Store>,
        roster: Arc<dyn Roster>,
        clock: Arc<dyn Clock>,
        notifications: Arc<NotificationCenter>,
        config: AbsenteeConfig,
    ) -> Self {
        Self {
            store,
            roster,
            clock,
            notifications,
            config,
        }
    }

    /// Reconcile one closed session. Safe to re-run.
    pub fn run(&self, session_id: &SessionId) -> AttendanceResult<ReconcileReport> {
        let now = self.clock.now();
        let session = self
            .store
            .session(session_id)?
            .ok_or_else(|| AttendanceError::not_found("session", session_id))?;
        if session.is_open_at(now) {
            return Err(AttendanceError::SessionOpen(session_id.clone()));
        }
        let course = self
            .store
            .course(session.course_id)?
            .ok_or_else(|| AttendanceError::not_found("course", session.course_id))?;

        let roster = self.roster.roster(session.course_id)?;
        let recorded: HashSet<StudentId> = self
            .store
            .records_for_session(session_id)?
            .into_iter()
            .map(|r| r.student_id)
            .collect();

        let mut report = ReconcileReport {
            session_id: session_id.clone(),
            roster_size: roster.len(),
            absences_created: Vec::new(),
            notifications_created: 0,
            low_attendance_warnings: Vec::new(),
            window_key: String::new(),
            failures: 0,
        };

        for &student_id in roster.iter().filter(|id| !recorded.contains(id)) {
            let notice = messages::absence(student_id, &course, &session, now);
            match self.store.record_absence(&session, student_id, &notice) {
                Ok(outcome) => {
                    if outcome.record_created {
                        report.absences_created.push(student_id);
                    }
                    if outcome.notification_created {
                        report.notifications_created += 1;
                        self.notifications.hand_off(&notice);
                    }
                }
                Err(e) => {
                    report.failures += 1;
                    tracing::warn!(
                        session_id = %session_id,
                        student_id,
                        error = %e,
                        "absence reconciliation failed for student"
                    );
                }
            }
        }

        let window_key = self.warn_low_attendance(&session, &course, &roster, &mut report)?;
        report.window_key = window_key;

        self.store.mark_reconciled(session_id, now)?;
        tracing::info!(
            session_id = %session_id,
            roster = report.roster_size,
            absences = report.absences_created.len(),
            notifications = report.notifications_created,
            low_attendance = report.low_attendance_warnings.len(),
            failures = report.failures,
            "session reconciled"
        );
        Ok(report)
    }

    /// Evaluate the trailing window ending at `session` and warn every roster
    /// student below the threshold, once per tumbling window.
    fn warn_low_attendance(
        &self,
        session: &Session,
        course: &Course,
        roster: &[StudentId],
        report: &mut ReconcileReport,
    ) -> AttendanceResult<String> {
        let size = self.config.window_sessions.max(1);
        // Blocks follow creation order so a backdated session cannot shift them.
        let ordinal = self.store.creation_ordinal(session)?;
        let block = ordinal.saturating_sub(1) / size as u64;
        let window_key = format!("{}:{block}", course.id);

        let window = self.store.trailing_sessions(session, size)?;
        let mut tallies: HashMap<StudentId, Tally> = HashMap::new();
        for (student_id, status) in self.store.statuses_in_sessions(&window)? {
            tallies.entry(student_id).or_default().record(status);
        }

        let threshold = self.config.low_attendance_threshold;
        let now = self.clock.now();
        for &student_id in roster {
            let Some(tally) = tallies.get(&student_id).filter(|t| t.total > 0) else {
                continue;
            };
            let percentage = tally.percentage();
            if percentage >= threshold {
                continue;
            }
            let notice = messages::low_attendance(
                student_id,
                course,
                percentage,
                threshold,
                window_key.clone(),
                now,
            );
            match self.notifications.publish(&notice) {
                Ok(true) => {
                    tracing::info!(student_id, percentage, window = %window_key, "low attendance warning");
                    report.low_attendance_warnings.push(student_id);
                }
                Ok(false) => {}
                Err(e) => {
                    report.failures += 1;
                    tracing::warn!(student_id, error = %e, "low attendance warning failed");
                }
            }
        }
        Ok(window_key)
    }

    /// Reconcile every session that has ended or been closed but was never
    /// reconciled. A failing session is logged and left for the next sweep.
    pub fn reconcile_due(&self) -> AttendanceResult<Vec<ReconcileReport>> {
        let now = self.clock.now();
        let due: Vec<Session> = self
            .store
            .unreconciled_sessions()?
            .into_iter()
            .filter(|s| !s.is_open_at(now))
            .collect();

        let mut reports = Vec::with_capacity(due.len());
        for session in due {
            match self.run(&session.id) {
                Ok(report) => reports.push(report),
                Err(e) => tracing::warn!(session_id = %session.id, error = %e, "reconciliation failed"),
            }
        }
        Ok(reports)
    }
}
