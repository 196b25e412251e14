//! Face identification against a session's roster.

use crate::extractor::ExtractorHandle;
use crate::ledger::AttendanceLedger;
use crate::messages;
use crate::notifications::NotificationCenter;
use rollcall_core::{
    confidence_floor, confidence_for, AttendanceError, AttendanceResult, AttendanceStatus,
    BoundingBox, CourseId, ExtractError, FaceCandidate, MarkOutcome, Matcher, NearestMatcher, Roster, SessionId, StudentId,
    VerificationMethod,
};
use rollcall_store::{RecordWrite, Store};
use serde::Serialize;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;

/// Outcome of probing one image. Negative outcomes are values, not errors.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum Identification {
    Recognized {
        student_id: StudentId,
        distance: f32,
        confidence: f32,
        faces_detected: usize,
        compared: usize,
    },
    NoMatch {
        best_distance: Option<f32>,
        compared: usize,
    },
    /// No enrolled student has a comparable reference embedding.
    NoCandidates,
    NoFaceDetected,
}

impl Identification {
    pub fn recognized(&self) -> bool {
        matches!(self, Self::Recognized { .. })
    }
}

/// One face of a group photo matched to a student.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FaceMatch {
    pub student_id: StudentId,
    pub distance: f32,
    pub confidence: f32,
    pub region: BoundingBox,
}

/// Outcome of identifying every face in one image.
///
/// Each student appears at most once in `recognized`. Faces that matched
/// nobody, or lost a student to a closer face, count as `unrecognized`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct GroupIdentification {
    pub faces_detected: usize,
    /// Candidates comparable with the extracted embeddings.
    pub compared: usize,
    pub recognized: Vec<FaceMatch>,
    pub unrecognized: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FaceRegistration {
    pub student_id: StudentId,
    pub dim: usize,
    pub model_version: Option<String>,
    pub faces_detected: usize,
}

/// Matching parameters, copied out of the face configuration.
#[derive(Debug, Clone, Copy)]
pub struct MatchPolicy {
    pub matcher: NearestMatcher,
    pub threshold: f32,
    pub max_distance: f32,
    pub confirm_marks: bool,
}

pub struct FaceMatcher {
    store: Arc<Store>,
    roster: Arc<dyn Roster>,
    ledger: Arc<AttendanceLedger>,
    notifications: Arc<NotificationCenter>,
    extractor: ExtractorHandle,
    policy: MatchPolicy,
}

fn rejected_probe(e: ExtractError) -> AttendanceError {
    match e {
        ExtractError::NoFaceDetected => AttendanceError::NoFaceDetected,
        ExtractError::Backend(msg) => AttendanceError::Validation(format!("probe image rejected: {msg}")),
    }
}

impl FaceMatcher {
    pub fn new(
        store: Arc<Store>,
        roster: Arc<dyn Roster>,
        ledger: Arc<AttendanceLedger>,
        notifications: Arc<NotificationCenter>,
        extractor: ExtractorHandle,
        policy: MatchPolicy,
    ) -> Self {
        Self {
            store,
            roster,
            ledger,
            notifications,
            extractor,
            policy,
        }
    }

    /// Confidence a face mark must strictly exceed.
    pub fn confidence_floor(&self) -> f32 {
        confidence_floor(self.policy.threshold, self.policy.max_distance)
    }

    /// Identify the largest face in `image` among the session's enrolled
    /// students. Records nothing.
    pub async fn identify(&self, session_id: &SessionId, image: Vec<u8>) -> AttendanceResult<Identification> {
        let session = self
            .store
            .session(session_id)?
            .ok_or_else(|| AttendanceError::not_found("session", session_id))?;

        let probe = match self.extractor.extract(image).await {
            Ok(probe) => probe,
            Err(ExtractError::NoFaceDetected) => {
                tracing::info!(session_id = %session_id, "identify: no face detected");
                return Ok(Identification::NoFaceDetected);
            }
            Err(e) => return Err(rejected_probe(e)),
        };

        // Roster embeddings are read only after extraction has finished.
        let candidates = self.enrolled_candidates(session.course_id)?;

        let result = self
            .policy
            .matcher
            .nearest(&probe.embedding, &candidates, self.policy.threshold);
        if result.compared == 0 {
            tracing::info!(session_id = %session_id, "identify: no comparable candidates");
            return Ok(Identification::NoCandidates);
        }

        let outcome = match (result.matched, result.student_id, result.distance) {
            (true, Some(student_id), Some(distance)) => Identification::Recognized {
                student_id,
                distance,
                confidence: confidence_for(distance, self.policy.max_distance),
                faces_detected: probe.faces_detected,
                compared: result.compared,
            },
            _ => Identification::NoMatch {
                best_distance: result.distance,
                compared: result.compared,
            },
        };
        tracing::info!(
            session_id = %session_id,
            recognized = outcome.recognized(),
            distance = ?result.distance,
            compared = result.compared,
            "identify complete"
        );
        Ok(outcome)
    }

    /// Identify every face in `image` among the session's enrolled students.
    ///
    /// A student matched by several faces keeps only the closest one. An
    /// image without faces is an empty result. Records nothing.
    pub async fn identify_all(
        &self,
        session_id: &SessionId,
        image: Vec<u8>,
    ) -> AttendanceResult<GroupIdentification> {
        let session = self
            .store
            .session(session_id)?
            .ok_or_else(|| AttendanceError::not_found("session", session_id))?;

        let faces = match self.extractor.extract_all(image).await {
            Ok(faces) => faces,
            Err(ExtractError::NoFaceDetected) => {
                tracing::info!(session_id = %session_id, "identify_all: no face detected");
                return Ok(GroupIdentification {
                    faces_detected: 0,
                    compared: 0,
                    recognized: Vec::new(),
                    unrecognized: 0,
                });
            }
            Err(e) => return Err(rejected_probe(e)),
        };
        let candidates = self.enrolled_candidates(session.course_id)?;

        let mut compared = 0;
        let mut matches: Vec<FaceMatch> = Vec::new();
        let mut best: HashMap<StudentId, usize> = HashMap::new();
        for face in &faces {
            let result = self
                .policy
                .matcher
                .nearest(&face.embedding, &candidates, self.policy.threshold);
            compared = compared.max(result.compared);
            let (true, Some(student_id), Some(distance)) =
                (result.matched, result.student_id, result.distance)
            else {
                continue;
            };
            let found = FaceMatch {
                student_id,
                distance,
                confidence: confidence_for(distance, self.policy.max_distance),
                region: face.region.clone(),
            };
            match best.get(&student_id).copied() {
                Some(at) if matches[at].distance <= distance => {}
                Some(at) => matches[at] = found,
                None => {
                    best.insert(student_id, matches.len());
                    matches.push(found);
                }
            }
        }

        let outcome = GroupIdentification {
            faces_detected: faces.len(),
            compared,
            unrecognized: faces.len() - matches.len(),
            recognized: matches,
        };
        tracing::info!(
            session_id = %session_id,
            faces = outcome.faces_detected,
            recognized = outcome.recognized.len(),
            compared,
            "identify_all complete"
        );
        Ok(outcome)
    }

    fn enrolled_candidates(&self, course_id: CourseId) -> AttendanceResult<Vec<FaceCandidate>> {
        let enrolled: HashSet<StudentId> = self.roster.roster(course_id)?.into_iter().collect();
        let mut candidates = self.store.face_candidates(course_id)?;
        candidates.retain(|c| enrolled.contains(&c.student_id));
        Ok(candidates)
    }

    /// Record a face-verified presence with its confidence.
    ///
    /// The confidence must lie in [0, 100] and strictly exceed the floor
    /// implied by the distance threshold.
    pub fn mark_via_face(
        &self,
        session_id: &SessionId,
        student_id: StudentId,
        confidence: f32,
    ) -> AttendanceResult<MarkOutcome> {
        if !confidence.is_finite() || !(0.0..=100.0).contains(&confidence) {
            return Err(AttendanceError::Validation(format!(
                "confidence {confidence} outside [0, 100]"
            )));
        }
        let floor = self.confidence_floor();
        if confidence <= floor {
            return Err(AttendanceError::LowConfidence { confidence, floor });
        }

        let write = RecordWrite {
            status: AttendanceStatus::Present,
            method: VerificationMethod::FaceRecognition,
            confidence: Some(confidence),
            location: None,
            note: None,
        };
        let outcome = self.ledger.apply(session_id, student_id, &write)?;

        if outcome.created && self.policy.confirm_marks {
            if let Err(e) = self.confirm(&outcome) {
                tracing::warn!(session_id = %session_id, student_id, error = %e, "confirmation not recorded");
            }
        }
        Ok(outcome)
    }

    fn confirm(&self, outcome: &MarkOutcome) -> AttendanceResult<()> {
        let session = self
            .store
            .session(&outcome.record.session_id)?
            .ok_or_else(|| AttendanceError::not_found("session", &outcome.record.session_id))?;
        let course = self
            .store
            .course(session.course_id)?
            .ok_or_else(|| AttendanceError::not_found("course", session.course_id))?;
        let notice = messages::confirmation(&course, &session, &outcome.record, outcome.record.marked_at);
        self.notifications.publish(&notice)?;
        Ok(())
    }

    /// Extract and store a student's reference embedding.
    pub async fn register_face(&self, student_id: StudentId, image: Vec<u8>) -> AttendanceResult<FaceRegistration> {
        if !self.store.student_exists(student_id)? {
            return Err(AttendanceError::not_found("student", student_id));
        }
        let probe = self.extractor.extract(image).await.map_err(rejected_probe)?;
        if !self.store.set_face_embedding(student_id, &probe.embedding)? {
            return Err(AttendanceError::not_found("student", student_id));
        }
        tracing::info!(
            student_id,
            dim = probe.embedding.dim(),
            backend = self.extractor.backend(),
            "reference face registered"
        );
        Ok(FaceRegistration {
            student_id,
            dim: probe.embedding.dim(),
            model_version: probe.embedding.model_version,
            faces_detected: probe.faces_detected,
        })
    }
}
