//! Per-frame violation state machine.
//!
//! Each frame runs in four phases so that no session lock is held while an
//! external service is working:
//!
//! 1. Detect and assess gaze (no lock).
//! 2. Update tracker and debouncers, plan identity checks (lock).
//! 3. Run the planned identity checks (no lock).
//! 4. Commit tracking changes and build the report (lock), then record.
//!
//! Frames of one session are serialized by the session's sequencer, so the
//! state read in phase 2 is still current in phase 4 unless a reset swapped
//! the context in between; the generation counter catches that case.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Instant;

use log::{debug, info, warn};
use thiserror::Error;

use crate::detection::domain::detections::{FaceDetection, FrameDetections, PersonDetection};
use crate::detection::domain::device_classes::DeviceClassMap;
use crate::detection::domain::head_pose::{GazeAssessment, HeadPoseEstimator};
use crate::detection::domain::overlap_filter::OverlapFilter;
use crate::detection::domain::perception::{LandmarkService, PerceptionService};
use crate::identity::domain::identity_verifier::{IdentityVerifier, VerificationOutcome};
use crate::pipeline::report::{
    FrameReport, VerificationSummary, MSG_FRAME_SKIPPED, MSG_IDENTITY_MISMATCH,
    MSG_IDENTITY_VERIFIED, MSG_MULTIPLE_PEOPLE, MSG_NO_PERSON, MSG_AWAITING_VERIFICATION,
    MSG_PERCEPTION_UNAVAILABLE, MSG_PERSON_LEFT,
};
use crate::pipeline::session::{SessionContext, SessionHandle, MULTIPLE_PEOPLE_KEY};
use crate::shared::bbox::BoundingBox;
use crate::shared::config::ProctorConfig;
use crate::shared::frame::Frame;
use crate::violations::domain::violation::ViolationSet;
use crate::violations::domain::violation_recorder::ViolationRecorder;
use crate::violations::domain::violation_store::StoreError;

#[derive(Debug, Error)]
pub enum ProctorError {
    /// The frame was fully analysed but its violations could not be stored.
    #[error("frame {} analysed but violations not recorded: {source}", .report.frame_index)]
    Store {
        source: StoreError,
        report: Box<FrameReport>,
    },
}

#[derive(Clone, Debug)]
pub enum FrameImage {
    Decoded(Frame),
    Encoded { bytes: Vec<u8>, index: usize },
}

#[derive(Clone, Debug)]
pub struct FrameInput {
    pub image: FrameImage,
    pub timestamp: Instant,
}

impl FrameInput {
    pub fn decoded(frame: Frame, timestamp: Instant) -> Self {
        Self {
            image: FrameImage::Decoded(frame),
            timestamp,
        }
    }

    pub fn encoded(bytes: Vec<u8>, index: usize, timestamp: Instant) -> Self {
        Self {
            image: FrameImage::Encoded { bytes, index },
            timestamp,
        }
    }

    pub fn index(&self) -> usize {
        match &self.image {
            FrameImage::Decoded(frame) => frame.index(),
            FrameImage::Encoded { index, .. } => *index,
        }
    }
}

/// External collaborators the orchestrator calls into.
#[derive(Clone)]
pub struct OrchestratorPorts {
    pub perception: Arc<dyn PerceptionService>,
    pub landmarks: Arc<dyn LandmarkService>,
    pub verifier: Arc<IdentityVerifier>,
}

/// Evidence gathered from one frame before the session is touched.
struct FrameEvidence {
    detections: FrameDetections,
    devices_present: HashSet<String>,
    multiple_people_present: bool,
    multiple_faces: bool,
    looking_away: bool,
    head_turning: bool,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum SubjectCheck {
    /// Nobody verified yet; success anchors tracking on this id.
    Establish(u32),
    /// The largest person is no longer the tracked id.
    Reanchor(u32),
}

#[derive(Default)]
struct VerificationPlan {
    /// Every person, when the multiple-people latch is closed.
    everyone: Vec<BoundingBox>,
    subject: Option<(SubjectCheck, BoundingBox)>,
    whole_frame: bool,
}

impl VerificationPlan {
    fn is_empty(&self) -> bool {
        self.everyone.is_empty() && self.subject.is_none() && !self.whole_frame
    }
}

#[derive(Default)]
struct VerificationResults {
    everyone_mismatch: bool,
    subject: Option<(SubjectCheck, VerificationOutcome)>,
    whole_frame: Option<VerificationOutcome>,
}

pub struct ViolationOrchestrator {
    ports: OrchestratorPorts,
    recorder: Arc<ViolationRecorder>,
    config: ProctorConfig,
    overlap: OverlapFilter,
    device_classes: DeviceClassMap,
    head_pose: HeadPoseEstimator,
}

impl ViolationOrchestrator {
    pub fn new(config: ProctorConfig, ports: OrchestratorPorts, recorder: Arc<ViolationRecorder>) -> Self {
        Self {
            overlap: OverlapFilter::new(&config.overlap, config.multiple_people.confidence_floor),
            device_classes: DeviceClassMap::new(&config.devices.labels),
            head_pose: HeadPoseEstimator::new(config.head_pose.clone()),
            ports,
            recorder,
            config,
        }
    }

    pub fn config(&self) -> &ProctorConfig {
        &self.config
    }

    pub fn recorder(&self) -> &Arc<ViolationRecorder> {
        &self.recorder
    }

    /// Resets the session and forgets its duplicate-suppression history.
    pub fn reset_session(&self, session: &SessionHandle) {
        session.reset();
        self.recorder.forget(session.student_id(), session.exam_id());
    }

    pub fn process_frame(
        &self,
        session: &SessionHandle,
        input: &FrameInput,
    ) -> Result<FrameReport, ProctorError> {
        let _sequence = session.sequence();
        let now = input.timestamp;

        let decoded;
        let frame = match &input.image {
            FrameImage::Decoded(frame) => frame,
            FrameImage::Encoded { bytes, index } => match Frame::decode(bytes, *index) {
                Ok(frame) => {
                    decoded = frame;
                    &decoded
                }
                Err(e) => {
                    warn!("Skipping frame {index}: {e}");
                    return Ok(self.latched_report(session, *index, MSG_FRAME_SKIPPED));
                }
            },
        };

        let evidence = match self.gather_evidence(frame) {
            Some(evidence) => evidence,
            None => {
                return Ok(self.latched_report(session, frame.index(), MSG_PERCEPTION_UNAVAILABLE))
            }
        };

        let (generation, persons, mut violations, plan) = {
            let mut slot = session.lock_slot();
            let generation = slot.generation;
            let (persons, violations, plan) = self.update_signals(&mut slot.context, &evidence, now);
            (generation, persons, violations, plan)
        };

        let results = self.run_verifications(session.student_id(), frame, &plan);

        let report = {
            let mut slot = session.lock_slot();
            let identity_verified = if slot.generation == generation {
                Self::commit(&mut slot.context, &results, &mut violations, now, !plan.is_empty())
            } else {
                info!(
                    "Session {}/{} reset during frame {}; results not committed",
                    session.student_id(),
                    session.exam_id(),
                    frame.index()
                );
                Self::identity_verdict(&results)
            };
            if results.everyone_mismatch {
                violations.identity_mismatch = true;
            }

            let tracked = slot.context.state.tracked_person_id;
            let detections = FrameDetections {
                persons,
                ..evidence.detections
            };
            FrameReport {
                frame_index: frame.index(),
                skipped: false,
                violations,
                verification: VerificationSummary {
                    person_tracked: tracked.is_some(),
                    face_verification_triggered: !plan.is_empty(),
                    identity_verified,
                    message: Self::message(&violations, identity_verified, tracked, &detections),
                },
                tracked_person_id: tracked,
                detections,
            }
        };

        if report.violations.any() {
            debug!(
                "Frame {} violations: {:?}",
                report.frame_index,
                report.violations.active()
            );
        }

        match self
            .recorder
            .record(session.student_id(), session.exam_id(), &report.violations, now)
        {
            Ok(_) => Ok(report),
            Err(source) => Err(ProctorError::Store {
                source,
                report: Box::new(report),
            }),
        }
    }

    /// Detections, floors and gaze. `None` when perception failed.
    fn gather_evidence(&self, frame: &Frame) -> Option<FrameEvidence> {
        let raw = match self.ports.perception.detect(frame) {
            Ok(detections) => detections,
            Err(e) => {
                warn!("Frame {}: {e}", frame.index());
                return None;
            }
        };

        let devices_present = self
            .device_classes
            .present(&raw.devices, self.config.devices.confidence_floor);
        let multiple_people_present = self.overlap.multiple_people(&raw.persons);

        let tracker = &self.config.tracker;
        let mut detections = raw.above_floors(tracker.person_confidence, tracker.face_confidence);
        let multiple_faces = self.overlap.multiple_faces(&detections.faces);

        let mut looking_away = false;
        let mut head_turning = false;
        for face in &mut detections.faces {
            if let Some(gaze) = self.assess_face(frame, face) {
                looking_away |= gaze.looking_away;
                head_turning |= gaze.head_turning;
            }
        }

        Some(FrameEvidence {
            detections,
            devices_present,
            multiple_people_present,
            multiple_faces,
            looking_away,
            head_turning,
        })
    }

    fn assess_face(&self, frame: &Frame, face: &mut FaceDetection) -> Option<GazeAssessment> {
        if face.landmarks.is_none() {
            match self.ports.landmarks.landmarks(frame, &face.bbox) {
                Ok(found) => face.landmarks = found,
                Err(e) => {
                    warn!("Frame {}: {e}", frame.index());
                    return None;
                }
            }
        }
        let landmarks = face.landmarks.as_ref()?;
        match self.head_pose.assess(landmarks) {
            Ok(gaze) => {
                debug!(
                    "Frame {}: pitch {:.1} yaw {:.1} roll {:.1} ear {:?}",
                    frame.index(),
                    gaze.pose.pitch,
                    gaze.pose.yaw,
                    gaze.pose.roll,
                    gaze.eye_aspect_ratio
                );
                Some(gaze)
            }
            Err(e) => {
                debug!("Frame {}: no pose for face: {e}", frame.index());
                None
            }
        }
    }

    fn update_signals(
        &self,
        context: &mut SessionContext,
        evidence: &FrameEvidence,
        now: Instant,
    ) -> (Vec<PersonDetection>, ViolationSet, VerificationPlan) {
        let persons = context.tracker.assign(evidence.detections.persons.clone());

        for (device, outcome) in context.devices.observe_frame(&evidence.devices_present, now) {
            if outcome.rising_edge {
                warn!("Device detected: {device}");
            }
        }
        let people = context.multiple_people.observe(
            MULTIPLE_PEOPLE_KEY.to_string(),
            evidence.multiple_people_present,
            now,
        );
        if people.rising_edge {
            warn!("{MSG_MULTIPLE_PEOPLE}");
        }

        let session = &self.config.session;
        let state = &mut context.state;
        if persons.is_empty() {
            let gone_for = state
                .person_last_seen
                .map(|seen| now.saturating_duration_since(seen));
            if state.tracked_person_id.is_some()
                && !state.person_disappeared
                && gone_for.is_some_and(|d| d > session.disappearance_grace())
            {
                info!("{MSG_PERSON_LEFT}");
                state.person_disappeared = true;
                state.verification_required = true;
            }
        } else {
            state.person_last_seen = Some(now);
            if state.person_disappeared {
                info!("Person back in view; re-verification required");
                state.person_disappeared = false;
            }
        }

        let violations = ViolationSet {
            person_disappeared: state.person_disappeared,
            multiple_people: people.triggered,
            multiple_faces: evidence.multiple_faces,
            looking_away: evidence.looking_away,
            head_turning: evidence.head_turning,
            device_detected: context.devices.any_triggered(),
            identity_mismatch: false,
        };

        let mut plan = VerificationPlan::default();
        if people.triggered {
            plan.everyone = persons.iter().map(|p| p.bbox).collect();
        }
        if let Some((id, bbox)) = main_subject(&persons) {
            match (state.original_student_id, state.tracked_person_id) {
                (None, _) => plan.subject = Some((SubjectCheck::Establish(id), bbox)),
                (Some(_), tracked) if tracked != Some(id) => {
                    plan.subject = Some((SubjectCheck::Reanchor(id), bbox))
                }
                _ => {}
            }
            let cooldown_elapsed = state
                .last_verification
                .map_or(true, |t| now.saturating_duration_since(t) >= session.verification_cooldown());
            plan.whole_frame = state.verification_required || cooldown_elapsed;
        }

        (persons, violations, plan)
    }

    fn run_verifications(
        &self,
        student_id: &str,
        frame: &Frame,
        plan: &VerificationPlan,
    ) -> VerificationResults {
        let verifier = &self.ports.verifier;
        let mut results = VerificationResults::default();

        for bbox in &plan.everyone {
            if verifier.verify(student_id, frame, Some(bbox)).is_mismatch() {
                warn!("Frame {}: unverified person among multiple people", frame.index());
                results.everyone_mismatch = true;
                break;
            }
        }
        if let Some((check, bbox)) = &plan.subject {
            results.subject = Some((*check, verifier.verify(student_id, frame, Some(bbox))));
        }
        if plan.whole_frame {
            results.whole_frame = Some(verifier.verify(student_id, frame, None));
        }
        results
    }

    /// Applies identity results to the session and returns this frame's
    /// identity verdict.
    fn commit(
        context: &mut SessionContext,
        results: &VerificationResults,
        violations: &mut ViolationSet,
        now: Instant,
        checks_ran: bool,
    ) -> Option<bool> {
        let state = &mut context.state;
        if checks_ran {
            state.last_verification = Some(now);
        }

        if let Some((check, outcome)) = &results.subject {
            match (check, outcome) {
                (SubjectCheck::Establish(id), VerificationOutcome::Verified(_)) => {
                    info!("Identity established; tracking person: {id}");
                    state.original_student_id = Some(*id);
                    state.tracked_person_id = Some(*id);
                }
                (SubjectCheck::Reanchor(id), VerificationOutcome::Verified(_)) => {
                    info!("Tracking person: {id}");
                    state.tracked_person_id = Some(*id);
                }
                (SubjectCheck::Reanchor(id), VerificationOutcome::Rejected(_)) => {
                    warn!("Person {id} failed identity re-verification");
                    violations.identity_mismatch = true;
                }
                (_, outcome) => debug!("Subject check inconclusive: {}", outcome.describe()),
            }
        }

        if let Some(outcome) = &results.whole_frame {
            if outcome.completed() {
                state.verification_required = false;
            }
            if outcome.is_mismatch() {
                warn!("{MSG_IDENTITY_MISMATCH}");
                violations.identity_mismatch = true;
            }
        }

        Self::identity_verdict(results)
    }

    fn identity_verdict(results: &VerificationResults) -> Option<bool> {
        results
            .whole_frame
            .iter()
            .chain(results.subject.iter().map(|(_, outcome)| outcome))
            .find(|outcome| outcome.completed())
            .map(VerificationOutcome::is_verified)
    }

    fn message(
        violations: &ViolationSet,
        identity_verified: Option<bool>,
        tracked: Option<u32>,
        detections: &FrameDetections,
    ) -> String {
        if violations.identity_mismatch {
            MSG_IDENTITY_MISMATCH.to_string()
        } else if violations.person_disappeared {
            MSG_PERSON_LEFT.to_string()
        } else if violations.multiple_people {
            MSG_MULTIPLE_PEOPLE.to_string()
        } else if identity_verified == Some(true) {
            MSG_IDENTITY_VERIFIED.to_string()
        } else if let Some(id) = tracked {
            format!("Tracking person: {id}")
        } else if detections.persons.is_empty() {
            MSG_NO_PERSON.to_string()
        } else {
            MSG_AWAITING_VERIFICATION.to_string()
        }
    }

    /// Report for a frame that brought no evidence: latched violations only,
    /// session untouched.
    fn latched_report(&self, session: &SessionHandle, frame_index: usize, message: &str) -> FrameReport {
        let slot = session.lock_slot();
        let tracked = slot.context.state.tracked_person_id;
        FrameReport {
            frame_index,
            skipped: true,
            violations: slot.context.latched_violations(),
            verification: VerificationSummary {
                person_tracked: tracked.is_some(),
                face_verification_triggered: false,
                identity_verified: None,
                message: message.to_string(),
            },
            tracked_person_id: tracked,
            detections: FrameDetections::default(),
        }
    }
}

/// Largest person by box area; the earlier one wins ties.
fn main_subject(persons: &[PersonDetection]) -> Option<(u32, BoundingBox)> {
    persons
        .iter()
        .filter_map(|p| p.id.map(|id| (id, p.bbox)))
        .fold(None, |best: Option<(u32, BoundingBox)>, (id, bbox)| match best {
            Some((_, b)) if b.area() >= bbox.area() => best,
            _ => Some((id, bbox)),
        })
}
