use serde::Serialize;

use crate::detection::domain::detections::FrameDetections;
use crate::violations::domain::violation::ViolationSet;

pub const MSG_IDENTITY_MISMATCH: &str = "Identity verification failed - different person detected";
pub const MSG_PERSON_LEFT: &str = "Person left camera view";
pub const MSG_MULTIPLE_PEOPLE: &str = "Multiple people detected";
pub const MSG_IDENTITY_VERIFIED: &str = "Identity verified - same person confirmed";
pub const MSG_NO_PERSON: &str = "No person detected";
pub const MSG_AWAITING_VERIFICATION: &str = "Awaiting identity verification";
pub const MSG_FRAME_SKIPPED: &str = "Frame skipped: image could not be decoded";
pub const MSG_PERCEPTION_UNAVAILABLE: &str = "Frame analysis unavailable";

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct VerificationSummary {
    pub person_tracked: bool,
    pub face_verification_triggered: bool,
    /// Outcome of this frame's identity check, if one completed.
    pub identity_verified: Option<bool>,
    pub message: String,
}

/// What one frame produced: a full violation snapshot, never a delta.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct FrameReport {
    pub frame_index: usize,
    /// The frame contributed no new evidence; only latched violations are set.
    pub skipped: bool,
    pub violations: ViolationSet,
    pub verification: VerificationSummary,
    pub tracked_person_id: Option<u32>,
    /// Detections after confidence floors, with tracker ids. Display only.
    pub detections: FrameDetections,
}

impl FrameReport {
    pub fn message(&self) -> &str {
        &self.verification.message
    }
}
