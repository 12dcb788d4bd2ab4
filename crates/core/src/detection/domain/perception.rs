use std::fmt;

use thiserror::Error;

use crate::detection::domain::detections::FrameDetections;
use crate::detection::domain::face_landmarks::FaceLandmarks;
use crate::shared::bbox::BoundingBox;
use crate::shared::frame::Frame;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ServiceKind {
    Perception,
    Landmark,
    Embedding,
    ReferenceImages,
}

impl fmt::Display for ServiceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ServiceKind::Perception => write!(f, "perception"),
            ServiceKind::Landmark => write!(f, "landmark"),
            ServiceKind::Embedding => write!(f, "embedding"),
            ServiceKind::ReferenceImages => write!(f, "reference image"),
        }
    }
}

/// An external collaborator failed or timed out.
///
/// The affected sub-check contributes no new evidence for the frame.
#[derive(Debug, Error)]
#[error("{service} service unavailable: {reason}")]
pub struct ServiceError {
    pub service: ServiceKind,
    pub reason: String,
}

impl ServiceError {
    pub fn unavailable(service: ServiceKind, reason: impl fmt::Display) -> Self {
        Self {
            service,
            reason: reason.to_string(),
        }
    }
}

/// Port to the object/face detector.
///
/// Implementations are shared across sessions, hence `&self` and `Sync`.
pub trait PerceptionService: Send + Sync {
    fn detect(&self, frame: &Frame) -> Result<FrameDetections, ServiceError>;
}

/// Port to the facial keypoint extractor.
pub trait LandmarkService: Send + Sync {
    /// Landmarks for the face under `face`, or `None` when none were found.
    fn landmarks(
        &self,
        frame: &Frame,
        face: &BoundingBox,
    ) -> Result<Option<FaceLandmarks>, ServiceError>;
}

/// Landmark service for pipelines whose detector already attaches
/// landmarks to every face.
pub struct NoLandmarkService;

impl LandmarkService for NoLandmarkService {
    fn landmarks(
        &self,
        _frame: &Frame,
        _face: &BoundingBox,
    ) -> Result<Option<FaceLandmarks>, ServiceError> {
        Ok(None)
    }
}
