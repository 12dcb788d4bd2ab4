//! Replays a recorded proctoring session by frame index.
//!
//! A recording is a JSON-lines file, one object per frame, holding what the
//! perception, landmark and embedding services returned when the session was
//! captured. Serving those answers back lets the orchestrator run offline
//! with exactly the same inputs.

use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::detection::domain::detections::FrameDetections;
use crate::detection::domain::face_landmarks::FaceLandmarks;
use crate::detection::domain::perception::{
    LandmarkService, PerceptionService, ServiceError, ServiceKind,
};
use crate::identity::domain::embedding::EmbeddingService;
use crate::shared::bbox::BoundingBox;
use crate::shared::frame::Frame;

/// Boxes overlapping at least this much are the same recorded detection.
const MATCH_IOU: f64 = 0.5;

#[derive(Debug, Error)]
pub enum RecordingError {
    #[error("failed to read recording {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("recording line {line}: {source}")]
    Parse {
        line: usize,
        source: serde_json::Error,
    },
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct RecordedFrame {
    /// Seconds since the first frame of the session.
    #[serde(default)]
    pub offset_secs: f64,
    /// Encoded image for this frame, relative to the recording file.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image: Option<PathBuf>,
    #[serde(flatten)]
    pub detections: FrameDetections,
    /// Set when the perception service failed on this frame.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub perception_error: Option<String>,
    /// Embedding of the whole frame.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub frame_embedding: Option<Vec<f32>>,
    /// Embedding per entry of `persons`, in the same order.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub person_embeddings: Vec<Option<Vec<f32>>>,
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct RecordedSession {
    frames: Vec<RecordedFrame>,
    base_dir: Option<PathBuf>,
}

impl RecordedSession {
    pub fn new(frames: Vec<RecordedFrame>) -> Self {
        Self {
            frames,
            base_dir: None,
        }
    }

    pub fn open(path: &Path) -> Result<Self, RecordingError> {
        let file = File::open(path).map_err(|source| RecordingError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let mut session = Self::from_reader(BufReader::new(file)).map_err(|e| match e {
            RecordingError::Io { source, .. } => RecordingError::Io {
                path: path.to_path_buf(),
                source,
            },
            other => other,
        })?;
        session.base_dir = path.parent().map(Path::to_path_buf);
        Ok(session)
    }

    pub fn from_reader(reader: impl BufRead) -> Result<Self, RecordingError> {
        let mut frames = Vec::new();
        for (n, line) in reader.lines().enumerate() {
            let line = line.map_err(|source| RecordingError::Io {
                path: PathBuf::new(),
                source,
            })?;
            if line.trim().is_empty() {
                continue;
            }
            let frame = serde_json::from_str(&line)
                .map_err(|source| RecordingError::Parse { line: n + 1, source })?;
            frames.push(frame);
        }
        Ok(Self::new(frames))
    }

    pub fn frames(&self) -> &[RecordedFrame] {
        &self.frames
    }

    pub fn len(&self) -> usize {
        self.frames.len()
    }

    pub fn is_empty(&self) -> bool {
        self.frames.is_empty()
    }

    /// Image path of frame `index`, resolved against the recording's folder.
    pub fn image_path(&self, index: usize) -> Option<PathBuf> {
        let image = self.frames.get(index)?.image.as_ref()?;
        Some(match &self.base_dir {
            Some(dir) if image.is_relative() => dir.join(image),
            _ => image.clone(),
        })
    }
}

/// Serves a recording as perception, landmark and embedding services.
pub struct RecordedServices {
    session: Arc<RecordedSession>,
}

impl RecordedServices {
    pub fn new(session: Arc<RecordedSession>) -> Self {
        Self { session }
    }

    fn frame(&self, frame: &Frame) -> Option<&RecordedFrame> {
        self.session.frames.get(frame.index())
    }
}

/// Index of the box in `boxes` overlapping `target` the most, if any
/// overlaps enough.
fn best_match<'a>(target: &BoundingBox, boxes: impl Iterator<Item = &'a BoundingBox>) -> Option<usize> {
    boxes
        .enumerate()
        .map(|(i, b)| (i, b.iou(target)))
        .filter(|(_, iou)| *iou >= MATCH_IOU)
        .max_by(|a, b| a.1.total_cmp(&b.1))
        .map(|(i, _)| i)
}

impl PerceptionService for RecordedServices {
    fn detect(&self, frame: &Frame) -> Result<FrameDetections, ServiceError> {
        let Some(recorded) = self.frame(frame) else {
            return Ok(FrameDetections::default());
        };
        if let Some(reason) = &recorded.perception_error {
            return Err(ServiceError::unavailable(ServiceKind::Perception, reason));
        }
        Ok(recorded.detections.clone())
    }
}

impl LandmarkService for RecordedServices {
    fn landmarks(
        &self,
        frame: &Frame,
        face: &BoundingBox,
    ) -> Result<Option<FaceLandmarks>, ServiceError> {
        let Some(recorded) = self.frame(frame) else {
            return Ok(None);
        };
        let faces = &recorded.detections.faces;
        Ok(best_match(face, faces.iter().map(|f| &f.bbox))
            .and_then(|i| faces[i].landmarks.clone()))
    }
}

impl EmbeddingService for RecordedServices {
    fn embed(
        &self,
        frame: &Frame,
        region: Option<&BoundingBox>,
    ) -> Result<Option<Vec<f32>>, ServiceError> {
        let Some(recorded) = self.frame(frame) else {
            return Ok(None);
        };
        let Some(region) = region else {
            return Ok(recorded.frame_embedding.clone());
        };
        let persons = &recorded.detections.persons;
        Ok(best_match(region, persons.iter().map(|p| &p.bbox))
            .and_then(|i| recorded.person_embeddings.get(i).cloned().flatten()))
    }
}
