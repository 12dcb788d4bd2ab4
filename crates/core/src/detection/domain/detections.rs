use serde::{Deserialize, Serialize};

use crate::detection::domain::face_landmarks::FaceLandmarks;
use crate::shared::bbox::BoundingBox;

/// A person box from the perception service.
///
/// `id` is `None` when it comes out of the detector and is filled in by
/// [`PersonTracker`](crate::detection::domain::person_tracker::PersonTracker).
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct PersonDetection {
    pub bbox: BoundingBox,
    pub confidence: f64,
    #[serde(default)]
    pub id: Option<u32>,
}

impl PersonDetection {
    pub fn new(bbox: BoundingBox, confidence: f64) -> Self {
        Self {
            bbox,
            confidence,
            id: None,
        }
    }

    pub fn center(&self) -> (f64, f64) {
        self.bbox.center()
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct FaceDetection {
    pub bbox: BoundingBox,
    pub confidence: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub landmarks: Option<FaceLandmarks>,
}

impl FaceDetection {
    pub fn new(bbox: BoundingBox, confidence: f64) -> Self {
        Self {
            bbox,
            confidence,
            landmarks: None,
        }
    }
}

/// A non-person object box with the detector's class label.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct DeviceDetection {
    pub label: String,
    pub confidence: f64,
    pub bbox: BoundingBox,
}

/// Everything the perception service reports for one frame.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct FrameDetections {
    #[serde(default)]
    pub persons: Vec<PersonDetection>,
    #[serde(default)]
    pub faces: Vec<FaceDetection>,
    #[serde(default)]
    pub devices: Vec<DeviceDetection>,
}

impl FrameDetections {
    /// Drops persons and faces below their confidence floors.
    pub fn above_floors(mut self, person_floor: f64, face_floor: f64) -> Self {
        self.persons.retain(|p| p.confidence > person_floor);
        self.faces.retain(|f| f.confidence > face_floor);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn person(confidence: f64) -> PersonDetection {
        PersonDetection::new(BoundingBox::new(0.0, 0.0, 10.0, 10.0), confidence)
    }

    fn face(confidence: f64) -> FaceDetection {
        FaceDetection::new(BoundingBox::new(0.0, 0.0, 10.0, 10.0), confidence)
    }

    #[test]
    fn test_above_floors_is_strict() {
        let detections = FrameDetections {
            persons: vec![person(0.5), person(0.51), person(0.9)],
            faces: vec![face(0.7), face(0.8)],
            devices: Vec::new(),
        }
        .above_floors(0.5, 0.7);

        assert_eq!(detections.persons.len(), 2);
        assert_eq!(detections.faces.len(), 1);
    }

    #[test]
    fn test_person_deserializes_without_id() {
        let p: PersonDetection =
            serde_json::from_str(r#"{"bbox": [0, 0, 10, 20], "confidence": 0.9}"#).unwrap();
        assert_eq!(p.id, None);
        assert_eq!(p.center(), (5.0, 10.0));
    }
}
