//! Head orientation and gaze classification from a face mesh.
//!
//! Six mesh points are scaled into a synthetic model and solved against
//! their own image-plane projection through a fixed pinhole camera. The
//! solved rotation decomposes into pitch (about x), yaw (about y) and roll
//! (about z), all in degrees.

use nalgebra::Vector3;
use serde::Serialize;
use thiserror::Error;

use crate::detection::domain::face_landmarks::{FaceLandmarks, POSE_LANDMARKS};
use crate::detection::infrastructure::pose_solver::{PerspectiveSolver, PinholeCamera};
use crate::shared::config::HeadPoseConfig;
use crate::shared::constants::{LANDMARK_SCALE, POSE_FOCAL_LENGTH, POSE_PRINCIPAL_POINT};

#[derive(Debug, Error, PartialEq, Eq)]
pub enum PoseError {
    #[error("pose solve is degenerate")]
    DegeneratePose,
    #[error("landmark {0} missing from face mesh")]
    MissingLandmark(usize),
}

#[derive(Clone, Copy, Debug, PartialEq, Serialize)]
pub struct HeadPose {
    pub pitch: f64,
    pub yaw: f64,
    pub roll: f64,
}

#[derive(Clone, Copy, Debug, PartialEq, Serialize)]
pub struct GazeAssessment {
    pub pose: HeadPose,
    /// `None` when the eye landmarks could not be measured.
    pub eye_aspect_ratio: Option<f64>,
    pub head_turning: bool,
    pub looking_away: bool,
}

pub struct HeadPoseEstimator {
    config: HeadPoseConfig,
    solver: PerspectiveSolver,
}

impl HeadPoseEstimator {
    pub fn new(config: HeadPoseConfig) -> Self {
        Self {
            config,
            solver: PerspectiveSolver::new(PinholeCamera {
                focal_length: POSE_FOCAL_LENGTH,
                principal_point: POSE_PRINCIPAL_POINT,
            }),
        }
    }

    pub fn pose(&self, landmarks: &FaceLandmarks) -> Result<HeadPose, PoseError> {
        if let Some(missing) = landmarks.first_missing(&POSE_LANDMARKS) {
            return Err(PoseError::MissingLandmark(missing));
        }

        let mut model = Vec::with_capacity(POSE_LANDMARKS.len());
        let mut image = Vec::with_capacity(POSE_LANDMARKS.len());
        for idx in POSE_LANDMARKS {
            let [x, y, z] = landmarks
                .point(idx)
                .ok_or(PoseError::MissingLandmark(idx))?;
            model.push(Vector3::new(x, y, z) * LANDMARK_SCALE);
            image.push((x * LANDMARK_SCALE, y * LANDMARK_SCALE));
        }

        let solution = self
            .solver
            .solve(&model, &image)
            .ok_or(PoseError::DegeneratePose)?;
        let (pitch, yaw, roll) = solution.euler_degrees();
        Ok(HeadPose { pitch, yaw, roll })
    }

    /// Coarse orientation check, independent of the eyes.
    pub fn is_head_turning(&self, pose: &HeadPose) -> bool {
        pose.yaw.abs() > self.config.max_yaw_degrees
            || pose.pitch.abs() > self.config.max_pitch_degrees
    }

    pub fn is_eye_ratio_abnormal(&self, ear: f64) -> bool {
        ear < self.config.ear_min || ear > self.config.ear_max
    }

    pub fn is_looking_away(&self, landmarks: &FaceLandmarks) -> Result<bool, PoseError> {
        Ok(self.assess(landmarks)?.looking_away)
    }

    pub fn assess(&self, landmarks: &FaceLandmarks) -> Result<GazeAssessment, PoseError> {
        let pose = self.pose(landmarks)?;
        let eye_aspect_ratio = landmarks.eye_aspect_ratio();
        let head_turning = self.is_head_turning(&pose);
        let looking_away =
            head_turning || eye_aspect_ratio.is_some_and(|ear| self.is_eye_ratio_abnormal(ear));
        Ok(GazeAssessment {
            pose,
            eye_aspect_ratio,
            head_turning,
            looking_away,
        })
    }
}

impl Default for HeadPoseEstimator {
    fn default() -> Self {
        Self::new(HeadPoseConfig::default())
    }
}
