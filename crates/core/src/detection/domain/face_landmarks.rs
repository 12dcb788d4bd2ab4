//! Dense normalized face mesh from the landmark service.
//!
//! Points use the 468-point face-mesh numbering, with x and y normalized to
//! the image and z a relative depth on roughly the same scale as x.

use serde::{Deserialize, Serialize};

use crate::detection::infrastructure::math::point_distance;

/// Mesh indices feeding the pose solve: nose-side eye corner, far eye
/// corner, nose tip, both mouth corners, chin.
pub const POSE_LANDMARKS: [usize; 6] = [33, 263, 1, 61, 291, 199];

const LEFT_EYE_CORNERS: (usize, usize) = (33, 133);
const RIGHT_EYE_CORNERS: (usize, usize) = (362, 263);
const LEFT_EYE_LIDS: (usize, usize) = (159, 145);
const RIGHT_EYE_LIDS: (usize, usize) = (386, 374);

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct FaceLandmarks {
    points: Vec<[f64; 3]>,
}

impl FaceLandmarks {
    pub fn new(points: Vec<[f64; 3]>) -> Self {
        Self { points }
    }

    pub fn points(&self) -> &[[f64; 3]] {
        &self.points
    }

    pub fn len(&self) -> usize {
        self.points.len()
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    pub fn point(&self, index: usize) -> Option<[f64; 3]> {
        self.points.get(index).copied()
    }

    /// Index of the first of `indices` the mesh does not contain.
    pub fn first_missing(&self, indices: &[usize]) -> Option<usize> {
        indices.iter().copied().find(|&i| i >= self.points.len())
    }

    /// Average eye aspect ratio (lid gap over corner span) of both eyes,
    /// measured in the image plane.
    ///
    /// `None` when an eye landmark is missing or an eye has zero width.
    pub fn eye_aspect_ratio(&self) -> Option<f64> {
        let left = self.single_eye_ratio(LEFT_EYE_LIDS, LEFT_EYE_CORNERS)?;
        let right = self.single_eye_ratio(RIGHT_EYE_LIDS, RIGHT_EYE_CORNERS)?;
        Some((left + right) / 2.0)
    }

    fn single_eye_ratio(&self, lids: (usize, usize), corners: (usize, usize)) -> Option<f64> {
        let xy = |i: usize| self.point(i).map(|p| (p[0], p[1]));
        let opening = point_distance(xy(lids.0)?, xy(lids.1)?);
        let width = point_distance(xy(corners.0)?, xy(corners.1)?);
        if width <= f64::EPSILON {
            return None;
        }
        Some(opening / width)
    }
}

#[cfg(test)]
pub(crate) mod fixtures {
    use super::*;

    /// A camera-facing mesh: eyes level, nose centered, flat depth except a
    /// slightly protruding nose.
    pub fn frontal_mesh() -> FaceLandmarks {
        let mut points = vec![[0.5, 0.5, 0.0]; 468];
        // Eyes, open with ratio 0.3
        points[33] = [0.40, 0.40, 0.0];
        points[133] = [0.46, 0.40, 0.0];
        points[159] = [0.43, 0.391, 0.0];
        points[145] = [0.43, 0.409, 0.0];
        points[362] = [0.54, 0.40, 0.0];
        points[263] = [0.60, 0.40, 0.0];
        points[386] = [0.57, 0.391, 0.0];
        points[374] = [0.57, 0.409, 0.0];
        // Nose tip, mouth corners, chin
        points[1] = [0.50, 0.50, -0.02];
        points[61] = [0.44, 0.60, 0.0];
        points[291] = [0.56, 0.60, 0.0];
        points[199] = [0.50, 0.70, 0.0];
        FaceLandmarks::new(points)
    }
}

#[cfg(test)]
mod tests {
    use super::fixtures::frontal_mesh;
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_point_lookup() {
        let mesh = frontal_mesh();
        assert_eq!(mesh.point(1), Some([0.50, 0.50, -0.02]));
        assert_eq!(mesh.point(468), None);
    }

    #[test]
    fn test_first_missing_reports_out_of_range_index() {
        let mesh = FaceLandmarks::new(vec![[0.0; 3]; 100]);
        assert_eq!(mesh.first_missing(&POSE_LANDMARKS), Some(263));
        assert_eq!(frontal_mesh().first_missing(&POSE_LANDMARKS), None);
    }

    #[test]
    fn test_eye_aspect_ratio_frontal() {
        assert_relative_eq!(frontal_mesh().eye_aspect_ratio().unwrap(), 0.3, epsilon = 1e-9);
    }

    #[test]
    fn test_eye_aspect_ratio_closed_eyes() {
        let mut points = frontal_mesh().points().to_vec();
        for i in [159, 145] {
            points[i][1] = 0.40;
        }
        for i in [386, 374] {
            points[i][1] = 0.40;
        }
        let ear = FaceLandmarks::new(points).eye_aspect_ratio().unwrap();
        assert_relative_eq!(ear, 0.0);
    }

    #[test]
    fn test_eye_aspect_ratio_zero_width_eye() {
        let mut points = frontal_mesh().points().to_vec();
        points[133] = points[33];
        assert!(FaceLandmarks::new(points).eye_aspect_ratio().is_none());
    }

    #[test]
    fn test_eye_aspect_ratio_short_mesh() {
        assert!(FaceLandmarks::new(vec![[0.0; 3]; 10]).eye_aspect_ratio().is_none());
    }

    #[test]
    fn test_serializes_as_plain_point_list() {
        let mesh = FaceLandmarks::new(vec![[0.1, 0.2, 0.3]]);
        assert_eq!(serde_json::to_string(&mesh).unwrap(), "[[0.1,0.2,0.3]]");
    }
}
