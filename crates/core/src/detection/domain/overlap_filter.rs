//! Geometric rejection of duplicate detections.
//!
//! Detectors often report one subject twice: two face boxes a few pixels
//! apart, or a person box plus a partial box of the same torso. A frame with
//! any such close pair is not trusted to show several subjects at all.

use crate::detection::domain::detections::{FaceDetection, PersonDetection};
use crate::detection::infrastructure::math::any_pair;
use crate::shared::config::OverlapConfig;

pub struct OverlapFilter {
    face_min_separation: f64,
    person_min_separation: f64,
    person_max_overlap: f64,
    person_floor: f64,
}

impl OverlapFilter {
    pub fn new(config: &OverlapConfig, person_floor: f64) -> Self {
        Self {
            face_min_separation: config.face_min_separation,
            person_min_separation: config.person_min_separation,
            person_max_overlap: config.person_max_overlap,
            person_floor,
        }
    }

    /// More than one face, none of them closer than the minimum separation
    /// to another.
    pub fn multiple_faces(&self, faces: &[FaceDetection]) -> bool {
        faces.len() > 1
            && !any_pair(faces, |a, b| {
                a.bbox.center_distance(&b.bbox) < self.face_min_separation
            })
    }

    /// More than one person above the floor, with no pair close together or
    /// overlapping beyond the limit.
    pub fn multiple_people(&self, persons: &[PersonDetection]) -> bool {
        let candidates: Vec<&PersonDetection> = persons
            .iter()
            .filter(|p| p.confidence > self.person_floor)
            .collect();

        candidates.len() > 1
            && !any_pair(&candidates, |a, b| {
                a.bbox.center_distance(&b.bbox) < self.person_min_separation
                    || a.bbox.overlap_ratio(&b.bbox) > self.person_max_overlap
            })
    }
}

impl Default for OverlapFilter {
    fn default() -> Self {
        Self::new(
            &OverlapConfig::default(),
            crate::shared::constants::MULTIPLE_PEOPLE_CONFIDENCE_FLOOR,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::shared::bbox::BoundingBox;
    use rstest::rstest;

    fn face_at(cx: f64, cy: f64) -> FaceDetection {
        FaceDetection::new(BoundingBox::new(cx - 20.0, cy - 20.0, cx + 20.0, cy + 20.0), 0.9)
    }

    fn person(x1: f64, y1: f64, x2: f64, y2: f64, confidence: f64) -> PersonDetection {
        PersonDetection::new(BoundingBox::new(x1, y1, x2, y2), confidence)
    }

    // ── Faces ────────────────────────────────────────────────────────

    #[rstest]
    #[case::close_pair_is_one_face(40.0, false)]
    #[case::at_separation_is_two_faces(50.0, true)]
    #[case::far_pair_is_two_faces(60.0, true)]
    fn test_two_faces_by_center_distance(#[case] gap: f64, #[case] expected: bool) {
        let filter = OverlapFilter::default();
        let faces = [face_at(200.0, 200.0), face_at(200.0 + gap, 200.0)];
        assert_eq!(filter.multiple_faces(&faces), expected);
    }

    #[test]
    fn test_single_face_is_never_multiple() {
        assert!(!OverlapFilter::default().multiple_faces(&[face_at(0.0, 0.0)]));
        assert!(!OverlapFilter::default().multiple_faces(&[]));
    }

    #[test]
    fn test_any_duplicate_pair_rejects_the_frame() {
        let filter = OverlapFilter::default();
        let faces = [face_at(100.0, 100.0), face_at(110.0, 100.0), face_at(400.0, 100.0)];
        assert!(!filter.multiple_faces(&faces));
    }

    #[test]
    fn test_three_separate_faces_are_multiple() {
        let filter = OverlapFilter::default();
        let faces = [face_at(100.0, 100.0), face_at(250.0, 100.0), face_at(400.0, 100.0)];
        assert!(filter.multiple_faces(&faces));
    }

    // ── Persons ──────────────────────────────────────────────────────

    #[test]
    fn test_two_separate_people() {
        let persons = [
            person(0.0, 0.0, 100.0, 200.0, 0.9),
            person(300.0, 0.0, 400.0, 200.0, 0.9),
        ];
        assert!(OverlapFilter::default().multiple_people(&persons));
    }

    #[test]
    fn test_close_centers_count_as_one() {
        // Centers (50, 100) and (110, 100): 60 apart, below 80
        let persons = [
            person(0.0, 0.0, 100.0, 200.0, 0.9),
            person(60.0, 0.0, 160.0, 200.0, 0.9),
        ];
        assert!(!OverlapFilter::default().multiple_people(&persons));
    }

    #[test]
    fn test_nested_box_counts_as_one() {
        // Small box inside a big one: centers far apart, overlap ratio 1.0
        let persons = [
            person(0.0, 0.0, 400.0, 400.0, 0.9),
            person(300.0, 300.0, 380.0, 380.0, 0.9),
        ];
        assert!(!OverlapFilter::default().multiple_people(&persons));
    }

    #[test]
    fn test_low_confidence_person_ignored() {
        let persons = [
            person(0.0, 0.0, 100.0, 200.0, 0.9),
            person(300.0, 0.0, 400.0, 200.0, 0.3),
        ];
        assert!(!OverlapFilter::default().multiple_people(&persons));
    }

    #[test]
    fn test_duplicate_person_pair_rejects_the_frame() {
        // Centers x = 50 and 70 are a duplicate; the third person is far off
        let persons = [
            person(0.0, 0.0, 100.0, 200.0, 0.9),
            person(20.0, 0.0, 120.0, 200.0, 0.9),
            person(400.0, 0.0, 500.0, 200.0, 0.9),
        ];
        assert!(!OverlapFilter::default().multiple_people(&persons));
    }

    #[test]
    fn test_low_confidence_duplicate_does_not_reject() {
        let persons = [
            person(0.0, 0.0, 100.0, 200.0, 0.9),
            person(20.0, 0.0, 120.0, 200.0, 0.2),
            person(400.0, 0.0, 500.0, 200.0, 0.9),
        ];
        assert!(OverlapFilter::default().multiple_people(&persons));
    }
}
