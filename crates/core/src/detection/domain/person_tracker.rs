//! Nearest-center person re-identification.
//!
//! Each frame, a detection inherits the id of the closest person seen in the
//! previous frame when their centers are within the match radius; otherwise
//! it gets a freshly minted id. Only this frame's centers survive into the
//! next frame, so a person who vanishes for a single frame loses their id
//! for good.

use crate::detection::domain::detections::PersonDetection;
use crate::detection::infrastructure::math::point_distance;
use crate::shared::constants::PERSON_MATCH_RADIUS;

pub struct PersonTracker {
    /// Last-seen center of every id matched in the previous frame.
    identity_map: Vec<((f64, f64), u32)>,
    next_id: u32,
    match_radius: f64,
}

impl PersonTracker {
    pub fn new(match_radius: f64) -> Self {
        Self {
            identity_map: Vec::new(),
            next_id: 1,
            match_radius,
        }
    }

    /// Assigns stable ids to this frame's detections, preserving their order.
    pub fn assign(&mut self, mut detections: Vec<PersonDetection>) -> Vec<PersonDetection> {
        let claimed = self.match_previous(&detections);

        let mut next_map = Vec::with_capacity(detections.len());
        for (i, det) in detections.iter_mut().enumerate() {
            let id = match claimed[i] {
                Some(id) => id,
                None => self.mint(),
            };
            det.id = Some(id);
            next_map.push((det.center(), id));
        }

        self.identity_map = next_map;
        detections
    }

    pub fn reset(&mut self) {
        self.identity_map.clear();
        self.next_id = 1;
    }

    pub fn known_ids(&self) -> Vec<u32> {
        self.identity_map.iter().map(|(_, id)| *id).collect()
    }

    fn mint(&mut self) -> u32 {
        let id = self.next_id;
        self.next_id += 1;
        id
    }

    /// Each detection independently takes the id of its nearest previous
    /// center inside the radius. Two detections may inherit the same id.
    fn match_previous(&self, detections: &[PersonDetection]) -> Vec<Option<u32>> {
        detections
            .iter()
            .map(|det| {
                let center = det.center();
                self.identity_map
                    .iter()
                    .map(|(prev, id)| (point_distance(center, *prev), *id))
                    .filter(|(dist, _)| *dist < self.match_radius)
                    .min_by(|a, b| a.0.total_cmp(&b.0))
                    .map(|(_, id)| id)
            })
            .collect()
    }
}

impl Default for PersonTracker {
    fn default() -> Self {
        Self::new(PERSON_MATCH_RADIUS)
    }
}
