//! Writes active violations to the store, suppressing repeats.
//!
//! A kind already recorded for the same student and exam within the
//! duplicate window is not appended again, so a violation that stays active
//! for many frames produces one record per window rather than one per frame.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::{Duration, Instant};

use chrono::Utc;
use log::{debug, warn};

use crate::violations::domain::violation::{ViolationKind, ViolationRecord, ViolationSet};
use crate::violations::domain::violation_store::{StoreError, ViolationStore};

type RecordKey = (String, String, ViolationKind);

pub struct ViolationRecorder {
    store: Arc<dyn ViolationStore>,
    window: Duration,
    confidence: f64,
    last_recorded: Mutex<HashMap<RecordKey, Instant>>,
}

impl ViolationRecorder {
    pub fn new(store: Arc<dyn ViolationStore>, window: Duration, confidence: f64) -> Self {
        Self {
            store,
            window,
            confidence,
            last_recorded: Mutex::new(HashMap::new()),
        }
    }

    pub fn store(&self) -> &Arc<dyn ViolationStore> {
        &self.store
    }

    /// Appends every active kind not recorded within the window and returns
    /// the kinds written.
    ///
    /// All kinds are attempted even if one append fails; the first failure
    /// is returned after the rest have been tried.
    pub fn record(
        &self,
        student_id: &str,
        exam_id: &str,
        violations: &ViolationSet,
        now: Instant,
    ) -> Result<Vec<ViolationKind>, StoreError> {
        let mut last = self
            .last_recorded
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        let mut written = Vec::new();
        let mut first_error = None;

        for kind in violations.active() {
            let key = (student_id.to_string(), exam_id.to_string(), kind);
            if let Some(previous) = last.get(&key) {
                if now.saturating_duration_since(*previous) < self.window {
                    debug!("Suppressing duplicate {kind} for {student_id}/{exam_id}");
                    continue;
                }
            }

            let record = ViolationRecord::from_frame_analysis(
                student_id,
                exam_id,
                kind,
                self.confidence,
                Utc::now(),
            );
            match self.store.append(record) {
                Ok(()) => {
                    last.insert(key, now);
                    written.push(kind);
                }
                Err(e) => {
                    warn!("Failed to record {kind} for {student_id}/{exam_id}: {e}");
                    first_error.get_or_insert(e);
                }
            }
        }

        match first_error {
            Some(e) => Err(e),
            None => Ok(written),
        }
    }

    /// Forgets dedup history for one student and exam.
    pub fn forget(&self, student_id: &str, exam_id: &str) {
        self.last_recorded
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .retain(|(s, e, _), _| !(s == student_id && e == exam_id));
    }
}
