//! Per-session state bundle and the handle that guards it.
//!
//! Everything one exam session accumulates across frames lives in a single
//! [`SessionContext`]. A [`SessionHandle`] owns it behind a mutex together
//! with a generation counter, so a reset replaces the whole bundle in one
//! swap and a frame that was in flight during the reset can tell that its
//! results no longer apply.

use std::collections::BTreeMap;
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Instant;

use log::info;
use serde::Serialize;

use crate::detection::domain::person_tracker::PersonTracker;
use crate::detection::domain::signal_debouncer::{
    DebouncePolicy, DebounceStatus, SignalDebouncer,
};
use crate::shared::config::ProctorConfig;
use crate::violations::domain::violation::ViolationSet;

/// Debounce key of the multiple-people signal.
pub const MULTIPLE_PEOPLE_KEY: &str = "multiple_people";

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TrackingPhase {
    /// Nobody has passed verification yet.
    Unverified,
    Tracking,
    /// The tracked person has been out of view past the grace period.
    Disappeared,
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct SessionTrackingState {
    pub tracked_person_id: Option<u32>,
    /// Tracker id of the person who first passed verification.
    pub original_student_id: Option<u32>,
    pub person_last_seen: Option<Instant>,
    pub person_disappeared: bool,
    pub verification_required: bool,
    pub last_verification: Option<Instant>,
}

impl SessionTrackingState {
    pub fn phase(&self) -> TrackingPhase {
        if self.original_student_id.is_none() {
            TrackingPhase::Unverified
        } else if self.person_disappeared {
            TrackingPhase::Disappeared
        } else {
            TrackingPhase::Tracking
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct TrackingStatus {
    pub phase: TrackingPhase,
    pub tracked_person_id: Option<u32>,
    pub original_student_id: Option<u32>,
    pub person_disappeared: bool,
    pub verification_required: bool,
    pub secs_since_last_seen: Option<f64>,
    pub secs_since_last_verification: Option<f64>,
}

/// Debounce policy plus the status of every live key.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct DebounceReport {
    pub min_duration_secs: f64,
    pub expiry_secs: f64,
    pub keys: BTreeMap<String, DebounceStatus>,
}

impl DebounceReport {
    fn new(policy: DebouncePolicy, keys: BTreeMap<String, DebounceStatus>) -> Self {
        Self {
            min_duration_secs: policy.min_duration.as_secs_f64(),
            expiry_secs: policy.expiry.as_secs_f64(),
            keys,
        }
    }
}

/// Everything one session carries from frame to frame.
pub struct SessionContext {
    pub tracker: PersonTracker,
    pub devices: SignalDebouncer<String>,
    pub multiple_people: SignalDebouncer<String>,
    pub state: SessionTrackingState,
}

impl SessionContext {
    pub fn new(config: &ProctorConfig) -> Self {
        Self {
            tracker: PersonTracker::new(config.tracker.match_radius),
            devices: SignalDebouncer::new(DebouncePolicy::from(&config.devices)),
            multiple_people: SignalDebouncer::new(DebouncePolicy::from(&config.multiple_people)),
            state: SessionTrackingState::default(),
        }
    }

    pub fn multiple_people_triggered(&self) -> bool {
        self.multiple_people
            .is_triggered(&MULTIPLE_PEOPLE_KEY.to_string())
    }

    /// Violations that persist without fresh evidence: the latched
    /// debouncers and the disappearance flag.
    pub fn latched_violations(&self) -> ViolationSet {
        ViolationSet {
            person_disappeared: self.state.person_disappeared,
            multiple_people: self.multiple_people_triggered(),
            device_detected: self.devices.any_triggered(),
            ..ViolationSet::default()
        }
    }

    pub fn tracking_status(&self, now: Instant) -> TrackingStatus {
        let since = |t: Option<Instant>| t.map(|t| now.saturating_duration_since(t).as_secs_f64());
        TrackingStatus {
            phase: self.state.phase(),
            tracked_person_id: self.state.tracked_person_id,
            original_student_id: self.state.original_student_id,
            person_disappeared: self.state.person_disappeared,
            verification_required: self.state.verification_required,
            secs_since_last_seen: since(self.state.person_last_seen),
            secs_since_last_verification: since(self.state.last_verification),
        }
    }
}

pub(crate) struct SessionSlot {
    pub generation: u64,
    pub context: SessionContext,
}

/// One exam session: who is sitting it, and its guarded state.
///
/// `sequencer` keeps frames of this session strictly one at a time. The
/// state mutex is only held to read inputs and commit results, never across
/// a call into an external service, so status queries and resets stay
/// responsive while a frame waits on inference.
pub struct SessionHandle {
    student_id: String,
    exam_id: String,
    config: ProctorConfig,
    sequencer: Mutex<()>,
    slot: Mutex<SessionSlot>,
}

impl SessionHandle {
    pub fn new(student_id: &str, exam_id: &str, config: &ProctorConfig) -> Self {
        Self {
            student_id: student_id.to_string(),
            exam_id: exam_id.to_string(),
            config: config.clone(),
            sequencer: Mutex::new(()),
            slot: Mutex::new(SessionSlot {
                generation: 0,
                context: SessionContext::new(config),
            }),
        }
    }

    pub fn student_id(&self) -> &str {
        &self.student_id
    }

    pub fn exam_id(&self) -> &str {
        &self.exam_id
    }

    /// Swaps in a fresh context. A frame in flight will not commit into it.
    pub fn reset(&self) {
        let fresh = SessionContext::new(&self.config);
        let mut slot = self.lock_slot();
        slot.context = fresh;
        slot.generation += 1;
        info!(
            "Session reset for student {} exam {}",
            self.student_id, self.exam_id
        );
    }

    pub fn generation(&self) -> u64 {
        self.lock_slot().generation
    }

    pub fn tracking_status(&self, now: Instant) -> TrackingStatus {
        self.lock_slot().context.tracking_status(now)
    }

    /// Status of one debounced key: a device label or [`MULTIPLE_PEOPLE_KEY`].
    pub fn debounce_status(&self, key: &str, now: Instant) -> Option<DebounceStatus> {
        let slot = self.lock_slot();
        let key = key.to_string();
        if key == MULTIPLE_PEOPLE_KEY {
            slot.context.multiple_people.status(&key, now)
        } else {
            slot.context.devices.status(&key, now)
        }
    }

    pub fn device_status(&self, now: Instant) -> DebounceReport {
        let slot = self.lock_slot();
        let devices = &slot.context.devices;
        DebounceReport::new(devices.policy(), devices.statuses(now).into_iter().collect())
    }

    pub fn multiple_people_status(&self, now: Instant) -> DebounceReport {
        let slot = self.lock_slot();
        let people = &slot.context.multiple_people;
        DebounceReport::new(people.policy(), people.statuses(now).into_iter().collect())
    }

    pub(crate) fn sequence(&self) -> MutexGuard<'_, ()> {
        self.sequencer.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub(crate) fn lock_slot(&self) -> MutexGuard<'_, SessionSlot> {
        self.slot.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;
    use std::time::Duration;

    fn handle() -> SessionHandle {
        SessionHandle::new("s1", "e1", &ProctorConfig::default())
    }

    // ── Phase ────────────────────────────────────────────────────────

    #[test]
    fn test_phase_follows_state() {
        let mut state = SessionTrackingState::default();
        assert_eq!(state.phase(), TrackingPhase::Unverified);

        state.original_student_id = Some(1);
        state.tracked_person_id = Some(1);
        assert_eq!(state.phase(), TrackingPhase::Tracking);

        state.person_disappeared = true;
        assert_eq!(state.phase(), TrackingPhase::Disappeared);
    }

    // ── Reset ────────────────────────────────────────────────────────

    #[test]
    fn test_reset_replaces_whole_context() {
        let h = handle();
        let now = Instant::now();
        {
            let mut slot = h.lock_slot();
            slot.context.state.tracked_person_id = Some(3);
            slot.context.state.person_disappeared = true;
            let present = HashSet::from(["laptop".to_string()]);
            slot.context.devices.observe_frame(&present, now);
        }
        assert!(h.debounce_status("laptop", now).is_some());

        h.reset();

        assert_eq!(h.generation(), 1);
        let status = h.tracking_status(now);
        assert_eq!(status.tracked_person_id, None);
        assert!(!status.person_disappeared);
        assert!(h.debounce_status("laptop", now).is_none());
    }

    // ── Status ───────────────────────────────────────────────────────

    #[test]
    fn test_debounce_status_routes_multiple_people_key() {
        let h = handle();
        let now = Instant::now();
        {
            let mut slot = h.lock_slot();
            slot.context
                .multiple_people
                .observe(MULTIPLE_PEOPLE_KEY.to_string(), true, now);
        }
        let status = h.debounce_status(MULTIPLE_PEOPLE_KEY, now).unwrap();
        assert_eq!(status.total_detections, 1);
        assert!(!status.triggered);

        let report = h.multiple_people_status(now);
        assert_eq!(report.min_duration_secs, 1.0);
        assert_eq!(report.expiry_secs, 3.0);
        assert_eq!(report.keys.len(), 1);
        assert!(h.device_status(now).keys.is_empty());
    }

    #[test]
    fn test_tracking_status_reports_elapsed_times() {
        let h = handle();
        let t0 = Instant::now();
        {
            let mut slot = h.lock_slot();
            slot.context.state.person_last_seen = Some(t0);
        }
        let status = h.tracking_status(t0 + Duration::from_millis(1500));
        assert_eq!(status.secs_since_last_seen, Some(1.5));
        assert_eq!(status.secs_since_last_verification, None);
        assert_eq!(status.phase, TrackingPhase::Unverified);
    }

    #[test]
    fn test_latched_violations_only_carry_persistent_kinds() {
        let h = handle();
        let mut slot = h.lock_slot();
        slot.context.state.person_disappeared = true;
        let latched = slot.context.latched_violations();
        assert!(latched.person_disappeared);
        assert!(!latched.identity_mismatch);
        assert!(!latched.looking_away);
    }
}
