//! Temporal-persistence latch for noisy per-frame binary signals.
//!
//! A signal must be present for `min_duration` (measured from its first
//! detection) before it triggers. Once triggered it stays latched until the
//! signal has been absent for longer than `expiry`, at which point the whole
//! record is wiped and the key re-arms.

use std::collections::{HashMap, HashSet};
use std::hash::Hash;
use std::time::{Duration, Instant};

use serde::Serialize;

use crate::shared::config::DebounceConfig;

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct DebouncePolicy {
    pub min_duration: Duration,
    pub expiry: Duration,
}

impl From<&DebounceConfig> for DebouncePolicy {
    fn from(config: &DebounceConfig) -> Self {
        Self {
            min_duration: config.min_duration(),
            expiry: config.expiry(),
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct DebounceRecord {
    pub first_detected: Instant,
    pub last_detected: Instant,
    pub total_detections: u32,
    pub consecutive_frames: u32,
}

impl DebounceRecord {
    fn start(now: Instant) -> Self {
        Self {
            first_detected: now,
            last_detected: now,
            total_detections: 1,
            consecutive_frames: 1,
        }
    }

    fn hit(&mut self, now: Instant) {
        self.last_detected = now;
        self.total_detections += 1;
        self.consecutive_frames += 1;
    }
}

#[derive(Clone, Debug, PartialEq)]
pub enum DebounceState {
    Idle,
    Accumulating(DebounceRecord),
    Triggered(DebounceRecord),
}

impl DebounceState {
    pub fn record(&self) -> Option<&DebounceRecord> {
        match self {
            DebounceState::Idle => None,
            DebounceState::Accumulating(r) | DebounceState::Triggered(r) => Some(r),
        }
    }

    pub fn is_triggered(&self) -> bool {
        matches!(self, DebounceState::Triggered(_))
    }
}

/// Result of feeding one frame's observation for a key.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct DebounceOutcome {
    /// True only on the frame the latch closes.
    pub rising_edge: bool,
    pub triggered: bool,
}

/// Point-in-time view of one key, for status endpoints.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct DebounceStatus {
    pub detection_duration_secs: f64,
    pub time_since_last_detection_secs: f64,
    pub total_detections: u32,
    pub consecutive_frames: u32,
    pub triggered: bool,
}

/// One latch per monitored key, all sharing the same policy.
pub struct SignalDebouncer<K> {
    policy: DebouncePolicy,
    states: HashMap<K, DebounceState>,
}

impl<K: Eq + Hash + Clone> SignalDebouncer<K> {
    pub fn new(policy: DebouncePolicy) -> Self {
        Self {
            policy,
            states: HashMap::new(),
        }
    }

    pub fn policy(&self) -> DebouncePolicy {
        self.policy
    }

    pub fn observe(&mut self, key: K, present: bool, now: Instant) -> DebounceOutcome {
        let previous = self.states.remove(&key).unwrap_or(DebounceState::Idle);
        let next = self.advance(previous, present, now);
        let (next, rising_edge) = self.evaluate_trigger(next, now);
        let outcome = DebounceOutcome {
            rising_edge,
            triggered: next.is_triggered(),
        };
        if next != DebounceState::Idle {
            self.states.insert(key, next);
        }
        outcome
    }

    /// Feeds a whole frame: keys in `present` are seen, every other tracked
    /// key is absent.
    pub fn observe_frame(&mut self, present: &HashSet<K>, now: Instant) -> Vec<(K, DebounceOutcome)> {
        let mut keys: Vec<K> = self.states.keys().cloned().collect();
        for key in present {
            if !self.states.contains_key(key) {
                keys.push(key.clone());
            }
        }
        keys.into_iter()
            .map(|key| {
                let seen = present.contains(&key);
                let outcome = self.observe(key.clone(), seen, now);
                (key, outcome)
            })
            .collect()
    }

    pub fn state(&self, key: &K) -> DebounceState {
        self.states.get(key).cloned().unwrap_or(DebounceState::Idle)
    }

    pub fn is_triggered(&self, key: &K) -> bool {
        self.states.get(key).is_some_and(DebounceState::is_triggered)
    }

    pub fn any_triggered(&self) -> bool {
        self.states.values().any(DebounceState::is_triggered)
    }

    pub fn triggered_keys(&self) -> Vec<K> {
        self.states
            .iter()
            .filter(|(_, s)| s.is_triggered())
            .map(|(k, _)| k.clone())
            .collect()
    }

    pub fn status(&self, key: &K, now: Instant) -> Option<DebounceStatus> {
        let state = self.states.get(key)?;
        let record = state.record()?;
        Some(DebounceStatus {
            detection_duration_secs: now
                .saturating_duration_since(record.first_detected)
                .as_secs_f64(),
            time_since_last_detection_secs: now
                .saturating_duration_since(record.last_detected)
                .as_secs_f64(),
            total_detections: record.total_detections,
            consecutive_frames: record.consecutive_frames,
            triggered: state.is_triggered(),
        })
    }

    pub fn statuses(&self, now: Instant) -> HashMap<K, DebounceStatus> {
        self.states
            .keys()
            .filter_map(|k| self.status(k, now).map(|s| (k.clone(), s)))
            .collect()
    }

    pub fn reset(&mut self) {
        self.states.clear();
    }

    fn advance(&self, state: DebounceState, present: bool, now: Instant) -> DebounceState {
        match (state, present) {
            (DebounceState::Idle, true) => DebounceState::Accumulating(DebounceRecord::start(now)),
            (DebounceState::Idle, false) => DebounceState::Idle,
            (DebounceState::Accumulating(mut r), true) => {
                r.hit(now);
                DebounceState::Accumulating(r)
            }
            (DebounceState::Triggered(mut r), true) => {
                r.hit(now);
                DebounceState::Triggered(r)
            }
            (state, false) => self.decay(state, now),
        }
    }

    fn decay(&self, state: DebounceState, now: Instant) -> DebounceState {
        let expired = |r: &DebounceRecord| {
            now.saturating_duration_since(r.last_detected) > self.policy.expiry
        };
        match state {
            DebounceState::Accumulating(mut r) => {
                r.consecutive_frames = 0;
                if expired(&r) {
                    DebounceState::Idle
                } else {
                    DebounceState::Accumulating(r)
                }
            }
            DebounceState::Triggered(mut r) => {
                r.consecutive_frames = 0;
                if expired(&r) {
                    DebounceState::Idle
                } else {
                    DebounceState::Triggered(r)
                }
            }
            DebounceState::Idle => DebounceState::Idle,
        }
    }

    fn evaluate_trigger(&self, state: DebounceState, now: Instant) -> (DebounceState, bool) {
        match state {
            DebounceState::Accumulating(r)
                if now.saturating_duration_since(r.first_detected) >= self.policy.min_duration =>
            {
                (DebounceState::Triggered(r), true)
            }
            other => (other, false),
        }
    }
}
