use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::shared::constants::*;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("failed to parse config {path}: {source}")]
    Parse {
        path: PathBuf,
        source: serde_json::Error,
    },
    #[error("invalid config: {0}")]
    Invalid(String),
}

/// All tunable thresholds of the engine, grouped by component.
///
/// Every field has a default so a partial JSON file only overrides what it
/// names.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProctorConfig {
    pub tracker: TrackerConfig,
    pub devices: DebounceConfig,
    pub multiple_people: DebounceConfig,
    pub overlap: OverlapConfig,
    pub head_pose: HeadPoseConfig,
    pub identity: IdentityConfig,
    pub session: SessionConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TrackerConfig {
    pub match_radius: f64,
    pub person_confidence: f64,
    pub face_confidence: f64,
}

impl Default for TrackerConfig {
    fn default() -> Self {
        Self {
            match_radius: PERSON_MATCH_RADIUS,
            person_confidence: PERSON_CONFIDENCE_FLOOR,
            face_confidence: FACE_CONFIDENCE_FLOOR,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DebounceConfig {
    pub min_duration_secs: f64,
    pub expiry_secs: f64,
    pub confidence_floor: f64,
    /// Monitored detector labels. Empty for single-key signals.
    #[serde(default)]
    pub labels: Vec<String>,
}

impl DebounceConfig {
    pub fn devices() -> Self {
        Self {
            min_duration_secs: DEVICE_MIN_DURATION_SECS,
            expiry_secs: DEVICE_EXPIRY_SECS,
            confidence_floor: DEVICE_CONFIDENCE_FLOOR,
            labels: MONITORED_DEVICES.iter().map(|s| s.to_string()).collect(),
        }
    }

    pub fn multiple_people() -> Self {
        Self {
            min_duration_secs: MULTIPLE_PEOPLE_MIN_DURATION_SECS,
            expiry_secs: MULTIPLE_PEOPLE_EXPIRY_SECS,
            confidence_floor: MULTIPLE_PEOPLE_CONFIDENCE_FLOOR,
            labels: Vec::new(),
        }
    }

    pub fn min_duration(&self) -> Duration {
        Duration::from_secs_f64(self.min_duration_secs)
    }

    pub fn expiry(&self) -> Duration {
        Duration::from_secs_f64(self.expiry_secs)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OverlapConfig {
    pub face_min_separation: f64,
    pub person_min_separation: f64,
    pub person_max_overlap: f64,
}

impl Default for OverlapConfig {
    fn default() -> Self {
        Self {
            face_min_separation: FACE_MIN_SEPARATION,
            person_min_separation: PERSON_MIN_SEPARATION,
            person_max_overlap: PERSON_MAX_OVERLAP,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HeadPoseConfig {
    pub max_yaw_degrees: f64,
    pub max_pitch_degrees: f64,
    pub ear_min: f64,
    pub ear_max: f64,
}

impl Default for HeadPoseConfig {
    fn default() -> Self {
        Self {
            max_yaw_degrees: MAX_YAW_DEGREES,
            max_pitch_degrees: MAX_PITCH_DEGREES,
            ear_min: EYE_ASPECT_RATIO_MIN,
            ear_max: EYE_ASPECT_RATIO_MAX,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct IdentityConfig {
    pub threshold_three_views: f64,
    pub threshold_two_views: f64,
    pub threshold_one_view: f64,
    pub consistent_mean_max: f64,
    pub consistent_std_max: f64,
    pub close_view_distance: f64,
    pub close_views_required: usize,
}

impl Default for IdentityConfig {
    fn default() -> Self {
        Self {
            threshold_three_views: THRESHOLD_THREE_VIEWS,
            threshold_two_views: THRESHOLD_TWO_VIEWS,
            threshold_one_view: THRESHOLD_ONE_VIEW,
            consistent_mean_max: CONSISTENT_MEAN_MAX,
            consistent_std_max: CONSISTENT_STD_MAX,
            close_view_distance: CLOSE_VIEW_DISTANCE,
            close_views_required: CLOSE_VIEWS_REQUIRED,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    pub disappearance_grace_secs: f64,
    pub verification_cooldown_secs: f64,
    pub duplicate_window_secs: f64,
    pub recorded_confidence: f64,
}

impl SessionConfig {
    pub fn disappearance_grace(&self) -> Duration {
        Duration::from_secs_f64(self.disappearance_grace_secs)
    }

    pub fn verification_cooldown(&self) -> Duration {
        Duration::from_secs_f64(self.verification_cooldown_secs)
    }

    pub fn duplicate_window(&self) -> Duration {
        Duration::from_secs_f64(self.duplicate_window_secs)
    }
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            disappearance_grace_secs: DISAPPEARANCE_GRACE_SECS,
            verification_cooldown_secs: VERIFICATION_COOLDOWN_SECS,
            duplicate_window_secs: DUPLICATE_WINDOW_SECS,
            recorded_confidence: RECORDED_CONFIDENCE,
        }
    }
}

impl Default for ProctorConfig {
    fn default() -> Self {
        Self {
            tracker: TrackerConfig::default(),
            devices: DebounceConfig::devices(),
            multiple_people: DebounceConfig::multiple_people(),
            overlap: OverlapConfig::default(),
            head_pose: HeadPoseConfig::default(),
            identity: IdentityConfig::default(),
            session: SessionConfig::default(),
        }
    }
}

impl ProctorConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Per-user config location, e.g. `~/.config/Proctor/config.json`.
    pub fn default_path() -> Option<PathBuf> {
        dirs::config_dir().map(|d| d.join("Proctor").join("config.json"))
    }

    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let json = fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let config: Self = serde_json::from_str(&json).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let durations = [
            ("devices.expiry_secs", self.devices.expiry_secs),
            ("multiple_people.expiry_secs", self.multiple_people.expiry_secs),
            (
                "session.disappearance_grace_secs",
                self.session.disappearance_grace_secs,
            ),
            (
                "session.verification_cooldown_secs",
                self.session.verification_cooldown_secs,
            ),
        ];
        for (name, value) in durations {
            if !(value.is_finite() && value > 0.0) {
                return Err(ConfigError::Invalid(format!(
                    "{name} must be positive, got {value}"
                )));
            }
        }
        for (name, value) in [
            ("devices.min_duration_secs", self.devices.min_duration_secs),
            (
                "multiple_people.min_duration_secs",
                self.multiple_people.min_duration_secs,
            ),
            ("session.duplicate_window_secs", self.session.duplicate_window_secs),
        ] {
            if !(value.is_finite() && value >= 0.0) {
                return Err(ConfigError::Invalid(format!(
                    "{name} must be non-negative, got {value}"
                )));
            }
        }
        if self.head_pose.ear_min >= self.head_pose.ear_max {
            return Err(ConfigError::Invalid(format!(
                "head_pose.ear_min ({}) must be below ear_max ({})",
                self.head_pose.ear_min, self.head_pose.ear_max
            )));
        }
        if self.tracker.match_radius <= 0.0 {
            return Err(ConfigError::Invalid(format!(
                "tracker.match_radius must be positive, got {}",
                self.tracker.match_radius
            )));
        }
        Ok(())
    }
}
