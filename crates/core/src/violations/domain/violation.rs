use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ViolationKind {
    PersonDisappeared,
    IdentityMismatch,
    MultiplePeople,
    MultipleFaces,
    LookingAway,
    HeadTurning,
    DeviceDetected,
}

impl ViolationKind {
    pub const ALL: [ViolationKind; 7] = [
        ViolationKind::PersonDisappeared,
        ViolationKind::IdentityMismatch,
        ViolationKind::MultiplePeople,
        ViolationKind::MultipleFaces,
        ViolationKind::LookingAway,
        ViolationKind::HeadTurning,
        ViolationKind::DeviceDetected,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ViolationKind::PersonDisappeared => "person_disappeared",
            ViolationKind::IdentityMismatch => "identity_mismatch",
            ViolationKind::MultiplePeople => "multiple_people",
            ViolationKind::MultipleFaces => "multiple_faces",
            ViolationKind::LookingAway => "looking_away",
            ViolationKind::HeadTurning => "head_turning",
            ViolationKind::DeviceDetected => "device_detected",
        }
    }
}

impl fmt::Display for ViolationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Full per-frame snapshot of every violation kind. Never accumulated
/// across frames.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ViolationSet {
    pub person_disappeared: bool,
    pub identity_mismatch: bool,
    pub multiple_people: bool,
    pub multiple_faces: bool,
    pub looking_away: bool,
    pub head_turning: bool,
    pub device_detected: bool,
}

impl ViolationSet {
    pub fn get(&self, kind: ViolationKind) -> bool {
        match kind {
            ViolationKind::PersonDisappeared => self.person_disappeared,
            ViolationKind::IdentityMismatch => self.identity_mismatch,
            ViolationKind::MultiplePeople => self.multiple_people,
            ViolationKind::MultipleFaces => self.multiple_faces,
            ViolationKind::LookingAway => self.looking_away,
            ViolationKind::HeadTurning => self.head_turning,
            ViolationKind::DeviceDetected => self.device_detected,
        }
    }

    pub fn set(&mut self, kind: ViolationKind, value: bool) {
        let flag = match kind {
            ViolationKind::PersonDisappeared => &mut self.person_disappeared,
            ViolationKind::IdentityMismatch => &mut self.identity_mismatch,
            ViolationKind::MultiplePeople => &mut self.multiple_people,
            ViolationKind::MultipleFaces => &mut self.multiple_faces,
            ViolationKind::LookingAway => &mut self.looking_away,
            ViolationKind::HeadTurning => &mut self.head_turning,
            ViolationKind::DeviceDetected => &mut self.device_detected,
        };
        *flag = value;
    }

    pub fn active(&self) -> Vec<ViolationKind> {
        ViolationKind::ALL
            .into_iter()
            .filter(|k| self.get(*k))
            .collect()
    }

    pub fn any(&self) -> bool {
        ViolationKind::ALL.iter().any(|k| self.get(*k))
    }
}

/// One persisted violation.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ViolationRecord {
    pub student_id: String,
    pub exam_id: String,
    pub kind: ViolationKind,
    pub confidence: f64,
    pub details: String,
    pub timestamp: DateTime<Utc>,
}

impl ViolationRecord {
    /// Record for a violation raised by per-frame analysis.
    pub fn from_frame_analysis(
        student_id: &str,
        exam_id: &str,
        kind: ViolationKind,
        confidence: f64,
        timestamp: DateTime<Utc>,
    ) -> Self {
        Self {
            student_id: student_id.to_string(),
            exam_id: exam_id.to_string(),
            kind,
            confidence,
            details: format!("frame analysis: {kind}"),
            timestamp,
        }
    }
}
