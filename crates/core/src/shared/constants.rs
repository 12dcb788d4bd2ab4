/// Max center displacement (detector pixels) for a person to keep its id.
pub const PERSON_MATCH_RADIUS: f64 = 50.0;

pub const PERSON_CONFIDENCE_FLOOR: f64 = 0.5;
pub const FACE_CONFIDENCE_FLOOR: f64 = 0.7;

pub const DEVICE_MIN_DURATION_SECS: f64 = 0.5;
pub const DEVICE_EXPIRY_SECS: f64 = 3.0;
pub const DEVICE_CONFIDENCE_FLOOR: f64 = 0.3;
pub const MONITORED_DEVICES: &[&str] = &["cell phone", "laptop", "monitor/tv"];

pub const MULTIPLE_PEOPLE_MIN_DURATION_SECS: f64 = 1.0;
pub const MULTIPLE_PEOPLE_EXPIRY_SECS: f64 = 3.0;
pub const MULTIPLE_PEOPLE_CONFIDENCE_FLOOR: f64 = 0.3;

/// Face centers closer than this are one detection artifact, not two faces.
pub const FACE_MIN_SEPARATION: f64 = 50.0;
pub const PERSON_MIN_SEPARATION: f64 = 80.0;
pub const PERSON_MAX_OVERLAP: f64 = 0.3;

pub const MAX_YAW_DEGREES: f64 = 30.0;
pub const MAX_PITCH_DEGREES: f64 = 20.0;
pub const EYE_ASPECT_RATIO_MIN: f64 = 0.20;
pub const EYE_ASPECT_RATIO_MAX: f64 = 0.50;

pub const THRESHOLD_THREE_VIEWS: f64 = 0.82;
pub const THRESHOLD_TWO_VIEWS: f64 = 0.78;
pub const THRESHOLD_ONE_VIEW: f64 = 0.75;
pub const CONSISTENT_MEAN_MAX: f64 = 0.88;
pub const CONSISTENT_STD_MAX: f64 = 0.12;
pub const CLOSE_VIEW_DISTANCE: f64 = 0.90;
pub const CLOSE_VIEWS_REQUIRED: usize = 2;

pub const DISAPPEARANCE_GRACE_SECS: f64 = 2.0;
pub const VERIFICATION_COOLDOWN_SECS: f64 = 5.0;
pub const DUPLICATE_WINDOW_SECS: f64 = 2.0;
pub const RECORDED_CONFIDENCE: f64 = 0.8;

pub const EMBEDDING_INPUT_SIZE: usize = 160;

pub const REFERENCE_IMAGE_EXTENSION: &str = "png";

/// Synthetic pinhole camera used for the landmark pose solve.
pub const POSE_FOCAL_LENGTH: f64 = 500.0;
pub const POSE_PRINCIPAL_POINT: (f64, f64) = (100.0, 100.0);
/// Normalized landmark coordinates are scaled by this before solving.
pub const LANDMARK_SCALE: f64 = 100.0;
