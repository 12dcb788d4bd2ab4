use thiserror::Error;

use crate::detection::domain::perception::ServiceError;

#[derive(Debug, Error)]
pub enum IdentityError {
    #[error("no usable reference embeddings for student {0}")]
    NoReferenceData(String),
    #[error("embedding for view {view} has {actual} dimensions, expected {expected}")]
    DimensionMismatch {
        view: String,
        expected: usize,
        actual: usize,
    },
    #[error(transparent)]
    Service(#[from] ServiceError),
    #[error("reference file {path}: {reason}")]
    ReferenceFile { path: String, reason: String },
}
