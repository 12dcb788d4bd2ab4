use thiserror::Error;

use crate::violations::domain::violation::ViolationRecord;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("violation store I/O failed: {0}")]
    Io(#[from] std::io::Error),
    #[error("violation record could not be encoded: {0}")]
    Serialization(#[from] serde_json::Error),
    #[error("violation store lock poisoned")]
    Poisoned,
}

/// Durable violation log.
pub trait ViolationStore: Send + Sync {
    fn append(&self, record: ViolationRecord) -> Result<(), StoreError>;

    /// Every record for the student and exam, oldest first.
    fn query(&self, student_id: &str, exam_id: &str) -> Result<Vec<ViolationRecord>, StoreError>;
}
