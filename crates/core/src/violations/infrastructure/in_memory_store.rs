use std::sync::Mutex;

use crate::violations::domain::violation::ViolationRecord;
use crate::violations::domain::violation_store::{StoreError, ViolationStore};

/// Process-local violation log.
#[derive(Default)]
pub struct InMemoryViolationStore {
    records: Mutex<Vec<ViolationRecord>>,
}

impl InMemoryViolationStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.records.lock().map(|r| r.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl ViolationStore for InMemoryViolationStore {
    fn append(&self, record: ViolationRecord) -> Result<(), StoreError> {
        self.records
            .lock()
            .map_err(|_| StoreError::Poisoned)?
            .push(record);
        Ok(())
    }

    fn query(&self, student_id: &str, exam_id: &str) -> Result<Vec<ViolationRecord>, StoreError> {
        let records = self.records.lock().map_err(|_| StoreError::Poisoned)?;
        let mut matching: Vec<ViolationRecord> = records
            .iter()
            .filter(|r| r.student_id == student_id && r.exam_id == exam_id)
            .cloned()
            .collect();
        matching.sort_by_key(|r| r.timestamp);
        Ok(matching)
    }
}
