//! Append-only JSON-lines violation log.
//!
//! One record per line. Appends are serialized through a mutex so lines from
//! concurrent sessions never interleave.

use std::fs::{self, OpenOptions};
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use log::warn;

use crate::violations::domain::violation::ViolationRecord;
use crate::violations::domain::violation_store::{StoreError, ViolationStore};

pub struct JsonlViolationStore {
    path: PathBuf,
    writer: Mutex<()>,
}

impl JsonlViolationStore {
    pub fn new(path: impl Into<PathBuf>) -> Result<Self, StoreError> {
        let path = path.into();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)?;
        }
        Ok(Self {
            path,
            writer: Mutex::new(()),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl ViolationStore for JsonlViolationStore {
    fn append(&self, record: ViolationRecord) -> Result<(), StoreError> {
        let mut line = serde_json::to_string(&record)?;
        line.push('\n');
        let _guard = self.writer.lock().map_err(|_| StoreError::Poisoned)?;
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)?;
        file.write_all(line.as_bytes())?;
        Ok(())
    }

    fn query(&self, student_id: &str, exam_id: &str) -> Result<Vec<ViolationRecord>, StoreError> {
        let _guard = self.writer.lock().map_err(|_| StoreError::Poisoned)?;
        let file = match fs::File::open(&self.path) {
            Ok(file) => file,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };

        let mut records = Vec::new();
        for (n, line) in BufReader::new(file).lines().enumerate() {
            let line = line?;
            if line.trim().is_empty() {
                continue;
            }
            match serde_json::from_str::<ViolationRecord>(&line) {
                Ok(r) if r.student_id == student_id && r.exam_id == exam_id => records.push(r),
                Ok(_) => {}
                Err(e) => warn!("{}:{}: skipping bad record: {e}", self.path.display(), n + 1),
            }
        }
        records.sort_by_key(|r| r.timestamp);
        Ok(records)
    }
}
