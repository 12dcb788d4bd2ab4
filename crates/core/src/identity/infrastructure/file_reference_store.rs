//! Enrollment photos stored flat in one directory.
//!
//! Files are named `<student>_<view>_<YYYYmmdd_HHMMSS>.png`. When a view was
//! captured more than once, the newest capture sorts last and wins.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use chrono::Local;
use log::warn;

use crate::detection::domain::perception::{ServiceError, ServiceKind};
use crate::identity::domain::embedding::ReferenceImageStore;
use crate::shared::constants::REFERENCE_IMAGE_EXTENSION;

pub struct FileReferenceStore {
    dir: PathBuf,
}

impl FileReferenceStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Writes a new capture of `view` and returns its path.
    pub fn store(&self, student_id: &str, view: &str, png: &[u8]) -> Result<PathBuf, ServiceError> {
        if student_id.is_empty() || view.is_empty() || view.contains('_') {
            return Err(ServiceError::unavailable(
                ServiceKind::ReferenceImages,
                format!("invalid reference name {student_id:?}/{view:?}"),
            ));
        }
        fs::create_dir_all(&self.dir).map_err(io_error)?;
        let timestamp = Local::now().format("%Y%m%d_%H%M%S");
        let path = self
            .dir
            .join(format!("{student_id}_{view}_{timestamp}.{REFERENCE_IMAGE_EXTENSION}"));
        fs::write(&path, png).map_err(io_error)?;
        Ok(path)
    }

    /// View label encoded in `file_name` if it belongs to `student_id`.
    fn view_of<'a>(student_id: &str, file_name: &'a str) -> Option<&'a str> {
        let stem = file_name
            .strip_suffix(REFERENCE_IMAGE_EXTENSION)?
            .strip_suffix('.')?;
        let rest = stem.strip_prefix(student_id)?.strip_prefix('_')?;
        let (view, timestamp) = rest.split_once('_')?;
        if view.is_empty() || timestamp.is_empty() {
            return None;
        }
        Some(view)
    }
}

impl ReferenceImageStore for FileReferenceStore {
    fn list_views(&self, student_id: &str) -> Result<Vec<(String, Vec<u8>)>, ServiceError> {
        let entries = match fs::read_dir(&self.dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(io_error(e)),
        };

        let mut files: Vec<(String, String, PathBuf)> = Vec::new();
        for entry in entries {
            let entry = entry.map_err(io_error)?;
            let name = entry.file_name().to_string_lossy().into_owned();
            if let Some(view) = Self::view_of(student_id, &name) {
                files.push((view.to_string(), name.clone(), entry.path()));
            }
        }
        files.sort();

        let mut views = Vec::with_capacity(files.len());
        for (view, _, path) in files {
            match fs::read(&path) {
                Ok(bytes) => views.push((view, bytes)),
                Err(e) => warn!("Cannot read reference image {}: {e}", path.display()),
            }
        }
        Ok(views)
    }
}

fn io_error(e: io::Error) -> ServiceError {
    ServiceError::unavailable(ServiceKind::ReferenceImages, e)
}
