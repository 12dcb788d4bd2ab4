use std::collections::HashMap;
use std::fs;
use std::path::Path;

use crate::identity::domain::identity_error::IdentityError;
use crate::identity::domain::identity_verifier::ReferenceSource;
use crate::identity::domain::reference_set::ReferenceEmbeddingSet;

/// Precomputed reference embeddings for many students, from a JSON object
/// of the form `{"<student>": {"<view>": [f32, ...]}}`.
pub struct JsonReferenceFile {
    students: HashMap<String, ReferenceEmbeddingSet>,
}

impl JsonReferenceFile {
    pub fn open(path: &Path) -> Result<Self, IdentityError> {
        let file_error = |reason: String| IdentityError::ReferenceFile {
            path: path.display().to_string(),
            reason,
        };
        let json = fs::read_to_string(path).map_err(|e| file_error(e.to_string()))?;
        Self::from_json(&json).map_err(|e| file_error(e.to_string()))
    }

    pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
        Ok(Self {
            students: serde_json::from_str(json)?,
        })
    }

    pub fn students(&self) -> impl Iterator<Item = &str> {
        self.students.keys().map(String::as_str)
    }
}

impl ReferenceSource for JsonReferenceFile {
    fn load(&self, student_id: &str) -> Result<ReferenceEmbeddingSet, IdentityError> {
        match self.students.get(student_id) {
            Some(set) if !set.is_empty() => Ok(set.clone()),
            _ => Err(IdentityError::NoReferenceData(student_id.to_string())),
        }
    }
}
