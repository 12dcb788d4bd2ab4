use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// One student's enrolled embeddings, keyed by view label.
///
/// Views iterate in label order so distance reports are stable.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ReferenceEmbeddingSet {
    views: BTreeMap<String, Vec<f32>>,
}

impl ReferenceEmbeddingSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds or replaces the embedding for `view`.
    pub fn insert(&mut self, view: impl Into<String>, embedding: Vec<f32>) {
        self.views.insert(view.into(), embedding);
    }

    pub fn len(&self) -> usize {
        self.views.len()
    }

    pub fn is_empty(&self) -> bool {
        self.views.is_empty()
    }

    pub fn view_labels(&self) -> Vec<String> {
        self.views.keys().cloned().collect()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &[f32])> {
        self.views.iter().map(|(k, v)| (k.as_str(), v.as_slice()))
    }
}

impl FromIterator<(String, Vec<f32>)> for ReferenceEmbeddingSet {
    fn from_iter<I: IntoIterator<Item = (String, Vec<f32>)>>(iter: I) -> Self {
        Self {
            views: iter.into_iter().collect(),
        }
    }
}

/// What the verifier currently holds for a student.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub struct ReferenceStatus {
    pub loaded: bool,
    pub reference_count: usize,
    pub reference_views: Vec<String>,
}

impl From<&ReferenceEmbeddingSet> for ReferenceStatus {
    fn from(set: &ReferenceEmbeddingSet) -> Self {
        Self {
            loaded: true,
            reference_count: set.len(),
            reference_views: set.view_labels(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_views_iterate_in_label_order() {
        let mut set = ReferenceEmbeddingSet::new();
        set.insert("right", vec![1.0]);
        set.insert("front", vec![2.0]);
        set.insert("left", vec![3.0]);
        assert_eq!(set.view_labels(), vec!["front", "left", "right"]);
    }

    #[test]
    fn test_insert_replaces_view() {
        let mut set = ReferenceEmbeddingSet::new();
        set.insert("front", vec![1.0]);
        set.insert("front", vec![2.0]);
        assert_eq!(set.len(), 1);
        assert_eq!(set.iter().next(), Some(("front", &[2.0f32][..])));
    }

    #[test]
    fn test_status_from_set() {
        let set: ReferenceEmbeddingSet = [("front".to_string(), vec![0.0])].into_iter().collect();
        let status = ReferenceStatus::from(&set);
        assert!(status.loaded);
        assert_eq!(status.reference_count, 1);
        assert_eq!(status.reference_views, vec!["front"]);
    }

    #[test]
    fn test_deserializes_from_view_map() {
        let set: ReferenceEmbeddingSet =
            serde_json::from_str(r#"{"front": [0.5, 0.5], "left": [1.0, 0.0]}"#).unwrap();
        assert_eq!(set.len(), 2);
    }
}
