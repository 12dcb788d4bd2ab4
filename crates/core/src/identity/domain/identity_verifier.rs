//! Per-student reference cache and live identity checks.
//!
//! Reference sets are built at most once per student. Reads go through an
//! `RwLock` so concurrent sessions share them freely; builds are serialized
//! behind a single loader mutex and re-check the cache once they hold it, so
//! two sessions starting at once do not embed the same photos twice.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError, RwLock};

use log::{debug, info, warn};
use serde::Serialize;

use crate::identity::domain::embedding::{EmbeddingService, ReferenceImageStore};
use crate::identity::domain::identity_error::IdentityError;
use crate::identity::domain::identity_matcher::{IdentityMatcher, MatchResult};
use crate::identity::domain::reference_set::{ReferenceEmbeddingSet, ReferenceStatus};
use crate::shared::bbox::BoundingBox;
use crate::shared::frame::Frame;

/// Anything that can produce a student's enrolled embeddings.
pub trait ReferenceSource: Send + Sync {
    fn load(&self, student_id: &str) -> Result<ReferenceEmbeddingSet, IdentityError>;
}

/// Builds reference sets by embedding enrollment photos.
pub struct EmbeddedReferenceSource {
    images: Arc<dyn ReferenceImageStore>,
    embedder: Arc<dyn EmbeddingService>,
}

impl EmbeddedReferenceSource {
    pub fn new(images: Arc<dyn ReferenceImageStore>, embedder: Arc<dyn EmbeddingService>) -> Self {
        Self { images, embedder }
    }
}

impl ReferenceSource for EmbeddedReferenceSource {
    fn load(&self, student_id: &str) -> Result<ReferenceEmbeddingSet, IdentityError> {
        let mut set = ReferenceEmbeddingSet::new();
        for (view, bytes) in self.images.list_views(student_id)? {
            let frame = match Frame::decode(&bytes, 0) {
                Ok(frame) => frame,
                Err(e) => {
                    warn!("Skipping {student_id} reference view {view}: {e}");
                    continue;
                }
            };
            match self.embedder.embed(&frame, None) {
                Ok(Some(embedding)) => set.insert(view, embedding),
                Ok(None) => warn!("No face in {student_id} reference view {view}"),
                Err(e) => warn!("Skipping {student_id} reference view {view}: {e}"),
            }
        }
        if set.is_empty() {
            return Err(IdentityError::NoReferenceData(student_id.to_string()));
        }
        Ok(set)
    }
}

pub struct ReferenceCache {
    source: Arc<dyn ReferenceSource>,
    loaded: RwLock<HashMap<String, Arc<ReferenceEmbeddingSet>>>,
    loader: Mutex<()>,
}

impl ReferenceCache {
    pub fn new(source: Arc<dyn ReferenceSource>) -> Self {
        Self {
            source,
            loaded: RwLock::new(HashMap::new()),
            loader: Mutex::new(()),
        }
    }

    pub fn get_or_load(&self, student_id: &str) -> Result<Arc<ReferenceEmbeddingSet>, IdentityError> {
        if let Some(set) = self.cached(student_id) {
            return Ok(set);
        }
        let _loading = self.loader.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(set) = self.cached(student_id) {
            return Ok(set);
        }
        self.load_and_store(student_id)
    }

    /// Rebuilds a student's set from the source, replacing any cached one.
    pub fn reload(&self, student_id: &str) -> Result<ReferenceStatus, IdentityError> {
        let _loading = self.loader.lock().unwrap_or_else(PoisonError::into_inner);
        let set = self.load_and_store(student_id)?;
        Ok(ReferenceStatus::from(set.as_ref()))
    }

    pub fn status(&self, student_id: &str) -> ReferenceStatus {
        self.cached(student_id)
            .map(|set| ReferenceStatus::from(set.as_ref()))
            .unwrap_or_default()
    }

    pub fn evict(&self, student_id: &str) {
        self.loaded
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(student_id);
    }

    fn cached(&self, student_id: &str) -> Option<Arc<ReferenceEmbeddingSet>> {
        self.loaded
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(student_id)
            .cloned()
    }

    /// Caller must hold the loader lock.
    fn load_and_store(&self, student_id: &str) -> Result<Arc<ReferenceEmbeddingSet>, IdentityError> {
        let set = self.source.load(student_id)?;
        if set.is_empty() {
            return Err(IdentityError::NoReferenceData(student_id.to_string()));
        }
        info!(
            "Loaded {} reference embeddings for student {student_id}: {:?}",
            set.len(),
            set.view_labels()
        );
        let set = Arc::new(set);
        self.loaded
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(student_id.to_string(), Arc::clone(&set));
        Ok(set)
    }
}

#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum VerificationOutcome {
    Verified(MatchResult),
    Rejected(MatchResult),
    /// No face could be embedded from the live image.
    NoFace,
    NoReferenceData,
    Unavailable { reason: String },
}

impl VerificationOutcome {
    /// The check ran to completion (reference data and a live face existed).
    pub fn completed(&self) -> bool {
        matches!(self, Self::Verified(_) | Self::Rejected(_))
    }

    pub fn is_verified(&self) -> bool {
        matches!(self, Self::Verified(_))
    }

    pub fn is_mismatch(&self) -> bool {
        matches!(self, Self::Rejected(_))
    }

    pub fn describe(&self) -> String {
        match self {
            Self::Verified(_) => "identity verified".to_string(),
            Self::Rejected(_) => "identity rejected".to_string(),
            Self::NoFace => "no face detected in live image".to_string(),
            Self::NoReferenceData => "no reference images found for this student".to_string(),
            Self::Unavailable { reason } => format!("verification unavailable: {reason}"),
        }
    }
}

/// Embeds a live image and matches it against the student's references.
pub struct IdentityVerifier {
    matcher: IdentityMatcher,
    references: Arc<ReferenceCache>,
    embedder: Arc<dyn EmbeddingService>,
}

impl IdentityVerifier {
    pub fn new(
        matcher: IdentityMatcher,
        references: Arc<ReferenceCache>,
        embedder: Arc<dyn EmbeddingService>,
    ) -> Self {
        Self {
            matcher,
            references,
            embedder,
        }
    }

    pub fn verify(
        &self,
        student_id: &str,
        frame: &Frame,
        region: Option<&BoundingBox>,
    ) -> VerificationOutcome {
        let references = match self.references.get_or_load(student_id) {
            Ok(set) => set,
            Err(IdentityError::NoReferenceData(_)) => return VerificationOutcome::NoReferenceData,
            Err(e) => {
                warn!("Reference load failed for student {student_id}: {e}");
                return VerificationOutcome::Unavailable {
                    reason: e.to_string(),
                };
            }
        };

        let live = match self.embedder.embed(frame, region) {
            Ok(Some(embedding)) => embedding,
            Ok(None) => return VerificationOutcome::NoFace,
            Err(e) => {
                warn!("Live embedding failed for student {student_id}: {e}");
                return VerificationOutcome::Unavailable {
                    reason: e.to_string(),
                };
            }
        };

        match self.matcher.compare(&references, &live) {
            Ok(result) => {
                debug!(
                    "Student {student_id}: best distance {:.4} ({}) threshold {} rule {:?}",
                    result.best_distance, result.best_view, result.threshold, result.rule
                );
                if result.verified {
                    VerificationOutcome::Verified(result)
                } else {
                    VerificationOutcome::Rejected(result)
                }
            }
            Err(e) => {
                warn!("Identity comparison failed for student {student_id}: {e}");
                VerificationOutcome::Unavailable {
                    reason: e.to_string(),
                }
            }
        }
    }

    pub fn reference_status(&self, student_id: &str) -> ReferenceStatus {
        self.references.status(student_id)
    }

    pub fn reload_references(&self, student_id: &str) -> Result<ReferenceStatus, IdentityError> {
        self.references.reload(student_id)
    }

    pub fn references(&self) -> &Arc<ReferenceCache> {
        &self.references
    }
}


#[cfg(test)]
mod tests {
    use super::stubs::*;
    use super::*;
    use crate::detection::domain::perception::{ServiceError, ServiceKind};
    use std::io::Cursor;
    use std::sync::atomic::Ordering;

    fn three_views() -> Vec<(&'static str, Vec<f32>)> {
        vec![
            ("front", vec![0.0, 0.0]),
            ("left", vec![1.0, 0.0]),
            ("right", vec![0.0, 1.0]),
        ]
    }

    fn verifier(live: Option<Vec<f32>>) -> (IdentityVerifier, Arc<FixedReferences>) {
        let source = Arc::new(FixedReferences::single("s1", &three_views()));
        let cache = Arc::new(ReferenceCache::new(source.clone()));
        let verifier = IdentityVerifier::new(
            IdentityMatcher::default(),
            cache,
            Arc::new(ConstantEmbedding(live)),
        );
        (verifier, source)
    }

    fn png_bytes() -> Vec<u8> {
        let img = image::RgbImage::from_pixel(4, 4, image::Rgb([10, 20, 30]));
        let mut bytes = Vec::new();
        img.write_to(&mut Cursor::new(&mut bytes), image::ImageFormat::Png)
            .unwrap();
        bytes
    }

    struct Images(Vec<(String, Vec<u8>)>);

    impl ReferenceImageStore for Images {
        fn list_views(&self, _student_id: &str) -> Result<Vec<(String, Vec<u8>)>, ServiceError> {
            Ok(self.0.clone())
        }
    }

    struct BrokenImages;

    impl ReferenceImageStore for BrokenImages {
        fn list_views(&self, _student_id: &str) -> Result<Vec<(String, Vec<u8>)>, ServiceError> {
            Err(ServiceError::unavailable(ServiceKind::ReferenceImages, "disk gone"))
        }
    }

    // ── Verification ─────────────────────────────────────────────────

    #[test]
    fn test_matching_face_is_verified() {
        let (verifier, _) = verifier(Some(vec![0.1, 0.0]));
        let outcome = verifier.verify("s1", &Frame::blank(4, 4, 0), None);
        assert!(outcome.is_verified());
        assert!(outcome.completed());
    }

    #[test]
    fn test_distant_face_is_rejected() {
        let (verifier, _) = verifier(Some(vec![5.0, 5.0]));
        let outcome = verifier.verify("s1", &Frame::blank(4, 4, 0), None);
        assert!(outcome.is_mismatch());
    }

    #[test]
    fn test_no_live_face() {
        let (verifier, _) = verifier(None);
        let outcome = verifier.verify("s1", &Frame::blank(4, 4, 0), None);
        assert_eq!(outcome, VerificationOutcome::NoFace);
        assert!(!outcome.is_mismatch());
    }

    #[test]
    fn test_unknown_student_has_no_reference_data() {
        let (verifier, _) = verifier(Some(vec![0.0, 0.0]));
        let outcome = verifier.verify("nobody", &Frame::blank(4, 4, 0), None);
        assert_eq!(outcome, VerificationOutcome::NoReferenceData);
        assert!(!verifier.reference_status("nobody").loaded);
    }

    #[test]
    fn test_embedding_failure_is_unavailable() {
        let source = Arc::new(FixedReferences::single("s1", &three_views()));
        let verifier = IdentityVerifier::new(
            IdentityMatcher::default(),
            Arc::new(ReferenceCache::new(source)),
            Arc::new(FailingEmbedding),
        );
        let outcome = verifier.verify("s1", &Frame::blank(4, 4, 0), None);
        assert!(matches!(outcome, VerificationOutcome::Unavailable { .. }));
        assert!(!outcome.is_mismatch());
    }

    // ── Reference cache ──────────────────────────────────────────────

    #[test]
    fn test_references_load_once() {
        let (verifier, source) = verifier(Some(vec![0.0, 0.0]));
        for _ in 0..3 {
            verifier.verify("s1", &Frame::blank(4, 4, 0), None);
        }
        assert_eq!(source.loads.load(Ordering::SeqCst), 1);

        let status = verifier.reference_status("s1");
        assert!(status.loaded);
        assert_eq!(status.reference_count, 3);
        assert_eq!(status.reference_views, vec!["front", "left", "right"]);
    }

    #[test]
    fn test_concurrent_first_use_loads_once() {
        let (verifier, source) = verifier(Some(vec![0.0, 0.0]));
        let verifier = Arc::new(verifier);
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let v = Arc::clone(&verifier);
                std::thread::spawn(move || v.verify("s1", &Frame::blank(4, 4, 0), None))
            })
            .collect();
        for h in handles {
            assert!(h.join().unwrap().is_verified());
        }
        assert_eq!(source.loads.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_reload_hits_source_again() {
        let (verifier, source) = verifier(Some(vec![0.0, 0.0]));
        verifier.verify("s1", &Frame::blank(4, 4, 0), None);
        let status = verifier.reload_references("s1").unwrap();
        assert_eq!(status.reference_count, 3);
        assert_eq!(source.loads.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_evict_forgets_student() {
        let (verifier, _) = verifier(Some(vec![0.0, 0.0]));
        verifier.verify("s1", &Frame::blank(4, 4, 0), None);
        verifier.references().evict("s1");
        assert!(!verifier.reference_status("s1").loaded);
    }

    // ── Embedded references ──────────────────────────────────────────

    #[test]
    fn test_embedded_source_skips_undecodable_views() {
        let images = Images(vec![
            ("front".to_string(), png_bytes()),
            ("left".to_string(), b"garbage".to_vec()),
        ]);
        let source = EmbeddedReferenceSource::new(
            Arc::new(images),
            Arc::new(ConstantEmbedding(Some(vec![1.0]))),
        );
        let set = source.load("s1").unwrap();
        assert_eq!(set.view_labels(), vec!["front"]);
    }

    #[test]
    fn test_embedded_source_without_faces_has_no_data() {
        let images = Images(vec![("front".to_string(), png_bytes())]);
        let source =
            EmbeddedReferenceSource::new(Arc::new(images), Arc::new(ConstantEmbedding(None)));
        assert!(matches!(
            source.load("s1"),
            Err(IdentityError::NoReferenceData(_))
        ));
    }

    #[test]
    fn test_image_store_failure_is_unavailable() {
        let source = EmbeddedReferenceSource::new(
            Arc::new(BrokenImages),
            Arc::new(ConstantEmbedding(Some(vec![1.0]))),
        );
        let verifier = IdentityVerifier::new(
            IdentityMatcher::default(),
            Arc::new(ReferenceCache::new(Arc::new(source))),
            Arc::new(ConstantEmbedding(Some(vec![1.0]))),
        );
        let outcome = verifier.verify("s1", &Frame::blank(4, 4, 0), None);
        assert!(matches!(outcome, VerificationOutcome::Unavailable { .. }));
    }
}
