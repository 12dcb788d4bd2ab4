use crate::detection::domain::perception::ServiceError;
use crate::shared::bbox::BoundingBox;
use crate::shared::frame::Frame;

/// Port to the face embedding model.
pub trait EmbeddingService: Send + Sync {
    /// Embeds the face inside `region`, or the whole frame when `region` is
    /// `None`. `Ok(None)` means no face could be embedded.
    fn embed(
        &self,
        frame: &Frame,
        region: Option<&BoundingBox>,
    ) -> Result<Option<Vec<f32>>, ServiceError>;
}

/// Port to enrollment photos.
pub trait ReferenceImageStore: Send + Sync {
    /// Encoded images for one student as `(view label, image bytes)`, sorted
    /// by view label.
    fn list_views(&self, student_id: &str) -> Result<Vec<(String, Vec<u8>)>, ServiceError>;
}
