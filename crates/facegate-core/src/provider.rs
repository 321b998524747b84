use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Where an uploaded image lives in object storage.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImageLocation {
    pub bucket: String,
    pub key: String,
}

impl ImageLocation {
    pub fn new(bucket: impl Into<String>, key: impl Into<String>) -> Self {
        Self {
            bucket: bucket.into(),
            key: key.into(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum QualityFilter {
    None,
    #[default]
    Auto,
}

#[derive(Debug, Clone, PartialEq)]
pub struct IndexFaceRequest {
    pub collection_id: String,
    pub image: ImageLocation,
    pub external_id: String,
    pub max_faces: usize,
    pub quality_filter: QualityFilter,
}

#[derive(Debug, Clone, PartialEq)]
pub struct SearchFacesRequest {
    pub collection_id: String,
    pub image: ImageLocation,
    pub face_match_threshold: f64,
    pub max_faces: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndexedFace {
    pub face_id: String,
    pub external_id: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FaceMatch {
    pub face_id: String,
    pub external_id: String,
    pub similarity: f64,
}

#[derive(Debug, Error)]
pub enum ProviderError {
    #[error("{0}")]
    InvalidInput(String),
    #[error("face provider unavailable: {0}")]
    Unavailable(String),
}

/// The two face-matching capabilities the orchestrators depend on.
///
/// Both calls block until the provider answers. Implementations report
/// images or parameters they refuse as [`ProviderError::InvalidInput`].
pub trait FaceProvider {
    /// Returns the faces that were added, at most `max_faces` of them.
    fn index_faces(&self, request: &IndexFaceRequest) -> Result<Vec<IndexedFace>, ProviderError>;

    /// Returns candidates at or above the threshold, best first.
    fn search_faces_by_image(
        &self,
        request: &SearchFacesRequest,
    ) -> Result<Vec<FaceMatch>, ProviderError>;
}
