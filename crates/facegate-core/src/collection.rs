use std::cmp::Ordering;
use std::fs;
use std::io::{self, BufWriter, Write};
use std::path::{Component, Path, PathBuf};
use std::sync::Mutex;

use chrono::{SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use tempfile::NamedTempFile;
use tracing::debug;
use uuid::Uuid;

use crate::provider::{
    FaceMatch, FaceProvider, ImageLocation, IndexFaceRequest, IndexedFace, ProviderError,
    QualityFilter, SearchFacesRequest,
};
use crate::storage::read_object;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct BoundingBox {
    pub left: i64,
    pub top: i64,
    pub right: i64,
    pub bottom: i64,
}

impl BoundingBox {
    pub fn area(&self) -> i64 {
        (self.right - self.left).max(0) * (self.bottom - self.top).max(0)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct FaceEmbeddingRecord {
    pub bounding_box: BoundingBox,
    pub embedding: Vec<f64>,
}

/// Image object contents understood by [`LocalFaceCollection`].
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct FaceEmbeddingPayload {
    pub faces: Vec<FaceEmbeddingRecord>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CollectionFace {
    pub face_id: String,
    pub external_id: String,
    pub embedding: Vec<f64>,
    pub bounding_box: BoundingBox,
    pub source: String,
    pub created_at: String,
}

/// Face provider backed by the local filesystem.
///
/// Image objects are face-embedding payloads under `storage_root`; each
/// collection is a JSON array of [`CollectionFace`] under `collection_root`.
#[derive(Debug)]
pub struct LocalFaceCollection {
    storage_root: PathBuf,
    collection_root: PathBuf,
    write_lock: Mutex<()>,
}

impl LocalFaceCollection {
    pub fn new(storage_root: impl Into<PathBuf>, collection_root: impl Into<PathBuf>) -> Self {
        Self {
            storage_root: storage_root.into(),
            collection_root: collection_root.into(),
            write_lock: Mutex::new(()),
        }
    }

    pub fn collection_path(&self, collection_id: &str) -> Result<PathBuf, ProviderError> {
        let mut components = Path::new(collection_id).components();
        match (components.next(), components.next()) {
            (Some(Component::Normal(_)), None) => Ok(self
                .collection_root
                .join(format!("{collection_id}.json"))),
            _ => Err(ProviderError::InvalidInput(format!(
                "invalid collection id '{collection_id}'"
            ))),
        }
    }

    pub fn load_collection(&self, collection_id: &str) -> Result<Vec<CollectionFace>, ProviderError> {
        let path = self.collection_path(collection_id)?;
        read_collection(&path)
    }

    fn load_capture(
        &self,
        image: &ImageLocation,
        filter: QualityFilter,
    ) -> Result<Vec<FaceEmbeddingRecord>, ProviderError> {
        let bytes = read_object(&self.storage_root, image)
            .map_err(|err| ProviderError::InvalidInput(format!("unable to read image: {err}")))?;
        let payload: FaceEmbeddingPayload = serde_json::from_slice(&bytes).map_err(|err| {
            ProviderError::InvalidInput(format!(
                "image {}/{} is not a face embedding payload: {err}",
                image.bucket, image.key
            ))
        })?;

        let mut faces: Vec<FaceEmbeddingRecord> = payload
            .faces
            .into_iter()
            .filter(|face| filter == QualityFilter::None || passes_quality(face))
            .collect();
        faces.sort_by(|a, b| b.bounding_box.area().cmp(&a.bounding_box.area()));
        Ok(faces)
    }
}

impl FaceProvider for LocalFaceCollection {
    fn index_faces(&self, request: &IndexFaceRequest) -> Result<Vec<IndexedFace>, ProviderError> {
        if request.max_faces == 0 {
            return Err(ProviderError::InvalidInput("MaxFaces must be at least 1".into()));
        }
        let path = self.collection_path(&request.collection_id)?;
        let mut detected = self.load_capture(&request.image, request.quality_filter)?;
        detected.truncate(request.max_faces);
        if detected.is_empty() {
            debug!(
                target: "collection.index",
                "no qualifying face in {}/{}", request.image.bucket, request.image.key
            );
            return Ok(Vec::new());
        }

        let _guard = self
            .write_lock
            .lock()
            .map_err(|_| ProviderError::Unavailable("collection lock poisoned".into()))?;
        let mut faces = read_collection(&path)?;

        if let Some(expected) = faces.first().map(|face| face.embedding.len()) {
            if let Some(found) = detected
                .iter()
                .map(|face| face.embedding.len())
                .find(|len| *len != expected)
            {
                return Err(ProviderError::InvalidInput(format!(
                    "embedding length mismatch with collection (expected {expected}, found {found})"
                )));
            }
        }

        let source = format!("{}/{}", request.image.bucket, request.image.key);
        let mut indexed = Vec::with_capacity(detected.len());
        for face in detected {
            let face_id = Uuid::new_v4().to_string();
            faces.push(CollectionFace {
                face_id: face_id.clone(),
                external_id: request.external_id.clone(),
                embedding: face.embedding,
                bounding_box: face.bounding_box,
                source: source.clone(),
                created_at: Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true),
            });
            indexed.push(IndexedFace {
                face_id,
                external_id: request.external_id.clone(),
            });
        }

        write_collection(&path, &faces)?;
        debug!(
            target: "collection.index",
            "indexed {} face(s) into {} ({} total)",
            indexed.len(),
            request.collection_id,
            faces.len()
        );
        Ok(indexed)
    }

    fn search_faces_by_image(
        &self,
        request: &SearchFacesRequest,
    ) -> Result<Vec<FaceMatch>, ProviderError> {
        if request.max_faces == 0 {
            return Err(ProviderError::InvalidInput("MaxFaces must be at least 1".into()));
        }
        if !(0.0..=100.0).contains(&request.face_match_threshold) {
            return Err(ProviderError::InvalidInput(format!(
                "FaceMatchThreshold {} must be between 0 and 100",
                request.face_match_threshold
            )));
        }

        let capture = self
            .load_capture(&request.image, QualityFilter::Auto)?
            .into_iter()
            .next()
            .ok_or_else(|| {
                ProviderError::InvalidInput(
                    "There are no faces in the image. Should be at least 1.".into(),
                )
            })?;

        let faces = self.load_collection(&request.collection_id)?;
        if let Some(expected) = faces.first().map(|face| face.embedding.len()) {
            if expected != capture.embedding.len() {
                return Err(ProviderError::InvalidInput(format!(
                    "embedding length mismatch with collection (expected {expected}, found {})",
                    capture.embedding.len()
                )));
            }
        }

        let mut matches: Vec<FaceMatch> = faces
            .iter()
            .map(|face| FaceMatch {
                face_id: face.face_id.clone(),
                external_id: face.external_id.clone(),
                similarity: similarity_percent(&capture.embedding, &face.embedding),
            })
            .filter(|candidate| candidate.similarity >= request.face_match_threshold)
            .collect();
        matches.sort_by(|a, b| {
            b.similarity
                .partial_cmp(&a.similarity)
                .unwrap_or(Ordering::Equal)
        });
        matches.truncate(request.max_faces);
        Ok(matches)
    }
}

/// Drops faces whose embedding cannot be compared.
fn passes_quality(face: &FaceEmbeddingRecord) -> bool {
    if face.embedding.is_empty() || face.embedding.iter().any(|value| !value.is_finite()) {
        return false;
    }
    let magnitude = face
        .embedding
        .iter()
        .map(|value| value * value)
        .sum::<f64>()
        .sqrt();
    magnitude > f64::EPSILON
}

pub fn cosine_similarity(lhs: &[f64], rhs: &[f64]) -> f64 {
    let mut dot = 0.0;
    let mut norm_lhs = 0.0;
    let mut norm_rhs = 0.0;

    for (l, r) in lhs.iter().zip(rhs.iter()) {
        dot += l * r;
        norm_lhs += l * l;
        norm_rhs += r * r;
    }

    dot / (norm_lhs.sqrt() * norm_rhs.sqrt())
}

/// Cosine similarity scaled onto the provider's 0-100 range.
pub fn similarity_percent(lhs: &[f64], rhs: &[f64]) -> f64 {
    let score = cosine_similarity(lhs, rhs) * 100.0;
    if score.is_finite() {
        score.clamp(0.0, 100.0)
    } else {
        0.0
    }
}

fn read_collection(path: &Path) -> Result<Vec<CollectionFace>, ProviderError> {
    let data = match fs::read(path) {
        Ok(data) => data,
        Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(err) => {
            return Err(ProviderError::Unavailable(format!(
                "failed to read collection {}: {err}",
                path.display()
            )))
        }
    };
    serde_json::from_slice(&data).map_err(|err| {
        ProviderError::Unavailable(format!(
            "collection {} is corrupt: {err}",
            path.display()
        ))
    })
}

fn write_collection(path: &Path, faces: &[CollectionFace]) -> Result<(), ProviderError> {
    let unavailable = |err: io::Error| {
        ProviderError::Unavailable(format!(
            "failed to write collection {}: {err}",
            path.display()
        ))
    };

    let parent = path.parent().unwrap_or_else(|| Path::new("."));
    fs::create_dir_all(parent).map_err(unavailable)?;
    let mut tmp = NamedTempFile::new_in(parent).map_err(unavailable)?;
    {
        let serialized = serde_json::to_vec_pretty(faces)
            .map_err(|err| ProviderError::Unavailable(err.to_string()))?;
        let mut writer = BufWriter::new(tmp.as_file_mut());
        writer.write_all(&serialized).map_err(unavailable)?;
        writer.write_all(b"\n").map_err(unavailable)?;
        writer.flush().map_err(unavailable)?;
    }
    tmp.as_file().sync_all().map_err(unavailable)?;
    tmp.persist(path).map_err(|err| unavailable(err.error))?;
    Ok(())
}
