use facegate_config::ServiceConfig;
use serde::Serialize;
use tracing::info;

use crate::clock::Clock;
use crate::errors::{AppError, AppResult};
use crate::provider::ImageLocation;
use crate::storage::UploadUrlIssuer;
use crate::validation::UploadRequest;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PresignedUpload {
    pub upload_url: String,
    pub bucket: String,
    pub object_key: String,
    pub expires_in_seconds: u64,
}

/// Hands out a time-limited URL the client can upload an image to before
/// calling enroll or verify with the same object key.
pub fn run_presign_with<I, C>(
    request: &UploadRequest,
    config: &ServiceConfig,
    issuer: &I,
    clock: &C,
) -> AppResult<PresignedUpload>
where
    I: UploadUrlIssuer + ?Sized,
    C: Clock + ?Sized,
{
    if !request.content_type.to_ascii_lowercase().starts_with("image/") {
        return Err(AppError::InvalidContentType(request.content_type.clone()));
    }

    let location = ImageLocation::new(config.bucket.clone(), request.object_key.clone());
    let upload_url = issuer.issue(
        &location,
        &request.content_type,
        config.upload_url_ttl,
        clock.now(),
    )?;
    info!(
        target: "upload",
        bucket = %location.bucket,
        object_key = %location.key,
        "issued upload url"
    );

    Ok(PresignedUpload {
        upload_url,
        bucket: location.bucket,
        object_key: location.key,
        expires_in_seconds: config.upload_url_ttl.as_secs(),
    })
}
