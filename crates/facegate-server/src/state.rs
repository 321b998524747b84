use std::path::PathBuf;
use std::sync::Arc;

use facegate_config::{FacegateConfig, ServiceConfig};
use facegate_core::clock::{Clock, SystemClock};
use facegate_core::{
    AppResult, AuditStore, FaceProvider, JsonlAuditStore, LocalFaceCollection, LocalUploadIssuer,
    UploadSigner, UploadUrlIssuer,
};
use tracing::warn;

use crate::response::CorsPolicy;

/// Everything a request handler needs, shared read-only across requests.
pub struct AppState {
    pub config: ServiceConfig,
    pub provider: Arc<dyn FaceProvider + Send + Sync>,
    pub audit: Arc<dyn AuditStore + Send + Sync>,
    pub uploads: Arc<dyn UploadUrlIssuer + Send + Sync>,
    /// Checks the URLs `uploads` hands out; must share its key.
    pub upload_signer: UploadSigner,
    pub clock: Arc<dyn Clock + Send + Sync>,
    pub storage_root: PathBuf,
    pub cors: CorsPolicy,
}

impl AppState {
    /// Wires the filesystem-backed collaborators described by `config`.
    pub fn from_config(config: &FacegateConfig) -> AppResult<Self> {
        let runtime = &config.runtime;
        let upload_signer = match &runtime.upload_signing_key {
            Some(key) => UploadSigner::new(key.as_bytes())?,
            None => {
                warn!(
                    target: "serve.config",
                    "no upload signing key configured; upload URLs expire on restart"
                );
                UploadSigner::ephemeral()?
            }
        };
        let uploads = LocalUploadIssuer::new(&runtime.public_base_url, upload_signer.clone())?;
        Ok(Self {
            config: config.service.clone(),
            provider: Arc::new(LocalFaceCollection::new(
                &runtime.storage_root,
                &runtime.collection_root,
            )),
            audit: Arc::new(JsonlAuditStore::new(&runtime.audit_root)),
            uploads: Arc::new(uploads),
            upload_signer,
            clock: Arc::new(SystemClock),
            storage_root: runtime.storage_root.clone(),
            cors: CorsPolicy::new(runtime.allowed_origin.clone()),
        })
    }
}
