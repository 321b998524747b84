use std::fmt;
use std::fs;
use std::io::{BufWriter, Write};
use std::path::{Component, Path, PathBuf};
use std::time::Duration;

use chrono::{DateTime, Utc};
use facegate_config::{ConfigError, PUBLIC_BASE_URL, UPLOAD_SIGNING_KEY};
use hmac::{Hmac, Mac};
use sha2::Sha256;
use tempfile::NamedTempFile;
use url::Url;
use uuid::Uuid;

use crate::errors::{AppError, AppResult};
use crate::provider::ImageLocation;

/// Maps a bucket/key pair onto `<root>/<bucket>/<key>`.
///
/// Keys may contain `/` separators but never `..`, `.`, or absolute parts.
pub fn object_path(root: &Path, location: &ImageLocation) -> AppResult<PathBuf> {
    let bucket = single_segment(&location.bucket).ok_or_else(|| AppError::InvalidObjectKey {
        key: location.bucket.clone(),
        message: "bucket must be a single path segment".into(),
    })?;

    if location.key.is_empty() {
        return Err(AppError::InvalidObjectKey {
            key: location.key.clone(),
            message: "key is empty".into(),
        });
    }

    let mut path = root.join(bucket);
    for component in Path::new(&location.key).components() {
        match component {
            Component::Normal(part) => path.push(part),
            _ => {
                return Err(AppError::InvalidObjectKey {
                    key: location.key.clone(),
                    message: "relative or absolute path components are not allowed".into(),
                })
            }
        }
    }
    Ok(path)
}

fn single_segment(value: &str) -> Option<&str> {
    let mut components = Path::new(value).components();
    match (components.next(), components.next()) {
        (Some(Component::Normal(_)), None) => Some(value),
        _ => None,
    }
}

pub fn read_object(root: &Path, location: &ImageLocation) -> AppResult<Vec<u8>> {
    let path = object_path(root, location)?;
    fs::read(&path).map_err(|source| AppError::ObjectRead { path, source })
}

/// Writes an object atomically (temp file in the same directory, then rename).
pub fn write_object(root: &Path, location: &ImageLocation, bytes: &[u8]) -> AppResult<PathBuf> {
    let path = object_path(root, location)?;
    let parent = path.parent().unwrap_or(root).to_path_buf();
    fs::create_dir_all(&parent).map_err(|source| AppError::ObjectWrite {
        path: parent.clone(),
        source,
    })?;

    let mut tmp = NamedTempFile::new_in(&parent).map_err(|source| AppError::ObjectWrite {
        path: path.clone(),
        source,
    })?;
    {
        let mut writer = BufWriter::new(tmp.as_file_mut());
        writer
            .write_all(bytes)
            .and_then(|_| writer.flush())
            .map_err(|source| AppError::ObjectWrite {
                path: path.clone(),
                source,
            })?;
    }
    tmp.as_file()
        .sync_all()
        .map_err(|source| AppError::ObjectWrite {
            path: path.clone(),
            source,
        })?;
    tmp.persist(&path).map_err(|err| AppError::ObjectWrite {
        path: path.clone(),
        source: err.error,
    })?;
    Ok(path)
}

/// Issues URLs a client can upload an image to without further credentials.
pub trait UploadUrlIssuer {
    fn issue(
        &self,
        location: &ImageLocation,
        content_type: &str,
        ttl: Duration,
        now: DateTime<Utc>,
    ) -> AppResult<String>;
}

type HmacSha256 = Hmac<Sha256>;

/// HMAC-SHA256 over the bucket, key, expiry and content type an upload URL grants.
#[derive(Clone)]
pub struct UploadSigner {
    mac: HmacSha256,
}

impl UploadSigner {
    pub fn new(key: &[u8]) -> AppResult<Self> {
        let mac = HmacSha256::new_from_slice(key).map_err(|err| {
            AppError::Configuration(ConfigError::Invalid {
                name: UPLOAD_SIGNING_KEY.to_string(),
                message: err.to_string(),
            })
        })?;
        Ok(Self { mac })
    }

    /// Per-process key; URLs signed with it stop working after a restart.
    pub fn ephemeral() -> AppResult<Self> {
        let mut key = Uuid::new_v4().as_bytes().to_vec();
        key.extend_from_slice(Uuid::new_v4().as_bytes());
        Self::new(&key)
    }

    pub fn sign(&self, location: &ImageLocation, content_type: &str, expires: i64) -> String {
        let mac = self.keyed(location, content_type, expires);
        hex::encode(mac.finalize().into_bytes())
    }

    /// Constant-time check of a hex signature taken from an upload URL.
    pub fn verify(
        &self,
        location: &ImageLocation,
        content_type: &str,
        expires: i64,
        signature: &str,
    ) -> bool {
        let Ok(raw) = hex::decode(signature) else {
            return false;
        };
        self.keyed(location, content_type, expires)
            .verify_slice(&raw)
            .is_ok()
    }

    fn keyed(&self, location: &ImageLocation, content_type: &str, expires: i64) -> HmacSha256 {
        let expires = expires.to_string();
        let mut mac = self.mac.clone();
        for part in [
            location.bucket.as_str(),
            location.key.as_str(),
            expires.as_str(),
            content_type,
        ] {
            mac.update(part.as_bytes());
            mac.update(b"\n");
        }
        mac
    }
}

impl fmt::Debug for UploadSigner {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("UploadSigner").finish_non_exhaustive()
    }
}

/// Issues signed URLs served by this process's `PUT /objects/...` route.
#[derive(Debug, Clone)]
pub struct LocalUploadIssuer {
    base_url: Url,
    signer: UploadSigner,
}

impl LocalUploadIssuer {
    pub fn new(base_url: &str, signer: UploadSigner) -> AppResult<Self> {
        let base_url = Url::parse(base_url).map_err(|err| invalid_base_url(err.to_string()))?;
        if base_url.cannot_be_a_base() {
            return Err(invalid_base_url(format!("{base_url} cannot carry a path")));
        }
        Ok(Self { base_url, signer })
    }
}

fn invalid_base_url(message: String) -> AppError {
    AppError::Configuration(ConfigError::Invalid {
        name: PUBLIC_BASE_URL.to_string(),
        message,
    })
}

impl UploadUrlIssuer for LocalUploadIssuer {
    fn issue(
        &self,
        location: &ImageLocation,
        content_type: &str,
        ttl: Duration,
        now: DateTime<Utc>,
    ) -> AppResult<String> {
        // Rejects traversal before a URL is ever handed out.
        object_path(Path::new("/"), location)?;

        let expires = now.timestamp().saturating_add(ttl.as_secs() as i64);
        let mut url = self.base_url.clone();
        url.path_segments_mut()
            .map_err(|_| invalid_base_url(format!("{} cannot carry a path", self.base_url)))?
            .pop_if_empty()
            .extend(["objects", location.bucket.as_str()])
            .extend(location.key.split('/'));
        url.query_pairs_mut()
            .append_pair("expires", &expires.to_string())
            .append_pair("contentType", content_type)
            .append_pair("signature", &self.signer.sign(location, content_type, expires));
        Ok(url.into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use tempfile::TempDir;

    #[test]
    fn object_path_nests_key_under_bucket() {
        let root = Path::new("/srv/objects");
        let path = object_path(root, &ImageLocation::new("faces", "enroll/E100/reference.json"))
            .unwrap();
        assert_eq!(path, PathBuf::from("/srv/objects/faces/enroll/E100/reference.json"));
    }

    #[test]
    fn traversal_keys_are_rejected() {
        let root = Path::new("/srv/objects");
        for key in ["../etc/passwd", "/etc/passwd", "a/../../b", ""] {
            let err = object_path(root, &ImageLocation::new("faces", key)).unwrap_err();
            assert!(matches!(err, AppError::InvalidObjectKey { .. }), "key {key:?}");
        }
        let err = object_path(root, &ImageLocation::new("a/b", "k")).unwrap_err();
        assert!(matches!(err, AppError::InvalidObjectKey { .. }));
    }

    #[test]
    fn write_then_read_object() {
        let tmp = TempDir::new().unwrap();
        let location = ImageLocation::new("faces", "gate/capture-1.json");
        let written = write_object(tmp.path(), &location, b"{\"faces\":[]}").unwrap();
        assert!(written.ends_with("faces/gate/capture-1.json"));
        assert_eq!(read_object(tmp.path(), &location).unwrap(), b"{\"faces\":[]}");
    }

    fn signer() -> UploadSigner {
        UploadSigner::new(b"test-signing-key").unwrap()
    }

    #[test]
    fn local_issuer_encodes_expiry_content_type_and_signature() {
        let issuer = LocalUploadIssuer::new("http://localhost:8080/", signer()).unwrap();
        let now = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        let location = ImageLocation::new("faces", "enroll/E 100/reference.jpg");
        let url = issuer
            .issue(&location, "image/jpeg", Duration::from_secs(300), now)
            .unwrap();
        let expires = now.timestamp() + 300;
        assert_eq!(
            url,
            format!(
                "http://localhost:8080/objects/faces/enroll/E%20100/reference.jpg?expires={expires}&contentType=image%2Fjpeg&signature={}",
                signer().sign(&location, "image/jpeg", expires)
            )
        );
    }

    #[test]
    fn base_url_without_trailing_slash_gets_one_separator() {
        let issuer = LocalUploadIssuer::new("http://gate.test", signer()).unwrap();
        let now = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        let url = issuer
            .issue(
                &ImageLocation::new("faces", "a.png"),
                "image/png",
                Duration::from_secs(60),
                now,
            )
            .unwrap();
        assert!(url.starts_with("http://gate.test/objects/faces/a.png?expires="), "{url}");
    }

    #[test]
    fn unusable_base_url_fails_at_construction() {
        for base in ["not a url", "mailto:gate@example.com"] {
            let err = LocalUploadIssuer::new(base, signer()).unwrap_err();
            assert!(
                matches!(err, AppError::Configuration(ConfigError::Invalid { ref name, .. }) if name == PUBLIC_BASE_URL),
                "base {base:?}"
            );
        }
    }

    #[test]
    fn signature_binds_every_granted_field() {
        let signer = signer();
        let location = ImageLocation::new("faces", "enroll/E100.jpg");
        let signature = signer.sign(&location, "image/jpeg", 1_700_000_000);
        assert_eq!(signature.len(), 64);
        assert!(signer.verify(&location, "image/jpeg", 1_700_000_000, &signature));

        let other_key = ImageLocation::new("faces", "enroll/E200.jpg");
        assert!(!signer.verify(&other_key, "image/jpeg", 1_700_000_000, &signature));
        assert!(!signer.verify(&location, "image/png", 1_700_000_000, &signature));
        assert!(!signer.verify(&location, "image/jpeg", 1_800_000_000, &signature));
        assert!(!signer.verify(&location, "image/jpeg", 1_700_000_000, "zz"));

        let stranger = UploadSigner::new(b"another-key").unwrap();
        assert!(!stranger.verify(&location, "image/jpeg", 1_700_000_000, &signature));
    }

    #[test]
    fn ephemeral_signers_do_not_share_keys() {
        let location = ImageLocation::new("faces", "a.png");
        let first = UploadSigner::ephemeral().unwrap();
        let second = UploadSigner::ephemeral().unwrap();
        let signature = first.sign(&location, "image/png", 1);
        assert!(first.verify(&location, "image/png", 1, &signature));
        assert!(!second.verify(&location, "image/png", 1, &signature));
    }
}
