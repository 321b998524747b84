use std::collections::HashMap;
use std::env;
use std::fmt;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

pub const PRIMARY_CONFIG_PATH: &str = "/etc/facegate/config.toml";
pub const SECONDARY_CONFIG_PATH: &str = "/usr/local/etc/facegate/config.toml";

pub const BUCKET_NAME: &str = "BUCKET_NAME";
pub const DDB_TABLE_NAME: &str = "DDB_TABLE_NAME";
pub const COLLECTION_ID: &str = "COLLECTION_ID";
pub const PROJECT_NAME: &str = "PROJECT_NAME";
pub const ENVIRONMENT: &str = "ENVIRONMENT";
pub const FACE_THRESHOLD: &str = "FACE_THRESHOLD";
pub const UPLOAD_URL_TTL_SECONDS: &str = "UPLOAD_URL_TTL_SECONDS";

pub const BIND_ADDR: &str = "FACEGATE_BIND_ADDR";
pub const PUBLIC_BASE_URL: &str = "FACEGATE_PUBLIC_BASE_URL";
pub const STORAGE_ROOT: &str = "FACEGATE_STORAGE_ROOT";
pub const COLLECTION_ROOT: &str = "FACEGATE_COLLECTION_ROOT";
pub const AUDIT_ROOT: &str = "FACEGATE_AUDIT_ROOT";
pub const ALLOWED_ORIGIN: &str = "FACEGATE_ALLOWED_ORIGIN";
pub const UPLOAD_SIGNING_KEY: &str = "FACEGATE_UPLOAD_SIGNING_KEY";

pub const DEFAULT_BIND_ADDR: &str = "0.0.0.0:8080";
pub const DEFAULT_PUBLIC_BASE_URL: &str = "http://localhost:8080";
pub const DEFAULT_STORAGE_ROOT: &str = "/var/lib/facegate/objects";
pub const DEFAULT_COLLECTION_ROOT: &str = "/var/lib/facegate/collections";
pub const DEFAULT_AUDIT_ROOT: &str = "/var/lib/facegate/audit";
pub const DEFAULT_ALLOWED_ORIGIN: &str = "*";

/// A scalar that may be written as a string, integer or float in TOML.
#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(untagged)]
pub enum RawSetting {
    Text(String),
    Integer(i64),
    Float(f64),
}

impl fmt::Display for RawSetting {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RawSetting::Text(value) => f.write_str(value),
            RawSetting::Integer(value) => write!(f, "{value}"),
            RawSetting::Float(value) => write!(f, "{value}"),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Default)]
pub struct ConfigFile {
    pub bucket_name: Option<String>,
    pub ddb_table_name: Option<String>,
    pub collection_id: Option<String>,
    pub project_name: Option<String>,
    pub environment: Option<String>,
    pub face_threshold: Option<RawSetting>,
    pub upload_url_ttl_seconds: Option<RawSetting>,
    pub bind_addr: Option<String>,
    pub public_base_url: Option<String>,
    pub storage_root: Option<PathBuf>,
    pub collection_root: Option<PathBuf>,
    pub audit_root: Option<PathBuf>,
    pub allowed_origin: Option<String>,
    pub upload_signing_key: Option<String>,
}

/// Named lookup of a single setting.
pub trait SettingSource {
    fn get(&self, name: &str) -> Option<String>;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct EnvSource;

impl SettingSource for EnvSource {
    fn get(&self, name: &str) -> Option<String> {
        env::var(name).ok()
    }
}

impl SettingSource for ConfigFile {
    fn get(&self, name: &str) -> Option<String> {
        let path_text = |path: &Option<PathBuf>| path.as_ref().map(|p| p.display().to_string());
        match name {
            BUCKET_NAME => self.bucket_name.clone(),
            DDB_TABLE_NAME => self.ddb_table_name.clone(),
            COLLECTION_ID => self.collection_id.clone(),
            PROJECT_NAME => self.project_name.clone(),
            ENVIRONMENT => self.environment.clone(),
            FACE_THRESHOLD => self.face_threshold.as_ref().map(ToString::to_string),
            UPLOAD_URL_TTL_SECONDS => self.upload_url_ttl_seconds.as_ref().map(ToString::to_string),
            BIND_ADDR => self.bind_addr.clone(),
            PUBLIC_BASE_URL => self.public_base_url.clone(),
            STORAGE_ROOT => path_text(&self.storage_root),
            COLLECTION_ROOT => path_text(&self.collection_root),
            AUDIT_ROOT => path_text(&self.audit_root),
            ALLOWED_ORIGIN => self.allowed_origin.clone(),
            UPLOAD_SIGNING_KEY => self.upload_signing_key.clone(),
            _ => None,
        }
    }
}

impl SettingSource for HashMap<String, String> {
    fn get(&self, name: &str) -> Option<String> {
        HashMap::get(self, name).cloned()
    }
}

/// Earlier sources win. Empty values fall through to later sources.
pub struct LayeredSource<'a> {
    layers: Vec<&'a dyn SettingSource>,
}

impl<'a> LayeredSource<'a> {
    pub fn new(layers: Vec<&'a dyn SettingSource>) -> Self {
        Self { layers }
    }
}

impl SettingSource for LayeredSource<'_> {
    fn get(&self, name: &str) -> Option<String> {
        self.layers
            .iter()
            .filter_map(|layer| layer.get(name))
            .find(|value| !value.trim().is_empty())
    }
}

pub fn require<S: SettingSource + ?Sized>(source: &S, name: &str) -> Result<String, ConfigError> {
    match source.get(name) {
        Some(value) if !value.trim().is_empty() => Ok(value.trim().to_string()),
        _ => Err(ConfigError::Missing {
            name: name.to_string(),
        }),
    }
}

/// Minimum similarity (0-100) a candidate needs to count as a match.
///
/// Parsed once from its textual setting; the same `f64` is used for the
/// provider call and echoed back to callers.
#[derive(Debug, Clone, Copy, PartialEq, PartialOrd, Serialize)]
#[serde(transparent)]
pub struct SimilarityThreshold(f64);

impl SimilarityThreshold {
    pub const MIN: f64 = 0.0;
    pub const MAX: f64 = 100.0;

    pub fn new(value: f64) -> Result<Self, String> {
        if !value.is_finite() {
            return Err(format!("{value} is not a finite number"));
        }
        if !(Self::MIN..=Self::MAX).contains(&value) {
            return Err(format!(
                "{value} is outside the range {}..={}",
                Self::MIN,
                Self::MAX
            ));
        }
        Ok(Self(value))
    }

    pub fn value(self) -> f64 {
        self.0
    }
}

impl FromStr for SimilarityThreshold {
    type Err = String;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        let value = raw
            .trim()
            .parse::<f64>()
            .map_err(|err| format!("'{raw}' is not a decimal number: {err}"))?;
        Self::new(value)
    }
}

impl fmt::Display for SimilarityThreshold {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DeploymentLabels {
    pub project: String,
    pub environment: String,
}

/// Settings every enrollment, verification and upload request depends on.
#[derive(Debug, Clone, PartialEq)]
pub struct ServiceConfig {
    pub bucket: String,
    pub audit_table: String,
    pub collection_id: String,
    pub labels: DeploymentLabels,
    pub threshold: SimilarityThreshold,
    pub upload_url_ttl: Duration,
}

impl ServiceConfig {
    pub fn resolve<S: SettingSource + ?Sized>(source: &S) -> Result<Self, ConfigError> {
        let threshold_raw = require(source, FACE_THRESHOLD)?;
        let threshold =
            threshold_raw
                .parse::<SimilarityThreshold>()
                .map_err(|message| ConfigError::Invalid {
                    name: FACE_THRESHOLD.to_string(),
                    message,
                })?;

        let ttl_raw = require(source, UPLOAD_URL_TTL_SECONDS)?;
        let ttl_secs = ttl_raw
            .parse::<u64>()
            .ok()
            .filter(|secs| *secs > 0)
            .ok_or_else(|| ConfigError::Invalid {
                name: UPLOAD_URL_TTL_SECONDS.to_string(),
                message: format!("'{ttl_raw}' is not a positive number of seconds"),
            })?;

        Ok(Self {
            bucket: require(source, BUCKET_NAME)?,
            audit_table: require(source, DDB_TABLE_NAME)?,
            collection_id: require(source, COLLECTION_ID)?,
            labels: DeploymentLabels {
                project: require(source, PROJECT_NAME)?,
                environment: require(source, ENVIRONMENT)?,
            },
            threshold,
            upload_url_ttl: Duration::from_secs(ttl_secs),
        })
    }
}

/// Local process settings. Every field has a default.
#[derive(Clone, PartialEq, Eq)]
pub struct RuntimeSettings {
    pub bind_addr: String,
    pub public_base_url: String,
    pub storage_root: PathBuf,
    pub collection_root: PathBuf,
    pub audit_root: PathBuf,
    pub allowed_origin: String,
    /// HMAC key for upload URLs. Unset means a fresh key per process.
    pub upload_signing_key: Option<String>,
}

impl fmt::Debug for RuntimeSettings {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RuntimeSettings")
            .field("bind_addr", &self.bind_addr)
            .field("public_base_url", &self.public_base_url)
            .field("storage_root", &self.storage_root)
            .field("collection_root", &self.collection_root)
            .field("audit_root", &self.audit_root)
            .field("allowed_origin", &self.allowed_origin)
            .field(
                "upload_signing_key",
                &self.upload_signing_key.as_ref().map(|_| "<redacted>"),
            )
            .finish()
    }
}

impl RuntimeSettings {
    pub fn resolve<S: SettingSource + ?Sized>(source: &S) -> Self {
        let text = |name: &str, default: &str| {
            source
                .get(name)
                .map(|value| value.trim().to_string())
                .filter(|value| !value.is_empty())
                .unwrap_or_else(|| default.to_string())
        };
        Self {
            bind_addr: text(BIND_ADDR, DEFAULT_BIND_ADDR),
            public_base_url: text(PUBLIC_BASE_URL, DEFAULT_PUBLIC_BASE_URL)
                .trim_end_matches('/')
                .to_string(),
            storage_root: PathBuf::from(text(STORAGE_ROOT, DEFAULT_STORAGE_ROOT)),
            collection_root: PathBuf::from(text(COLLECTION_ROOT, DEFAULT_COLLECTION_ROOT)),
            audit_root: PathBuf::from(text(AUDIT_ROOT, DEFAULT_AUDIT_ROOT)),
            allowed_origin: text(ALLOWED_ORIGIN, DEFAULT_ALLOWED_ORIGIN),
            upload_signing_key: source
                .get(UPLOAD_SIGNING_KEY)
                .map(|value| value.trim().to_string())
                .filter(|value| !value.is_empty()),
        }
    }
}

impl Default for RuntimeSettings {
    fn default() -> Self {
        Self::resolve(&HashMap::<String, String>::new())
    }
}

#[derive(Debug, Clone)]
pub struct LoadedConfig {
    pub contents: ConfigFile,
    pub source: PathBuf,
}

impl LoadedConfig {
    pub fn new(contents: ConfigFile, source: PathBuf) -> Self {
        Self { contents, source }
    }

    pub fn source(&self) -> &Path {
        &self.source
    }
}

#[derive(Debug, Clone)]
pub struct FacegateConfig {
    pub service: ServiceConfig,
    pub runtime: RuntimeSettings,
    pub source: Option<PathBuf>,
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("failed to parse {path}: {message}")]
    Parse { path: PathBuf, message: String },
    #[error("Missing setting {name} (env var {name} or config key {})", .name.to_ascii_lowercase())]
    Missing { name: String },
    #[error("invalid value for {name}: {message}")]
    Invalid { name: String, message: String },
}

/// Loads the service configuration once at startup.
///
/// Environment variables override values from the first config file found.
/// An explicit path must exist; the default search paths may all be absent.
pub fn load_facegate_config(explicit: Option<&Path>) -> Result<FacegateConfig, ConfigError> {
    let loaded = match explicit {
        Some(path) => Some(load_from_path(path)?),
        None => load_from_paths(&default_paths())?,
    };
    resolve_with_overrides(loaded, &EnvSource)
}

pub fn resolve_with_overrides<S: SettingSource>(
    loaded: Option<LoadedConfig>,
    overrides: &S,
) -> Result<FacegateConfig, ConfigError> {
    let (file, source) = match loaded {
        Some(entry) => (entry.contents, Some(entry.source)),
        None => (ConfigFile::default(), None),
    };
    let layers: [&dyn SettingSource; 2] = [overrides, &file];
    let layered = LayeredSource::new(layers.to_vec());
    Ok(FacegateConfig {
        service: ServiceConfig::resolve(&layered)?,
        runtime: RuntimeSettings::resolve(&layered),
        source,
    })
}

pub fn default_paths() -> [PathBuf; 2] {
    [
        PathBuf::from(PRIMARY_CONFIG_PATH),
        PathBuf::from(SECONDARY_CONFIG_PATH),
    ]
}

pub fn load_from_path(path: &Path) -> Result<LoadedConfig, ConfigError> {
    let contents = fs::read_to_string(path).map_err(|source| ConfigError::Read {
        path: path.to_path_buf(),
        source,
    })?;
    parse_contents(path, &contents)
}

pub fn load_from_paths(paths: &[PathBuf]) -> Result<Option<LoadedConfig>, ConfigError> {
    for path in paths {
        match fs::read_to_string(path) {
            Ok(contents) => return parse_contents(path, &contents).map(Some),
            Err(err) if err.kind() == io::ErrorKind::NotFound => continue,
            Err(err) => {
                return Err(ConfigError::Read {
                    path: path.clone(),
                    source: err,
                })
            }
        }
    }

    Ok(None)
}

fn parse_contents(path: &Path, contents: &str) -> Result<LoadedConfig, ConfigError> {
    let parsed = toml::from_str::<ConfigFile>(contents).map_err(|err| ConfigError::Parse {
        path: path.to_path_buf(),
        message: err.to_string(),
    })?;
    Ok(LoadedConfig::new(parsed, path.to_path_buf()))
}
