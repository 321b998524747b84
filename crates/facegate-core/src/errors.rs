use std::io;
use std::path::PathBuf;
use std::process::ExitCode;

use facegate_config::ConfigError;
use thiserror::Error;

use crate::provider::ProviderError;

#[derive(Debug, Error)]
pub enum AppError {
    #[error("Missing required fields: {}", missing.join(", "))]
    Validation { missing: Vec<String> },

    #[error("{field} must be {expected}")]
    InvalidField {
        field: String,
        expected: &'static str,
    },

    #[error("request body is not valid JSON: {0}")]
    MalformedBody(String),

    #[error("No face detected. Use a clear front-facing image.")]
    NoFaceDetected,

    #[error("face provider rejected the request: {0}")]
    InvalidProviderInput(String),

    #[error("face provider call failed: {0}")]
    Provider(String),

    #[error("failed to write audit event to {table}: {message}")]
    Persistence { table: String, message: String },

    #[error("failed to read audit events from {path}: {source}")]
    AuditRead {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("audit table {path} line {line} is invalid: {message}")]
    AuditCorrupt {
        path: PathBuf,
        line: usize,
        message: String,
    },

    #[error(transparent)]
    Configuration(#[from] ConfigError),

    #[error("contentType must be an image/*")]
    InvalidContentType(String),

    #[error("object key '{key}' is not allowed: {message}")]
    InvalidObjectKey { key: String, message: String },

    #[error("failed to read object {path}: {source}")]
    ObjectRead {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("failed to store object {path}: {source}")]
    ObjectWrite {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl AppError {
    /// True for failures caused by the caller's input rather than the service.
    pub fn is_client_error(&self) -> bool {
        matches!(
            self,
            AppError::Validation { .. }
                | AppError::InvalidField { .. }
                | AppError::MalformedBody(_)
                | AppError::NoFaceDetected
                | AppError::InvalidProviderInput(_)
                | AppError::InvalidContentType(_)
                | AppError::InvalidObjectKey { .. }
        )
    }

    pub fn human_message(&self) -> String {
        self.to_string()
    }

    pub fn exit_code(&self) -> ExitCode {
        match self {
            err if err.is_client_error() => ExitCode::from(2),
            AppError::Configuration(_) => ExitCode::from(2),
            AppError::AuditRead { .. } | AppError::AuditCorrupt { .. } => ExitCode::from(3),
            _ => ExitCode::from(1),
        }
    }
}

pub type AppResult<T> = Result<T, AppError>;

impl From<ProviderError> for AppError {
    fn from(err: ProviderError) -> Self {
        match err {
            ProviderError::InvalidInput(message) => AppError::InvalidProviderInput(message),
            other => AppError::Provider(other.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn validation_message_lists_fields_in_order() {
        let err = AppError::Validation {
            missing: vec!["employeeId".into(), "objectKey".into()],
        };
        assert_eq!(
            err.to_string(),
            "Missing required fields: employeeId, objectKey"
        );
        assert!(err.is_client_error());
    }

    #[test]
    fn provider_invalid_input_maps_to_client_error() {
        let err = AppError::from(ProviderError::InvalidInput("bad image".into()));
        assert!(matches!(err, AppError::InvalidProviderInput(ref m) if m == "bad image"));
        assert!(err.is_client_error());
    }

    #[test]
    fn provider_outage_is_server_error() {
        let err = AppError::from(ProviderError::Unavailable("timeout".into()));
        assert!(matches!(err, AppError::Provider(_)));
        assert!(!err.is_client_error());
    }

    #[test]
    fn configuration_errors_are_server_errors() {
        let err = AppError::from(ConfigError::Missing {
            name: "BUCKET_NAME".into(),
        });
        assert!(!err.is_client_error());
        assert_eq!(
            err.to_string(),
            "Missing setting BUCKET_NAME (env var BUCKET_NAME or config key bucket_name)"
        );
    }
}
