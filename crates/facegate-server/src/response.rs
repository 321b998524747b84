use axum::http::header::{
    ACCESS_CONTROL_ALLOW_HEADERS, ACCESS_CONTROL_ALLOW_METHODS, ACCESS_CONTROL_ALLOW_ORIGIN,
    CONTENT_TYPE,
};
use axum::http::{HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use facegate_core::AppError;
use serde::Serialize;
use serde_json::{json, Value};
use tracing::warn;

pub const ALLOW_HEADERS: &str = "Content-Type,Authorization";
pub const ALLOW_METHODS: &str = "OPTIONS,POST";
pub const UPLOAD_ALLOW_METHODS: &str = "OPTIONS,PUT";

pub const INVALID_PARAMETER: &str = "rekognition_invalid_parameter";
pub const INTERNAL_ERROR: &str = "internal_error";

/// Fixed cross-origin headers attached to every response.
#[derive(Debug, Clone)]
pub struct CorsPolicy {
    allow_origin: HeaderValue,
    allow_methods: HeaderValue,
}

impl CorsPolicy {
    pub fn new(allowed_origin: impl AsRef<str>) -> Self {
        let allowed_origin = allowed_origin.as_ref();
        let allow_origin = HeaderValue::from_str(allowed_origin).unwrap_or_else(|_| {
            warn!(
                target: "response.cors",
                "allowed origin {allowed_origin:?} is not a valid header value; using *"
            );
            HeaderValue::from_static("*")
        });
        Self {
            allow_origin,
            allow_methods: HeaderValue::from_static(ALLOW_METHODS),
        }
    }

    /// Same origin, but advertising the object upload route's methods.
    pub fn for_uploads(&self) -> Self {
        Self {
            allow_origin: self.allow_origin.clone(),
            allow_methods: HeaderValue::from_static(UPLOAD_ALLOW_METHODS),
        }
    }

    pub fn apply(&self, response: &mut Response) {
        let headers = response.headers_mut();
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        headers.insert(ACCESS_CONTROL_ALLOW_ORIGIN, self.allow_origin.clone());
        headers.insert(
            ACCESS_CONTROL_ALLOW_HEADERS,
            HeaderValue::from_static(ALLOW_HEADERS),
        );
        headers.insert(ACCESS_CONTROL_ALLOW_METHODS, self.allow_methods.clone());
    }
}

impl Default for CorsPolicy {
    fn default() -> Self {
        Self::new(facegate_config::DEFAULT_ALLOWED_ORIGIN)
    }
}

/// Wraps a status and JSON body into the transport envelope.
pub fn format_response<T: Serialize>(status: StatusCode, body: &T, cors: &CorsPolicy) -> Response {
    let mut response = (status, Json(body)).into_response();
    cors.apply(&mut response);
    response
}

/// Empty 204 answer to a CORS preflight.
pub fn preflight_response(cors: &CorsPolicy) -> Response {
    let mut response = StatusCode::NO_CONTENT.into_response();
    cors.apply(&mut response);
    response
}

/// Status and body an error is reported with.
pub fn error_body(err: &AppError) -> (StatusCode, Value) {
    match err {
        AppError::InvalidProviderInput(detail) => (
            StatusCode::BAD_REQUEST,
            json!({"message": INVALID_PARAMETER, "detail": detail}),
        ),
        err if err.is_client_error() => {
            (StatusCode::BAD_REQUEST, json!({"message": err.human_message()}))
        }
        err => (
            StatusCode::INTERNAL_SERVER_ERROR,
            json!({"message": INTERNAL_ERROR, "detail": err.to_string()}),
        ),
    }
}

pub fn error_response(err: &AppError, cors: &CorsPolicy) -> Response {
    let (status, body) = error_body(err);
    format_response(status, &body, cors)
}

#[cfg(test)]
mod tests {
    use super::*;
    use facegate_core::ProviderError;

    #[test]
    fn every_response_carries_fixed_headers() {
        let cors = CorsPolicy::new("https://gate.example.com");
        let response = format_response(StatusCode::OK, &json!({"ok": true}), &cors);
        let headers = response.headers();
        assert_eq!(headers[CONTENT_TYPE], "application/json");
        assert_eq!(
            headers[ACCESS_CONTROL_ALLOW_ORIGIN],
            "https://gate.example.com"
        );
        assert_eq!(headers[ACCESS_CONTROL_ALLOW_HEADERS], ALLOW_HEADERS);
        assert_eq!(headers[ACCESS_CONTROL_ALLOW_METHODS], ALLOW_METHODS);
    }

    #[test]
    fn upload_policy_keeps_origin_and_allows_put() {
        let cors = CorsPolicy::new("https://gate.example.com").for_uploads();
        let response = preflight_response(&cors);
        let headers = response.headers();
        assert_eq!(
            headers[ACCESS_CONTROL_ALLOW_ORIGIN],
            "https://gate.example.com"
        );
        assert_eq!(headers[ACCESS_CONTROL_ALLOW_METHODS], "OPTIONS,PUT");
        assert_eq!(headers[ACCESS_CONTROL_ALLOW_HEADERS], ALLOW_HEADERS);
    }

    #[test]
    fn invalid_origin_falls_back_to_wildcard() {
        let cors = CorsPolicy::new("bad\norigin");
        let response = preflight_response(&cors);
        assert_eq!(response.status(), StatusCode::NO_CONTENT);
        assert_eq!(response.headers()[ACCESS_CONTROL_ALLOW_ORIGIN], "*");
    }

    #[test]
    fn errors_map_to_statuses() {
        let (status, body) = error_body(&AppError::Validation {
            missing: vec!["objectKey".into()],
        });
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body, json!({"message": "Missing required fields: objectKey"}));

        let (status, body) = error_body(&AppError::NoFaceDetected);
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(
            body["message"],
            "No face detected. Use a clear front-facing image."
        );

        let (status, body) =
            error_body(&AppError::from(ProviderError::InvalidInput("bad format".into())));
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(
            body,
            json!({"message": "rekognition_invalid_parameter", "detail": "bad format"})
        );

        let (status, body) = error_body(&AppError::Persistence {
            table: "face-audit".into(),
            message: "disk full".into(),
        });
        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(body["message"], "internal_error");
        assert!(body["detail"].as_str().unwrap().contains("disk full"));
    }
}
