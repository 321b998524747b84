use serde_json::{Map, Value};

use crate::errors::{AppError, AppResult};

pub type RequestBody = Map<String, Value>;

/// Parses a raw request body. An empty body is treated as `{}` so that the
/// missing-field check reports every required field.
pub fn parse_body(raw: &[u8]) -> AppResult<RequestBody> {
    if raw.iter().all(u8::is_ascii_whitespace) {
        return Ok(RequestBody::new());
    }

    match serde_json::from_slice::<Value>(raw) {
        Ok(Value::Object(map)) => Ok(map),
        Ok(_) => Err(AppError::InvalidField {
            field: "body".into(),
            expected: "a JSON object",
        }),
        Err(err) => Err(AppError::MalformedBody(err.to_string())),
    }
}

/// Returns the body unchanged when every required field holds a value.
///
/// Absent keys, `null` and blank strings count as missing.
pub fn require_fields<'a>(body: &'a RequestBody, required: &[&str]) -> AppResult<&'a RequestBody> {
    let missing: Vec<String> = required
        .iter()
        .filter(|name| is_missing(body.get(**name)))
        .map(|name| name.to_string())
        .collect();

    if missing.is_empty() {
        Ok(body)
    } else {
        Err(AppError::Validation { missing })
    }
}

fn is_missing(value: Option<&Value>) -> bool {
    match value {
        None | Some(Value::Null) => true,
        Some(Value::String(text)) => text.trim().is_empty(),
        Some(_) => false,
    }
}

fn string_field(body: &RequestBody, name: &str) -> AppResult<String> {
    match body.get(name) {
        Some(Value::String(text)) => Ok(text.trim().to_string()),
        _ => Err(AppError::InvalidField {
            field: name.to_string(),
            expected: "a string",
        }),
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EnrollmentRequest {
    pub employee_id: String,
    pub object_key: String,
}

impl EnrollmentRequest {
    pub const REQUIRED: [&'static str; 2] = ["employeeId", "objectKey"];

    pub fn from_body(body: &RequestBody) -> AppResult<Self> {
        let body = require_fields(body, &Self::REQUIRED)?;
        Ok(Self {
            employee_id: string_field(body, "employeeId")?,
            object_key: string_field(body, "objectKey")?,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VerificationRequest {
    pub object_key: String,
}

impl VerificationRequest {
    pub const REQUIRED: [&'static str; 1] = ["objectKey"];

    pub fn from_body(body: &RequestBody) -> AppResult<Self> {
        let body = require_fields(body, &Self::REQUIRED)?;
        Ok(Self {
            object_key: string_field(body, "objectKey")?,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadRequest {
    pub object_key: String,
    pub content_type: String,
}

impl UploadRequest {
    pub const REQUIRED: [&'static str; 2] = ["objectKey", "contentType"];

    pub fn from_body(body: &RequestBody) -> AppResult<Self> {
        let body = require_fields(body, &Self::REQUIRED)?;
        Ok(Self {
            object_key: string_field(body, "objectKey")?,
            content_type: string_field(body, "contentType")?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn body(value: Value) -> RequestBody {
        match value {
            Value::Object(map) => map,
            other => panic!("expected object, got {other}"),
        }
    }

    #[test]
    fn require_fields_returns_body_unchanged() {
        let input = body(json!({"employeeId": "E100", "objectKey": "enroll/E100.json", "extra": 1}));
        let returned = require_fields(&input, &["employeeId", "objectKey"]).unwrap();
        assert_eq!(returned, &input);
    }

    #[test]
    fn missing_null_and_blank_fields_are_reported() {
        let input = body(json!({"employeeId": "  ", "objectKey": null}));
        let err = require_fields(&input, &["employeeId", "objectKey", "contentType"]).unwrap_err();
        match err {
            AppError::Validation { missing } => {
                assert_eq!(missing, vec!["employeeId", "objectKey", "contentType"])
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn enrollment_request_trims_values() {
        let input = body(json!({"employeeId": " E100 ", "objectKey": "\tenroll/E100.json\n"}));
        let request = EnrollmentRequest::from_body(&input).unwrap();
        assert_eq!(request.employee_id, "E100");
        assert_eq!(request.object_key, "enroll/E100.json");
    }

    #[test]
    fn non_string_field_is_rejected() {
        let input = body(json!({"objectKey": 42}));
        let err = VerificationRequest::from_body(&input).unwrap_err();
        assert!(matches!(err, AppError::InvalidField { ref field, .. } if field == "objectKey"));
    }

    #[test]
    fn empty_body_reports_all_required_fields() {
        let parsed = parse_body(b"").unwrap();
        let err = UploadRequest::from_body(&parsed).unwrap_err();
        assert_eq!(
            err.to_string(),
            "Missing required fields: objectKey, contentType"
        );
    }

    #[test]
    fn non_object_body_is_rejected() {
        let err = parse_body(b"[1, 2]").unwrap_err();
        assert!(matches!(err, AppError::InvalidField { .. }));
        let err = parse_body(b"{not json").unwrap_err();
        assert!(matches!(err, AppError::MalformedBody(_)));
    }
}
