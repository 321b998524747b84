use facegate_config::ServiceConfig;
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::audit::{AuditEvent, AuditStore};
use crate::clock::Clock;
use crate::errors::{AppError, AppResult};
use crate::provider::{FaceProvider, ImageLocation, IndexFaceRequest, QualityFilter};
use crate::validation::EnrollmentRequest;

/// Response body of a successful enrollment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct EnrollmentReceipt {
    pub message: &'static str,
    #[serde(rename = "employeeId")]
    pub employee_id: String,
    #[serde(rename = "faceId")]
    pub face_id: String,
}

#[derive(Debug)]
pub struct EnrollmentOutcome {
    pub receipt: EnrollmentReceipt,
    pub audit_event: AuditEvent,
    pub logs: Vec<String>,
}

pub fn run_enrollment_with<P, A, C>(
    request: &EnrollmentRequest,
    config: &ServiceConfig,
    provider: &P,
    audit: &A,
    clock: &C,
) -> AppResult<EnrollmentOutcome>
where
    P: FaceProvider + ?Sized,
    A: AuditStore + ?Sized,
    C: Clock + ?Sized,
{
    let mut logs = Vec::new();
    let image = ImageLocation::new(config.bucket.clone(), request.object_key.clone());

    logs.push(format!(
        "Indexing {}/{} into collection {} for employee {}",
        image.bucket, image.key, config.collection_id, request.employee_id
    ));
    let indexed = provider.index_faces(&IndexFaceRequest {
        collection_id: config.collection_id.clone(),
        image: image.clone(),
        external_id: request.employee_id.clone(),
        max_faces: 1,
        quality_filter: QualityFilter::Auto,
    })?;

    let face = match indexed.into_iter().next() {
        Some(face) => face,
        None => {
            info!(
                target: "enrollment",
                employee_id = %request.employee_id,
                object_key = %image.key,
                "no face detected"
            );
            return Err(AppError::NoFaceDetected);
        }
    };
    logs.push(format!("Indexed face {}", face.face_id));

    let event = AuditEvent::enrollment(
        &request.employee_id,
        &face.face_id,
        &image,
        &config.labels,
        clock.now(),
    );
    if let Err(err) = audit.append(&config.audit_table, &event) {
        warn!(
            target: "enrollment",
            employee_id = %request.employee_id,
            face_id = %face.face_id,
            "face indexed but audit write failed: {err}"
        );
        return Err(err);
    }
    logs.push(format!(
        "Recorded {} {} in {}",
        event.pk, event.sk, config.audit_table
    ));

    info!(
        target: "enrollment",
        employee_id = %request.employee_id,
        face_id = %face.face_id,
        "enrolled"
    );
    debug!(target: "enrollment", "{}", logs.join("; "));

    Ok(EnrollmentOutcome {
        receipt: EnrollmentReceipt {
            message: "enrolled",
            employee_id: request.employee_id.clone(),
            face_id: face.face_id,
        },
        audit_event: event,
        logs,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::RefCell;
    use std::time::Duration;

    use chrono::{TimeZone, Utc};
    use facegate_config::{DeploymentLabels, SimilarityThreshold};

    use crate::audit::AuditDetail;
    use crate::clock::FixedClock;
    use crate::provider::{FaceMatch, IndexedFace, ProviderError, SearchFacesRequest};
    use crate::validation::parse_body;

    fn config() -> ServiceConfig {
        ServiceConfig {
            bucket: "faces".into(),
            audit_table: "face-audit".into(),
            collection_id: "employees".into(),
            labels: DeploymentLabels {
                project: "facegate".into(),
                environment: "test".into(),
            },
            threshold: SimilarityThreshold::new(90.0).unwrap(),
            upload_url_ttl: Duration::from_secs(300),
        }
    }

    fn clock() -> FixedClock {
        FixedClock(Utc.with_ymd_and_hms(2024, 5, 1, 9, 0, 0).unwrap())
    }

    fn request() -> EnrollmentRequest {
        EnrollmentRequest {
            employee_id: "E100".into(),
            object_key: "enroll/E100.json".into(),
        }
    }

    enum Indexing {
        Face(&'static str),
        NoFace,
        Rejects,
    }

    struct StubProvider {
        indexing: Indexing,
        calls: RefCell<Vec<IndexFaceRequest>>,
    }

    impl StubProvider {
        fn new(indexing: Indexing) -> Self {
            Self {
                indexing,
                calls: RefCell::new(Vec::new()),
            }
        }
    }

    impl FaceProvider for StubProvider {
        fn index_faces(
            &self,
            request: &IndexFaceRequest,
        ) -> Result<Vec<IndexedFace>, ProviderError> {
            self.calls.borrow_mut().push(request.clone());
            match self.indexing {
                Indexing::Face(id) => Ok(vec![IndexedFace {
                    face_id: id.into(),
                    external_id: request.external_id.clone(),
                }]),
                Indexing::NoFace => Ok(Vec::new()),
                Indexing::Rejects => Err(ProviderError::InvalidInput(
                    "Request has invalid image format".into(),
                )),
            }
        }

        fn search_faces_by_image(
            &self,
            _request: &SearchFacesRequest,
        ) -> Result<Vec<FaceMatch>, ProviderError> {
            panic!("enrollment never searches")
        }
    }

    #[derive(Default)]
    struct RecordingAudit {
        fail: bool,
        events: RefCell<Vec<(String, AuditEvent)>>,
    }

    impl AuditStore for RecordingAudit {
        fn append(&self, table: &str, event: &AuditEvent) -> AppResult<()> {
            if self.fail {
                return Err(AppError::Persistence {
                    table: table.into(),
                    message: "throttled".into(),
                });
            }
            self.events
                .borrow_mut()
                .push((table.to_string(), event.clone()));
            Ok(())
        }
    }

    #[test]
    fn enrolls_and_records_matching_face_id() {
        let provider = StubProvider::new(Indexing::Face("face-123"));
        let audit = RecordingAudit::default();
        let outcome =
            run_enrollment_with(&request(), &config(), &provider, &audit, &clock()).unwrap();

        assert_eq!(outcome.receipt.face_id, "face-123");
        assert_eq!(outcome.receipt.employee_id, "E100");

        let calls = provider.calls.borrow();
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].max_faces, 1);
        assert_eq!(calls[0].quality_filter, QualityFilter::Auto);
        assert_eq!(calls[0].collection_id, "employees");
        assert_eq!(calls[0].image, ImageLocation::new("faces", "enroll/E100.json"));

        let events = audit.events.borrow();
        assert_eq!(events.len(), 1);
        let (table, event) = &events[0];
        assert_eq!(table, "face-audit");
        assert_eq!(event.pk, "EMP#E100");
        assert_eq!(event.sk, "ENROLL#2024-05-01T09:00:00Z");
        assert_eq!(
            event.detail,
            AuditDetail::Enroll {
                employee_id: "E100".into(),
                face_id: "face-123".into(),
            }
        );
        assert_eq!(event.environment, "test");
    }

    #[test]
    fn no_face_writes_no_audit_event() {
        let provider = StubProvider::new(Indexing::NoFace);
        let audit = RecordingAudit::default();
        let err =
            run_enrollment_with(&request(), &config(), &provider, &audit, &clock()).unwrap_err();
        assert!(matches!(err, AppError::NoFaceDetected));
        assert_eq!(
            err.to_string(),
            "No face detected. Use a clear front-facing image."
        );
        assert!(audit.events.borrow().is_empty());
    }

    #[test]
    fn rejected_image_maps_to_provider_input_error() {
        let provider = StubProvider::new(Indexing::Rejects);
        let audit = RecordingAudit::default();
        let err =
            run_enrollment_with(&request(), &config(), &provider, &audit, &clock()).unwrap_err();
        assert!(matches!(err, AppError::InvalidProviderInput(_)));
        assert!(audit.events.borrow().is_empty());
    }

    #[test]
    fn audit_failure_surfaces_after_indexing() {
        let provider = StubProvider::new(Indexing::Face("face-9"));
        let audit = RecordingAudit {
            fail: true,
            ..RecordingAudit::default()
        };
        let err =
            run_enrollment_with(&request(), &config(), &provider, &audit, &clock()).unwrap_err();
        assert!(matches!(err, AppError::Persistence { .. }));
        assert_eq!(provider.calls.borrow().len(), 1);
    }

    #[test]
    fn invalid_body_never_reaches_provider() {
        let provider = StubProvider::new(Indexing::Face("unused"));
        let body = parse_body(br#"{"employeeId": ""}"#).unwrap();
        let err = EnrollmentRequest::from_body(&body)
            .and_then(|request| {
                run_enrollment_with(&request, &config(), &provider, &RecordingAudit::default(), &clock())
            })
            .unwrap_err();
        assert_eq!(
            err.to_string(),
            "Missing required fields: employeeId, objectKey"
        );
        assert!(provider.calls.borrow().is_empty());
    }
}
