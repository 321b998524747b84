use facegate_config::{ServiceConfig, SimilarityThreshold};
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::audit::{AuditEvent, AuditStore};
use crate::clock::Clock;
use crate::errors::{AppError, AppResult};
use crate::provider::{FaceProvider, ImageLocation, SearchFacesRequest};
use crate::validation::VerificationRequest;

/// Decision returned to the caller. `employee_id` and `similarity` are only
/// present when `is_match` holds.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MatchResult {
    #[serde(rename = "isMatch")]
    pub is_match: bool,
    #[serde(rename = "employeeId")]
    pub employee_id: Option<String>,
    pub similarity: Option<f64>,
    pub threshold: SimilarityThreshold,
}

#[derive(Debug)]
pub struct VerificationOutcome {
    pub result: MatchResult,
    pub audit_event: AuditEvent,
    pub logs: Vec<String>,
}

pub fn run_verification_with<P, A, C>(
    request: &VerificationRequest,
    config: &ServiceConfig,
    provider: &P,
    audit: &A,
    clock: &C,
) -> AppResult<VerificationOutcome>
where
    P: FaceProvider + ?Sized,
    A: AuditStore + ?Sized,
    C: Clock + ?Sized,
{
    let mut logs = Vec::new();
    let image = ImageLocation::new(config.bucket.clone(), request.object_key.clone());
    let threshold = config.threshold;

    logs.push(format!(
        "Searching collection {} with {}/{} at threshold {}",
        config.collection_id, image.bucket, image.key, threshold
    ));
    let candidates = provider.search_faces_by_image(&SearchFacesRequest {
        collection_id: config.collection_id.clone(),
        image: image.clone(),
        face_match_threshold: threshold.value(),
        max_faces: 1,
    })?;

    // The provider ranks best first; only the head candidate decides.
    let matched = match candidates.into_iter().next() {
        Some(candidate) if !candidate.similarity.is_finite() => {
            return Err(AppError::Provider(format!(
                "non-finite similarity {} for {}",
                candidate.similarity, candidate.external_id
            )));
        }
        Some(candidate) => Some((
            candidate.external_id,
            candidate.similarity.clamp(0.0, 100.0),
        )),
        None => None,
    };

    let result = match &matched {
        Some((employee_id, similarity)) => {
            logs.push(format!("Matched {employee_id} at {similarity}"));
            MatchResult {
                is_match: true,
                employee_id: Some(employee_id.clone()),
                similarity: Some(*similarity),
                threshold,
            }
        }
        None => {
            logs.push("No candidate met the threshold".to_string());
            MatchResult {
                is_match: false,
                employee_id: None,
                similarity: None,
                threshold,
            }
        }
    };

    let event = AuditEvent::verification(
        matched.as_ref().map(|(id, similarity)| (id.as_str(), *similarity)),
        &image,
        &config.labels,
        clock.now(),
    );
    if let Err(err) = audit.append(&config.audit_table, &event) {
        warn!(
            target: "verification",
            object_key = %image.key,
            is_match = result.is_match,
            "decision made but audit write failed: {err}"
        );
        return Err(err);
    }
    logs.push(format!("Recorded {} {}", event.pk, event.sk));

    info!(
        target: "verification",
        object_key = %image.key,
        is_match = result.is_match,
        employee_id = result.employee_id.as_deref().unwrap_or("-"),
        "verified"
    );
    debug!(target: "verification", "{}", logs.join("; "));

    Ok(VerificationOutcome {
        result,
        audit_event: event,
        logs,
    })
}
