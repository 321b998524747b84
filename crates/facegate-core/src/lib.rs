pub mod audit;
pub mod clock;
pub mod collection;
pub mod enrollment;
pub mod errors;
pub mod provider;
pub mod storage;
pub mod upload;
pub mod validation;
pub mod verification;

pub use audit::{AuditEvent, AuditStore, JsonlAuditStore};
pub use clock::{Clock, SystemClock};
pub use collection::LocalFaceCollection;
pub use enrollment::{run_enrollment_with, EnrollmentOutcome, EnrollmentReceipt};
pub use errors::{AppError, AppResult};
pub use provider::{FaceProvider, ImageLocation, ProviderError};
pub use storage::{LocalUploadIssuer, UploadSigner, UploadUrlIssuer};
pub use upload::{run_presign_with, PresignedUpload};
pub use validation::{parse_body, EnrollmentRequest, RequestBody, UploadRequest, VerificationRequest};
pub use verification::{run_verification_with, MatchResult, VerificationOutcome};
