use std::fs::{self, OpenOptions};
use std::io::{self, BufRead, BufReader, Write};
use std::path::PathBuf;
use std::sync::Mutex;

use chrono::{DateTime, Utc};
use facegate_config::DeploymentLabels;
use serde::{Deserialize, Serialize};

use crate::clock::audit_timestamp;
use crate::errors::{AppError, AppResult};
use crate::provider::ImageLocation;

pub const UNKNOWN_SUBJECT: &str = "UNKNOWN";
pub const NO_MATCH_EMPLOYEE: &str = "NONE";
pub const NO_MATCH_SIMILARITY: f64 = -1.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum EventType {
    Enroll,
    Verify,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum AuditDetail {
    Enroll {
        #[serde(rename = "employeeId")]
        employee_id: String,
        #[serde(rename = "faceId")]
        face_id: String,
    },
    Verify {
        #[serde(rename = "matchedEmployeeId")]
        matched_employee_id: String,
        similarity: f64,
        #[serde(rename = "isMatch")]
        is_match: bool,
    },
}

/// One immutable record per enrollment or verification attempt.
///
/// `(pk, sk)` orders events chronologically within a subject.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditEvent {
    pub pk: String,
    pub sk: String,
    #[serde(rename = "eventType")]
    pub event_type: EventType,
    #[serde(flatten)]
    pub detail: AuditDetail,
    pub bucket: String,
    #[serde(rename = "objectKey")]
    pub object_key: String,
    pub project: String,
    pub environment: String,
    pub ts: String,
}

impl AuditEvent {
    pub fn enrollment(
        employee_id: &str,
        face_id: &str,
        image: &ImageLocation,
        labels: &DeploymentLabels,
        at: DateTime<Utc>,
    ) -> Self {
        let ts = audit_timestamp(at);
        Self {
            pk: format!("EMP#{employee_id}"),
            sk: format!("ENROLL#{ts}"),
            event_type: EventType::Enroll,
            detail: AuditDetail::Enroll {
                employee_id: employee_id.to_string(),
                face_id: face_id.to_string(),
            },
            bucket: image.bucket.clone(),
            object_key: image.key.clone(),
            project: labels.project.clone(),
            environment: labels.environment.clone(),
            ts,
        }
    }

    /// `matched` carries the employee id and similarity of the accepted candidate.
    pub fn verification(
        matched: Option<(&str, f64)>,
        image: &ImageLocation,
        labels: &DeploymentLabels,
        at: DateTime<Utc>,
    ) -> Self {
        let ts = audit_timestamp(at);
        let (subject, detail) = match matched {
            Some((employee_id, similarity)) => (
                employee_id,
                AuditDetail::Verify {
                    matched_employee_id: employee_id.to_string(),
                    similarity,
                    is_match: true,
                },
            ),
            None => (
                UNKNOWN_SUBJECT,
                AuditDetail::Verify {
                    matched_employee_id: NO_MATCH_EMPLOYEE.to_string(),
                    similarity: NO_MATCH_SIMILARITY,
                    is_match: false,
                },
            ),
        };
        Self {
            pk: format!("VERIFY#{subject}"),
            sk: ts.clone(),
            event_type: EventType::Verify,
            detail,
            bucket: image.bucket.clone(),
            object_key: image.key.clone(),
            project: labels.project.clone(),
            environment: labels.environment.clone(),
            ts,
        }
    }
}

/// Append-only sink for audit events. No conditional writes.
pub trait AuditStore {
    fn append(&self, table: &str, event: &AuditEvent) -> AppResult<()>;
}

/// Stores each table as `<root>/<table>.jsonl`, one event per line.
#[derive(Debug)]
pub struct JsonlAuditStore {
    root: PathBuf,
    write_lock: Mutex<()>,
}

impl JsonlAuditStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            write_lock: Mutex::new(()),
        }
    }

    pub fn table_path(&self, table: &str) -> PathBuf {
        self.root.join(format!("{table}.jsonl"))
    }

    /// Reads every event of a table, optionally restricted to one subject,
    /// sorted by `(pk, sk)`.
    pub fn read_events(&self, table: &str, subject: Option<&str>) -> AppResult<Vec<AuditEvent>> {
        let path = self.table_path(table);
        let file = match fs::File::open(&path) {
            Ok(file) => file,
            Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(source) => return Err(AppError::AuditRead { path, source }),
        };

        let mut events = Vec::new();
        for (idx, line) in BufReader::new(file).lines().enumerate() {
            let line = line.map_err(|source| AppError::AuditRead {
                path: path.clone(),
                source,
            })?;
            if line.trim().is_empty() {
                continue;
            }
            let event: AuditEvent =
                serde_json::from_str(&line).map_err(|err| AppError::AuditCorrupt {
                    path: path.clone(),
                    line: idx + 1,
                    message: err.to_string(),
                })?;
            if subject.map_or(true, |pk| event.pk == pk) {
                events.push(event);
            }
        }

        events.sort_by(|a, b| (&a.pk, &a.sk).cmp(&(&b.pk, &b.sk)));
        Ok(events)
    }
}

impl AuditStore for JsonlAuditStore {
    fn append(&self, table: &str, event: &AuditEvent) -> AppResult<()> {
        let persistence = |message: String| AppError::Persistence {
            table: table.to_string(),
            message,
        };
        if table.is_empty() || table.contains(['/', '\\']) || table.starts_with('.') {
            return Err(persistence(format!("invalid table name '{table}'")));
        }

        let mut line = serde_json::to_vec(event)?;
        line.push(b'\n');

        let _guard = self
            .write_lock
            .lock()
            .map_err(|_| persistence("audit writer lock poisoned".into()))?;
        fs::create_dir_all(&self.root).map_err(|err| persistence(err.to_string()))?;
        let path = self.table_path(table);
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .map_err(|err| persistence(format!("{}: {err}", path.display())))?;
        file.write_all(&line)
            .and_then(|_| file.sync_data())
            .map_err(|err| persistence(format!("{}: {err}", path.display())))?;
        Ok(())
    }
}
