use std::error::Error;
use std::io::{self, Write};

use facegate_core::audit::{AuditDetail, AuditEvent};
use serde_json::json;

use crate::cli::OutputMode;
use crate::commands::audit::AuditListing;
use crate::errors::{ServerError, ServerResult};

pub fn render_audit_list(listing: &AuditListing, mode: OutputMode) -> ServerResult<()> {
    let stdout = io::stdout();
    let mut handle = stdout.lock();
    match mode {
        OutputMode::Human => {
            for line in audit_lines(listing) {
                writeln!(handle, "{line}")?;
            }
        }
        OutputMode::Json => {
            let payload = serde_json::to_string(&json!({
                "table": listing.table,
                "events": listing.events,
            }))?;
            handle.write_all(payload.as_bytes())?;
            handle.write_all(b"\n")?;
        }
    }
    Ok(())
}

pub fn audit_lines(listing: &AuditListing) -> Vec<String> {
    if listing.events.is_empty() {
        return vec![format!("No audit events in {}", listing.table)];
    }
    let mut lines = Vec::with_capacity(listing.events.len() + 1);
    lines.push(format!(
        "{} event(s) in {}",
        listing.events.len(),
        listing.table
    ));
    lines.extend(listing.events.iter().map(describe_event));
    lines
}

fn describe_event(event: &AuditEvent) -> String {
    let detail = match &event.detail {
        AuditDetail::Enroll {
            employee_id,
            face_id,
        } => format!("employee={employee_id} face={face_id}"),
        AuditDetail::Verify {
            matched_employee_id,
            similarity,
            is_match,
        } => format!("match={is_match} employee={matched_employee_id} similarity={similarity}"),
    };
    format!(
        "{}  {}  {}  {}/{}",
        event.pk, event.sk, detail, event.bucket, event.object_key
    )
}

pub fn render_error(err: &ServerError, mode: OutputMode) {
    match mode {
        OutputMode::Human => {
            eprintln!("error: {}", err.human_message());
            if let Some(source) = err.source() {
                eprintln!("cause: {source}");
            }
        }
        OutputMode::Json => {
            let payload = json!({
                "success": false,
                "error": err.human_message(),
            });
            if let Ok(json) = serde_json::to_string(&payload) {
                println!("{json}");
            }
            if let Some(source) = err.source() {
                eprintln!("cause: {source}");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};
    use facegate_config::DeploymentLabels;
    use facegate_core::ImageLocation;

    fn labels() -> DeploymentLabels {
        DeploymentLabels {
            project: "facegate".into(),
            environment: "dev".into(),
        }
    }

    #[test]
    fn human_lines_describe_each_event() {
        let at = Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap();
        let image = ImageLocation::new("faces", "gate/a.json");
        let listing = AuditListing {
            table: "face-audit".into(),
            events: vec![
                AuditEvent::enrollment("E1", "f-1", &image, &labels(), at),
                AuditEvent::verification(None, &image, &labels(), at),
            ],
        };
        let lines = audit_lines(&listing);
        assert_eq!(lines[0], "2 event(s) in face-audit");
        assert_eq!(
            lines[1],
            "EMP#E1  ENROLL#2024-05-01T12:00:00Z  employee=E1 face=f-1  faces/gate/a.json"
        );
        assert_eq!(
            lines[2],
            "VERIFY#UNKNOWN  2024-05-01T12:00:00Z  match=false employee=NONE similarity=-1  faces/gate/a.json"
        );
    }

    #[test]
    fn empty_table_says_so() {
        let listing = AuditListing {
            table: "face-audit".into(),
            events: Vec::new(),
        };
        assert_eq!(audit_lines(&listing), vec!["No audit events in face-audit"]);
    }
}
