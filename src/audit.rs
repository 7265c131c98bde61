use std::fs::OpenOptions;
use std::io::Write;
use std::sync::Mutex;

use chrono::Utc;
use serde::Serialize;
use serde_json::Value;

use crate::error::HephaestusError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum AuditStatus {
    Success,
    Denied,
    Failed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Protocol {
    Rest,
    Grpc,
}

#[derive(Debug, Serialize)]
struct AuditRecord<'a> {
    timestamp: chrono::DateTime<Utc>,
    run_id: uuid::Uuid,
    principal: &'a str,
    key_id: &'a str,
    operation: &'a str,
    protocol: Protocol,
    status: AuditStatus,
    parameters: Value,
    outcome: Value,
}

/// Append-only sink writing one JSON object per line, one file per UTC day.
pub struct AuditSink {
    dir: String,
    write_lock: Mutex<()>,
}

/// Maps a facade/adapter error to the audit status it should be recorded
/// under: authentication/authorization failures are `denied`, everything
/// else that reaches the point of being audited is `failed`.
pub fn status_for_error(err: &HephaestusError) -> AuditStatus {
    match err {
        HephaestusError::Authentication(_) | HephaestusError::Authorization { .. } => {
            AuditStatus::Denied
        }
        _ => AuditStatus::Failed,
    }
}

impl AuditSink {
    pub fn new(dir: &str) -> Result<Self, HephaestusError> {
        std::fs::create_dir_all(dir).map_err(|e| {
            HephaestusError::Internal(format!("failed to create audit dir {dir}: {e}"))
        })?;
        Ok(Self {
            dir: dir.to_string(),
            write_lock: Mutex::new(()),
        })
    }

    pub fn record(
        &self,
        principal: &str,
        key_id: &str,
        operation: &str,
        protocol: Protocol,
        status: AuditStatus,
        parameters: Value,
        outcome: Value,
    ) -> Result<(), HephaestusError> {
        let now = Utc::now();
        let record = AuditRecord {
            timestamp: now,
            run_id: *crate::config::RUN_ID,
            principal,
            key_id,
            operation,
            protocol,
            status,
            parameters,
            outcome,
        };
        let line = serde_json::to_string(&record)
            .map_err(|e| HephaestusError::Internal(format!("failed to encode audit record: {e}")))?;

        let path = format!("{}/audit-{}.jsonl", self.dir, now.format("%Y%m%d"));
        let _guard = self
            .write_lock
            .lock()
            .map_err(|_| HephaestusError::Internal("audit lock poisoned".into()))?;
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .map_err(|e| HephaestusError::Internal(format!("failed to open audit log {path}: {e}")))?;
        writeln!(file, "{line}")
            .map_err(|e| HephaestusError::Internal(format!("failed to append audit record: {e}")))?;

        tracing::info!(operation, status = ?status, "audit event recorded");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn appends_one_json_line_per_event() {
        let dir = tempfile::tempdir().unwrap();
        let sink = AuditSink::new(dir.path().to_str().unwrap()).unwrap();
        sink.record(
            "svc@example.com",
            "k1",
            "rest.cleanup.run",
            Protocol::Rest,
            AuditStatus::Success,
            json!({"root": "/tmp"}),
            json!({"removed": 3}),
        )
        .unwrap();
        sink.record(
            "svc@example.com",
            "k1",
            "rest.cleanup.run",
            Protocol::Rest,
            AuditStatus::Denied,
            json!({}),
            json!({}),
        )
        .unwrap();

        let today = Utc::now().format("%Y%m%d");
        let path = dir.path().join(format!("audit-{today}.jsonl"));
        let contents = std::fs::read_to_string(path).unwrap();
        let lines: Vec<&str> = contents.lines().collect();
        assert_eq!(lines.len(), 2);
        for line in lines {
            let parsed: Value = serde_json::from_str(line).unwrap();
            assert!(parsed.get("operation").is_some());
        }
    }
}
