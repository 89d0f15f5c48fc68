//! Audit trail for processed texts.
//!
//! Every `process_medical_text` call produces exactly one `AuditRecord`,
//! including fail-safe results. Records carry hashes, levels and issue
//! summaries only. The caller-supplied context is stored as given.

use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use uuid::Uuid;

use crate::config::AuditSettings;

use super::types::{Degradation, DetectedIssue, RiskLevel, SafetyAction, SafetyError, SafetyResult};

/// Tracing target for audit lines.
pub const AUDIT_TARGET: &str = "ehr_safety::audit";

fn sha256_hex(data: &str) -> String {
    format!("{:x}", Sha256::digest(data.as_bytes()))
}

/// Timestamp as hashed: RFC 3339, UTC, whole seconds.
pub fn audit_timestamp(timestamp: DateTime<Utc>) -> String {
    timestamp.to_rfc3339_opts(SecondsFormat::Secs, true)
}

/// Short tamper-evidence digest of one processed text.
///
/// SHA-256 over the sorted-key JSON of
/// `{issues_count, original_hash, processed_hash, timestamp}` where the
/// two text hashes are the first 16 hex chars of their SHA-256, truncated
/// to 32 hex chars. Same inputs within the same second give the same hash.
pub fn audit_hash(
    original_text: &str,
    processed_text: &str,
    issues_count: usize,
    timestamp: DateTime<Utc>,
) -> String {
    let canonical = serde_json::json!({
        "issues_count": issues_count,
        "original_hash": &sha256_hex(original_text)[..16],
        "processed_hash": &sha256_hex(processed_text)[..16],
        "timestamp": audit_timestamp(timestamp),
    });
    sha256_hex(&canonical.to_string())[..32].to_string()
}

/// One persisted audit entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditRecord {
    pub audit_id: Uuid,
    pub timestamp: DateTime<Utc>,
    pub risk_level: RiskLevel,
    pub action_taken: SafetyAction,
    pub confidence_score: f64,
    pub processing_time_ms: u64,
    pub detected_issues: Vec<DetectedIssue>,
    pub audit_hash: String,
    pub residual_risk: bool,
    pub degradations: Vec<Degradation>,
    pub context: serde_json::Value,
}

impl AuditRecord {
    pub fn from_result(
        result: &SafetyResult,
        context: Option<&serde_json::Value>,
        timestamp: DateTime<Utc>,
    ) -> Self {
        Self {
            audit_id: Uuid::new_v4(),
            timestamp,
            risk_level: result.risk_level,
            action_taken: result.action_taken,
            confidence_score: result.confidence_score,
            processing_time_ms: result.processing_time_ms,
            detected_issues: result.detected_issues.clone(),
            audit_hash: result.audit_hash.clone(),
            residual_risk: result.residual_risk,
            degradations: result.degradations.clone(),
            context: context
                .cloned()
                .unwrap_or_else(|| serde_json::Value::Object(serde_json::Map::new())),
        }
    }
}

/// Destination for audit records.
pub trait AuditSink: Send + Sync {
    fn write(&self, record: &AuditRecord) -> Result<(), SafetyError>;
}

/// Emits each record as one structured log line on `ehr_safety::audit`.
pub struct TracingAuditSink;

impl AuditSink for TracingAuditSink {
    fn write(&self, record: &AuditRecord) -> Result<(), SafetyError> {
        tracing::info!(
            target: AUDIT_TARGET,
            audit_id = %record.audit_id,
            timestamp = %audit_timestamp(record.timestamp),
            risk_level = record.risk_level.as_str(),
            action_taken = record.action_taken.as_str(),
            confidence_score = record.confidence_score,
            processing_time_ms = record.processing_time_ms,
            issue_count = record.detected_issues.len(),
            degraded_steps = record.degradations.len(),
            residual_risk = record.residual_risk,
            audit_hash = %record.audit_hash,
            "Safety audit record"
        );
        Ok(())
    }
}

/// Appends records as JSON Lines to a file.
pub struct JsonlAuditSink {
    path: PathBuf,
    lock: Mutex<()>,
}

impl JsonlAuditSink {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            lock: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl AuditSink for JsonlAuditSink {
    fn write(&self, record: &AuditRecord) -> Result<(), SafetyError> {
        let line = serde_json::to_string(record).map_err(|e| SafetyError::AuditWrite(e.to_string()))?;

        let _guard = self
            .lock
            .lock()
            .map_err(|_| SafetyError::AuditWrite("audit file lock poisoned".to_string()))?;

        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent).map_err(|e| SafetyError::AuditWrite(e.to_string()))?;
            }
        }
        let mut file = fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .map_err(|e| SafetyError::AuditWrite(e.to_string()))?;
        writeln!(file, "{line}").map_err(|e| SafetyError::AuditWrite(e.to_string()))?;
        Ok(())
    }
}

/// Keeps records in memory (tests, embedding callers).
#[derive(Default)]
pub struct MemoryAuditSink {
    records: Mutex<Vec<AuditRecord>>,
}

impl MemoryAuditSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn records(&self) -> Vec<AuditRecord> {
        self.records.lock().map(|r| r.clone()).unwrap_or_default()
    }
}

impl AuditSink for MemoryAuditSink {
    fn write(&self, record: &AuditRecord) -> Result<(), SafetyError> {
        self.records
            .lock()
            .map_err(|_| SafetyError::AuditWrite("memory sink lock poisoned".to_string()))?
            .push(record.clone());
        Ok(())
    }
}

/// Fans one record out to every configured sink.
///
/// A failing sink is logged and skipped; it never changes the result
/// returned to the caller.
pub struct AuditRecorder {
    sinks: Vec<Arc<dyn AuditSink>>,
}

impl AuditRecorder {
    /// Recorder with the tracing sink only.
    pub fn new() -> Self {
        Self {
            sinks: vec![Arc::new(TracingAuditSink)],
        }
    }

    /// Recorder with no sinks at all.
    pub fn silent() -> Self {
        Self { sinks: Vec::new() }
    }

    pub fn from_settings(settings: &AuditSettings) -> Self {
        let recorder = Self::new();
        match &settings.jsonl_path {
            Some(path) => recorder.with_sink(Arc::new(JsonlAuditSink::new(path.clone()))),
            None => recorder,
        }
    }

    pub fn with_sink(mut self, sink: Arc<dyn AuditSink>) -> Self {
        self.sinks.push(sink);
        self
    }

    pub fn sink_count(&self) -> usize {
        self.sinks.len()
    }

    /// Build the record for `result` and write it to every sink.
    pub fn record(
        &self,
        result: &SafetyResult,
        context: Option<&serde_json::Value>,
        timestamp: DateTime<Utc>,
    ) -> AuditRecord {
        let record = AuditRecord::from_result(result, context, timestamp);
        for sink in &self.sinks {
            if let Err(e) = sink.write(&record) {
                tracing::error!(audit_id = %record.audit_id, error = %e, "Audit sink write failed");
            }
        }
        record
    }
}

impl Default for AuditRecorder {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn ts(secs: u32, nanos: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 3, 1, 9, 30, secs).unwrap() + chrono::Duration::nanoseconds(nanos as i64)
    }

    fn result() -> SafetyResult {
        SafetyResult {
            original_text: "患者番号：P123456".into(),
            processed_text: "***********56".into(),
            risk_level: RiskLevel::Critical,
            action_taken: SafetyAction::Block,
            confidence_score: 0.96,
            detected_issues: vec![],
            processing_time_ms: 12,
            audit_hash: "abc".into(),
            degradations: vec![],
            residual_risk: false,
        }
    }

    #[test]
    fn hash_is_32_hex_chars() {
        let h = audit_hash("a", "b", 1, ts(0, 0));
        assert_eq!(h.len(), 32);
        assert!(h.chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn hash_stable_within_a_second() {
        let a = audit_hash("orig", "proc", 2, ts(5, 100));
        let b = audit_hash("orig", "proc", 2, ts(5, 900_000_000));
        assert_eq!(a, b);
    }

    #[test]
    fn hash_changes_with_inputs() {
        let base = audit_hash("orig", "proc", 2, ts(5, 0));
        assert_ne!(base, audit_hash("orig2", "proc", 2, ts(5, 0)));
        assert_ne!(base, audit_hash("orig", "proc2", 2, ts(5, 0)));
        assert_ne!(base, audit_hash("orig", "proc", 3, ts(5, 0)));
        assert_ne!(base, audit_hash("orig", "proc", 2, ts(6, 0)));
    }

    #[test]
    fn timestamp_is_whole_seconds_utc() {
        assert_eq!(audit_timestamp(ts(7, 123_456)), "2026-03-01T09:30:07Z");
    }

    #[test]
    fn record_defaults_context_to_empty_object() {
        let record = AuditRecord::from_result(&result(), None, ts(0, 0));
        assert_eq!(record.context, serde_json::json!({}));
        assert_eq!(record.risk_level, RiskLevel::Critical);
    }

    #[test]
    fn record_never_contains_texts() {
        let record = AuditRecord::from_result(&result(), None, ts(0, 0));
        let json = serde_json::to_string(&record).unwrap();
        assert!(!json.contains("P123456"));
        assert!(!json.contains("***********56"));
    }

    #[test]
    fn jsonl_sink_appends_lines() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("audit.jsonl");
        let recorder = AuditRecorder::silent().with_sink(Arc::new(JsonlAuditSink::new(&path)));

        recorder.record(&result(), None, ts(0, 0));
        recorder.record(&result(), Some(&serde_json::json!({"encounter_id": "E-1"})), ts(1, 0));

        let content = std::fs::read_to_string(&path).unwrap();
        let lines: Vec<&str> = content.lines().collect();
        assert_eq!(lines.len(), 2);
        let second: AuditRecord = serde_json::from_str(lines[1]).unwrap();
        assert_eq!(second.context["encounter_id"], "E-1");
        assert_eq!(second.action_taken, SafetyAction::Block);
    }

    #[test]
    fn failing_sink_does_not_stop_others() {
        struct Broken;
        impl AuditSink for Broken {
            fn write(&self, _: &AuditRecord) -> Result<(), SafetyError> {
                Err(SafetyError::AuditWrite("disk full".into()))
            }
        }
        let memory = Arc::new(MemoryAuditSink::new());
        let recorder = AuditRecorder::silent()
            .with_sink(Arc::new(Broken))
            .with_sink(memory.clone());
        let record = recorder.record(&result(), None, ts(0, 0));
        assert_eq!(memory.records(), vec![record]);
    }

    #[test]
    fn from_settings_adds_file_sink() {
        let settings = AuditSettings {
            jsonl_path: Some(PathBuf::from("/tmp/x.jsonl")),
        };
        assert_eq!(AuditRecorder::from_settings(&settings).sink_count(), 2);
        assert_eq!(AuditRecorder::from_settings(&AuditSettings::default()).sink_count(), 1);
    }
}
