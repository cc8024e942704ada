//! Structured audit logging (spec.md §2): a thin facade turning domain
//! events into `tracing` records, grounded in the teacher's
//! `ApiAuditLogger`, whose degraded (remote-log-unreachable) mode — falling
//! back to local `tracing` — is adopted here as the only mode.

use serde::Serialize;

#[derive(Debug, Default, Clone)]
pub struct AuditLog;

impl AuditLog {
    pub fn new() -> Self {
        Self
    }

    pub fn record(&self, action: &str, request_id: &str, fields: impl Serialize) {
        let payload = serde_json::to_value(fields).unwrap_or(serde_json::Value::Null);
        tracing::info!(target: "audit", action, request_id, payload = %payload, "audit");
    }

    pub fn record_failure(&self, action: &str, request_id: &str, error: impl std::fmt::Display) {
        tracing::warn!(target: "audit", action, request_id, error = %error, "audit failure");
    }
}
