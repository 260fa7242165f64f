//! Audit trail for rejected fields and rule faults

use crate::error::RuleError;
use crate::types::{ErrorCode, FieldInfo};
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

/// Security-relevant event raised while shielding a request
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum AuditEvent {
    /// A rule failed, panicked or timed out
    RuleFault {
        request_id: String,
        rule: String,
        field: String,
        error: String,
        timestamp: DateTime<Utc>,
    },

    /// A field was not resolved because its rule did not allow it
    Rejected {
        request_id: String,
        field: String,
        code: ErrorCode,
        message: String,
        timestamp: DateTime<Utc>,
    },
}

impl AuditEvent {
    pub fn rule_fault(request_id: &str, rule: &str, field: &FieldInfo, error: &RuleError) -> Self {
        AuditEvent::RuleFault {
            request_id: request_id.to_string(),
            rule: rule.to_string(),
            field: field.locator.to_string(),
            error: error.to_string(),
            timestamp: Utc::now(),
        }
    }

    pub fn rejected(request_id: &str, field: &FieldInfo, code: ErrorCode, message: &str) -> Self {
        AuditEvent::Rejected {
            request_id: request_id.to_string(),
            field: field.locator.to_string(),
            code,
            message: message.to_string(),
            timestamp: Utc::now(),
        }
    }

    pub fn request_id(&self) -> &str {
        match self {
            AuditEvent::RuleFault { request_id, .. } | AuditEvent::Rejected { request_id, .. } => {
                request_id
            }
        }
    }

    pub fn is_fault(&self) -> bool {
        matches!(self, AuditEvent::RuleFault { .. })
    }
}

/// Destination for audit events
///
/// Called synchronously on the evaluation path, so implementations should
/// hand off anything slow.
pub trait AuditSink: Send + Sync {
    fn record(&self, event: AuditEvent);
}

/// Writes audit events to the `shield::audit` tracing target
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingAuditSink;

impl AuditSink for TracingAuditSink {
    fn record(&self, event: AuditEvent) {
        match &event {
            AuditEvent::RuleFault {
                request_id,
                rule,
                field,
                error,
                ..
            } => warn!(
                target: "shield::audit",
                request_id = %request_id,
                rule = %rule,
                field = %field,
                "rule fault: {}", error
            ),
            AuditEvent::Rejected {
                request_id,
                field,
                code,
                message,
                ..
            } => info!(
                target: "shield::audit",
                request_id = %request_id,
                field = %field,
                code = %code,
                "field rejected: {}", message
            ),
        }
    }
}

/// Keeps events in memory; useful in tests and for inspection endpoints
#[derive(Debug, Default)]
pub struct MemoryAuditSink {
    events: Mutex<Vec<AuditEvent>>,
}

impl MemoryAuditSink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of every recorded event, oldest first
    pub fn events(&self) -> Vec<AuditEvent> {
        self.events.lock().clone()
    }

    /// Recorded rule faults only
    pub fn faults(&self) -> Vec<AuditEvent> {
        self.events
            .lock()
            .iter()
            .filter(|event| event.is_fault())
            .cloned()
            .collect()
    }

    pub fn len(&self) -> usize {
        self.events.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.lock().is_empty()
    }

    pub fn clear(&self) {
        self.events.lock().clear();
    }
}

impl AuditSink for MemoryAuditSink {
    fn record(&self, event: AuditEvent) {
        self.events.lock().push(event);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_memory_sink_filters_faults() {
        let sink = MemoryAuditSink::new();
        let info = FieldInfo::new("Mutation", "createUser");

        sink.record(AuditEvent::rule_fault(
            "req-1",
            "isNotAlreadyRegistered",
            &info,
            &RuleError::lookup("store unavailable"),
        ));
        sink.record(AuditEvent::rejected("req-1", &info, ErrorCode::Forbidden, "Not Authorised!"));

        assert_eq!(sink.len(), 2);
        assert_eq!(sink.faults().len(), 1);
        assert_eq!(sink.faults()[0].request_id(), "req-1");
    }

    #[test]
    fn test_event_serialization_is_tagged() {
        let info = FieldInfo::new("Query", "me");
        let event = AuditEvent::rejected("req-2", &info, ErrorCode::Forbidden, "nope");
        let json = serde_json::to_value(&event).unwrap();

        assert_eq!(json["event"], "rejected");
        assert_eq!(json["field"], "Query.me");
        assert_eq!(json["code"], "FORBIDDEN");
    }
}
