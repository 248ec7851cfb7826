//! Normalized provider operation.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::enums::{OperationKind, OperationStatus};
use crate::timestamp::parse_provider_timestamp;

/// Provider timestamps for an operation, kept as the raw ISO-8601 strings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OperationTimestamps {
    pub insert_time: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub start_time: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub end_time: Option<String>,
}

impl OperationTimestamps {
    pub fn inserted(insert_time: impl Into<String>) -> Self {
        Self {
            insert_time: insert_time.into(),
            start_time: None,
            end_time: None,
        }
    }

    pub fn requested_at(&self) -> Option<DateTime<Utc>> {
        parse_provider_timestamp(Some(&self.insert_time))
    }

    pub fn started_at(&self) -> Option<DateTime<Utc>> {
        parse_provider_timestamp(self.start_time.as_deref())
    }

    pub fn ended_at(&self) -> Option<DateTime<Utc>> {
        parse_provider_timestamp(self.end_time.as_deref())
    }
}

/// Transient view of a provider operation; never persisted directly
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OperationRecord {
    /// Provider-assigned handle
    pub name: String,
    pub kind: OperationKind,
    pub status: OperationStatus,
    pub zone: String,
    /// Instance the operation acts on, when the provider reports it
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target: Option<String>,
    /// Error reported by the provider on a finished operation
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub timestamps: OperationTimestamps,
}

impl OperationRecord {
    pub fn is_done(&self) -> bool {
        self.status.is_done()
    }

    /// DONE, no provider error, and the kind the caller asked for.
    pub fn completed_as(&self, requested: OperationKind) -> bool {
        self.is_done() && self.error.is_none() && self.kind == requested
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(kind: OperationKind, status: OperationStatus) -> OperationRecord {
        OperationRecord {
            name: "operation-1".to_string(),
            kind,
            status,
            zone: "us-central1-a".to_string(),
            target: Some("web-1".to_string()),
            error: None,
            timestamps: OperationTimestamps::inserted("2024-05-01T10:00:00Z"),
        }
    }

    #[test]
    fn test_completed_as_requires_done_and_kind() {
        assert!(record(OperationKind::Start, OperationStatus::Done).completed_as(OperationKind::Start));
        assert!(!record(OperationKind::Stop, OperationStatus::Done).completed_as(OperationKind::Start));
        assert!(!record(OperationKind::Start, OperationStatus::Running).completed_as(OperationKind::Start));
    }

    #[test]
    fn test_provider_error_is_not_completion() {
        let mut op = record(OperationKind::Start, OperationStatus::Done);
        op.error = Some("QUOTA_EXCEEDED".to_string());
        assert!(!op.completed_as(OperationKind::Start));
    }

    #[test]
    fn test_optional_timestamps() {
        let mut op = record(OperationKind::Start, OperationStatus::Done);
        assert!(op.timestamps.requested_at().is_some());
        assert!(op.timestamps.started_at().is_none());
        op.timestamps.end_time = Some("2024-05-01T10:00:05Z".to_string());
        assert!(op.timestamps.ended_at().is_some());
    }

    #[test]
    fn test_json_omits_absent_fields() {
        let json = serde_json::to_string(&record(OperationKind::Stop, OperationStatus::Pending)).unwrap();
        assert!(json.contains("\"kind\":\"stop\""));
        assert!(json.contains("\"status\":\"PENDING\""));
        assert!(!json.contains("end_time"));
        assert!(!json.contains("\"error\""));
    }
}
