//! Parent and child job records
//!
//! A parent job is one user-initiated start/stop request. A child job is one
//! re-issue of that request after the provider completed a different
//! operation than the one asked for.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::enums::{OperationKind, OperationStatus};
use crate::operation::OperationRecord;

/// Store-assigned job identity
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct JobId(pub u64);

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Persisted parent status: the last observed operation status, or FAILED
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum JobStatus {
    Pending,
    Running,
    Done,
    /// Tracking gave up; never set together with `is_successful`
    Failed,
}

impl From<OperationStatus> for JobStatus {
    fn from(status: OperationStatus) -> Self {
        match status {
            OperationStatus::Pending => JobStatus::Pending,
            OperationStatus::Running => JobStatus::Running,
            OperationStatus::Done => JobStatus::Done,
        }
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            JobStatus::Pending => "PENDING",
            JobStatus::Running => "RUNNING",
            JobStatus::Done => "DONE",
            JobStatus::Failed => "FAILED",
        };
        f.write_str(s)
    }
}

/// Why a parent job ended in FAILED
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum FailureKind {
    /// Auth failure, unknown handle or other non-retryable gateway error
    FatalGatewayError,
    /// Every permitted re-issue was spent on mismatched outcomes
    RetryBudgetExhausted,
    /// The re-issued start/stop command itself failed
    RetryIssueFailed,
    /// Too many consecutive transient poll failures
    PollErrorsExhausted,
    /// Overall tracking deadline passed
    Timeout,
    /// A job store write failed mid-tracking
    StoreWriteFailure,
    /// The command was issued but no tracker would take the job
    TrackingRejected,
    /// The tracker stopped abnormally (panicked)
    TrackerAborted,
}

impl fmt::Display for FailureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            FailureKind::FatalGatewayError => "FATAL_GATEWAY_ERROR",
            FailureKind::RetryBudgetExhausted => "RETRY_BUDGET_EXHAUSTED",
            FailureKind::RetryIssueFailed => "RETRY_ISSUE_FAILED",
            FailureKind::PollErrorsExhausted => "POLL_ERRORS_EXHAUSTED",
            FailureKind::Timeout => "TIMEOUT",
            FailureKind::StoreWriteFailure => "STORE_WRITE_FAILURE",
            FailureKind::TrackingRejected => "TRACKING_REJECTED",
            FailureKind::TrackerAborted => "TRACKER_ABORTED",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FailureReason {
    pub kind: FailureKind,
    pub message: String,
}

impl FailureReason {
    pub fn new(kind: FailureKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }
}

impl fmt::Display for FailureReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.kind, self.message)
    }
}

/// Parent job before the store assigns an id
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewParentJob {
    pub name: String,
    pub zone: String,
    pub status: JobStatus,
    pub kind: OperationKind,
}

impl NewParentJob {
    /// Parent for a freshly issued command, carrying its preliminary status.
    pub fn for_operation(name: &str, zone: &str, kind: OperationKind, op: &OperationRecord) -> Self {
        Self {
            name: name.to_string(),
            zone: zone.to_string(),
            status: op.status.into(),
            kind,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ParentJob {
    pub id: JobId,
    /// Instance name
    pub name: String,
    pub zone: String,
    pub status: JobStatus,
    #[serde(rename = "type")]
    pub kind: OperationKind,
    pub is_successful: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failure: Option<FailureReason>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl ParentJob {
    pub fn from_new(id: JobId, new: NewParentJob) -> Self {
        let now = Utc::now();
        Self {
            id,
            name: new.name,
            zone: new.zone,
            status: new.status,
            kind: new.kind,
            is_successful: false,
            failure: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// Succeeded or failed. A DONE status alone is not final: the provider
    /// may have finished the wrong kind.
    pub fn is_terminal(&self) -> bool {
        self.is_successful || self.failure.is_some()
    }

    /// Record a non-final observation. Returns false when nothing changed.
    pub fn observe(&mut self, status: OperationStatus) -> bool {
        let status = JobStatus::from(status);
        if self.is_terminal() || self.status == status {
            return false;
        }
        self.status = status;
        self.updated_at = Utc::now();
        true
    }

    pub fn mark_succeeded(&mut self) {
        self.status = JobStatus::Done;
        self.is_successful = true;
        self.failure = None;
        self.updated_at = Utc::now();
    }

    pub fn mark_failed(&mut self, reason: FailureReason) {
        self.status = JobStatus::Failed;
        self.is_successful = false;
        self.failure = Some(reason);
        self.updated_at = Utc::now();
    }
}

/// Child job before the store assigns an id
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewChildJob {
    pub parent_id: JobId,
    /// Handle of the re-issued operation
    pub operation: String,
    pub request_time: Option<DateTime<Utc>>,
    pub start_time: Option<DateTime<Utc>>,
    pub end_time: Option<DateTime<Utc>>,
}

impl NewChildJob {
    pub fn for_retry(parent_id: JobId, op: &OperationRecord) -> Self {
        Self {
            parent_id,
            operation: op.name.clone(),
            request_time: op.timestamps.requested_at(),
            start_time: op.timestamps.started_at(),
            end_time: op.timestamps.ended_at(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChildJob {
    pub id: JobId,
    pub parent_id: JobId,
    pub operation: String,
    pub is_successful: bool,
    #[serde(default)]
    pub request_time: Option<DateTime<Utc>>,
    #[serde(default)]
    pub start_time: Option<DateTime<Utc>>,
    #[serde(default)]
    pub end_time: Option<DateTime<Utc>>,
}

impl ChildJob {
    pub fn from_new(id: JobId, new: NewChildJob) -> Self {
        Self {
            id,
            parent_id: new.parent_id,
            operation: new.operation,
            is_successful: false,
            request_time: new.request_time,
            start_time: new.start_time,
            end_time: new.end_time,
        }
    }

    /// Fold the finished follow-up operation into this attempt.
    ///
    /// Timestamps the provider has since populated replace absent ones.
    pub fn complete(&mut self, op: &OperationRecord, succeeded: bool) {
        self.is_successful = succeeded;
        self.request_time = self.request_time.or(op.timestamps.requested_at());
        self.start_time = op.timestamps.started_at().or(self.start_time);
        self.end_time = op.timestamps.ended_at().or(self.end_time);
    }
}

/// Public snapshot of a parent job and its retry attempts
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ParentJobView {
    #[serde(flatten)]
    pub job: ParentJob,
    pub children: Vec<ChildJob>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::operation::OperationTimestamps;

    fn parent() -> ParentJob {
        ParentJob::from_new(
            JobId(7),
            NewParentJob {
                name: "web-1".to_string(),
                zone: "us-central1-a".to_string(),
                status: JobStatus::Pending,
                kind: OperationKind::Start,
            },
        )
    }

    #[test]
    fn test_new_parent_is_unsuccessful() {
        let job = parent();
        assert_eq!(job.status, JobStatus::Pending);
        assert!(!job.is_successful);
        assert!(job.failure.is_none());
    }

    #[test]
    fn test_observe_only_reports_changes() {
        let mut job = parent();
        assert!(!job.observe(OperationStatus::Pending));
        assert!(job.observe(OperationStatus::Running));
        assert_eq!(job.status, JobStatus::Running);
    }

    #[test]
    fn test_observe_ignored_after_terminal() {
        let mut job = parent();
        job.mark_succeeded();
        assert!(!job.observe(OperationStatus::Running));
        assert_eq!(job.status, JobStatus::Done);
    }

    #[test]
    fn test_done_without_success_is_not_terminal() {
        let mut job = parent();
        job.status = JobStatus::Done;
        assert!(!job.is_terminal());

        job.mark_failed(FailureReason::new(FailureKind::RetryBudgetExhausted, "0 retries"));
        assert_eq!(job.status, JobStatus::Failed);
        assert!(job.is_terminal());
    }

    #[test]
    fn test_failed_is_distinct_from_success() {
        let mut job = parent();
        job.mark_failed(FailureReason::new(FailureKind::RetryBudgetExhausted, "3 retries"));
        assert_eq!(job.status, JobStatus::Failed);
        assert!(!job.is_successful);
        assert!(job.is_terminal());
    }

    #[test]
    fn test_parent_serializes_kind_as_type() {
        let json = serde_json::to_value(parent()).unwrap();
        assert_eq!(json["type"], "start");
        assert_eq!(json["status"], "PENDING");
        assert_eq!(json["id"], 7);
        assert!(json.get("failure").is_none());
    }

    #[test]
    fn test_child_complete_backfills_timestamps() {
        let op = OperationRecord {
            name: "operation-2".to_string(),
            kind: OperationKind::Start,
            status: OperationStatus::Done,
            zone: "us-central1-a".to_string(),
            target: None,
            error: None,
            timestamps: OperationTimestamps {
                insert_time: "2024-05-01T10:00:00Z".to_string(),
                start_time: Some("2024-05-01T10:00:01Z".to_string()),
                end_time: Some("2024-05-01T10:00:09Z".to_string()),
            },
        };
        let mut pending = op.clone();
        pending.status = OperationStatus::Pending;
        pending.timestamps.start_time = None;
        pending.timestamps.end_time = None;

        let mut child = ChildJob::from_new(JobId(1), NewChildJob::for_retry(JobId(7), &pending));
        assert!(child.end_time.is_none());

        child.complete(&op, true);
        assert!(child.is_successful);
        assert!(child.start_time.is_some());
        assert!(child.end_time.is_some());
    }
}
