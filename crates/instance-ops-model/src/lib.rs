//! Instance Ops Model
//!
//! Records exchanged between the provider gateway, the job store and the
//! operation tracking controller.

pub mod enums;
pub mod instance;
pub mod job;
pub mod operation;
pub mod timestamp;

pub use enums::{InstanceStatus, OperationKind, OperationStatus, ParseEnumError};
pub use instance::{InstanceRecord, InstanceSummary, InstanceTimestamps};
pub use job::{
    ChildJob, FailureKind, FailureReason, JobId, JobStatus, NewChildJob, NewParentJob, ParentJob,
    ParentJobView,
};
pub use operation::{OperationRecord, OperationTimestamps};
pub use timestamp::parse_provider_timestamp;
