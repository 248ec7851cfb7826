//! Provider Gateway
//!
//! Abstracts the cloud provider for testability. Provides:
//! - ProviderGateway trait: start/stop commands, operation and instance queries
//! - GcloudGateway: production gateway driving the `gcloud` CLI
//! - `crate::mock::MockProvider`: in-process scripted provider for tests

mod gcloud;

pub use gcloud::{GcloudConfig, GcloudGateway};

use std::collections::BTreeMap;

use instance_ops_model::{InstanceRecord, InstanceStatus, OperationRecord, OperationStatus};

/// Provider interface used by the tracking controller and the lifecycle service
pub trait ProviderGateway: Send + Sync {
    /// Issue a start; returns the (usually PENDING) operation
    fn start_instance(&self, zone: &str, name: &str) -> GatewayResult<OperationRecord>;

    /// Issue a stop; returns the (usually PENDING) operation
    fn stop_instance(&self, zone: &str, name: &str) -> GatewayResult<OperationRecord>;

    /// Fetch the current view of an operation
    fn get_operation(&self, zone: &str, handle: &str) -> GatewayResult<OperationRecord>;

    fn get_instance_status(&self, zone: &str, name: &str) -> GatewayResult<InstanceStatus>;

    /// All instances in the project, grouped by zone
    fn list_instances(&self) -> GatewayResult<BTreeMap<String, Vec<InstanceRecord>>>;

    /// Start/stop operations targeting one instance, filtered by status
    /// (an empty filter returns every status). Other operation types are
    /// skipped.
    fn instance_operations(
        &self,
        zone: &str,
        name: &str,
        statuses: &[OperationStatus],
    ) -> GatewayResult<Vec<OperationRecord>>;
}

/// How the controller should react to a gateway failure
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    /// Retry the poll later; does not consume retry budget
    Transient,
    /// Stop tracking and mark the job FAILED
    Fatal,
}

/// Gateway errors
#[derive(Debug, Clone, thiserror::Error)]
pub enum GatewayError {
    #[error("Provider unreachable: {0}")]
    Unavailable(String),

    #[error("Provider request timed out")]
    Timeout,

    #[error("Provider rate limited the request")]
    RateLimited,

    #[error("Not authorized: {0}")]
    Unauthorized(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error("Invalid provider response: {0}")]
    InvalidResponse(String),

    #[error("Failed to run provider client: {0}")]
    Client(String),
}

impl GatewayError {
    /// Transient-vs-fatal classification
    pub fn class(&self) -> ErrorClass {
        match self {
            GatewayError::Unavailable(_) => ErrorClass::Transient,
            GatewayError::Timeout => ErrorClass::Transient,
            GatewayError::RateLimited => ErrorClass::Transient,
            GatewayError::Unauthorized(_) => ErrorClass::Fatal,
            GatewayError::NotFound(_) => ErrorClass::Fatal,
            GatewayError::InvalidRequest(_) => ErrorClass::Fatal,
            GatewayError::InvalidResponse(_) => ErrorClass::Fatal,
            GatewayError::Client(_) => ErrorClass::Fatal,
        }
    }

    pub fn is_transient(&self) -> bool {
        self.class() == ErrorClass::Transient
    }
}

/// Result type for gateway calls
pub type GatewayResult<T> = Result<T, GatewayError>;
