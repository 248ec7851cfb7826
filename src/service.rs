//! Lifecycle service
//!
//! Request-handler boundary: issues start/stop commands, records the parent
//! job synchronously, and hands tracking to the supervisor. Also answers
//! instance and job queries.

use std::sync::Arc;

use instance_ops_model::{
    FailureKind, FailureReason, InstanceStatus, InstanceSummary, JobId, NewParentJob,
    OperationKind, OperationRecord, OperationStatus, ParentJob, ParentJobView,
};

use crate::gateway::{GatewayError, ProviderGateway};
use crate::store::{JobStore, StoreError};
use crate::supervisor::{SupervisorError, SupervisorHandle};
use crate::tracking::TrackRequest;

#[derive(Debug, thiserror::Error)]
pub enum ServiceError {
    #[error("Provider error: {0}")]
    Gateway(#[from] GatewayError),

    #[error("Job store error: {0}")]
    Store(#[from] StoreError),

    #[error("Supervisor error: {0}")]
    Supervisor(#[from] SupervisorError),

    #[error("Job {id} not found in {zone}")]
    JobNotFound { id: JobId, zone: String },

    #[error("Invalid argument: {0}")]
    InvalidArgument(String),
}

pub type ServiceResult<T> = Result<T, ServiceError>;

/// A command accepted by the provider and handed to a tracker
#[derive(Debug, Clone, serde::Serialize)]
pub struct Submitted {
    pub job: ParentJob,
    pub operation: OperationRecord,
}

pub struct LifecycleService {
    gateway: Arc<dyn ProviderGateway>,
    store: Arc<dyn JobStore>,
    supervisor: SupervisorHandle,
    recipient: String,
}

impl LifecycleService {
    pub fn new(
        gateway: Arc<dyn ProviderGateway>,
        store: Arc<dyn JobStore>,
        supervisor: SupervisorHandle,
        recipient: impl Into<String>,
    ) -> Self {
        Self {
            gateway,
            store,
            supervisor,
            recipient: recipient.into(),
        }
    }

    pub fn supervisor(&self) -> &SupervisorHandle {
        &self.supervisor
    }

    pub fn start_instance(&self, zone: &str, name: &str) -> ServiceResult<Submitted> {
        self.submit(OperationKind::Start, zone, name)
    }

    pub fn stop_instance(&self, zone: &str, name: &str) -> ServiceResult<Submitted> {
        self.submit(OperationKind::Stop, zone, name)
    }

    fn submit(&self, kind: OperationKind, zone: &str, name: &str) -> ServiceResult<Submitted> {
        require("zone", zone)?;
        require("instance name", name)?;
        // Nothing is sent to the provider unless a tracker can own the job
        self.supervisor.ensure_accepting()?;

        let operation = match kind {
            OperationKind::Start => self.gateway.start_instance(zone, name)?,
            OperationKind::Stop => self.gateway.stop_instance(zone, name)?,
        };

        let job = self
            .store
            .create_parent(NewParentJob::for_operation(name, zone, kind, &operation))?;

        tracing::info!(
            job_id = %job.id,
            zone,
            instance = name,
            kind = %kind,
            operation = %operation.name,
            "command accepted"
        );

        let request = TrackRequest {
            job_id: job.id,
            zone: zone.to_string(),
            operation: operation.name.clone(),
            recipient: self.recipient.clone(),
        };
        if let Err(err) = self.supervisor.track(request) {
            self.reject(job, &operation, &err);
            return Err(err.into());
        }

        Ok(Submitted { job, operation })
    }

    /// Close out a parent that no tracker took (supervisor stopped between
    /// the readiness check and the hand-off).
    fn reject(&self, mut job: ParentJob, operation: &OperationRecord, err: &SupervisorError) {
        tracing::error!(job_id = %job.id, operation = %operation.name, error = %err, "tracking rejected");
        job.mark_failed(FailureReason::new(
            FailureKind::TrackingRejected,
            format!("operation {} issued but not tracked: {}", operation.name, err),
        ));
        if let Err(store_err) = self.store.update_parent(&job) {
            tracing::error!(job_id = %job.id, error = %store_err, "could not record rejected job");
        }
    }

    /// Resume tracking an existing job against a known operation handle
    pub fn resume(&self, id: JobId, zone: &str, operation: &str) -> ServiceResult<ParentJob> {
        require("operation", operation)?;
        let job = self
            .store
            .get_parent(id, zone)?
            .ok_or_else(|| ServiceError::JobNotFound {
                id,
                zone: zone.to_string(),
            })?;

        self.supervisor.track(TrackRequest {
            job_id: job.id,
            zone: zone.to_string(),
            operation: operation.to_string(),
            recipient: self.recipient.clone(),
        })?;

        Ok(job)
    }

    pub fn instance_status(&self, zone: &str, name: &str) -> ServiceResult<InstanceStatus> {
        require("zone", zone)?;
        require("instance name", name)?;
        Ok(self.gateway.get_instance_status(zone, name)?)
    }

    /// Every instance across zones, zone order then provider order,
    /// optionally only those in `status`
    pub fn list_instances(&self, status: Option<InstanceStatus>) -> ServiceResult<Vec<InstanceSummary>> {
        let by_zone = self.gateway.list_instances()?;
        Ok(by_zone
            .values()
            .flat_map(|instances| instances.iter())
            .filter(|instance| status.map_or(true, |s| instance.status == s))
            .map(InstanceSummary::from)
            .collect())
    }

    /// Start/stop operations on an instance. Without a filter only
    /// PENDING and RUNNING ones are returned: the handles worth resuming.
    pub fn instance_operations(
        &self,
        zone: &str,
        name: &str,
        status: Option<OperationStatus>,
    ) -> ServiceResult<Vec<OperationRecord>> {
        require("zone", zone)?;
        require("instance name", name)?;
        let statuses = match status {
            Some(status) => vec![status],
            None => vec![OperationStatus::Pending, OperationStatus::Running],
        };
        Ok(self.gateway.instance_operations(zone, name, &statuses)?)
    }

    pub fn job(&self, id: JobId, zone: &str) -> ServiceResult<ParentJobView> {
        self.store
            .view(id, zone)?
            .ok_or_else(|| ServiceError::JobNotFound {
                id,
                zone: zone.to_string(),
            })
    }

    pub fn jobs(&self) -> ServiceResult<Vec<ParentJob>> {
        Ok(self.store.list_parents()?)
    }
}

fn require(what: &str, value: &str) -> ServiceResult<()> {
    if value.trim().is_empty() {
        return Err(ServiceError::InvalidArgument(format!("{} must not be empty", what)));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::{FailureConfig, MockCall, MockProvider};
    use crate::notify::RecordingNotifier;
    use crate::store::MemoryJobStore;
    use crate::tracking::{OperationTracker, TrackerConfig};
    use std::time::Duration;

    fn service(provider: &MockProvider) -> (LifecycleService, Arc<MemoryJobStore>) {
        let store = Arc::new(MemoryJobStore::new());
        let tracker = OperationTracker::new(
            Arc::new(provider.clone()),
            store.clone(),
            Arc::new(RecordingNotifier::new()),
            TrackerConfig {
                poll_interval: Duration::from_millis(1),
                overall_timeout: None,
                ..TrackerConfig::default()
            },
        );
        let supervisor = SupervisorHandle::spawn(Arc::new(tracker)).unwrap();
        let svc = LifecycleService::new(Arc::new(provider.clone()), store.clone(), supervisor, "ops@example.com");
        (svc, store)
    }

    #[test]
    fn test_empty_arguments_rejected() {
        let provider = MockProvider::new();
        let (svc, _) = service(&provider);
        assert!(matches!(
            svc.start_instance("", "web-1"),
            Err(ServiceError::InvalidArgument(_))
        ));
        assert!(provider.issued().is_empty());
        svc.supervisor().shutdown().unwrap();
    }

    #[test]
    fn test_rejected_command_creates_no_job() {
        let provider = MockProvider::new();
        provider.inject(MockCall::Stop, FailureConfig::unauthorized());
        let (svc, store) = service(&provider);

        assert!(matches!(
            svc.stop_instance("us-central1-a", "web-1"),
            Err(ServiceError::Gateway(GatewayError::Unauthorized(_)))
        ));
        assert!(store.list_parents().unwrap().is_empty());
        svc.supervisor().shutdown().unwrap();
    }

    #[test]
    fn test_stopped_supervisor_issues_nothing() {
        let provider = MockProvider::new();
        let (svc, store) = service(&provider);
        svc.supervisor().shutdown().unwrap();

        assert!(matches!(
            svc.start_instance("us-central1-a", "web-1"),
            Err(ServiceError::Supervisor(SupervisorError::Stopped))
        ));
        assert!(provider.issued().is_empty());
        assert!(store.list_parents().unwrap().is_empty());
    }

    #[test]
    fn test_unknown_job() {
        let provider = MockProvider::new();
        let (svc, _) = service(&provider);
        assert!(matches!(
            svc.job(JobId(9), "us-central1-a"),
            Err(ServiceError::JobNotFound { .. })
        ));
        svc.supervisor().shutdown().unwrap();
    }
}
