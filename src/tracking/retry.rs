//! Re-issue of a parent's requested command
//!
//! When an operation finishes as something other than what the parent asked
//! for, the requested command is sent again and the attempt is recorded as a
//! child job of the parent.

use instance_ops_model::{ChildJob, NewChildJob, OperationKind, OperationRecord, ParentJob};

use crate::gateway::{GatewayError, ProviderGateway};
use crate::store::{JobStore, StoreError};

#[derive(Debug, thiserror::Error)]
pub enum RetryError {
    #[error("Re-issue of {kind} for {instance} failed: {source}")]
    Command {
        kind: OperationKind,
        instance: String,
        #[source]
        source: GatewayError,
    },

    #[error("Failed to record retry attempt: {0}")]
    Store(#[from] StoreError),
}

/// The new operation and the child job that tracks it
#[derive(Debug, Clone)]
pub struct Reissued {
    pub operation: OperationRecord,
    pub child: ChildJob,
}

pub struct RetryIssuer<'a> {
    gateway: &'a dyn ProviderGateway,
    store: &'a dyn JobStore,
}

impl<'a> RetryIssuer<'a> {
    pub fn new(gateway: &'a dyn ProviderGateway, store: &'a dyn JobStore) -> Self {
        Self { gateway, store }
    }

    /// Send the parent's requested command again and record a child job.
    ///
    /// Nothing is written when the command fails.
    pub fn reissue(&self, parent: &ParentJob) -> Result<Reissued, RetryError> {
        let result = match parent.kind {
            OperationKind::Start => self.gateway.start_instance(&parent.zone, &parent.name),
            OperationKind::Stop => self.gateway.stop_instance(&parent.zone, &parent.name),
        };
        let operation = result.map_err(|source| RetryError::Command {
            kind: parent.kind,
            instance: parent.name.clone(),
            source,
        })?;

        let child = self
            .store
            .create_child(NewChildJob::for_retry(parent.id, &operation))?;

        tracing::info!(
            job_id = %parent.id,
            child_id = %child.id,
            operation = %operation.name,
            kind = %parent.kind,
            "re-issued command"
        );

        Ok(Reissued { operation, child })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::{FailureConfig, MockCall, MockProvider};
    use crate::store::MemoryJobStore;
    use instance_ops_model::{JobStatus, NewParentJob};

    const ZONE: &str = "us-central1-a";

    fn parent(store: &MemoryJobStore, kind: OperationKind) -> ParentJob {
        store
            .create_parent(NewParentJob {
                name: "web-1".to_string(),
                zone: ZONE.to_string(),
                status: JobStatus::Pending,
                kind,
            })
            .unwrap()
    }

    #[test]
    fn test_reissue_sends_requested_kind() {
        let provider = MockProvider::new();
        let store = MemoryJobStore::new();
        let parent = parent(&store, OperationKind::Stop);

        let reissued = RetryIssuer::new(&provider, &store).reissue(&parent).unwrap();

        let issued = provider.issued();
        assert_eq!(issued.len(), 1);
        assert_eq!(issued[0].kind, OperationKind::Stop);
        assert_eq!(issued[0].instance, "web-1");
        assert_eq!(reissued.child.parent_id, parent.id);
        assert_eq!(reissued.child.operation, reissued.operation.name);
        assert!(!reissued.child.is_successful);
        assert_eq!(store.children_of(parent.id).unwrap().len(), 1);
    }

    #[test]
    fn test_failed_command_writes_nothing() {
        let provider = MockProvider::new();
        provider.inject(MockCall::Start, FailureConfig::unauthorized());
        let store = MemoryJobStore::new();
        let parent = parent(&store, OperationKind::Start);

        let err = RetryIssuer::new(&provider, &store).reissue(&parent).unwrap_err();

        assert!(matches!(err, RetryError::Command { kind: OperationKind::Start, .. }));
        assert!(store.children_of(parent.id).unwrap().is_empty());
    }
}
