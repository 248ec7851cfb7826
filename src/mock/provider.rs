//! Scripted mock provider

use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::{Arc, Mutex};

use instance_ops_model::{
    InstanceRecord, InstanceStatus, InstanceTimestamps, OperationKind, OperationRecord,
    OperationStatus, OperationTimestamps,
};

use crate::gateway::{GatewayError, GatewayResult, ProviderGateway};

use super::failure::{FailureConfig, FailureInjector, MockCall};

/// Status progression and outcome for one mock operation
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OperationScript {
    /// Statuses returned by successive polls; the last one repeats
    pub statuses: Vec<OperationStatus>,
    /// Kind reported by the provider (None = the kind that was issued)
    pub observed_kind: Option<OperationKind>,
    /// Provider error attached to the finished operation
    pub error: Option<String>,
}

impl OperationScript {
    pub fn new(statuses: Vec<OperationStatus>) -> Self {
        Self {
            statuses,
            observed_kind: None,
            error: None,
        }
    }

    /// PENDING once, then DONE
    pub fn quick() -> Self {
        Self::new(vec![OperationStatus::Pending, OperationStatus::Done])
    }

    /// Report a different kind than the one issued
    pub fn observed_as(mut self, kind: OperationKind) -> Self {
        self.observed_kind = Some(kind);
        self
    }

    pub fn with_error(mut self, error: impl Into<String>) -> Self {
        self.error = Some(error.into());
        self
    }
}

/// A start/stop command received by the mock
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IssuedCommand {
    pub kind: OperationKind,
    pub zone: String,
    pub instance: String,
    pub handle: String,
}

#[derive(Debug)]
struct MockOperation {
    kind: OperationKind,
    zone: String,
    target: Option<String>,
    statuses: VecDeque<OperationStatus>,
    error: Option<String>,
    insert_time: String,
}

impl MockOperation {
    /// Advance one poll and render the provider view
    fn poll(&mut self, name: &str) -> OperationRecord {
        let status = if self.statuses.len() > 1 {
            self.statuses.pop_front().unwrap_or(OperationStatus::Done)
        } else {
            self.statuses.front().copied().unwrap_or(OperationStatus::Done)
        };
        self.render(name, status)
    }

    /// What the next poll would report, without advancing the script
    fn peek(&self, name: &str) -> OperationRecord {
        let status = self.statuses.front().copied().unwrap_or(OperationStatus::Done);
        self.render(name, status)
    }

    fn render(&self, name: &str, status: OperationStatus) -> OperationRecord {
        let started = status != OperationStatus::Pending;
        let done = status == OperationStatus::Done;
        OperationRecord {
            name: name.to_string(),
            kind: self.kind,
            status,
            zone: self.zone.clone(),
            target: self.target.clone(),
            error: if done { self.error.clone() } else { None },
            timestamps: OperationTimestamps {
                insert_time: self.insert_time.clone(),
                start_time: started.then(|| self.insert_time.replace(":00Z", ":01Z")),
                end_time: done.then(|| self.insert_time.replace(":00Z", ":05Z")),
            },
        }
    }
}

#[derive(Debug, Default)]
struct MockState {
    operations: HashMap<String, MockOperation>,
    issue_queue: VecDeque<OperationScript>,
    instances: BTreeMap<String, Vec<InstanceRecord>>,
    issued: Vec<IssuedCommand>,
    calls: HashMap<MockCall, u32>,
    counter: u64,
}

impl MockState {
    fn next_insert_time(&mut self) -> String {
        self.counter += 1;
        format!("2024-05-01T10:{:02}:00Z", self.counter % 60)
    }

    fn set_instance_status(&mut self, zone: &str, name: &str, status: InstanceStatus) {
        if let Some(instances) = self.instances.get_mut(zone) {
            for instance in instances.iter_mut().filter(|i| i.name == name) {
                instance.status = status;
            }
        }
    }
}

/// Configurable mock provider for testing
#[derive(Clone, Default)]
pub struct MockProvider {
    state: Arc<Mutex<MockState>>,
    failures: Arc<Mutex<FailureInjector>>,
}

impl MockProvider {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an operation that already exists at the provider
    pub fn add_operation(
        &self,
        handle: &str,
        zone: &str,
        issued_kind: OperationKind,
        script: OperationScript,
    ) {
        let mut state = self.state.lock().unwrap();
        let insert_time = state.next_insert_time();
        state.operations.insert(
            handle.to_string(),
            MockOperation {
                kind: script.observed_kind.unwrap_or(issued_kind),
                zone: zone.to_string(),
                target: None,
                statuses: script.statuses.into_iter().collect(),
                error: script.error,
                insert_time,
            },
        );
    }

    /// Script the operation created by the next start/stop command
    pub fn queue_issue(&self, script: OperationScript) {
        self.state.lock().unwrap().issue_queue.push_back(script);
    }

    pub fn add_instance(&self, zone: &str, name: &str, status: InstanceStatus) {
        let mut state = self.state.lock().unwrap();
        let record = InstanceRecord {
            name: name.to_string(),
            status,
            zone: zone.to_string(),
            machine_type: "e2-medium".to_string(),
            timestamps: InstanceTimestamps {
                creation: "2024-01-01T00:00:00Z".to_string(),
                deletion: None,
                last_start: None,
                last_stop: None,
            },
        };
        state.instances.entry(zone.to_string()).or_default().push(record);
    }

    pub fn inject(&self, call: MockCall, config: FailureConfig) {
        self.failures.lock().unwrap().inject(call, config);
    }

    pub fn clear_failures(&self) {
        self.failures.lock().unwrap().clear();
    }

    /// Number of times a gateway call was made (failed calls included)
    pub fn call_count(&self, call: MockCall) -> u32 {
        self.state
            .lock()
            .unwrap()
            .calls
            .get(&call)
            .copied()
            .unwrap_or(0)
    }

    /// Start/stop commands accepted so far, in order
    pub fn issued(&self) -> Vec<IssuedCommand> {
        self.state.lock().unwrap().issued.clone()
    }

    fn record_call(&self, call: MockCall) -> GatewayResult<()> {
        *self.state.lock().unwrap().calls.entry(call).or_insert(0) += 1;
        match self.failures.lock().unwrap().check(call) {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    fn issue(&self, kind: OperationKind, zone: &str, name: &str) -> GatewayResult<OperationRecord> {
        let call = match kind {
            OperationKind::Start => MockCall::Start,
            OperationKind::Stop => MockCall::Stop,
        };
        self.record_call(call)?;

        let mut state = self.state.lock().unwrap();
        let script = state.issue_queue.pop_front().unwrap_or_else(OperationScript::quick);
        let insert_time = state.next_insert_time();
        let handle = format!("operation-{}-{}", kind, state.counter);

        let operation = MockOperation {
            kind: script.observed_kind.unwrap_or(kind),
            zone: zone.to_string(),
            target: Some(name.to_string()),
            statuses: script.statuses.into_iter().collect(),
            error: script.error,
            insert_time,
        };
        let record = operation.render(&handle, OperationStatus::Pending);
        state.operations.insert(handle.clone(), operation);

        let transitional = match kind {
            OperationKind::Start => InstanceStatus::Staging,
            OperationKind::Stop => InstanceStatus::Stopping,
        };
        state.set_instance_status(zone, name, transitional);
        state.issued.push(IssuedCommand {
            kind,
            zone: zone.to_string(),
            instance: name.to_string(),
            handle,
        });

        Ok(record)
    }
}

impl ProviderGateway for MockProvider {
    fn start_instance(&self, zone: &str, name: &str) -> GatewayResult<OperationRecord> {
        self.issue(OperationKind::Start, zone, name)
    }

    fn stop_instance(&self, zone: &str, name: &str) -> GatewayResult<OperationRecord> {
        self.issue(OperationKind::Stop, zone, name)
    }

    fn get_operation(&self, zone: &str, handle: &str) -> GatewayResult<OperationRecord> {
        self.record_call(MockCall::GetOperation)?;

        let mut state = self.state.lock().unwrap();
        let operation = state
            .operations
            .get_mut(handle)
            .filter(|op| op.zone == zone)
            .ok_or_else(|| GatewayError::NotFound(format!("operation {} in {}", handle, zone)))?;
        let record = operation.poll(handle);

        if record.is_done() && record.error.is_none() {
            if let Some(ref target) = record.target {
                let settled = match record.kind {
                    OperationKind::Start => InstanceStatus::Running,
                    OperationKind::Stop => InstanceStatus::Terminated,
                };
                state.set_instance_status(zone, target, settled);
            }
        }

        Ok(record)
    }

    fn get_instance_status(&self, zone: &str, name: &str) -> GatewayResult<InstanceStatus> {
        self.record_call(MockCall::GetInstanceStatus)?;

        let state = self.state.lock().unwrap();
        state
            .instances
            .get(zone)
            .and_then(|instances| instances.iter().find(|i| i.name == name))
            .map(|i| i.status)
            .ok_or_else(|| GatewayError::NotFound(format!("instance {} in {}", name, zone)))
    }

    fn list_instances(&self) -> GatewayResult<BTreeMap<String, Vec<InstanceRecord>>> {
        self.record_call(MockCall::ListInstances)?;
        Ok(self.state.lock().unwrap().instances.clone())
    }

    fn instance_operations(
        &self,
        zone: &str,
        name: &str,
        statuses: &[OperationStatus],
    ) -> GatewayResult<Vec<OperationRecord>> {
        self.record_call(MockCall::ListOperations)?;

        let state = self.state.lock().unwrap();
        let mut operations: Vec<OperationRecord> = state
            .operations
            .iter()
            .filter(|(_, op)| op.zone == zone && op.target.as_deref() == Some(name))
            .map(|(handle, op)| op.peek(handle))
            .filter(|op| statuses.is_empty() || statuses.contains(&op.status))
            .collect();
        operations.sort_by(|a, b| {
            (&a.timestamps.insert_time, &a.name).cmp(&(&b.timestamps.insert_time, &b.name))
        });
        Ok(operations)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const ZONE: &str = "us-central1-a";

    #[test]
    fn test_scripted_progression_repeats_last() {
        let provider = MockProvider::new();
        provider.add_operation(
            "op-1",
            ZONE,
            OperationKind::Start,
            OperationScript::new(vec![OperationStatus::Pending, OperationStatus::Running, OperationStatus::Done]),
        );

        let statuses: Vec<_> = (0..4)
            .map(|_| provider.get_operation(ZONE, "op-1").unwrap().status)
            .collect();
        assert_eq!(
            statuses,
            vec![
                OperationStatus::Pending,
                OperationStatus::Running,
                OperationStatus::Done,
                OperationStatus::Done
            ]
        );
        assert_eq!(provider.call_count(MockCall::GetOperation), 4);
    }

    #[test]
    fn test_unknown_handle_or_zone_not_found() {
        let provider = MockProvider::new();
        provider.add_operation("op-1", ZONE, OperationKind::Stop, OperationScript::quick());
        assert!(matches!(
            provider.get_operation(ZONE, "op-2"),
            Err(GatewayError::NotFound(_))
        ));
        assert!(matches!(
            provider.get_operation("europe-west1-b", "op-1"),
            Err(GatewayError::NotFound(_))
        ));
    }

    #[test]
    fn test_issue_uses_queued_script() {
        let provider = MockProvider::new();
        provider.queue_issue(OperationScript::quick().observed_as(OperationKind::Stop));

        let op = provider.start_instance(ZONE, "web-1").unwrap();
        assert_eq!(op.status, OperationStatus::Pending);
        assert_eq!(op.kind, OperationKind::Stop);

        let second = provider.start_instance(ZONE, "web-1").unwrap();
        assert_eq!(second.kind, OperationKind::Start);
        assert_ne!(op.name, second.name);
        assert_eq!(provider.issued().len(), 2);
    }

    #[test]
    fn test_instance_status_follows_operations() {
        let provider = MockProvider::new();
        provider.add_instance(ZONE, "web-1", InstanceStatus::Terminated);

        let op = provider.start_instance(ZONE, "web-1").unwrap();
        assert_eq!(provider.get_instance_status(ZONE, "web-1").unwrap(), InstanceStatus::Staging);

        provider.get_operation(ZONE, &op.name).unwrap();
        provider.get_operation(ZONE, &op.name).unwrap();
        assert_eq!(provider.get_instance_status(ZONE, "web-1").unwrap(), InstanceStatus::Running);
    }

    #[test]
    fn test_instance_operations_filter_by_target_and_status() {
        let provider = MockProvider::new();
        provider.queue_issue(OperationScript::new(vec![OperationStatus::Running]));
        let running = provider.start_instance(ZONE, "web-1").unwrap();
        let finished = provider.stop_instance(ZONE, "web-1").unwrap();
        provider.start_instance(ZONE, "web-2").unwrap();
        // Advance the second command to DONE
        provider.get_operation(ZONE, &finished.name).unwrap();

        let all = provider.instance_operations(ZONE, "web-1", &[]).unwrap();
        let names: Vec<_> = all.iter().map(|op| op.name.clone()).collect();
        assert_eq!(names, vec![running.name.clone(), finished.name.clone()]);

        let in_flight = provider
            .instance_operations(ZONE, "web-1", &[OperationStatus::Running])
            .unwrap();
        assert_eq!(in_flight.len(), 1);
        assert_eq!(in_flight[0].name, running.name);
        assert!(provider
            .instance_operations("europe-west1-b", "web-1", &[])
            .unwrap()
            .is_empty());
    }

    #[test]
    fn test_injected_failure() {
        let provider = MockProvider::new();
        provider.inject(MockCall::Start, FailureConfig::unauthorized().with_fail_count(1));
        assert!(provider.start_instance(ZONE, "web-1").is_err());
        assert!(provider.start_instance(ZONE, "web-1").is_ok());
        assert_eq!(provider.call_count(MockCall::Start), 2);
        assert_eq!(provider.issued().len(), 1);
    }

    #[test]
    fn test_done_timestamps_populated() {
        let provider = MockProvider::new();
        let op = provider.stop_instance(ZONE, "web-1").unwrap();
        assert!(op.timestamps.start_time.is_none());
        provider.get_operation(ZONE, &op.name).unwrap();
        let done = provider.get_operation(ZONE, &op.name).unwrap();
        assert!(done.is_done());
        assert!(done.timestamps.ended_at().is_some());
    }
}
