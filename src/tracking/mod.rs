//! Operation tracking
//!
//! One tracker run follows one parent job from its issued operation to a
//! terminal state:
//!
//! 1. Poll the current operation handle every `poll_interval`.
//! 2. Persist the parent's status whenever the observed status changes.
//! 3. On DONE, compare the observed kind with the parent's requested kind.
//!    A match marks the parent successful. A mismatch (or a DONE carrying a
//!    provider error) re-issues the requested command as a child job and
//!    polling continues on the new handle.
//! 4. Stop on success, failure, deadline or cancellation.
//!
//! Transient gateway errors during polling are retried in place and never
//! consume the retry budget. Notification failures are logged and ignored.

mod retry;

pub use retry::{Reissued, RetryError, RetryIssuer};

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use instance_ops_model::{
    ChildJob, FailureKind, FailureReason, JobId, OperationKind, OperationRecord,
    OperationStatus, ParentJob,
};

use crate::cancel::{CancelReason, CancelToken};
use crate::gateway::{ErrorClass, ProviderGateway};
use crate::notify::{Notification, Notifier};
use crate::state::{TrackingState, TrackingStateData};
use crate::store::JobStore;
use crate::timeout::Deadline;

/// Which kind a completion notification reports
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NotifyKindPolicy {
    /// Notify on every DONE with the kind the provider reported
    #[default]
    Observed,
    /// Notify only when the requested kind completes, with that kind
    Requested,
}

impl fmt::Display for NotifyKindPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            NotifyKindPolicy::Observed => f.write_str("observed"),
            NotifyKindPolicy::Requested => f.write_str("requested"),
        }
    }
}

impl FromStr for NotifyKindPolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "observed" => Ok(NotifyKindPolicy::Observed),
            "requested" => Ok(NotifyKindPolicy::Requested),
            other => Err(format!("unknown notify kind policy: {}", other)),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TrackerConfig {
    pub poll_interval: Duration,
    /// Re-issues allowed after mismatched outcomes
    pub max_retries: u32,
    /// Transient poll failures in a row before the job fails
    pub max_consecutive_poll_errors: u32,
    pub overall_timeout: Option<Duration>,
    pub notify_kind: NotifyKindPolicy,
}

impl Default for TrackerConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(3),
            max_retries: 3,
            max_consecutive_poll_errors: 20,
            overall_timeout: Some(Duration::from_secs(1800)),
            notify_kind: NotifyKindPolicy::Observed,
        }
    }
}

/// What to track
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TrackRequest {
    pub job_id: JobId,
    pub zone: String,
    /// Provider handle of the issued operation
    pub operation: String,
    /// Notification recipient
    pub recipient: String,
}

/// Result of one tracker run
#[derive(Debug, Clone, Serialize)]
pub struct TrackingOutcome {
    pub job_id: JobId,
    pub state: TrackingState,
    pub path: Vec<TrackingState>,
    pub polls: u32,
    pub retries: u32,
    /// Child jobs created by this run, in order
    pub children: Vec<JobId>,
    /// Notifications delivered without error
    pub notifications: u32,
    /// Handle being polled when the run ended
    pub last_operation: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub failure: Option<FailureReason>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cancelled: Option<CancelReason>,
}

impl TrackingOutcome {
    pub fn succeeded(&self) -> bool {
        self.state == TrackingState::Succeeded
    }
}

/// Mutable bookkeeping for one run
struct Run {
    job_id: JobId,
    state: TrackingStateData,
    handle: String,
    child: Option<ChildJob>,
    last_status: Option<OperationStatus>,
    polls: u32,
    retries: u32,
    poll_errors: u32,
    children: Vec<JobId>,
    notifications: u32,
}

impl Run {
    fn new(request: &TrackRequest) -> Self {
        Self {
            job_id: request.job_id,
            state: TrackingStateData::new(),
            handle: request.operation.clone(),
            child: None,
            last_status: None,
            polls: 0,
            retries: 0,
            poll_errors: 0,
            children: Vec::new(),
            notifications: 0,
        }
    }

    fn advance(&mut self, target: TrackingState) {
        if let Err(err) = self.state.transition(target) {
            tracing::error!(job_id = %self.job_id, error = %err, "tracking state rejected");
        }
    }

    fn finish(self, failure: Option<FailureReason>, cancelled: Option<CancelReason>) -> TrackingOutcome {
        TrackingOutcome {
            job_id: self.job_id,
            state: self.state.state,
            path: self.state.path(),
            polls: self.polls,
            retries: self.retries,
            children: self.children,
            notifications: self.notifications,
            last_operation: self.handle,
            failure,
            cancelled,
        }
    }
}

/// Result of handling one DONE observation
enum Step {
    Continue,
    Done(Option<FailureReason>),
}

pub struct OperationTracker {
    gateway: Arc<dyn ProviderGateway>,
    store: Arc<dyn JobStore>,
    notifier: Arc<dyn Notifier>,
    config: TrackerConfig,
}

impl OperationTracker {
    pub fn new(
        gateway: Arc<dyn ProviderGateway>,
        store: Arc<dyn JobStore>,
        notifier: Arc<dyn Notifier>,
        config: TrackerConfig,
    ) -> Self {
        Self {
            gateway,
            store,
            notifier,
            config,
        }
    }

    pub fn config(&self) -> &TrackerConfig {
        &self.config
    }

    /// Track one parent job until it reaches a terminal state.
    ///
    /// Every failure is recorded on the parent (where the store allows) and
    /// reported in the outcome. A cancelled run leaves the parent as it was
    /// last written.
    pub fn track(&self, request: &TrackRequest, cancel: &CancelToken) -> TrackingOutcome {
        let span = tracing::info_span!(
            "track",
            job_id = %request.job_id,
            zone = %request.zone,
        );
        let _enter = span.enter();

        tracing::info!(operation = %request.operation, "tracking started");

        let deadline = Deadline::new(self.config.overall_timeout);
        let mut run = Run::new(request);

        let outcome = loop {
            if let Some(reason) = cancel.reason() {
                break self.cancelled(run, reason);
            }
            if deadline.expired() {
                let reason = FailureReason::new(
                    FailureKind::Timeout,
                    format!("no outcome after {}s", deadline.elapsed().as_secs()),
                );
                break self.fail(request, run, reason);
            }

            run.polls += 1;
            let op = match self.gateway.get_operation(&request.zone, &run.handle) {
                Ok(op) => {
                    run.poll_errors = 0;
                    op
                }
                Err(err) if err.class() == ErrorClass::Transient => {
                    run.poll_errors += 1;
                    tracing::warn!(
                        operation = %run.handle,
                        error = %err,
                        consecutive = run.poll_errors,
                        "poll failed"
                    );
                    if run.poll_errors > self.config.max_consecutive_poll_errors {
                        let reason = FailureReason::new(
                            FailureKind::PollErrorsExhausted,
                            format!("{} consecutive poll failures, last: {}", run.poll_errors, err),
                        );
                        break self.fail(request, run, reason);
                    }
                    run.advance(TrackingState::Polling);
                    if let Some(reason) = cancel.sleep(deadline.next_wait(self.config.poll_interval)) {
                        break self.cancelled(run, reason);
                    }
                    continue;
                }
                Err(err) => {
                    let reason = FailureReason::new(FailureKind::FatalGatewayError, err.to_string());
                    break self.fail(request, run, reason);
                }
            };

            tracing::debug!(operation = %op.name, status = ?op.status, kind = %op.kind, "polled");

            if !op.is_done() {
                if let Err(reason) = self.record_progress(request, &mut run, op.status) {
                    break self.fail(request, run, reason);
                }
                run.advance(TrackingState::Polling);
                if let Some(reason) = cancel.sleep(deadline.next_wait(self.config.poll_interval)) {
                    break self.cancelled(run, reason);
                }
                continue;
            }

            match self.on_done(request, &mut run, &op) {
                Ok(Step::Continue) => {
                    if let Some(reason) = cancel.sleep(deadline.next_wait(self.config.poll_interval)) {
                        break self.cancelled(run, reason);
                    }
                }
                Ok(Step::Done(failure)) => break run.finish(failure, None),
                Err(reason) => break self.fail(request, run, reason),
            }
        };

        tracing::info!(
            state = ?outcome.state,
            polls = outcome.polls,
            retries = outcome.retries,
            children = outcome.children.len(),
            "tracking finished"
        );
        outcome
    }

    fn parent(&self, request: &TrackRequest) -> Result<ParentJob, FailureReason> {
        match self.store.get_parent(request.job_id, &request.zone) {
            Ok(Some(parent)) => Ok(parent),
            Ok(None) => Err(FailureReason::new(
                FailureKind::StoreWriteFailure,
                format!("parent job {} not found in {}", request.job_id, request.zone),
            )),
            Err(err) => Err(FailureReason::new(FailureKind::StoreWriteFailure, err.to_string())),
        }
    }

    /// Persist a PENDING/RUNNING observation when it differs from the last one
    fn record_progress(
        &self,
        request: &TrackRequest,
        run: &mut Run,
        status: OperationStatus,
    ) -> Result<(), FailureReason> {
        if run.last_status == Some(status) {
            return Ok(());
        }
        run.last_status = Some(status);

        let mut parent = self.parent(request)?;
        if parent.observe(status) {
            self.store
                .update_parent(&parent)
                .map_err(|err| FailureReason::new(FailureKind::StoreWriteFailure, err.to_string()))?;
            tracing::debug!(status = %parent.status, "parent status updated");
        }
        Ok(())
    }

    fn on_done(
        &self,
        request: &TrackRequest,
        run: &mut Run,
        op: &OperationRecord,
    ) -> Result<Step, FailureReason> {
        run.last_status = Some(op.status);

        let mut parent = self.parent(request)?;
        if parent.is_successful {
            // Already recorded by an earlier run
            tracing::info!(operation = %op.name, "parent already successful");
            run.advance(TrackingState::Succeeded);
            return Ok(Step::Done(None));
        }
        if let Some(failure) = parent.failure.clone() {
            tracing::warn!(failure = %failure, "parent already failed");
            run.advance(TrackingState::Failed);
            return Ok(Step::Done(Some(failure)));
        }

        let matched = op.completed_as(parent.kind);

        if let Some(mut child) = run.child.take() {
            child.complete(op, matched);
            self.store
                .update_child(&child)
                .map_err(|err| FailureReason::new(FailureKind::StoreWriteFailure, err.to_string()))?;
        }

        self.notify(request, run, parent.kind, op);

        if matched {
            parent.mark_succeeded();
            self.store
                .update_parent(&parent)
                .map_err(|err| FailureReason::new(FailureKind::StoreWriteFailure, err.to_string()))?;
            tracing::info!(operation = %op.name, kind = %op.kind, "requested operation completed");
            run.advance(TrackingState::Succeeded);
            return Ok(Step::Done(None));
        }

        tracing::warn!(
            operation = %op.name,
            observed = %op.kind,
            requested = %parent.kind,
            provider_error = op.error.as_deref().unwrap_or(""),
            "operation finished without the requested outcome"
        );

        run.advance(TrackingState::Retrying);
        if run.retries >= self.config.max_retries {
            return Err(FailureReason::new(
                FailureKind::RetryBudgetExhausted,
                format!(
                    "{} still not confirmed after {} re-issues",
                    parent.kind, run.retries
                ),
            ));
        }

        let issuer = RetryIssuer::new(self.gateway.as_ref(), self.store.as_ref());
        let reissued = issuer.reissue(&parent).map_err(|err| match err {
            RetryError::Command { .. } => {
                FailureReason::new(FailureKind::RetryIssueFailed, err.to_string())
            }
            RetryError::Store(_) => FailureReason::new(FailureKind::StoreWriteFailure, err.to_string()),
        })?;

        run.retries += 1;
        run.children.push(reissued.child.id);
        run.handle = reissued.operation.name;
        run.child = Some(reissued.child);
        run.last_status = None;
        run.advance(TrackingState::Polling);

        Ok(Step::Continue)
    }

    fn notify(&self, request: &TrackRequest, run: &mut Run, requested: OperationKind, op: &OperationRecord) {
        let kind = match self.config.notify_kind {
            NotifyKindPolicy::Observed => op.kind,
            NotifyKindPolicy::Requested if op.completed_as(requested) => requested,
            NotifyKindPolicy::Requested => return,
        };

        let notification = Notification::completed(&request.recipient, kind);
        match self.notifier.send(&notification) {
            Ok(()) => run.notifications += 1,
            Err(err) => {
                tracing::warn!(recipient = %request.recipient, kind = %kind, error = %err, "notification failed");
            }
        }
    }

    /// Record a run that ended abnormally (the tracker panicked)
    pub fn abort(&self, request: &TrackRequest, message: &str) -> TrackingOutcome {
        let reason = FailureReason::new(FailureKind::TrackerAborted, message);
        self.fail(request, Run::new(request), reason)
    }

    /// Mark the parent FAILED (best effort) and end the run
    fn fail(&self, request: &TrackRequest, mut run: Run, reason: FailureReason) -> TrackingOutcome {
        tracing::error!(failure = %reason, operation = %run.handle, "tracking failed");

        match self.store.get_parent(request.job_id, &request.zone) {
            Ok(Some(mut parent)) if !parent.is_terminal() => {
                parent.mark_failed(reason.clone());
                if let Err(err) = self.store.update_parent(&parent) {
                    tracing::error!(error = %err, "could not record failure on parent");
                }
            }
            Ok(Some(_)) => {}
            Ok(None) => tracing::warn!("parent job missing; failure not recorded"),
            Err(err) => tracing::error!(error = %err, "could not load parent to record failure"),
        }

        run.advance(TrackingState::Failed);
        run.finish(Some(reason), None)
    }

    fn cancelled(&self, mut run: Run, reason: CancelReason) -> TrackingOutcome {
        tracing::info!(reason = ?reason, operation = %run.handle, "tracking cancelled");
        run.advance(TrackingState::Cancelled);
        run.finish(None, Some(reason))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::{FailureConfig, MockCall, MockProvider, OperationScript};
    use crate::notify::RecordingNotifier;
    use crate::store::MemoryJobStore;
    use instance_ops_model::{JobStatus, NewParentJob};

    const ZONE: &str = "us-central1-a";

    struct Harness {
        provider: MockProvider,
        store: Arc<MemoryJobStore>,
        notifier: RecordingNotifier,
    }

    impl Harness {
        fn new() -> Self {
            Self {
                provider: MockProvider::new(),
                store: Arc::new(MemoryJobStore::new()),
                notifier: RecordingNotifier::new(),
            }
        }

        fn tracker(&self, config: TrackerConfig) -> OperationTracker {
            OperationTracker::new(
                Arc::new(self.provider.clone()),
                self.store.clone(),
                Arc::new(self.notifier.clone()),
                config,
            )
        }

        fn parent(&self, kind: OperationKind, handle: &str, script: OperationScript) -> TrackRequest {
            self.provider.add_operation(handle, ZONE, kind, script);
            let job = self
                .store
                .create_parent(NewParentJob {
                    name: "web-1".to_string(),
                    zone: ZONE.to_string(),
                    status: JobStatus::Pending,
                    kind,
                })
                .unwrap();
            TrackRequest {
                job_id: job.id,
                zone: ZONE.to_string(),
                operation: handle.to_string(),
                recipient: "ops@example.com".to_string(),
            }
        }
    }

    fn fast() -> TrackerConfig {
        TrackerConfig {
            poll_interval: Duration::from_millis(1),
            overall_timeout: None,
            ..TrackerConfig::default()
        }
    }

    #[test]
    fn test_running_status_persisted() {
        let h = Harness::new();
        let request = h.parent(
            OperationKind::Start,
            "op-1",
            OperationScript::new(vec![
                OperationStatus::Running,
                OperationStatus::Running,
                OperationStatus::Done,
            ]),
        );

        let outcome = h.tracker(fast()).track(&request, &CancelToken::new());

        assert!(outcome.succeeded());
        assert_eq!(outcome.polls, 3);
        assert_eq!(outcome.path, vec![TrackingState::Polling, TrackingState::Succeeded]);
    }

    #[test]
    fn test_requested_policy_skips_mismatch_notification() {
        let h = Harness::new();
        let request = h.parent(
            OperationKind::Stop,
            "op-1",
            OperationScript::quick().observed_as(OperationKind::Start),
        );
        let config = TrackerConfig {
            notify_kind: NotifyKindPolicy::Requested,
            ..fast()
        };

        let outcome = h.tracker(config).track(&request, &CancelToken::new());

        assert!(outcome.succeeded());
        let sent = h.notifier.sent();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].kind, OperationKind::Stop);
    }

    #[test]
    fn test_zero_budget_fails_on_first_mismatch() {
        let h = Harness::new();
        let request = h.parent(
            OperationKind::Start,
            "op-1",
            OperationScript::quick().observed_as(OperationKind::Stop),
        );
        let config = TrackerConfig {
            max_retries: 0,
            ..fast()
        };

        let outcome = h.tracker(config).track(&request, &CancelToken::new());

        assert_eq!(outcome.state, TrackingState::Failed);
        assert_eq!(outcome.failure.unwrap().kind, FailureKind::RetryBudgetExhausted);
        assert!(h.provider.issued().is_empty());
        assert_eq!(
            outcome.path,
            vec![TrackingState::Polling, TrackingState::Retrying, TrackingState::Failed]
        );
    }

    #[test]
    fn test_fatal_poll_error_fails_immediately() {
        let h = Harness::new();
        let request = h.parent(OperationKind::Start, "op-1", OperationScript::quick());
        h.provider.inject(MockCall::GetOperation, FailureConfig::unauthorized());

        let outcome = h.tracker(fast()).track(&request, &CancelToken::new());

        assert_eq!(outcome.failure.unwrap().kind, FailureKind::FatalGatewayError);
        assert_eq!(outcome.polls, 1);
        let parent = h.store.get_parent(request.job_id, ZONE).unwrap().unwrap();
        assert_eq!(parent.status, JobStatus::Failed);
        assert!(!parent.is_successful);
    }

    #[test]
    fn test_poll_error_cap() {
        let h = Harness::new();
        let request = h.parent(OperationKind::Start, "op-1", OperationScript::quick());
        h.provider.inject(MockCall::GetOperation, FailureConfig::unavailable());
        let config = TrackerConfig {
            max_consecutive_poll_errors: 2,
            ..fast()
        };

        let outcome = h.tracker(config).track(&request, &CancelToken::new());

        assert_eq!(outcome.failure.unwrap().kind, FailureKind::PollErrorsExhausted);
        assert_eq!(outcome.polls, 3);
    }

    #[test]
    fn test_deadline_fails_job() {
        let h = Harness::new();
        let request = h.parent(
            OperationKind::Start,
            "op-1",
            OperationScript::new(vec![OperationStatus::Running]),
        );
        let config = TrackerConfig {
            overall_timeout: Some(Duration::from_millis(20)),
            ..fast()
        };

        let outcome = h.tracker(config).track(&request, &CancelToken::new());

        assert_eq!(outcome.failure.unwrap().kind, FailureKind::Timeout);
        let parent = h.store.get_parent(request.job_id, ZONE).unwrap().unwrap();
        assert_eq!(parent.status, JobStatus::Failed);
    }

    #[test]
    fn test_pre_cancelled_token_never_polls() {
        let h = Harness::new();
        let request = h.parent(OperationKind::Start, "op-1", OperationScript::quick());
        let token = CancelToken::new();
        token.cancel(CancelReason::Operator);

        let outcome = h.tracker(fast()).track(&request, &token);

        assert_eq!(outcome.state, TrackingState::Cancelled);
        assert_eq!(outcome.cancelled, Some(CancelReason::Operator));
        assert_eq!(outcome.polls, 0);
        let parent = h.store.get_parent(request.job_id, ZONE).unwrap().unwrap();
        assert_eq!(parent.status, JobStatus::Pending);
    }

    #[test]
    fn test_missing_parent_fails() {
        let h = Harness::new();
        h.provider.add_operation("op-1", ZONE, OperationKind::Start, OperationScript::quick());
        let request = TrackRequest {
            job_id: JobId(77),
            zone: ZONE.to_string(),
            operation: "op-1".to_string(),
            recipient: "ops@example.com".to_string(),
        };

        let outcome = h.tracker(fast()).track(&request, &CancelToken::new());

        assert_eq!(outcome.failure.unwrap().kind, FailureKind::StoreWriteFailure);
        assert_eq!(h.notifier.count(), 0);
    }

    #[test]
    fn test_notify_policy_parse() {
        assert_eq!("observed".parse::<NotifyKindPolicy>().unwrap(), NotifyKindPolicy::Observed);
        assert_eq!("requested".parse::<NotifyKindPolicy>().unwrap(), NotifyKindPolicy::Requested);
        assert!("always".parse::<NotifyKindPolicy>().is_err());
    }
}
