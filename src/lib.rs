//! Instance Ops - start/stop cloud instances and track them to completion
//!
//! A start or stop request is issued to the provider, recorded as a parent
//! job, and followed by a tracker until the provider confirms the requested
//! outcome. When the provider completes a different operation than the one
//! asked for, the command is re-issued (recorded as a child job) within a
//! bounded retry budget.

pub mod cancel;
pub mod config;
pub mod gateway;
pub mod logging;
pub mod mock;
pub mod notify;
pub mod service;
pub mod signal;
pub mod state;
pub mod store;
pub mod supervisor;
pub mod timeout;
pub mod tracking;

pub use instance_ops_model as model;

pub use cancel::{CancelReason, CancelToken};
pub use config::{ConfigError, EffectiveConfig, Settings};
pub use gateway::{ErrorClass, GatewayError, GcloudGateway, ProviderGateway};
pub use notify::{LogNotifier, Notification, Notifier, NotifyError, RecordingNotifier, SendmailNotifier};
pub use service::{LifecycleService, ServiceError, Submitted};
pub use state::{TerminalState, TrackingState, TrackingStateData, TransitionError};
pub use store::{FileJobStore, JobStore, MemoryJobStore, StoreError};
pub use supervisor::{SupervisorError, SupervisorHandle};
pub use tracking::{NotifyKindPolicy, OperationTracker, TrackRequest, TrackerConfig, TrackingOutcome};
