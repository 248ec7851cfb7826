//! Failure Injection for Mock Provider
//!
//! Supports configurable gateway failures for testing error paths.

use std::collections::HashMap;

use crate::gateway::GatewayError;

/// Gateway call a failure can be attached to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MockCall {
    Start,
    Stop,
    GetOperation,
    GetInstanceStatus,
    ListInstances,
    ListOperations,
}

/// Failure configuration for a call
#[derive(Debug, Clone)]
pub struct FailureConfig {
    /// Error to return
    pub error: GatewayError,
    /// Number of times to fail before succeeding (None = always fail)
    pub fail_count: Option<u32>,
}

impl FailureConfig {
    pub fn error(error: GatewayError) -> Self {
        Self {
            error,
            fail_count: None,
        }
    }

    /// Network-level failure, classified transient
    pub fn unavailable() -> Self {
        Self::error(GatewayError::Unavailable("connection reset by peer".to_string()))
    }

    /// Authorization failure, classified fatal
    pub fn unauthorized() -> Self {
        Self::error(GatewayError::Unauthorized("invalid service account credentials".to_string()))
    }

    /// Set the number of times to fail before succeeding
    pub fn with_fail_count(mut self, count: u32) -> Self {
        self.fail_count = Some(count);
        self
    }
}

/// Failure injector for the mock provider
#[derive(Debug, Default)]
pub struct FailureInjector {
    configs: HashMap<MockCall, FailureConfig>,
    call_counts: HashMap<MockCall, u32>,
}

impl FailureInjector {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn inject(&mut self, call: MockCall, config: FailureConfig) {
        self.configs.insert(call, config);
        self.call_counts.insert(call, 0);
    }

    pub fn clear(&mut self) {
        self.configs.clear();
        self.call_counts.clear();
    }

    pub fn clear_call(&mut self, call: MockCall) {
        self.configs.remove(&call);
        self.call_counts.remove(&call);
    }

    /// Returns the error to fail this call with, if any
    pub fn check(&mut self, call: MockCall) -> Option<GatewayError> {
        let config = self.configs.get(&call)?;
        let count = self.call_counts.entry(call).or_insert(0);
        *count += 1;

        if let Some(limit) = config.fail_count {
            if *count > limit {
                return None;
            }
        }

        Some(config.error.clone())
    }
}
