//! Mock Provider Implementation
//!
//! Scripted in-process provider for exercising the tracking controller,
//! supervisor and lifecycle service without a cloud account.
//!
//! # Scripting
//!
//! - Operations progress through a scripted list of statuses, one per poll;
//!   the last status repeats once the list is exhausted.
//! - Start/stop commands take the next queued script (default: PENDING then
//!   DONE with the issued kind), so a test can make a re-issued command
//!   complete as a different kind or with a provider error.
//! - Any call can be failed with an injected gateway error.

mod failure;
mod provider;

pub use failure::{FailureConfig, FailureInjector, MockCall};
pub use provider::{IssuedCommand, MockProvider, OperationScript};
