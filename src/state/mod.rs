//! Tracking state machine
//!
//! Tracked operation states:
//! POLLING → {SUCCEEDED | FAILED | CANCELLED}, with
//! POLLING → RETRYING → POLLING while retry budget remains.

mod tracking_state;

pub use tracking_state::{TrackingState, TrackingStateData, TransitionError};

/// Check if a state is terminal (no further transitions possible)
pub trait TerminalState {
    fn is_terminal(&self) -> bool;
}
