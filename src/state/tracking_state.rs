//! Per-job tracking state and its transition table

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::TerminalState;

/// State of one tracked operation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TrackingState {
    /// Waiting for the provider to finish the current operation
    Polling,
    /// Re-issuing the requested command after a mismatched outcome
    Retrying,
    /// Requested kind confirmed DONE
    Succeeded,
    /// Gave up; the parent job is marked FAILED
    Failed,
    /// Stopped by a cancel request before reaching an outcome
    Cancelled,
}

impl TerminalState for TrackingState {
    fn is_terminal(&self) -> bool {
        matches!(
            self,
            TrackingState::Succeeded | TrackingState::Failed | TrackingState::Cancelled
        )
    }
}

impl TrackingState {
    /// Check if transition from this state to target is valid
    pub fn can_transition_to(&self, target: TrackingState) -> bool {
        match (self, target) {
            // Backoff: poll again
            (TrackingState::Polling, TrackingState::Polling) => true,
            (TrackingState::Polling, TrackingState::Retrying) => true,
            (TrackingState::Polling, TrackingState::Succeeded) => true,
            (TrackingState::Polling, TrackingState::Failed) => true,
            (TrackingState::Polling, TrackingState::Cancelled) => true,

            (TrackingState::Retrying, TrackingState::Polling) => true,
            // Re-issue failed or budget spent
            (TrackingState::Retrying, TrackingState::Failed) => true,

            _ => false,
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum TransitionError {
    #[error("Invalid tracking transition from {from:?} to {to:?}")]
    Invalid {
        from: TrackingState,
        to: TrackingState,
    },
}

/// Current state plus the sequence of states visited
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrackingStateData {
    pub state: TrackingState,
    pub history: Vec<(TrackingState, DateTime<Utc>)>,
    pub updated_at: DateTime<Utc>,
}

impl TrackingStateData {
    pub fn new() -> Self {
        let now = Utc::now();
        Self {
            state: TrackingState::Polling,
            history: vec![(TrackingState::Polling, now)],
            updated_at: now,
        }
    }

    pub fn transition(&mut self, target: TrackingState) -> Result<(), TransitionError> {
        if !self.state.can_transition_to(target) {
            return Err(TransitionError::Invalid {
                from: self.state,
                to: target,
            });
        }

        let now = Utc::now();
        // Polling → Polling is the backoff loop; keep history to real changes
        if self.state != target {
            self.history.push((target, now));
        }
        self.state = target;
        self.updated_at = now;

        Ok(())
    }

    pub fn is_terminal(&self) -> bool {
        self.state.is_terminal()
    }

    /// States visited, without timestamps
    pub fn path(&self) -> Vec<TrackingState> {
        self.history.iter().map(|(state, _)| *state).collect()
    }
}

impl Default for TrackingStateData {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_starts_polling() {
        let data = TrackingStateData::new();
        assert_eq!(data.state, TrackingState::Polling);
        assert!(!data.is_terminal());
    }

    #[test]
    fn test_success_path() {
        let mut data = TrackingStateData::new();
        data.transition(TrackingState::Polling).unwrap();
        data.transition(TrackingState::Succeeded).unwrap();
        assert!(data.is_terminal());
        assert_eq!(
            data.path(),
            vec![TrackingState::Polling, TrackingState::Succeeded]
        );
    }

    #[test]
    fn test_retry_cycle() {
        let mut data = TrackingStateData::new();
        data.transition(TrackingState::Retrying).unwrap();
        data.transition(TrackingState::Polling).unwrap();
        data.transition(TrackingState::Retrying).unwrap();
        data.transition(TrackingState::Failed).unwrap();
        assert_eq!(data.state, TrackingState::Failed);
        assert_eq!(data.path().len(), 5);
    }

    #[test]
    fn test_retrying_cannot_succeed_directly() {
        let mut data = TrackingStateData::new();
        data.transition(TrackingState::Retrying).unwrap();
        assert!(data.transition(TrackingState::Succeeded).is_err());
    }

    #[test]
    fn test_terminal_states_are_final() {
        for terminal in [
            TrackingState::Succeeded,
            TrackingState::Failed,
            TrackingState::Cancelled,
        ] {
            let mut data = TrackingStateData::new();
            data.transition(terminal).unwrap();
            assert!(data.transition(TrackingState::Polling).is_err());
            assert!(data.transition(TrackingState::Failed).is_err());
        }
    }

    #[test]
    fn test_serializes_screaming_case() {
        let json = serde_json::to_string(&TrackingState::Retrying).unwrap();
        assert_eq!(json, "\"RETRYING\"");
    }
}
