use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ServiceState {
    Stopped,
    Starting,
    Running,
    Stopping,
    /// Spawned, but the port never became busy within the readiness timeout.
    FailedToStart,
}

#[derive(Error, Debug)]
pub enum TransitionError {
    #[error("invalid transition: {0:?} -> {1:?}")]
    InvalidTransition(ServiceState, ServiceState),
}

#[derive(Debug, Clone)]
pub struct StateMachine {
    pub state: ServiceState,
}

impl Default for StateMachine {
    fn default() -> Self {
        Self { state: ServiceState::Stopped }
    }
}

impl StateMachine {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn can_transition(&self, to: ServiceState) -> bool {
        use ServiceState::*;
        matches!(
            (self.state, to),
            (Stopped, Starting)
                | (FailedToStart, Starting)
                | (Starting, Running)
                | (Starting, FailedToStart)
                | (Starting, Stopping)
                | (Running, Stopping)
                | (Stopping, Stopped)
                // monitor observations
                | (Running, Stopped)
                | (Stopped, Running)
                | (FailedToStart, Running)
                | (FailedToStart, Stopped)
        )
    }

    pub fn transition(&mut self, to: ServiceState) -> Result<(), TransitionError> {
        if self.state == to {
            return Ok(());
        }
        if self.can_transition(to) {
            tracing::debug!("State transition: {:?} -> {:?}", self.state, to);
            self.state = to;
            Ok(())
        } else {
            Err(TransitionError::InvalidTransition(self.state, to))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn valid_lifecycle() {
        let mut sm = StateMachine::new();
        assert_eq!(sm.state, ServiceState::Stopped);
        assert!(sm.transition(ServiceState::Starting).is_ok());
        assert!(sm.transition(ServiceState::Running).is_ok());
        assert!(sm.transition(ServiceState::Stopping).is_ok());
        assert!(sm.transition(ServiceState::Stopped).is_ok());
    }

    #[test]
    fn failed_start_can_retry() {
        let mut sm = StateMachine::new();
        sm.transition(ServiceState::Starting).unwrap();
        sm.transition(ServiceState::FailedToStart).unwrap();
        assert!(sm.transition(ServiceState::Starting).is_ok());
    }

    #[test]
    fn monitor_can_observe_external_start_and_death() {
        let mut sm = StateMachine::new();
        assert!(sm.transition(ServiceState::Running).is_ok());
        assert!(sm.transition(ServiceState::Stopped).is_ok());
    }

    #[test]
    fn same_state_is_noop() {
        let mut sm = StateMachine::new();
        assert!(sm.transition(ServiceState::Stopped).is_ok());
    }

    #[test]
    fn invalid_transition() {
        let mut sm = StateMachine::new();
        sm.transition(ServiceState::Starting).unwrap();
        // Starting 중에는 바로 Stopped로 갈 수 없음 (Stopping 경유)
        assert!(sm.transition(ServiceState::Stopped).is_err());
        let mut sm = StateMachine::new();
        assert!(sm.transition(ServiceState::Stopping).is_err());
    }
}
