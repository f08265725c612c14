use serde::{Deserialize, Serialize};
use std::fmt;

/// Troubleshooter control loop states
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum MonitorState {
    /// Waiting for the next tick
    Idle,
    /// Health probes and detection rules in flight
    Checking,
    /// Deciding which failures get automatic recovery
    Evaluating,
    /// Recovery strategies running
    Recovering,
    /// Emitting guides or the final report
    Reporting,
    /// Loop has exited
    Stopped,
}

impl MonitorState {
    pub fn as_str(&self) -> &'static str {
        match self {
            MonitorState::Idle => "IDLE",
            MonitorState::Checking => "CHECKING",
            MonitorState::Evaluating => "EVALUATING",
            MonitorState::Recovering => "RECOVERING",
            MonitorState::Reporting => "REPORTING",
            MonitorState::Stopped => "STOPPED",
        }
    }

    /// Check if this state can transition to another state
    pub fn can_transition_to(&self, target: MonitorState) -> bool {
        use MonitorState::*;

        match (self, target) {
            // Cancellation
            (Stopped, _) => false,
            (_, Stopped) => true,

            (Idle, Checking) => true,
            (Idle, Reporting) => true, // shutdown between ticks
            (Checking, Evaluating) => true,
            (Evaluating, Recovering) => true,
            (Evaluating, Reporting) => true, // nothing to recover
            (Recovering, Reporting) => true,
            (Reporting, Idle) => true,

            _ => false,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, MonitorState::Stopped)
    }
}

impl fmt::Display for MonitorState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}
