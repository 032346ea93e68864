//! Service lifecycle states and the events published on every transition

use chrono::{DateTime, Utc};
use std::fmt;

/// Lifecycle state of a supervised service
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum ServiceState {
    /// Not launched yet (waiting for dependencies or not started at all)
    #[default]
    Dead,
    /// Process launched, readiness not yet confirmed
    Started,
    /// Readiness confirmed
    Running,
    /// Process exited successfully
    Finished,
    /// Launch failed, process exited unsuccessfully, or a dependency failed
    Failed,
}

impl ServiceState {
    /// `Finished` and `Failed` accept no further transitions
    pub fn is_terminal(&self) -> bool {
        matches!(self, ServiceState::Finished | ServiceState::Failed)
    }

    /// Whether the state machine allows moving from `self` to `next`
    pub fn can_transition_to(&self, next: ServiceState) -> bool {
        use ServiceState::*;
        matches!(
            (self, next),
            (Dead, Started)
                | (Dead, Failed)
                | (Started, Running)
                | (Started, Finished)
                | (Started, Failed)
                | (Running, Finished)
                | (Running, Failed)
        )
    }
}

impl fmt::Display for ServiceState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ServiceState::Dead => "Dead",
            ServiceState::Started => "Started",
            ServiceState::Running => "Running",
            ServiceState::Finished => "Finished",
            ServiceState::Failed => "Failed",
        };
        f.write_str(name)
    }
}

/// Why a service ended up `Failed`
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FailureReason {
    /// The executable could not be spawned
    LaunchFailed(String),
    /// The process exited with a non-zero code
    ExitCode(i32),
    /// The process was terminated by a signal
    Signal(i32),
    /// Waiting on the process failed
    Wait(String),
    /// A dependency failed before this service was launched
    DependencyFailed(String),
    /// A dependency terminated without ever becoming ready
    DependencyUnsatisfiable(String),
}

impl fmt::Display for FailureReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FailureReason::LaunchFailed(e) => write!(f, "failed to launch: {}", e),
            FailureReason::ExitCode(code) => write!(f, "exited with code {}", code),
            FailureReason::Signal(sig) => write!(f, "terminated by signal {}", sig),
            FailureReason::Wait(e) => write!(f, "failed to wait for process: {}", e),
            FailureReason::DependencyFailed(dep) => write!(f, "dependency '{}' failed", dep),
            FailureReason::DependencyUnsatisfiable(dep) => {
                write!(f, "dependency '{}' terminated without becoming ready", dep)
            }
        }
    }
}

/// One state transition of one service
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StateChangeEvent {
    pub service: String,
    pub previous: ServiceState,
    pub current: ServiceState,
    pub timestamp: DateTime<Utc>,
    /// Set when `current` is `Failed`
    pub reason: Option<FailureReason>,
}

impl StateChangeEvent {
    pub fn new(service: impl Into<String>, previous: ServiceState, current: ServiceState) -> Self {
        Self {
            service: service.into(),
            previous,
            current,
            timestamp: Utc::now(),
            reason: None,
        }
    }

    pub fn with_reason(mut self, reason: FailureReason) -> Self {
        self.reason = Some(reason);
        self
    }
}

impl fmt::Display for StateChangeEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {} -> {}", self.service, self.previous, self.current)?;
        if let Some(reason) = &self.reason {
            write!(f, " ({})", reason)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_terminal_states() {
        assert!(ServiceState::Finished.is_terminal());
        assert!(ServiceState::Failed.is_terminal());
        assert!(!ServiceState::Dead.is_terminal());
        assert!(!ServiceState::Started.is_terminal());
        assert!(!ServiceState::Running.is_terminal());
    }

    #[test]
    fn test_terminal_states_accept_nothing() {
        let all = [
            ServiceState::Dead,
            ServiceState::Started,
            ServiceState::Running,
            ServiceState::Finished,
            ServiceState::Failed,
        ];
        for next in all {
            assert!(!ServiceState::Finished.can_transition_to(next));
            assert!(!ServiceState::Failed.can_transition_to(next));
        }
    }

    #[test]
    fn test_dead_cannot_skip_to_running() {
        assert!(!ServiceState::Dead.can_transition_to(ServiceState::Running));
        assert!(!ServiceState::Dead.can_transition_to(ServiceState::Finished));
        assert!(!ServiceState::Running.can_transition_to(ServiceState::Started));
    }

    #[test]
    fn test_event_display() {
        let event = StateChangeEvent::new("db", ServiceState::Started, ServiceState::Failed)
            .with_reason(FailureReason::ExitCode(3));
        assert_eq!(event.to_string(), "db: Started -> Failed (exited with code 3)");
    }
}
