//! Observer lifecycle states.
//!
//! The observer is either healthy (`Running`), in one of four recoverable error states, or on its
//! way out. Transitions are restricted by [`ObserverStatus::can_transition_to`]; `Shutdown` is
//! terminal.

use serde::Serialize;
use std::fmt;

use crate::observer::types::HealthStatus;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ObserverStatus {
    /// Healthy
    Running,
    /// The backend stream failed or closed
    StreamError,
    /// No activity for longer than the silence timeout
    SilenceError,
    /// A payment listener failed
    PublisherError,
    /// The cursor could not be loaded or saved
    DatabaseError,
    /// Fatal, the status check will shut the observer down
    NeedsShutdown,
    /// Terminal
    Shutdown,
}

impl ObserverStatus {
    pub const ALL: [ObserverStatus; 7] = [
        ObserverStatus::Running,
        ObserverStatus::StreamError,
        ObserverStatus::SilenceError,
        ObserverStatus::PublisherError,
        ObserverStatus::DatabaseError,
        ObserverStatus::NeedsShutdown,
        ObserverStatus::Shutdown,
    ];

    /// Whether `next` may follow `self`.
    pub fn can_transition_to(self, next: ObserverStatus) -> bool {
        use ObserverStatus::*;
        match self {
            Running => true,
            StreamError | SilenceError | PublisherError | DatabaseError => {
                matches!(next, Running | NeedsShutdown | Shutdown)
            }
            NeedsShutdown => next == Shutdown,
            Shutdown => next == Shutdown,
        }
    }

    pub fn is_healthy(self) -> bool {
        self == ObserverStatus::Running
    }

    pub fn is_recoverable_error(self) -> bool {
        matches!(
            self,
            ObserverStatus::StreamError
                | ObserverStatus::SilenceError
                | ObserverStatus::PublisherError
                | ObserverStatus::DatabaseError
        )
    }

    pub fn health(self) -> HealthStatus {
        match self {
            ObserverStatus::Running => HealthStatus::Green,
            status if status.is_recoverable_error() => HealthStatus::Yellow,
            _ => HealthStatus::Red,
        }
    }
}

impl fmt::Display for ObserverStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ObserverStatus::Running => "RUNNING",
            ObserverStatus::StreamError => "STREAM_ERROR",
            ObserverStatus::SilenceError => "SILENCE_ERROR",
            ObserverStatus::PublisherError => "PUBLISHER_ERROR",
            ObserverStatus::DatabaseError => "DATABASE_ERROR",
            ObserverStatus::NeedsShutdown => "NEEDS_SHUTDOWN",
            ObserverStatus::Shutdown => "SHUTDOWN",
        };
        f.write_str(name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ObserverStatus::*;

    #[test]
    fn test_running_reaches_everything() {
        for next in ObserverStatus::ALL {
            assert!(Running.can_transition_to(next));
        }
    }

    #[test]
    fn test_error_states_only_recover_or_stop() {
        for from in [StreamError, SilenceError, PublisherError, DatabaseError] {
            for next in ObserverStatus::ALL {
                let expected = matches!(next, Running | NeedsShutdown | Shutdown);
                assert_eq!(from.can_transition_to(next), expected, "{from} -> {next}");
            }
        }
    }

    #[test]
    fn test_shutdown_is_terminal() {
        for next in ObserverStatus::ALL {
            assert_eq!(Shutdown.can_transition_to(next), next == Shutdown);
            assert_eq!(NeedsShutdown.can_transition_to(next), next == Shutdown);
        }
    }

    #[test]
    fn test_health_mapping() {
        assert_eq!(Running.health(), HealthStatus::Green);
        assert_eq!(DatabaseError.health(), HealthStatus::Yellow);
        assert_eq!(NeedsShutdown.health(), HealthStatus::Red);
        assert_eq!(Shutdown.to_string(), "SHUTDOWN");
    }
}
