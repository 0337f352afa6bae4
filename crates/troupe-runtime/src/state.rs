//! Dispatch state machine
//!
//! TigerStyle: Explicit states, checked transitions.
//!
//! ```text
//!   +---------+   failure with supervisor   +-----------+
//!   | Default | --------------------------> | Suspended |
//!   |         | <-------------------------- |           |
//!   +---------+     resume / restart        +-----------+
//!        |                                        |
//!        | failure, dismiss                       | stop, abort, dismiss
//!        v                                        v
//!   +-------------------------------------------------+
//!   |                     Stopped                     |
//!   +-------------------------------------------------+
//! ```

use std::fmt;
use std::sync::Arc;
use troupe_core::Error;

/// Where an actor's dispatch engine stands
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DispatchState {
    /// Messages go straight to the behavior
    #[default]
    Default,
    /// A failure is awaiting a supervisor's decision; messages are buffered
    Suspended,
    /// Terminal; everything bounces
    Stopped,
}

impl DispatchState {
    /// Check if messages reach the behavior
    pub fn can_dispatch(&self) -> bool {
        matches!(self, DispatchState::Default)
    }

    /// Check if valid transition
    pub fn can_transition_to(&self, next: DispatchState) -> bool {
        match (self, next) {
            (DispatchState::Default, DispatchState::Suspended) => true,
            (DispatchState::Suspended, DispatchState::Default) => true,
            (DispatchState::Default, DispatchState::Stopped) => true,
            (DispatchState::Suspended, DispatchState::Stopped) => true,
            // Stopped is terminal
            (DispatchState::Stopped, _) => false,
            _ if *self == next => true,
            _ => false,
        }
    }
}

impl fmt::Display for DispatchState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DispatchState::Default => write!(f, "default"),
            DispatchState::Suspended => write!(f, "suspended"),
            DispatchState::Stopped => write!(f, "stopped"),
        }
    }
}

/// Failure awaiting a supervisor's decision
#[derive(Debug, Clone)]
pub(crate) struct Suspension {
    pub(crate) failure_id: String,
    pub(crate) cause: Arc<Error>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_valid_transitions() {
        use DispatchState::*;
        assert!(Default.can_transition_to(Suspended));
        assert!(Suspended.can_transition_to(Default));
        assert!(Default.can_transition_to(Stopped));
        assert!(Suspended.can_transition_to(Stopped));
        assert!(Default.can_transition_to(Default));
    }

    #[test]
    fn test_stopped_is_terminal() {
        use DispatchState::*;
        assert!(!Stopped.can_transition_to(Default));
        assert!(!Stopped.can_transition_to(Suspended));
        assert!(!Stopped.can_transition_to(Stopped));
    }

    #[test]
    fn test_only_default_dispatches() {
        assert!(DispatchState::Default.can_dispatch());
        assert!(!DispatchState::Suspended.can_dispatch());
        assert!(!DispatchState::Stopped.can_dispatch());
    }

    #[test]
    fn test_display() {
        assert_eq!(DispatchState::Suspended.to_string(), "suspended");
    }
}
