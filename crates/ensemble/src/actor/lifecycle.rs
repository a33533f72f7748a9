use serde::{Deserialize, Serialize};
use std::fmt;

/// Where an actor is in its firing lifecycle.
///
/// A run walks `Created -> Initialized -> (Prefired -> Fired -> Postfired)* ->
/// WrappedUp -> Terminated`. `Error` can be entered from anywhere; from there
/// only wrapup is allowed. A terminated or wrapped-up actor may be initialized
/// again for another run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum LifecycleState {
    Created,
    Initialized,
    Prefired,
    Fired,
    Postfired,
    WrappedUp,
    Terminated,
    Error,
}

impl LifecycleState {
    pub fn can_transition_to(self, to: LifecycleState) -> bool {
        use LifecycleState::*;
        match (self, to) {
            (_, Error) => true,
            (Created | WrappedUp | Terminated, Initialized) => true,
            // an iteration may be abandoned at any point and restarted at prefire
            (Initialized | Prefired | Fired | Postfired, Prefired) => true,
            (Prefired, Fired) => true,
            (Fired, Postfired) => true,
            (Initialized | Prefired | Fired | Postfired | Error, WrappedUp) => true,
            (WrappedUp, Terminated) => true,
            _ => false,
        }
    }

    /// True between a successful initialize and wrapup.
    pub fn is_started(self) -> bool {
        matches!(
            self,
            LifecycleState::Initialized
                | LifecycleState::Prefired
                | LifecycleState::Fired
                | LifecycleState::Postfired
        )
    }
}

impl fmt::Display for LifecycleState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            LifecycleState::Created => "created",
            LifecycleState::Initialized => "initialized",
            LifecycleState::Prefired => "prefired",
            LifecycleState::Fired => "fired",
            LifecycleState::Postfired => "postfired",
            LifecycleState::WrappedUp => "wrapped-up",
            LifecycleState::Terminated => "terminated",
            LifecycleState::Error => "error",
        };
        write!(f, "{}", name)
    }
}

#[cfg(test)]
mod tests {
    use super::LifecycleState::*;

    #[test]
    fn test_firing_cycle() {
        let path = [Created, Initialized, Prefired, Fired, Postfired, Prefired, Fired, Postfired, WrappedUp, Terminated];
        for step in path.windows(2) {
            assert!(step[0].can_transition_to(step[1]), "{} -> {}", step[0], step[1]);
        }
    }

    #[test]
    fn test_illegal_transitions() {
        assert!(!Created.can_transition_to(Prefired));
        assert!(!Initialized.can_transition_to(Fired));
        assert!(!Prefired.can_transition_to(Postfired));
        assert!(!Terminated.can_transition_to(Prefired));
        assert!(!Error.can_transition_to(Prefired));
        assert!(!Created.can_transition_to(WrappedUp));
    }

    #[test]
    fn test_error_is_reachable_and_can_only_wrap_up() {
        for state in [Created, Initialized, Prefired, Fired, Postfired, WrappedUp, Terminated] {
            assert!(state.can_transition_to(Error));
        }
        assert!(Error.can_transition_to(WrappedUp));
        assert!(!Error.can_transition_to(Initialized));
    }

    #[test]
    fn test_restart_after_terminated() {
        assert!(Terminated.can_transition_to(Initialized));
        assert!(WrappedUp.can_transition_to(Initialized));
    }
}
