//! Waiter Lifecycle
//!
//! Defines the one-way resolution state machine for an outstanding
//! command. A waiter leaves `Pending` exactly once; every terminal state
//! is final.

/// Resolution state of an outstanding command
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WaiterState {
    /// Sent, no answer yet
    Pending,
    /// Matching answer delivered to the caller
    Answered,
    /// Wait budget elapsed; caller received a timeout
    TimedOut,
    /// Explicitly canceled by a caller
    Canceled,
    /// Target disconnected while the command was outstanding
    Unavailable,
}

impl WaiterState {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, WaiterState::Pending)
    }
}

/// Result of a resolution attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transition {
    /// The waiter moved into the requested terminal state
    Applied(WaiterState),
    /// The waiter was already resolved; the attempt is a no-op
    AlreadyResolved(WaiterState),
}

/// Tracks the resolution state of a single waiter
#[derive(Debug)]
pub struct WaiterLifecycle {
    state: WaiterState,
}

impl WaiterLifecycle {
    pub fn new() -> Self {
        Self {
            state: WaiterState::Pending,
        }
    }

    pub fn state(&self) -> WaiterState {
        self.state
    }

    /// Attempt to resolve the waiter into a terminal state.
    ///
    /// Only `Pending -> terminal` is a valid move; a second resolution
    /// attempt reports the state that won.
    pub fn resolve(&mut self, to: WaiterState) -> Transition {
        if self.state != WaiterState::Pending {
            return Transition::AlreadyResolved(self.state);
        }
        debug_assert!(to.is_terminal(), "resolution target must be terminal");
        self.state = to;
        Transition::Applied(to)
    }
}

impl Default for WaiterLifecycle {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_initial_state_pending() {
        let waiter = WaiterLifecycle::new();
        assert_eq!(waiter.state(), WaiterState::Pending);
        assert!(!waiter.state().is_terminal());
    }

    #[test]
    fn test_single_resolution() {
        let mut waiter = WaiterLifecycle::new();
        let result = waiter.resolve(WaiterState::Answered);
        assert_eq!(result, Transition::Applied(WaiterState::Answered));
        assert_eq!(waiter.state(), WaiterState::Answered);
    }

    #[test]
    fn test_terminal_states_are_final() {
        for terminal in [
            WaiterState::Answered,
            WaiterState::TimedOut,
            WaiterState::Canceled,
            WaiterState::Unavailable,
        ] {
            let mut waiter = WaiterLifecycle::new();
            waiter.resolve(terminal);

            // A late resolution must not resurrect the waiter
            let result = waiter.resolve(WaiterState::Answered);
            assert_eq!(result, Transition::AlreadyResolved(terminal));
            assert_eq!(waiter.state(), terminal);
        }
    }
}
