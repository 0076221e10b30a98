//! Connection state of the broker session.
//!
//! ```text
//! Disconnected → Connecting → Connected → SubscriptionActive
//!       ↑______________|____________|______________|   (on error)
//! ```
//!
//! There is no terminal state; the session keeps cycling until shutdown.

use std::fmt;

use tracing::{debug, warn};

/// Where the session is in its connect/subscribe cycle.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub enum ConnectionState {
    #[default]
    Disconnected,
    Connecting,
    Connected,
    SubscriptionActive,
}

impl ConnectionState {
    /// Returns true if moving from `self` to `next` is a legal transition.
    pub fn can_transition_to(self, next: ConnectionState) -> bool {
        use ConnectionState::*;
        matches!(
            (self, next),
            (_, Disconnected)
                | (Disconnected, Connecting)
                | (Connecting, Connected)
                | (Connected, SubscriptionActive)
        )
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ConnectionState::Disconnected => "disconnected",
            ConnectionState::Connecting => "connecting",
            ConnectionState::Connected => "connected",
            ConnectionState::SubscriptionActive => "subscription-active",
        };
        f.write_str(name)
    }
}

/// Tracks the current [`ConnectionState`] and logs each transition.
#[derive(Debug, Default)]
pub struct ConnectionTracker {
    state: ConnectionState,
}

impl ConnectionTracker {
    pub fn state(&self) -> ConnectionState {
        self.state
    }

    /// Moves to `next` if the transition is legal.
    ///
    /// Illegal transitions are logged and ignored; returns whether the state changed.
    pub fn transition(&mut self, next: ConnectionState) -> bool {
        if self.state == next {
            return false;
        }
        if !self.state.can_transition_to(next) {
            warn!(from = %self.state, to = %next, "Ignoring unexpected connection transition");
            return false;
        }
        debug!(from = %self.state, to = %next, "Connection state changed");
        self.state = next;
        true
    }
}

#[cfg(test)]
mod tests {
    use super::ConnectionState::*;
    use super::*;

    #[test]
    fn happy_path_is_legal() {
        let mut tracker = ConnectionTracker::default();
        assert!(tracker.transition(Connecting));
        assert!(tracker.transition(Connected));
        assert!(tracker.transition(SubscriptionActive));
        assert_eq!(tracker.state(), SubscriptionActive);
    }

    #[test]
    fn any_state_can_drop_to_disconnected() {
        for state in [Connecting, Connected, SubscriptionActive] {
            assert!(state.can_transition_to(Disconnected));
        }
    }

    #[test]
    fn skipping_states_is_rejected() {
        let mut tracker = ConnectionTracker::default();
        assert!(!tracker.transition(Connected));
        assert!(!tracker.transition(SubscriptionActive));
        assert_eq!(tracker.state(), Disconnected);
    }

    #[test]
    fn same_state_is_a_no_op() {
        let mut tracker = ConnectionTracker::default();
        assert!(!tracker.transition(Disconnected));
    }

    #[test]
    fn display_names() {
        assert_eq!(SubscriptionActive.to_string(), "subscription-active");
        assert_eq!(Disconnected.to_string(), "disconnected");
    }
}
