//! Connection lifecycle states.

use serde::{Deserialize, Serialize};

/// Where a connection is in its lifecycle.
///
/// ```text
///   Idle ──connect()──→ Connecting ──CONNECTED──→ Connected ──disconnect()──→ Disconnecting
///    │                                               ↑                            │
///    └──────────────CONNECT (server side)────────────┘                            ▼
///                                                                             Destroyed
///   any state ──destroy() / transport error / transport close──────────────────→ Destroyed
/// ```
///
/// On the server, `Idle` means "waiting for CONNECT".
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SessionState {
    Idle,
    Connecting,
    Connected,
    Disconnecting,
    /// Terminal. Nothing leaves this state.
    Destroyed,
}

impl SessionState {
    /// Whether moving from `self` to `next` is a legal transition.
    pub fn can_transition_to(self, next: SessionState) -> bool {
        use SessionState::*;
        match (self, next) {
            (Destroyed, _) => false,
            (_, Destroyed) => true,
            (Idle, Connecting) | (Idle, Connected) => true,
            (Connecting, Connected) | (Connecting, Disconnecting) => true,
            (Connected, Disconnecting) => true,
            _ => false,
        }
    }

    pub fn is_connected(self) -> bool {
        self == SessionState::Connected
    }

    pub fn is_destroyed(self) -> bool {
        self == SessionState::Destroyed
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use SessionState::*;

    #[test]
    fn test_can_transition_to_client_happy_path() {
        assert!(Idle.can_transition_to(Connecting));
        assert!(Connecting.can_transition_to(Connected));
        assert!(Connected.can_transition_to(Disconnecting));
        assert!(Disconnecting.can_transition_to(Destroyed));
    }

    #[test]
    fn test_can_transition_to_destroyed_from_anywhere_but_itself() {
        for state in [Idle, Connecting, Connected, Disconnecting] {
            assert!(state.can_transition_to(Destroyed), "{state:?}");
        }
        assert!(!Destroyed.can_transition_to(Destroyed));
        assert!(!Destroyed.can_transition_to(Idle));
    }

    #[test]
    fn test_can_transition_to_rejects_going_backwards() {
        assert!(!Connected.can_transition_to(Connecting));
        assert!(!Connected.can_transition_to(Idle));
        assert!(!Disconnecting.can_transition_to(Connected));
        assert!(!Idle.can_transition_to(Disconnecting));
    }
}
