//! Transport session roles and handshake states

use crate::{ProtocolError, ProtocolResult};

/// Session role
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SessionRole {
    /// Accepts the connection and acts as the SSH server
    Responder,
    /// Establishes the connection and acts as the SSH client
    Initiator,
}

impl SessionRole {
    pub fn is_initiator(self) -> bool {
        self == Self::Initiator
    }
}

impl std::fmt::Display for SessionRole {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Responder => f.write_str("responder"),
            Self::Initiator => f.write_str("initiator"),
        }
    }
}

/// Session state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SessionState {
    /// Plain-text identification strings are being exchanged
    VersionExchange,
    /// Initial key exchange in progress
    KeyExchange,
    /// Responder waiting for the peer's authentication request
    AuthenticationWait,
    /// Initiator submitting its credential
    Authenticating,
    /// Packets may be exchanged
    Established,
    /// Terminal
    Closed,
}

impl SessionState {
    /// Whether `next` is a legal successor for a session in `role`.
    ///
    /// Any state may move to `Closed`; `Closed` never moves again.
    pub fn can_transition_to(self, next: SessionState, role: SessionRole) -> bool {
        use SessionState::*;

        match (self, next) {
            (Closed, _) => false,
            (_, Closed) => true,
            (VersionExchange, KeyExchange) => true,
            (KeyExchange, AuthenticationWait) => role == SessionRole::Responder,
            (KeyExchange, Authenticating) => role == SessionRole::Initiator,
            (AuthenticationWait, Established) | (Authenticating, Established) => true,
            _ => false,
        }
    }

    /// Validated transition
    pub fn transition(self, next: SessionState, role: SessionRole) -> ProtocolResult<SessionState> {
        if self.can_transition_to(next, role) {
            Ok(next)
        } else {
            Err(ProtocolError::InvalidStateTransition {
                from: self,
                to: next,
            })
        }
    }

    /// The authentication state used by `role`
    pub fn authentication_for(role: SessionRole) -> SessionState {
        match role {
            SessionRole::Responder => SessionState::AuthenticationWait,
            SessionRole::Initiator => SessionState::Authenticating,
        }
    }
}
