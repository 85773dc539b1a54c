//! Transport error types

use crypto_session::CryptoError;
use shared_protocol::{DisconnectReason, ProtocolError};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum TransportError {
    #[error("Protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    #[error("No common {category} algorithm (ours: {ours}; theirs: {theirs})")]
    Negotiation {
        category: &'static str,
        ours: String,
        theirs: String,
    },

    #[error("Integrity check failed on packet {seq}")]
    Integrity { seq: u32 },

    #[error("Framing error: {0}")]
    Framing(String),

    #[error("Sequence number space exhausted under the current keys")]
    Sequence,

    #[error("Authentication rejected: {0}")]
    Authentication(String),

    #[error("Host key rejected: {0}")]
    HostKeyRejected(String),

    #[error("Crypto error: {0}")]
    Crypto(#[from] CryptoError),

    #[error("Disconnected by peer ({reason}): {description}")]
    Disconnected {
        reason: DisconnectReason,
        description: String,
    },

    #[error("Connection closed: {0}")]
    ConnectionClosed(String),

    #[error("Connection timeout")]
    Timeout,

    #[error("Session closed")]
    Closed,

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl TransportError {
    /// True only for a peer DISCONNECT carrying `SSH_DISCONNECT_BY_APPLICATION`
    pub fn is_clean_disconnect(&self) -> bool {
        matches!(
            self,
            Self::Disconnected {
                reason: DisconnectReason::ByApplication,
                ..
            }
        )
    }

    /// Reason code reported to the peer when this error ends a session
    pub fn disconnect_reason(&self) -> DisconnectReason {
        match self {
            Self::Negotiation { .. } | Self::Crypto(_) => DisconnectReason::KeyExchangeFailed,
            Self::Integrity { .. } => DisconnectReason::MacError,
            Self::HostKeyRejected(_) => DisconnectReason::HostKeyNotVerifiable,
            Self::Authentication(_) => DisconnectReason::NoMoreAuthMethodsAvailable,
            Self::Protocol(ProtocolError::IncompatibleVersion(_)) => {
                DisconnectReason::ProtocolVersionNotSupported
            }
            Self::Protocol(ProtocolError::UnsupportedService(_)) => {
                DisconnectReason::ServiceNotAvailable
            }
            Self::Timeout | Self::Closed => DisconnectReason::ByApplication,
            Self::ConnectionClosed(_) | Self::Io(_) => DisconnectReason::ConnectionLost,
            _ => DisconnectReason::ProtocolError,
        }
    }

    /// Whether the stream may still carry a DISCONNECT after this error
    pub(crate) fn peer_reachable(&self) -> bool {
        !matches!(
            self,
            Self::Disconnected { .. } | Self::ConnectionClosed(_) | Self::Io(_)
        )
    }
}

pub type TransportResult<T> = Result<T, TransportError>;
