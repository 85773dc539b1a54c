//! Error types for the protocol

use thiserror::Error;

/// Protocol error
#[derive(Debug, Error)]
pub enum ProtocolError {
    #[error("Truncated field: {field}")]
    Truncated { field: &'static str },

    #[error("Invalid UTF-8 in field: {0}")]
    InvalidUtf8(&'static str),

    #[error("Invalid name-list in field: {0}")]
    InvalidNameList(&'static str),

    #[error("Negative mpint in field: {0}")]
    NegativeMpint(&'static str),

    #[error("Empty packet payload")]
    EmptyPayload,

    #[error("Invalid message type: expected {expected}, got {actual}")]
    InvalidMessageType { expected: u8, actual: u8 },

    #[error("Unexpected message {message} in state {state:?}")]
    UnexpectedMessage {
        state: crate::SessionState,
        message: u8,
    },

    #[error("Malformed identification string: {0}")]
    MalformedIdentification(String),

    #[error("Incompatible protocol version: {0}")]
    IncompatibleVersion(String),

    #[error("Identification line too long (max: {max})")]
    IdentificationTooLong { max: usize },

    #[error("Invalid state transition: {from:?} -> {to:?}")]
    InvalidStateTransition {
        from: crate::SessionState,
        to: crate::SessionState,
    },

    #[error("Unsupported service: {0}")]
    UnsupportedService(String),

    #[error("Strict key exchange violated: {0}")]
    StrictKexViolation(&'static str),
}

/// Result type alias for protocol operations
pub type ProtocolResult<T> = Result<T, ProtocolError>;
