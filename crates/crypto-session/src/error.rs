//! Crypto session error types

use shared_protocol::ProtocolError;
use thiserror::Error;

/// Cryptographic operation error
#[derive(Debug, Error)]
pub enum CryptoError {
    #[error("Key exchange failed: {0}")]
    KeyExchange(String),

    #[error("Encryption failed: {0}")]
    Encryption(String),

    #[error("Decryption failed: authentication tag mismatch")]
    DecryptionFailed,

    #[error("MAC verification failed")]
    MacMismatch,

    #[error("Invalid key length: expected {expected}, got {actual}")]
    InvalidKeyLength { expected: usize, actual: usize },

    #[error("Invalid public key")]
    InvalidPublicKey,

    #[error("Unsupported algorithm: {0}")]
    UnsupportedAlgorithm(String),

    #[error("Invalid host key: {0}")]
    InvalidHostKey(String),

    #[error("Invalid signature: {0}")]
    InvalidSignature(String),

    #[error("Signature verification failed")]
    SignatureVerification,

    #[error("Key encoding failed: {0}")]
    KeyEncoding(String),

    #[error("Wire error: {0}")]
    Wire(#[from] ProtocolError),
}

pub type CryptoResult<T> = Result<T, CryptoError>;
