//! Crypto Session - SSH transport cryptography
//!
//! Key agreement (Curve25519, NIST P-256, DH group 14), exchange hash and key
//! derivation, host keys, packet ciphers and MACs. Nothing here performs I/O; the
//! transport crate drives these primitives.

mod cipher;
mod error;
mod hostkey;
mod kex;
mod mac;
mod random;
mod session;

pub use cipher::*;
pub use error::*;
pub use hostkey::*;
pub use kex::*;
pub use mac::*;
pub use random::*;
pub use session::*;

/// Exchange hash size for the supported SHA-256 methods
pub const EXCHANGE_HASH_SIZE: usize = 32;
