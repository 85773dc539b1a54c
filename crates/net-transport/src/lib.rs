//! Network Transport - SSH transport sessions for the password proxy
//!
//! Provides the binary packet codec, key exchange, user authentication and
//! the packet relay that joins a client-facing session to a server-facing
//! one.

mod auth;
mod codec;
mod config;
mod error;
mod initiator;
mod kex;
mod rekey;
mod relay;
mod responder;
mod transport;

pub use auth::*;
pub use codec::*;
pub use config::*;
pub use error::*;
pub use initiator::*;
pub use kex::{
    NegotiatedAlgorithms, STRICT_KEX_CLIENT, STRICT_KEX_SERVER, build_kexinit, negotiate,
};
pub use rekey::*;
pub use relay::*;
pub use responder::*;
pub use transport::*;

/// Conventional SSH port
pub const DEFAULT_SSH_PORT: u16 = 22;
