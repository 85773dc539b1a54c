//! Shared Protocol Definitions for the SSH relay
//!
//! This crate contains the wire encodings, message definitions, identification
//! strings and session states shared by the transport and the proxy binary.

mod error;
mod packets;
mod session;
mod version;
mod wire;

pub use error::*;
pub use packets::*;
pub use session::*;
pub use version::*;
pub use wire::*;

/// Largest binary packet accepted or produced, in bytes
pub const MAX_PACKET_LENGTH: usize = 256 * 1024;

/// Minimum random padding per binary packet
pub const MIN_PADDING: usize = 4;

/// Service requested before user authentication
pub const USERAUTH_SERVICE: &str = "ssh-userauth";

/// Service named inside authentication requests
pub const CONNECTION_SERVICE: &str = "ssh-connection";
