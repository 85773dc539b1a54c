//! User authentication (RFC 4252)
//!
//! The responder side accepts whatever its [`InboundAuthPolicy`] allows,
//! which by default is everything. The initiator side sends exactly one
//! password request.

use std::fmt;

use bytes::Bytes;
use crypto_session::PublicHostKey;
use shared_protocol::{
    AuthMethod, Disconnect, DisconnectReason, MessageType, ProtocolError, Service,
    USERAUTH_SERVICE, CONNECTION_SERVICE, UserauthBanner, UserauthFailure, UserauthRequest,
    encode_bare, message_number,
};
use tokio::io::{AsyncRead, AsyncWrite};
use tracing::{debug, info, warn};
use zeroize::Zeroizing;

use crate::transport::Connection;
use crate::{TransportError, TransportResult};

/// Rejected requests tolerated before the responder gives up
pub const MAX_AUTH_ATTEMPTS: usize = 6;

/// Outcome of checking one USERAUTH_REQUEST
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthDecision {
    Accept,
    Reject,
}

/// Decides inbound authentication requests
pub trait InboundAuthPolicy: Send + Sync + fmt::Debug {
    fn check(&self, request: &UserauthRequest) -> AuthDecision;
}

/// Accepts every request, whatever the method
#[derive(Debug, Clone, Copy, Default)]
pub struct AcceptAnyAuth;

impl InboundAuthPolicy for AcceptAnyAuth {
    fn check(&self, _request: &UserauthRequest) -> AuthDecision {
        AuthDecision::Accept
    }
}

/// Decides whether a server host key is trusted
pub trait HostKeyVerifier: Send + Sync + fmt::Debug {
    fn verify(&self, key: &PublicHostKey) -> bool;
}

/// Trusts any host key whose signature checks out
#[derive(Debug, Clone, Copy, Default)]
pub struct AcceptAnyHostKey;

impl HostKeyVerifier for AcceptAnyHostKey {
    fn verify(&self, _key: &PublicHostKey) -> bool {
        true
    }
}

/// Credentials used by the initiator.
///
/// Both fields are raw bytes so a name or password that is not UTF-8
/// passes through unchanged.
#[derive(Clone)]
pub struct PasswordCredentials {
    pub username: Bytes,
    pub password: Zeroizing<Vec<u8>>,
}

impl PasswordCredentials {
    pub fn new(username: impl Into<Bytes>, password: impl Into<Vec<u8>>) -> Self {
        Self {
            username: username.into(),
            password: Zeroizing::new(password.into()),
        }
    }

    fn username_lossy(&self) -> std::borrow::Cow<'_, str> {
        String::from_utf8_lossy(&self.username)
    }
}

impl fmt::Debug for PasswordCredentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PasswordCredentials")
            .field("username", &self.username_lossy())
            .field("password", &"<redacted>")
            .finish()
    }
}

/// Serve authentication until one request is accepted; returns the username
pub(crate) async fn serve_authentication<S>(
    conn: &mut Connection<S>,
    policy: &dyn InboundAuthPolicy,
) -> TransportResult<Bytes>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let payload = conn.recv().await?;
    let request = Service::decode(&payload, MessageType::ServiceRequest)?;
    if request.name != USERAUTH_SERVICE {
        return Err(ProtocolError::UnsupportedService(request.name).into());
    }
    conn.send(Service::accept(USERAUTH_SERVICE).encode()).await?;

    let mut rejected = 0;
    loop {
        let payload = conn.recv().await?;
        let request = UserauthRequest::decode(&payload)?;
        if request.service != CONNECTION_SERVICE {
            return Err(ProtocolError::UnsupportedService(request.service).into());
        }

        match policy.check(&request) {
            AuthDecision::Accept => {
                conn.send(encode_bare(MessageType::UserauthSuccess)).await?;
                info!(
                    user = %request.username_lossy(),
                    method = request.method.name(),
                    "accepted inbound authentication"
                );
                return Ok(request.username);
            }
            AuthDecision::Reject => {
                rejected += 1;
                debug!(
                    user = %request.username_lossy(),
                    method = request.method.name(),
                    attempt = rejected,
                    "rejected inbound authentication"
                );
                if rejected >= MAX_AUTH_ATTEMPTS {
                    let description = "too many authentication failures";
                    conn.send(
                        Disconnect::new(DisconnectReason::NoMoreAuthMethodsAvailable, description)
                            .encode(),
                    )
                    .await?;
                    return Err(TransportError::Authentication(description.into()));
                }
                let failure = UserauthFailure {
                    methods: vec!["password".to_string()],
                    partial_success: false,
                };
                conn.send(failure.encode()).await?;
            }
        }
    }
}

/// Authenticate with a password; returns the username on success
pub(crate) async fn authenticate<S>(
    conn: &mut Connection<S>,
    credentials: &PasswordCredentials,
) -> TransportResult<Bytes>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    conn.send(Service::request(USERAUTH_SERVICE).encode()).await?;
    let payload = conn.recv().await?;
    let accept = Service::decode(&payload, MessageType::ServiceAccept)?;
    if accept.name != USERAUTH_SERVICE {
        return Err(ProtocolError::UnsupportedService(accept.name).into());
    }

    let request = UserauthRequest {
        username: credentials.username.clone(),
        service: CONNECTION_SERVICE.to_string(),
        method: AuthMethod::Password {
            password: Bytes::copy_from_slice(&credentials.password),
        },
    };
    conn.send(request.encode()).await?;

    loop {
        let payload = conn.recv().await?;
        let message = message_number(&payload)?;
        match MessageType::from_byte(message) {
            Some(MessageType::UserauthBanner) => {
                let banner = UserauthBanner::decode(&payload)?;
                info!(banner = %banner.message.trim_end(), "server banner");
            }
            Some(MessageType::UserauthSuccess) => {
                info!(user = %credentials.username_lossy(), "authenticated to server");
                return Ok(credentials.username.clone());
            }
            Some(MessageType::UserauthFailure) => {
                let failure = UserauthFailure::decode(&payload)?;
                warn!(
                    user = %credentials.username_lossy(),
                    methods = %failure.methods.join(","),
                    "password rejected"
                );
                return Err(TransportError::Authentication(format!(
                    "password rejected for {} (server allows: {})",
                    credentials.username_lossy(),
                    failure.methods.join(",")
                )));
            }
            Some(MessageType::UserauthPasswdChangereq) => {
                return Err(TransportError::Authentication(format!(
                    "server requires a password change for {}",
                    credentials.username_lossy()
                )));
            }
            _ => {
                return Err(ProtocolError::UnexpectedMessage {
                    state: shared_protocol::SessionState::Authenticating,
                    message,
                }
                .into());
            }
        }
    }
}
