//! sshpass-proxy
//!
//! Terminates an SSH client's transport, logs into the real server with a
//! password under the username the client claimed, then relays every
//! remaining packet unchanged in both directions.

pub mod cli;
pub mod credentials;
pub mod stdio;

use std::sync::Arc;

use crypto_session::HostKey;
use net_transport::{
    InitiatorSession, PasswordCredentials, RelayOutcome, ResponderSession, TransportConfig,
    TransportResult, relay,
};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use zeroize::Zeroizing;

/// Handshake `local` as the server, `remote` as the client, then relay.
///
/// `local` carries the SSH client's bytes (stdin/stdout for the binary);
/// `remote` is the connection to the real server.
pub async fn sshpass_proxy<L, R>(
    local: L,
    remote: R,
    host_key: Arc<HostKey>,
    password: Zeroizing<Vec<u8>>,
    config: Arc<TransportConfig>,
    cancel: CancellationToken,
) -> TransportResult<RelayOutcome>
where
    L: AsyncRead + AsyncWrite + Unpin + Send + 'static,
    R: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    let front = tokio::select! {
        _ = cancel.cancelled() => return Ok(RelayOutcome::Cancelled),
        front = ResponderSession::accept(local, host_key, config.clone()) => front?,
    };
    info!(
        user = %String::from_utf8_lossy(front.username()),
        "client handshake complete"
    );

    let credentials = PasswordCredentials {
        username: front.username().clone(),
        password,
    };
    let connected = tokio::select! {
        _ = cancel.cancelled() => {
            front.close().await;
            return Ok(RelayOutcome::Cancelled);
        }
        back = InitiatorSession::connect(remote, credentials, config) => back,
    };
    let back = match connected {
        Ok(back) => back,
        Err(e) => {
            warn!(error = %e, "server handshake failed");
            // Pass the reason on to the client
            if let Err(disconnect_error) = front
                .disconnect(e.disconnect_reason(), format!("proxy: {}", e))
                .await
            {
                warn!(error = %disconnect_error, "could not notify client");
            }
            return Err(e);
        }
    };
    info!(
        host_key = back.host_key_fingerprint().unwrap_or("unknown"),
        "server handshake complete"
    );

    relay(front, back, cancel).await
}
