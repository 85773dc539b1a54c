//! Client side of a transport session
//!
//! Faces the real SSH server and logs in with a password.

use std::sync::Arc;

use bytes::Bytes;
use shared_protocol::DisconnectReason;
use tokio::io::{AsyncRead, AsyncWrite};

use crate::transport::{HandshakeRole, establish};
use crate::{
    AcceptAnyHostKey, HostKeyVerifier, PacketReceiver, PacketSender, PasswordCredentials,
    SessionControl, SessionInfo, StatsSnapshot, TransportConfig, TransportResult,
    TransportSession,
};

/// An established client-side session
#[derive(Debug)]
pub struct InitiatorSession {
    session: TransportSession,
}

impl InitiatorSession {
    /// Run the client handshake, trusting any correctly signed host key
    pub async fn connect<S>(
        stream: S,
        credentials: PasswordCredentials,
        config: Arc<TransportConfig>,
    ) -> TransportResult<Self>
    where
        S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
    {
        Self::connect_with_verifier(stream, credentials, Arc::new(AcceptAnyHostKey), config).await
    }

    pub async fn connect_with_verifier<S>(
        stream: S,
        credentials: PasswordCredentials,
        verifier: Arc<dyn HostKeyVerifier>,
        config: Arc<TransportConfig>,
    ) -> TransportResult<Self>
    where
        S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
    {
        let role = HandshakeRole::Initiator {
            credentials,
            verifier,
        };
        let session = establish(stream, config, role).await?;
        Ok(Self { session })
    }

    /// Fingerprint of the server's host key
    pub fn host_key_fingerprint(&self) -> Option<&str> {
        self.session.info().peer_host_key.as_deref()
    }

    pub fn info(&self) -> &SessionInfo {
        self.session.info()
    }

    pub fn stats(&self) -> StatsSnapshot {
        self.session.stats()
    }

    pub async fn send(&self, payload: Bytes) -> TransportResult<()> {
        self.session.send(payload).await
    }

    pub async fn recv(&mut self) -> TransportResult<Bytes> {
        self.session.recv().await
    }

    pub async fn disconnect(
        self,
        reason: DisconnectReason,
        description: impl Into<String>,
    ) -> TransportResult<()> {
        self.session.disconnect(reason, description).await
    }

    pub async fn close(self) {
        self.session.close().await
    }

    pub fn split(self) -> (PacketSender, PacketReceiver, SessionControl) {
        self.session.split()
    }
}
