//! Server side of a transport session
//!
//! Faces the SSH client. Any authentication request is accepted by default
//! and the claimed username is kept for the onward connection.

use std::sync::Arc;

use bytes::Bytes;
use crypto_session::HostKey;
use shared_protocol::DisconnectReason;
use tokio::io::{AsyncRead, AsyncWrite};

use crate::transport::{HandshakeRole, establish};
use crate::{
    AcceptAnyAuth, InboundAuthPolicy, PacketReceiver, PacketSender, SessionControl, SessionInfo,
    StatsSnapshot, TransportConfig, TransportResult, TransportSession,
};

/// An established server-side session
#[derive(Debug)]
pub struct ResponderSession {
    session: TransportSession,
}

impl ResponderSession {
    /// Run the server handshake, accepting any authentication
    pub async fn accept<S>(
        stream: S,
        host_key: Arc<HostKey>,
        config: Arc<TransportConfig>,
    ) -> TransportResult<Self>
    where
        S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
    {
        Self::accept_with_policy(stream, host_key, Arc::new(AcceptAnyAuth), config).await
    }

    pub async fn accept_with_policy<S>(
        stream: S,
        host_key: Arc<HostKey>,
        policy: Arc<dyn InboundAuthPolicy>,
        config: Arc<TransportConfig>,
    ) -> TransportResult<Self>
    where
        S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
    {
        let session = establish(stream, config, HandshakeRole::Responder { host_key, policy }).await?;
        Ok(Self { session })
    }

    /// Username the client authenticated as, byte for byte
    pub fn username(&self) -> &Bytes {
        &self.session.info().username
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
