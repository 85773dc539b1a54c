//! SSH transport sessions
//!
//! The handshake (version exchange, key exchange, user authentication) runs
//! inline on the caller's task under one deadline. Once established, a
//! driver task owns the stream: it moves packets between the wire and the
//! application channels and answers or starts rekeys on the way.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use bytes::{Bytes, BytesMut};
use crypto_session::{BoxedRng, HostKey, PublicHostKey};
use futures::{SinkExt, StreamExt};
use parking_lot::Mutex;
use shared_protocol::{
    Disconnect, DisconnectReason, Identification, MAX_IDENTIFICATION_LENGTH, MessageClass,
    MessageType, ProtocolError, SessionRole, SessionState, message_number,
};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{Instant, sleep_until, timeout, timeout_at};
use tokio_util::codec::{Framed, FramedParts};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::auth::{self, HostKeyVerifier, InboundAuthPolicy, PasswordCredentials};
use crate::kex::{KexAction, KexContext, KeyExchange, NegotiatedAlgorithms, newkeys};
use crate::{
    PacketCodec, RekeyPolicy, RekeyReason, TransportConfig, TransportError, TransportResult,
};

/// Non-identification lines tolerated before the server's identification
const MAX_PRE_BANNER_LINES: usize = 1024;

/// Time allowed for a best-effort DISCONNECT on the way out
const DISCONNECT_GRACE: Duration = Duration::from_secs(1);

/// Packet and byte totals for the life of a session
#[derive(Debug, Default)]
pub struct TrafficStats {
    packets_sent: AtomicU64,
    bytes_sent: AtomicU64,
    packets_received: AtomicU64,
    bytes_received: AtomicU64,
    key_exchanges: AtomicU64,
    last_key_exchange: Mutex<Option<std::time::Instant>>,
}

impl TrafficStats {
    pub(crate) fn record_sent(&self, bytes: usize) {
        self.packets_sent.fetch_add(1, Ordering::Relaxed);
        self.bytes_sent.fetch_add(bytes as u64, Ordering::Relaxed);
    }

    pub(crate) fn record_received(&self, bytes: usize) {
        self.packets_received.fetch_add(1, Ordering::Relaxed);
        self.bytes_received.fetch_add(bytes as u64, Ordering::Relaxed);
    }

    pub(crate) fn record_key_exchange(&self) {
        self.key_exchanges.fetch_add(1, Ordering::Relaxed);
        *self.last_key_exchange.lock() = Some(std::time::Instant::now());
    }

    pub fn packets_sent(&self) -> u64 {
        self.packets_sent.load(Ordering::Relaxed)
    }

    pub fn packets_received(&self) -> u64 {
        self.packets_received.load(Ordering::Relaxed)
    }

    /// Completed key exchanges, the initial one included
    pub fn key_exchanges(&self) -> u64 {
        self.key_exchanges.load(Ordering::Relaxed)
    }

    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            packets_sent: self.packets_sent(),
            bytes_sent: self.bytes_sent.load(Ordering::Relaxed),
            packets_received: self.packets_received(),
            bytes_received: self.bytes_received.load(Ordering::Relaxed),
            key_exchanges: self.key_exchanges(),
            since_key_exchange: self.last_key_exchange.lock().map(|at| at.elapsed()),
        }
    }
}

/// Point-in-time copy of [`TrafficStats`]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StatsSnapshot {
    pub packets_sent: u64,
    pub bytes_sent: u64,
    pub packets_received: u64,
    pub bytes_received: u64,
    pub key_exchanges: u64,
    pub since_key_exchange: Option<Duration>,
}

/// What an established session agreed on
#[derive(Debug, Clone)]
pub struct SessionInfo {
    pub role: SessionRole,
    /// Username claimed by the client (responder) or used (initiator), as sent
    pub username: Bytes,
    /// Exchange hash of the first key exchange
    pub session_id: Bytes,
    pub local_identification: Identification,
    pub peer_identification: Identification,
    /// Algorithms of the initial key exchange
    pub algorithms: NegotiatedAlgorithms,
    /// Server host key fingerprint (initiator only)
    pub peer_host_key: Option<String>,
}

#[derive(Debug)]
enum Outbound {
    Packet(Bytes),
    Disconnect {
        reason: DisconnectReason,
        description: String,
    },
}

/// Sending half of an established session
#[derive(Debug, Clone)]
pub struct PacketSender {
    tx: mpsc::Sender<Outbound>,
}

impl PacketSender {
    /// Queue one payload; waits while the queue is full
    pub async fn send(&self, payload: Bytes) -> TransportResult<()> {
        if payload.is_empty() {
            return Err(ProtocolError::EmptyPayload.into());
        }
        self.tx
            .send(Outbound::Packet(payload))
            .await
            .map_err(|_| TransportError::Closed)
    }

    /// Send DISCONNECT after everything already queued, then end the session
    pub async fn disconnect(
        &self,
        reason: DisconnectReason,
        description: impl Into<String>,
    ) -> TransportResult<()> {
        self.tx
            .send(Outbound::Disconnect {
                reason,
                description: description.into(),
            })
            .await
            .map_err(|_| TransportError::Closed)
    }
}

/// Receiving half of an established session
#[derive(Debug)]
pub struct PacketReceiver {
    rx: mpsc::Receiver<TransportResult<Bytes>>,
}

impl PacketReceiver {
    /// Next application payload, in wire order.
    ///
    /// The error that ended the session is reported once, then `Closed`.
    pub async fn recv(&mut self) -> TransportResult<Bytes> {
        self.rx.recv().await.unwrap_or(Err(TransportError::Closed))
    }
}

/// Lifetime handle of a session's driver task
#[derive(Debug)]
pub struct SessionControl {
    shutdown: CancellationToken,
    driver: JoinHandle<()>,
}

impl SessionControl {
    /// Stop the driver and wait for it to exit
    pub async fn close(self) {
        self.shutdown.cancel();
        self.join().await;
    }

    /// Wait for the driver to exit on its own
    pub async fn join(self) {
        if let Err(e) = self.driver.await {
            warn!(error = %e, "session driver failed");
        }
    }

    /// Give the driver `grace` to flush queued packets after every sender
    /// is gone, then shut it down
    pub async fn drain(mut self, grace: Duration) {
        let waited = timeout(grace, &mut self.driver).await;
        match waited {
            Ok(Ok(())) => {}
            Ok(Err(e)) => warn!(error = %e, "session driver failed"),
            Err(_) => {
                debug!("session did not drain in time");
                self.close().await;
            }
        }
    }
}

/// An established SSH transport session
#[derive(Debug)]
pub struct TransportSession {
    info: SessionInfo,
    stats: Arc<TrafficStats>,
    sender: PacketSender,
    receiver: PacketReceiver,
    control: SessionControl,
}

impl TransportSession {
    pub fn info(&self) -> &SessionInfo {
        &self.info
    }

    pub fn stats(&self) -> StatsSnapshot {
        self.stats.snapshot()
    }

    pub async fn send(&self, payload: Bytes) -> TransportResult<()> {
        self.sender.send(payload).await
    }

    pub async fn recv(&mut self) -> TransportResult<Bytes> {
        self.receiver.recv().await
    }

    /// Send DISCONNECT and wait for the driver to finish
    pub async fn disconnect(
        self,
        reason: DisconnectReason,
        description: impl Into<String>,
    ) -> TransportResult<()> {
        let sent = self.sender.disconnect(reason, description).await;
        self.control.join().await;
        sent
    }

    /// Shut down with `SSH_DISCONNECT_BY_APPLICATION`
    pub async fn close(self) {
        self.control.close().await;
    }

    pub fn split(self) -> (PacketSender, PacketReceiver, SessionControl) {
        (self.sender, self.receiver, self.control)
    }
}

/// Role-specific handshake inputs
pub(crate) enum HandshakeRole {
    Responder {
        host_key: Arc<HostKey>,
        policy: Arc<dyn InboundAuthPolicy>,
    },
    Initiator {
        credentials: PasswordCredentials,
        verifier: Arc<dyn HostKeyVerifier>,
    },
}

impl HandshakeRole {
    fn session_role(&self) -> SessionRole {
        match self {
            Self::Responder { .. } => SessionRole::Responder,
            Self::Initiator { .. } => SessionRole::Initiator,
        }
    }
}

/// Run the whole handshake over `stream` and start the driver
pub(crate) async fn establish<S>(
    mut stream: S,
    config: Arc<TransportConfig>,
    role: HandshakeRole,
) -> TransportResult<TransportSession>
where
    S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    let deadline = Instant::now() + config.handshake_timeout;
    let session_role = role.session_role();
    let local_id = Identification::local(&config.software_version)?;

    let (peer_id, leftover) = match timeout_at(
        deadline,
        exchange_identification(&mut stream, &local_id, session_role),
    )
    .await
    {
        Ok(result) => result?,
        Err(_) => {
            warn!(role = %session_role, "handshake timed out during version exchange");
            return Err(TransportError::Timeout);
        }
    };
    debug!(role = %session_role, peer = %peer_id, "version exchange complete");

    let (host_key, verifier) = match &role {
        HandshakeRole::Responder { host_key, .. } => (Some(host_key.clone()), None),
        HandshakeRole::Initiator { verifier, .. } => (None, Some(verifier.clone())),
    };
    let ctx = KexContext {
        role: session_role,
        config,
        local_id,
        peer_id,
        host_key,
        verifier,
    };
    let mut conn = Connection::new(stream, leftover, ctx);

    let username = match timeout_at(deadline, conn.handshake(&role)).await {
        Ok(Ok(username)) => username,
        Ok(Err(error)) => {
            warn!(role = %session_role, error = %error, "handshake failed");
            conn.abort(&error).await;
            return Err(error);
        }
        Err(_) => {
            let error = TransportError::Timeout;
            warn!(role = %session_role, state = ?conn.state, "handshake timed out");
            conn.abort(&error).await;
            return Err(error);
        }
    };

    conn.into_session(username)
}

/// Send our identification line and read the peer's.
///
/// Returns the peer identification plus any bytes read past its line.
async fn exchange_identification<S>(
    stream: &mut S,
    local: &Identification,
    role: SessionRole,
) -> TransportResult<(Identification, BytesMut)>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    stream.write_all(&local.to_wire()).await?;
    stream.flush().await?;

    let mut buf = BytesMut::with_capacity(1024);
    let mut skipped = 0;
    loop {
        while let Some(end) = buf.iter().position(|b| *b == b'\n') {
            let line = buf.split_to(end + 1);
            if line.len() > MAX_IDENTIFICATION_LENGTH {
                return Err(ProtocolError::IdentificationTooLong {
                    max: MAX_IDENTIFICATION_LENGTH,
                }
                .into());
            }
            let text = String::from_utf8_lossy(&line);
            let text = text.trim_end_matches('\n').trim_end_matches('\r');

            if text.starts_with("SSH-") {
                return Ok((Identification::parse(text)?, buf));
            }
            // Only a server may send text before its identification
            if role.is_initiator() && skipped < MAX_PRE_BANNER_LINES {
                debug!(line = %text, "skipping pre-identification line");
                skipped += 1;
                continue;
            }
            return Err(ProtocolError::MalformedIdentification(text.to_string()).into());
        }

        if buf.len() >= MAX_IDENTIFICATION_LENGTH {
            return Err(ProtocolError::IdentificationTooLong {
                max: MAX_IDENTIFICATION_LENGTH,
            }
            .into());
        }
        if stream.read_buf(&mut buf).await? == 0 {
            return Err(TransportError::ConnectionClosed(
                "peer closed the connection during version exchange".into(),
            ));
        }
    }
}

fn peer_disconnect(payload: &[u8]) -> TransportError {
    match Disconnect::decode(payload) {
        Ok(disconnect) => TransportError::Disconnected {
            reason: disconnect.reason,
            description: disconnect.description,
        },
        Err(e) => e.into(),
    }
}

fn is_transport_noise(message: u8) -> bool {
    matches!(
        MessageType::from_byte(message),
        Some(MessageType::Ignore | MessageType::Debug | MessageType::Unimplemented)
    )
}

enum Event<'a> {
    Shutdown,
    Deliver(Option<mpsc::Permit<'a, TransportResult<Bytes>>>),
    Inbound(Option<TransportResult<Bytes>>),
    Outbound(Option<Outbound>),
    RekeyTimer,
}

/// A session before and after establishment; owned by exactly one task
pub(crate) struct Connection<S> {
    framed: Framed<S, PacketCodec>,
    ctx: KexContext,
    rng: BoxedRng,
    session_id: Option<Bytes>,
    state: SessionState,
    strict: bool,
    negotiated: Option<NegotiatedAlgorithms>,
    peer_host_key: Option<PublicHostKey>,
    stats: Arc<TrafficStats>,
}

impl<S> Connection<S>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    fn new(stream: S, leftover: BytesMut, ctx: KexContext) -> Self {
        let stats = Arc::new(TrafficStats::default());
        let codec = PacketCodec::new(ctx.config.rng(), stats.clone());
        let mut parts = FramedParts::new::<Bytes>(stream, codec);
        parts.read_buf = leftover;

        Self {
            framed: Framed::from_parts(parts),
            rng: ctx.config.rng(),
            ctx,
            session_id: None,
            state: SessionState::VersionExchange,
            strict: false,
            negotiated: None,
            peer_host_key: None,
            stats,
        }
    }

    fn transition(&mut self, next: SessionState) -> TransportResult<()> {
        self.state = self.state.transition(next, self.ctx.role)?;
        debug!(role = %self.ctx.role, state = ?self.state, "session state");
        Ok(())
    }

    async fn handshake(&mut self, role: &HandshakeRole) -> TransportResult<Bytes> {
        self.transition(SessionState::KeyExchange)?;
        self.initial_key_exchange().await?;

        self.transition(SessionState::authentication_for(self.ctx.role))?;
        let username = match role {
            HandshakeRole::Responder { policy, .. } => {
                auth::serve_authentication(self, policy.as_ref()).await?
            }
            HandshakeRole::Initiator { credentials, .. } => {
                auth::authenticate(self, credentials).await?
            }
        };

        self.transition(SessionState::Established)?;
        Ok(username)
    }

    async fn next_packet(&mut self) -> TransportResult<Bytes> {
        match self.framed.next().await {
            Some(packet) => packet,
            None => Err(TransportError::ConnectionClosed(format!(
                "peer closed the connection in {:?}",
                self.state
            ))),
        }
    }

    fn unexpected(&self, message: u8) -> TransportError {
        ProtocolError::UnexpectedMessage {
            state: self.state,
            message,
        }
        .into()
    }

    /// Write one packet
    pub(crate) async fn send(&mut self, payload: Bytes) -> TransportResult<()> {
        self.framed.send(payload).await
    }

    /// Next payload for the handshake, answering rekeys along the way
    pub(crate) async fn recv(&mut self) -> TransportResult<Bytes> {
        loop {
            let payload = self.next_packet().await?;
            let message = message_number(&payload)?;
            match MessageType::from_byte(message) {
                _ if is_transport_noise(message) => continue,
                Some(MessageType::Disconnect) => return Err(peer_disconnect(&payload)),
                Some(MessageType::KexInit) => self.inline_rekey(payload).await?,
                _ if MessageClass::of(message).is_kex() => return Err(self.unexpected(message)),
                _ => return Ok(payload),
            }
        }
    }

    async fn begin_key_exchange(&mut self, initial: bool) -> TransportResult<KeyExchange> {
        let (kex, kexinit) = KeyExchange::new(&self.ctx, &mut *self.rng, initial);
        self.framed.send(kexinit).await?;
        Ok(kex)
    }

    async fn feed_key_exchange(
        &mut self,
        kex: &mut KeyExchange,
        payload: &[u8],
    ) -> TransportResult<()> {
        let actions = kex.handle(&self.ctx, &mut *self.rng, &mut self.session_id, payload)?;
        if kex.is_initial() {
            self.strict = kex.strict();
        }

        for action in actions {
            match action {
                KexAction::Send(payload) => self.framed.send(payload).await?,
                KexAction::SendNewKeys(keys) => {
                    self.framed.send(newkeys()).await?;
                    let protection = keys.protection()?;
                    self.framed
                        .codec_mut()
                        .install_outbound(protection, self.strict);
                }
                KexAction::InstallInbound(keys) => {
                    let protection = keys.protection()?;
                    self.framed
                        .codec_mut()
                        .install_inbound(protection, self.strict);
                }
            }
        }

        if kex.is_done() {
            if let Some(negotiated) = kex.negotiated() {
                self.negotiated = Some(*negotiated);
            }
            if let Some(key) = kex.peer_host_key() {
                self.peer_host_key = Some(key.clone());
            }
            self.stats.record_key_exchange();
            info!(
                role = %self.ctx.role,
                initial = kex.is_initial(),
                count = self.stats.key_exchanges(),
                send_seq = self.framed.codec().send_sequence(),
                recv_seq = self.framed.codec().recv_sequence(),
                "key exchange complete"
            );
        }
        Ok(())
    }

    async fn initial_key_exchange(&mut self) -> TransportResult<()> {
        let mut kex = self.begin_key_exchange(true).await?;
        let mut before_kexinit = 0;

        while !kex.is_done() {
            let payload = self.next_packet().await?;
            let message = message_number(&payload)?;

            if MessageClass::of(message).is_kex() {
                self.feed_key_exchange(&mut kex, &payload).await?;
                if kex.strict() && before_kexinit > 0 {
                    return Err(ProtocolError::StrictKexViolation(
                        "KEXINIT was not the first packet",
                    )
                    .into());
                }
                continue;
            }

            match MessageType::from_byte(message) {
                Some(MessageType::Disconnect) => return Err(peer_disconnect(&payload)),
                _ if kex.strict() => {
                    return Err(ProtocolError::StrictKexViolation(
                        "unexpected message during initial key exchange",
                    )
                    .into());
                }
                _ if is_transport_noise(message) => {
                    if !kex.peer_kexinit_received() {
                        before_kexinit += 1;
                    }
                }
                _ => return Err(self.unexpected(message)),
            }
        }
        Ok(())
    }

    /// Peer-started rekey while the handshake is still running
    async fn inline_rekey(&mut self, peer_kexinit: Bytes) -> TransportResult<()> {
        debug!(role = %self.ctx.role, "peer started a key exchange");
        let mut kex = self.begin_key_exchange(false).await?;
        self.feed_key_exchange(&mut kex, &peer_kexinit).await?;

        while !kex.is_done() {
            let payload = self.next_packet().await?;
            let message = message_number(&payload)?;
            match MessageType::from_byte(message) {
                _ if is_transport_noise(message) => {}
                Some(MessageType::Disconnect) => return Err(peer_disconnect(&payload)),
                _ if MessageClass::of(message).is_kex() => {
                    self.feed_key_exchange(&mut kex, &payload).await?;
                }
                _ => return Err(self.unexpected(message)),
            }
        }
        Ok(())
    }

    /// Best-effort DISCONNECT describing `error`
    async fn abort(&mut self, error: &TransportError) {
        if error.peer_reachable() {
            let disconnect = Disconnect::new(error.disconnect_reason(), error.to_string());
            self.send_disconnect(disconnect).await;
        }
        self.state = SessionState::Closed;
    }

    async fn send_disconnect(&mut self, disconnect: Disconnect) {
        match timeout(DISCONNECT_GRACE, self.framed.send(disconnect.encode())).await {
            Ok(Ok(())) => debug!(reason = %disconnect.reason, "sent disconnect"),
            Ok(Err(e)) => debug!(error = %e, "could not send disconnect"),
            Err(_) => debug!("timed out sending disconnect"),
        }
    }
}

impl<S> Connection<S>
where
    S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    fn into_session(self, username: Bytes) -> TransportResult<TransportSession> {
        let algorithms = self.negotiated.ok_or_else(|| {
            TransportError::Framing("session established without a key exchange".into())
        })?;
        let info = SessionInfo {
            role: self.ctx.role,
            username,
            session_id: self.session_id.clone().unwrap_or_default(),
            local_identification: self.ctx.local_id.clone(),
            peer_identification: self.ctx.peer_id.clone(),
            algorithms,
            peer_host_key: self.peer_host_key.as_ref().map(PublicHostKey::fingerprint),
        };
        info!(
            role = %info.role,
            user = %String::from_utf8_lossy(&info.username),
            peer = %info.peer_identification,
            algorithms = %info.algorithms,
            "session established"
        );

        let capacity = self.ctx.config.channel_capacity;
        let (outbound_tx, outbound_rx) = mpsc::channel(capacity);
        let (inbound_tx, inbound_rx) = mpsc::channel(capacity);
        let shutdown = CancellationToken::new();
        let stats = self.stats.clone();
        let driver = tokio::spawn(self.drive(outbound_rx, inbound_tx, shutdown.clone()));

        Ok(TransportSession {
            info,
            stats,
            sender: PacketSender { tx: outbound_tx },
            receiver: PacketReceiver { rx: inbound_rx },
            control: SessionControl { shutdown, driver },
        })
    }

    async fn drive(
        mut self,
        mut outbound_rx: mpsc::Receiver<Outbound>,
        inbound_tx: mpsc::Sender<TransportResult<Bytes>>,
        shutdown: CancellationToken,
    ) {
        let mut policy = RekeyPolicy::new(self.ctx.config.rekey);
        let role = self.ctx.role;

        match self
            .run(&mut outbound_rx, &inbound_tx, &shutdown, &mut policy)
            .await
        {
            Ok(()) => debug!(%role, "session closed"),
            Err(error) => {
                if error.is_clean_disconnect() {
                    info!(%role, error = %error, "peer disconnected");
                } else {
                    warn!(%role, error = %error, "session failed");
                }
                self.abort(&error).await;
                tokio::select! {
                    _ = shutdown.cancelled() => {}
                    _ = inbound_tx.send(Err(error)) => {}
                }
            }
        }
        self.state = SessionState::Closed;
    }

    async fn run(
        &mut self,
        outbound_rx: &mut mpsc::Receiver<Outbound>,
        inbound_tx: &mpsc::Sender<TransportResult<Bytes>>,
        shutdown: &CancellationToken,
        policy: &mut RekeyPolicy,
    ) -> TransportResult<()> {
        let mut kex: Option<KeyExchange> = None;
        let mut pending: Option<Bytes> = None;
        let mut deliver = true;

        loop {
            if kex.is_none() {
                if let Some(reason) = policy.check_traffic(self.framed.codec().counters()) {
                    kex = Some(self.start_rekey(reason).await?);
                }
            }
            // Application packets wait while a rekey has not reached our NEWKEYS
            let outbound_open = kex.as_ref().is_none_or(KeyExchange::sent_newkeys);
            let rekey_at = policy.deadline();

            let event = tokio::select! {
                _ = shutdown.cancelled() => Event::Shutdown,
                permit = inbound_tx.reserve(), if pending.is_some() => Event::Deliver(permit.ok()),
                packet = self.framed.next(), if pending.is_none() => Event::Inbound(packet),
                command = outbound_rx.recv(), if outbound_open => Event::Outbound(command),
                _ = sleep_until(rekey_at), if kex.is_none() => Event::RekeyTimer,
            };

            match event {
                Event::Shutdown | Event::Outbound(None) => {
                    self.send_disconnect(Disconnect::new(
                        DisconnectReason::ByApplication,
                        "disconnected by application",
                    ))
                    .await;
                    return Ok(());
                }
                Event::Deliver(Some(permit)) => {
                    if let Some(payload) = pending.take() {
                        permit.send(Ok(payload));
                    }
                }
                Event::Deliver(None) => {
                    debug!("receiver dropped; discarding inbound packets");
                    pending = None;
                    deliver = false;
                }
                Event::Inbound(None) => {
                    return Err(TransportError::ConnectionClosed(
                        "peer closed the connection".into(),
                    ));
                }
                Event::Inbound(Some(packet)) => {
                    let payload = self.dispatch(packet?, &mut kex, policy).await?;
                    if deliver {
                        pending = payload;
                    }
                }
                Event::Outbound(Some(Outbound::Packet(payload))) => {
                    self.framed.send(payload).await?;
                }
                Event::Outbound(Some(Outbound::Disconnect {
                    reason,
                    description,
                })) => {
                    self.framed
                        .send(Disconnect::new(reason, description).encode())
                        .await?;
                    return Ok(());
                }
                Event::RekeyTimer => {
                    kex = Some(self.start_rekey(RekeyReason::Interval).await?);
                }
            }
        }
    }

    async fn start_rekey(&mut self, reason: RekeyReason) -> TransportResult<KeyExchange> {
        debug!(role = %self.ctx.role, %reason, "starting key exchange");
        self.begin_key_exchange(false).await
    }

    /// Handle one inbound packet; returns it if it belongs to the application
    async fn dispatch(
        &mut self,
        payload: Bytes,
        kex: &mut Option<KeyExchange>,
        policy: &mut RekeyPolicy,
    ) -> TransportResult<Option<Bytes>> {
        let message = message_number(&payload)?;
        match MessageClass::of(message) {
            MessageClass::AlgorithmNegotiation | MessageClass::KeyExchangeMethod => {
                if kex.is_none() && message == MessageType::KexInit.to_byte() {
                    debug!(role = %self.ctx.role, "peer started a key exchange");
                    *kex = Some(self.begin_key_exchange(false).await?);
                }
                let Some(active) = kex.as_mut() else {
                    return Err(self.unexpected(message));
                };
                self.feed_key_exchange(active, &payload).await?;
                if active.is_done() {
                    *kex = None;
                    policy.reset();
                }
                Ok(None)
            }
            MessageClass::UserAuth => Err(self.unexpected(message)),
            MessageClass::TransportGeneric | MessageClass::Connection => {
                match MessageType::from_byte(message) {
                    Some(MessageType::Unimplemented) => {
                        debug!("peer reported an unimplemented message");
                        Ok(None)
                    }
                    _ if is_transport_noise(message) => Ok(None),
                    Some(MessageType::Disconnect) => Err(peer_disconnect(&payload)),
                    Some(MessageType::ServiceRequest | MessageType::ServiceAccept) => {
                        Err(self.unexpected(message))
                    }
                    _ => Ok(Some(payload)),
                }
            }
        }
    }
}
