#![allow(dead_code)]

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use bytes::Bytes;
use crypto_session::{HostKey, seeded_rng};
use net_transport::{
    AuthDecision, InboundAuthPolicy, InitiatorSession, PasswordCredentials, ResponderSession,
    TransportConfig, TransportResult,
};
use shared_protocol::{AuthMethod, UserauthRequest};
use tokio::io::{AsyncReadExt, AsyncWriteExt, DuplexStream, ReadHalf, WriteHalf, duplex};

pub const PIPE_CAPACITY: usize = 64 * 1024;

pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter("net_transport=debug")
        .with_test_writer()
        .try_init();
}

pub fn host_key(seed: u64) -> Arc<HostKey> {
    Arc::new(HostKey::generate(&mut *seeded_rng(seed)))
}

pub fn seeded_config(seed: u64) -> TransportConfig {
    TransportConfig::default().with_rng_source(Arc::new(move || seeded_rng(seed)))
}

/// Channel data style payload
pub fn data(n: u32, len: usize) -> Bytes {
    let mut payload = vec![94u8];
    payload.extend_from_slice(&n.to_be_bytes());
    payload.resize(len.max(5), (n % 251) as u8);
    Bytes::from(payload)
}

/// Accepts only one password
#[derive(Debug)]
pub struct RequirePassword(pub &'static str);

impl InboundAuthPolicy for RequirePassword {
    fn check(&self, request: &UserauthRequest) -> AuthDecision {
        match &request.method {
            AuthMethod::Password { password } if password == self.0 => AuthDecision::Accept,
            _ => AuthDecision::Reject,
        }
    }
}

/// Accepts only one password, compared byte for byte
#[derive(Debug)]
pub struct RequireRawPassword(pub &'static [u8]);

impl InboundAuthPolicy for RequireRawPassword {
    fn check(&self, request: &UserauthRequest) -> AuthDecision {
        match &request.method {
            AuthMethod::Password { password } if password == self.0 => AuthDecision::Accept,
            _ => AuthDecision::Reject,
        }
    }
}

/// Run both handshakes over `client_io` / `server_io`
pub async fn handshake_over(
    client_io: DuplexStream,
    server_io: DuplexStream,
    client_config: TransportConfig,
    server_config: TransportConfig,
) -> (
    TransportResult<InitiatorSession>,
    TransportResult<ResponderSession>,
) {
    let credentials = PasswordCredentials::new("alice", "secret");
    tokio::join!(
        InitiatorSession::connect(client_io, credentials, Arc::new(client_config)),
        ResponderSession::accept_with_policy(
            server_io,
            host_key(7),
            Arc::new(RequirePassword("secret")),
            Arc::new(server_config),
        ),
    )
}

pub async fn handshake(
    client_config: TransportConfig,
    server_config: TransportConfig,
) -> (InitiatorSession, ResponderSession) {
    let (client_io, server_io) = duplex(PIPE_CAPACITY);
    let (client, server) =
        handshake_over(client_io, server_io, client_config, server_config).await;
    (client.unwrap(), server.unwrap())
}

/// Copies bytes one way; flips the last byte of one chunk when armed
pub async fn forward(
    mut from: ReadHalf<DuplexStream>,
    mut to: WriteHalf<DuplexStream>,
    corrupt: Arc<AtomicBool>,
) {
    let mut buf = vec![0u8; PIPE_CAPACITY];
    loop {
        let n = match from.read(&mut buf).await {
            Ok(0) | Err(_) => break,
            Ok(n) => n,
        };
        if corrupt.swap(false, Ordering::SeqCst) {
            buf[n - 1] ^= 0x01;
        }
        if to.write_all(&buf[..n]).await.is_err() {
            break;
        }
    }
    let _ = to.shutdown().await;
}

/// Client and server streams joined through a tamperable middle
pub fn tampered_pipe() -> (DuplexStream, DuplexStream, Arc<AtomicBool>) {
    let (client_io, client_far) = duplex(PIPE_CAPACITY);
    let (server_far, server_io) = duplex(PIPE_CAPACITY);
    let (client_read, client_write) = tokio::io::split(client_far);
    let (server_read, server_write) = tokio::io::split(server_far);

    let corrupt = Arc::new(AtomicBool::new(false));
    tokio::spawn(forward(client_read, server_write, corrupt.clone()));
    tokio::spawn(forward(server_read, client_write, Arc::new(AtomicBool::new(false))));
    (client_io, server_io, corrupt)
}
