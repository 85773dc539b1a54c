use std::sync::Arc;

use bytes::Bytes;
use crypto_session::{HostKey, seeded_rng};
use net_transport::{
    AuthDecision, InboundAuthPolicy, InitiatorSession, PasswordCredentials, RelayOutcome,
    ResponderSession, TransportConfig, TransportError,
};
use shared_protocol::{AuthMethod, DisconnectReason, UserauthRequest};
use tokio::io::duplex;
use tokio_util::sync::CancellationToken;
use zeroize::Zeroizing;

#[derive(Debug)]
struct RequirePassword(&'static str);

impl InboundAuthPolicy for RequirePassword {
    fn check(&self, request: &UserauthRequest) -> AuthDecision {
        match &request.method {
            AuthMethod::Password { password } if password == self.0 => AuthDecision::Accept,
            _ => AuthDecision::Reject,
        }
    }
}

fn host_key(seed: u64) -> Arc<HostKey> {
    Arc::new(HostKey::generate(&mut *seeded_rng(seed)))
}

fn config() -> Arc<TransportConfig> {
    Arc::new(TransportConfig::default())
}

#[tokio::test]
async fn test_client_reaches_server_with_proxy_password() {
    let (client_io, proxy_local) = duplex(64 * 1024);
    let (proxy_remote, server_io) = duplex(64 * 1024);
    let proxy_key = host_key(1);
    let cancel = CancellationToken::new();

    let proxy = tokio::spawn(sshpass_proxy::sshpass_proxy(
        proxy_local,
        proxy_remote,
        proxy_key.clone(),
        Zeroizing::new(b"correct horse".to_vec()),
        config(),
        cancel.clone(),
    ));
    let server = tokio::spawn(ResponderSession::accept_with_policy(
        server_io,
        host_key(2),
        Arc::new(RequirePassword("correct horse")),
        config(),
    ));

    // The client's own password is irrelevant
    let mut client = InitiatorSession::connect(
        client_io,
        PasswordCredentials::new("carol", "whatever"),
        config(),
    )
    .await
    .unwrap();
    assert_eq!(
        client.host_key_fingerprint(),
        Some(proxy_key.public_key().fingerprint().as_str())
    );

    let mut server = server.await.unwrap().unwrap();
    assert_eq!(server.username(), "carol");

    let request = Bytes::from_static(b"\x5a\x00\x00\x00\x07session");
    client.send(request.clone()).await.unwrap();
    assert_eq!(server.recv().await.unwrap(), request);

    let reply = Bytes::from_static(b"\x5b\x00\x00\x00\x00");
    server.send(reply.clone()).await.unwrap();
    assert_eq!(client.recv().await.unwrap(), reply);

    client
        .disconnect(DisconnectReason::ByApplication, "bye")
        .await
        .unwrap();
    assert_eq!(
        proxy.await.unwrap().unwrap(),
        RelayOutcome::CleanDisconnect
    );
    assert!(server.recv().await.unwrap_err().is_clean_disconnect());
}

#[tokio::test]
async fn test_server_rejects_password() {
    let (client_io, proxy_local) = duplex(64 * 1024);
    let (proxy_remote, server_io) = duplex(64 * 1024);

    let proxy = tokio::spawn(sshpass_proxy::sshpass_proxy(
        proxy_local,
        proxy_remote,
        host_key(1),
        Zeroizing::new(b"wrong".to_vec()),
        config(),
        CancellationToken::new(),
    ));
    let server = tokio::spawn(ResponderSession::accept_with_policy(
        server_io,
        host_key(2),
        Arc::new(RequirePassword("right")),
        config(),
    ));

    let mut client = InitiatorSession::connect(
        client_io,
        PasswordCredentials::new("dave", "x"),
        config(),
    )
    .await
    .unwrap();

    assert!(matches!(
        proxy.await.unwrap(),
        Err(TransportError::Authentication(_))
    ));
    assert!(server.await.unwrap().is_err());

    // The client learns why the proxy gave up
    match client.recv().await {
        Err(TransportError::Disconnected { reason, .. }) => {
            assert_eq!(reason, DisconnectReason::NoMoreAuthMethodsAvailable)
        }
        other => panic!("unexpected client result: {:?}", other),
    }
}

#[tokio::test]
async fn test_cancel_before_client_arrives() {
    let (_client_io, proxy_local) = duplex(1024);
    let (proxy_remote, _server_io) = duplex(1024);
    let cancel = CancellationToken::new();

    let proxy = tokio::spawn(sshpass_proxy::sshpass_proxy(
        proxy_local,
        proxy_remote,
        host_key(1),
        Zeroizing::new(b"pw".to_vec()),
        config(),
        cancel.clone(),
    ));
    cancel.cancel();
    assert_eq!(proxy.await.unwrap().unwrap(), RelayOutcome::Cancelled);
}
