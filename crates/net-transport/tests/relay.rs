mod common;

use std::sync::Arc;
use std::sync::atomic::Ordering;

use common::*;
use net_transport::{
    InitiatorSession, PasswordCredentials, RelayOutcome, ResponderSession, TransportConfig,
    TransportError, TransportResult, relay,
};
use shared_protocol::DisconnectReason;
use tokio::io::{DuplexStream, duplex};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

/// client <-> [responder | relay | initiator] <-> server
struct Chain {
    client: InitiatorSession,
    server: ResponderSession,
    relay: JoinHandle<TransportResult<RelayOutcome>>,
    cancel: CancellationToken,
}

async fn chain() -> Chain {
    let (client_io, proxy_in) = duplex(PIPE_CAPACITY);
    chain_over(client_io, proxy_in).await
}

/// Chain whose client leg runs over the given streams
async fn chain_over(client_io: DuplexStream, proxy_in: DuplexStream) -> Chain {
    let (proxy_out, server_io) = duplex(PIPE_CAPACITY);

    // The client's password is ignored; the proxy has its own
    let (client, front) = tokio::join!(
        InitiatorSession::connect(
            client_io,
            PasswordCredentials::new("alice", "anything"),
            Arc::new(TransportConfig::default()),
        ),
        ResponderSession::accept(proxy_in, host_key(1), Arc::new(TransportConfig::default())),
    );
    let (client, front) = (client.unwrap(), front.unwrap());

    let credentials = PasswordCredentials::new(front.username().clone(), "secret");
    let (back, server) = tokio::join!(
        InitiatorSession::connect(proxy_out, credentials, Arc::new(TransportConfig::default())),
        ResponderSession::accept_with_policy(
            server_io,
            host_key(2),
            Arc::new(RequirePassword("secret")),
            Arc::new(TransportConfig::default()),
        ),
    );
    let (back, server) = (back.unwrap(), server.unwrap());
    assert_eq!(server.username(), "alice");

    let cancel = CancellationToken::new();
    let relay = tokio::spawn(relay(front, back, cancel.clone()));
    Chain {
        client,
        server,
        relay,
        cancel,
    }
}

#[tokio::test]
async fn test_relay_preserves_order_both_ways() {
    init_tracing();
    let Chain {
        mut client,
        mut server,
        relay,
        ..
    } = chain().await;

    for n in 0..200 {
        client.send(data(n, 1 + (n as usize * 37) % 2000)).await.unwrap();
        server.send(data(n + 10_000, 64)).await.unwrap();
    }
    for n in 0..200 {
        assert_eq!(
            server.recv().await.unwrap(),
            data(n, 1 + (n as usize * 37) % 2000)
        );
        assert_eq!(client.recv().await.unwrap(), data(n + 10_000, 64));
    }

    client
        .disconnect(DisconnectReason::ByApplication, "logout")
        .await
        .unwrap();
    assert_eq!(relay.await.unwrap().unwrap(), RelayOutcome::CleanDisconnect);
    assert!(server.recv().await.unwrap_err().is_clean_disconnect());
}

#[tokio::test]
async fn test_server_clean_disconnect_ends_relay() {
    let Chain {
        mut client,
        server,
        relay,
        ..
    } = chain().await;

    server.send(data(1, 20)).await.unwrap();
    assert_eq!(client.recv().await.unwrap(), data(1, 20));

    server
        .disconnect(DisconnectReason::ByApplication, "exit")
        .await
        .unwrap();
    assert_eq!(relay.await.unwrap().unwrap(), RelayOutcome::CleanDisconnect);
    assert!(client.recv().await.unwrap_err().is_clean_disconnect());
}

#[tokio::test]
async fn test_unclean_disconnect_fails_relay() {
    let Chain {
        mut client,
        server,
        relay,
        ..
    } = chain().await;

    server
        .disconnect(DisconnectReason::ProtocolError, "confused")
        .await
        .unwrap();
    match relay.await.unwrap() {
        Err(TransportError::Disconnected { reason, .. }) => {
            assert_eq!(reason, DisconnectReason::ProtocolError)
        }
        other => panic!("unexpected relay result: {:?}", other),
    }
    // The client is still told goodbye
    assert!(client.recv().await.unwrap_err().is_clean_disconnect());
}

#[tokio::test]
async fn test_cancel_releases_both_sessions() {
    let Chain {
        mut client,
        mut server,
        relay,
        cancel,
    } = chain().await;

    client.send(data(1, 10)).await.unwrap();
    assert_eq!(server.recv().await.unwrap(), data(1, 10));

    cancel.cancel();
    assert_eq!(relay.await.unwrap().unwrap(), RelayOutcome::Cancelled);
    assert!(client.recv().await.unwrap_err().is_clean_disconnect());
    assert!(server.recv().await.unwrap_err().is_clean_disconnect());
}

#[tokio::test]
async fn test_corrupted_client_packet_fails_relay() {
    init_tracing();
    let (client_io, proxy_in, corrupt) = tampered_pipe();
    let Chain {
        mut client,
        mut server,
        relay,
        ..
    } = chain_over(client_io, proxy_in).await;

    client.send(data(1, 32)).await.unwrap();
    assert_eq!(server.recv().await.unwrap(), data(1, 32));

    corrupt.store(true, Ordering::SeqCst);
    client.send(data(2, 64)).await.unwrap();

    assert!(matches!(
        relay.await.unwrap(),
        Err(TransportError::Integrity { .. })
    ));
    // The corrupted packet never reaches the server, which is told goodbye
    assert!(server.recv().await.unwrap_err().is_clean_disconnect());
    assert!(matches!(
        client.recv().await,
        Err(TransportError::Disconnected {
            reason: DisconnectReason::MacError,
            ..
        })
    ));
}
