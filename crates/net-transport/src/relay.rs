//! Packet relay between two established sessions
//!
//! Two loops copy payloads, one per direction. The first loop to end decides
//! the outcome; the other is then stopped and both sessions are released.

use std::time::Duration;

use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace};

use crate::{
    InitiatorSession, PacketReceiver, PacketSender, ResponderSession, TransportError,
    TransportResult,
};

/// Time a surviving session gets to flush relayed packets
const DRAIN_GRACE: Duration = Duration::from_secs(2);

/// How a relay that did not fail ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RelayOutcome {
    /// One side sent DISCONNECT with `SSH_DISCONNECT_BY_APPLICATION`
    CleanDisconnect,
    /// The caller's token was cancelled
    Cancelled,
}

#[derive(Debug)]
enum LoopEnd {
    RecvFailed(TransportError),
    SendClosed,
    Cancelled,
}

#[derive(Debug, Clone, Copy)]
enum Direction {
    ClientToServer,
    ServerToClient,
}

impl std::fmt::Display for Direction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::ClientToServer => f.write_str("client->server"),
            Self::ServerToClient => f.write_str("server->client"),
        }
    }
}

async fn pump(
    mut from: PacketReceiver,
    to: PacketSender,
    stop: CancellationToken,
    direction: Direction,
) -> LoopEnd {
    let mut forwarded: u64 = 0;
    let end = loop {
        let payload = tokio::select! {
            _ = stop.cancelled() => break LoopEnd::Cancelled,
            received = from.recv() => match received {
                Ok(payload) => payload,
                Err(e) => break LoopEnd::RecvFailed(e),
            },
        };
        trace!(%direction, message = payload[0], len = payload.len(), "relaying packet");

        tokio::select! {
            _ = stop.cancelled() => break LoopEnd::Cancelled,
            sent = to.send(payload) => {
                if sent.is_err() {
                    break LoopEnd::SendClosed;
                }
            }
        }
        forwarded += 1;
    };
    debug!(%direction, forwarded, end = ?end, "relay loop finished");
    end
}

async fn next_end(loops: &mut JoinSet<LoopEnd>) -> LoopEnd {
    match loops.join_next().await {
        Some(Ok(end)) => end,
        Some(Err(e)) => LoopEnd::RecvFailed(TransportError::ConnectionClosed(format!(
            "relay loop failed: {}",
            e
        ))),
        None => LoopEnd::Cancelled,
    }
}

/// Relay packets between a client-facing and a server-facing session until
/// one of them ends or `cancel` fires
pub async fn relay(
    responder: ResponderSession,
    initiator: InitiatorSession,
    cancel: CancellationToken,
) -> TransportResult<RelayOutcome> {
    let stop = cancel.child_token();
    let (client_tx, client_rx, client_control) = responder.split();
    let (server_tx, server_rx, server_control) = initiator.split();

    let mut loops = JoinSet::new();
    loops.spawn(pump(
        client_rx,
        server_tx,
        stop.clone(),
        Direction::ClientToServer,
    ));
    loops.spawn(pump(
        server_rx,
        client_tx,
        stop.clone(),
        Direction::ServerToClient,
    ));

    // A closed destination is a symptom; the loop reading it has the cause
    let end = match next_end(&mut loops).await {
        LoopEnd::SendClosed => next_end(&mut loops).await,
        end => end,
    };

    stop.cancel();
    while loops.join_next().await.is_some() {}
    tokio::join!(
        client_control.drain(DRAIN_GRACE),
        server_control.drain(DRAIN_GRACE)
    );

    match end {
        LoopEnd::RecvFailed(e) if e.is_clean_disconnect() => {
            info!(reason = %e, "relay finished");
            Ok(RelayOutcome::CleanDisconnect)
        }
        LoopEnd::RecvFailed(e) => Err(e),
        LoopEnd::Cancelled | LoopEnd::SendClosed if cancel.is_cancelled() => {
            info!("relay cancelled");
            Ok(RelayOutcome::Cancelled)
        }
        LoopEnd::Cancelled | LoopEnd::SendClosed => Err(TransportError::Closed),
    }
}
