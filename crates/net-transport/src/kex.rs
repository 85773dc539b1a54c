//! Algorithm negotiation and the key exchange state machine
//!
//! One [`KeyExchange`] covers a single exchange, initial or rekey, in either
//! role. It never touches the stream: it consumes KEX payloads and returns
//! [`KexAction`]s that the session applies in order.

use std::sync::Arc;

use bytes::Bytes;
use crypto_session::{
    CipherAlgorithm, Direction, DirectionAlgorithms, DirectionKeys, EphemeralKeyPair,
    ExchangeHashInput, HostKey, HostKeyAlgorithm, KexAlgorithm, MacAlgorithm, PublicHostKey,
    SecureRandom, exchange_hash, random_array,
};
use shared_protocol::{
    Identification, KexEcdhInit, KexEcdhReply, KexInit, MessageType, ProtocolError, SessionRole,
    SessionState, encode_bare, message_number,
};
use tracing::{debug, info};

use crate::{HostKeyVerifier, TransportConfig, TransportError, TransportResult};

/// Strict KEX markers (OpenSSH PROTOCOL §1.10)
pub const STRICT_KEX_CLIENT: &str = "kex-strict-c-v00@openssh.com";
pub const STRICT_KEX_SERVER: &str = "kex-strict-s-v00@openssh.com";

const COMPRESSION_NONE: &str = "none";

/// Algorithms agreed for a session
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NegotiatedAlgorithms {
    pub kex: KexAlgorithm,
    pub host_key: HostKeyAlgorithm,
    pub client_to_server: DirectionAlgorithms,
    pub server_to_client: DirectionAlgorithms,
    pub strict_kex: bool,
}

impl NegotiatedAlgorithms {
    /// (outbound, inbound) directions for a role
    pub fn directions(&self, role: SessionRole) -> (Direction, Direction) {
        match role {
            SessionRole::Initiator => (Direction::ClientToServer, Direction::ServerToClient),
            SessionRole::Responder => (Direction::ServerToClient, Direction::ClientToServer),
        }
    }

    fn algorithms_for(&self, direction: Direction) -> DirectionAlgorithms {
        match direction {
            Direction::ClientToServer => self.client_to_server,
            Direction::ServerToClient => self.server_to_client,
        }
    }
}

impl std::fmt::Display for NegotiatedAlgorithms {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "kex={} hostkey={} c2s={}/{} s2c={}/{}",
            self.kex,
            self.host_key,
            self.client_to_server.cipher,
            self.client_to_server.mac_name(),
            self.server_to_client.cipher,
            self.server_to_client.mac_name(),
        )
    }
}

/// Build our KEXINIT
pub fn build_kexinit(
    config: &TransportConfig,
    role: SessionRole,
    host_key: Option<&HostKey>,
    initial: bool,
    rng: &mut dyn SecureRandom,
) -> KexInit {
    let prefs = &config.algorithms;

    let mut kex_algorithms: Vec<String> =
        prefs.kex.iter().map(|alg| alg.name().to_string()).collect();
    if initial {
        let marker = match role {
            SessionRole::Initiator => STRICT_KEX_CLIENT,
            SessionRole::Responder => STRICT_KEX_SERVER,
        };
        kex_algorithms.push(marker.to_string());
    }

    // A responder can only offer what it can sign with
    let host_key_algorithms = prefs
        .host_key
        .iter()
        .filter(|alg| match (role, host_key) {
            (SessionRole::Responder, Some(key)) => key.algorithm() == **alg,
            (SessionRole::Responder, None) => false,
            (SessionRole::Initiator, _) => true,
        })
        .map(|alg| alg.name().to_string())
        .collect();

    let ciphers: Vec<String> = prefs
        .ciphers
        .iter()
        .map(|alg| alg.name().to_string())
        .collect();
    let macs: Vec<String> = prefs.macs.iter().map(|alg| alg.name().to_string()).collect();
    let compression = vec![COMPRESSION_NONE.to_string()];

    KexInit {
        cookie: random_array(rng),
        kex_algorithms,
        server_host_key_algorithms: host_key_algorithms,
        encryption_client_to_server: ciphers.clone(),
        encryption_server_to_client: ciphers,
        mac_client_to_server: macs.clone(),
        mac_server_to_client: macs,
        compression_client_to_server: compression.clone(),
        compression_server_to_client: compression,
        languages_client_to_server: Vec::new(),
        languages_server_to_client: Vec::new(),
        first_kex_packet_follows: false,
    }
}

/// First entry of the client's list that the server also lists
fn first_match<'a>(
    category: &'static str,
    client: &'a [String],
    server: &[String],
) -> TransportResult<&'a str> {
    client
        .iter()
        .find(|name| server.contains(name))
        .map(String::as_str)
        .ok_or_else(|| TransportError::Negotiation {
            category,
            ours: client.join(","),
            theirs: server.join(","),
        })
}

fn parsed<T>(
    category: &'static str,
    name: &str,
    parse: impl Fn(&str) -> Option<T>,
) -> TransportResult<T> {
    parse(name).ok_or_else(|| TransportError::Negotiation {
        category,
        ours: name.to_string(),
        theirs: name.to_string(),
    })
}

fn negotiate_direction(
    category: &'static str,
    client_ciphers: &[String],
    server_ciphers: &[String],
    client_macs: &[String],
    server_macs: &[String],
) -> TransportResult<DirectionAlgorithms> {
    let name = first_match(category, client_ciphers, server_ciphers)?;
    let cipher = parsed(category, name, CipherAlgorithm::from_name)?;
    let mac = if cipher.is_aead() {
        None
    } else {
        let name = first_match("mac", client_macs, server_macs)?;
        Some(parsed("mac", name, MacAlgorithm::from_name)?)
    };
    Ok(DirectionAlgorithms { cipher, mac })
}

/// Pick one algorithm per category (RFC 4253 §7.1)
pub fn negotiate(client: &KexInit, server: &KexInit) -> TransportResult<NegotiatedAlgorithms> {
    let kex_name = first_match("key exchange", &client.kex_algorithms, &server.kex_algorithms)?;
    let kex = parsed("key exchange", kex_name, KexAlgorithm::from_name)?;

    let host_key_name = first_match(
        "host key",
        &client.server_host_key_algorithms,
        &server.server_host_key_algorithms,
    )?;
    let host_key = parsed("host key", host_key_name, HostKeyAlgorithm::from_name)?;

    let client_to_server = negotiate_direction(
        "cipher (client to server)",
        &client.encryption_client_to_server,
        &server.encryption_client_to_server,
        &client.mac_client_to_server,
        &server.mac_client_to_server,
    )?;
    let server_to_client = negotiate_direction(
        "cipher (server to client)",
        &client.encryption_server_to_client,
        &server.encryption_server_to_client,
        &client.mac_server_to_client,
        &server.mac_server_to_client,
    )?;

    first_match(
        "compression (client to server)",
        &client.compression_client_to_server,
        &server.compression_client_to_server,
    )?;
    first_match(
        "compression (server to client)",
        &client.compression_server_to_client,
        &server.compression_server_to_client,
    )?;

    let strict_kex = client.kex_algorithms.iter().any(|n| n == STRICT_KEX_CLIENT)
        && server.kex_algorithms.iter().any(|n| n == STRICT_KEX_SERVER);

    Ok(NegotiatedAlgorithms {
        kex,
        host_key,
        client_to_server,
        server_to_client,
        strict_kex,
    })
}

/// Whether a `first_kex_packet_follows` guess matches the negotiated outcome
fn guess_matches(client: &KexInit, server: &KexInit) -> bool {
    client.kex_algorithms.first() == server.kex_algorithms.first()
        && client.server_host_key_algorithms.first() == server.server_host_key_algorithms.first()
}

/// Long-lived inputs to every key exchange of one session
#[derive(Clone)]
pub(crate) struct KexContext {
    pub role: SessionRole,
    pub config: Arc<TransportConfig>,
    pub local_id: Identification,
    pub peer_id: Identification,
    pub host_key: Option<Arc<HostKey>>,
    pub verifier: Option<Arc<dyn HostKeyVerifier>>,
}

impl KexContext {
    fn client_id(&self) -> &Identification {
        match self.role {
            SessionRole::Initiator => &self.local_id,
            SessionRole::Responder => &self.peer_id,
        }
    }

    fn server_id(&self) -> &Identification {
        match self.role {
            SessionRole::Initiator => &self.peer_id,
            SessionRole::Responder => &self.local_id,
        }
    }
}

/// Work the session must perform, in order
pub(crate) enum KexAction {
    /// Write a KEX message
    Send(Bytes),
    /// Write NEWKEYS, then switch outbound keys
    SendNewKeys(DirectionKeys),
    /// Peer's NEWKEYS was read: switch inbound keys
    InstallInbound(DirectionKeys),
}

enum KexState {
    AwaitingKexInit,
    AwaitingEcdhInit,
    AwaitingReply { ephemeral: EphemeralKeyPair },
    AwaitingNewKeys { inbound: DirectionKeys },
    Done,
    Failed,
}

pub(crate) struct KeyExchange {
    state: KexState,
    initial: bool,
    our_kexinit: Bytes,
    peer_kexinit: Option<Bytes>,
    negotiated: Option<NegotiatedAlgorithms>,
    ignore_guessed_packet: bool,
    sent_newkeys: bool,
    peer_host_key: Option<PublicHostKey>,
}

impl KeyExchange {
    /// Start an exchange; the returned KEXINIT must be sent first
    pub fn new(ctx: &KexContext, rng: &mut dyn SecureRandom, initial: bool) -> (Self, Bytes) {
        let kexinit = build_kexinit(
            &ctx.config,
            ctx.role,
            ctx.host_key.as_deref(),
            initial,
            rng,
        )
        .encode();
        let kex = Self {
            state: KexState::AwaitingKexInit,
            initial,
            our_kexinit: kexinit.clone(),
            peer_kexinit: None,
            negotiated: None,
            ignore_guessed_packet: false,
            sent_newkeys: false,
            peer_host_key: None,
        };
        (kex, kexinit)
    }

    pub fn is_initial(&self) -> bool {
        self.initial
    }

    pub fn is_done(&self) -> bool {
        matches!(self.state, KexState::Done)
    }

    /// Our NEWKEYS is out; application packets may flow again
    pub fn sent_newkeys(&self) -> bool {
        self.sent_newkeys
    }

    pub fn peer_kexinit_received(&self) -> bool {
        self.peer_kexinit.is_some()
    }

    pub fn negotiated(&self) -> Option<&NegotiatedAlgorithms> {
        self.negotiated.as_ref()
    }

    /// Host key presented by the server (initiator role)
    pub fn peer_host_key(&self) -> Option<&PublicHostKey> {
        self.peer_host_key.as_ref()
    }

    pub fn strict(&self) -> bool {
        self.negotiated.is_some_and(|n| n.strict_kex)
    }

    /// Feed one KEX payload (message numbers 20-49)
    pub fn handle(
        &mut self,
        ctx: &KexContext,
        rng: &mut dyn SecureRandom,
        session_id: &mut Option<Bytes>,
        payload: &[u8],
    ) -> TransportResult<Vec<KexAction>> {
        let message = message_number(payload)?;

        if self.ignore_guessed_packet && (30..=49).contains(&message) {
            self.ignore_guessed_packet = false;
            debug!(message, "ignoring wrongly guessed key exchange packet");
            return Ok(Vec::new());
        }

        let state = std::mem::replace(&mut self.state, KexState::Failed);
        let (next, actions) = match (state, MessageType::from_byte(message)) {
            (KexState::AwaitingKexInit, Some(MessageType::KexInit)) => {
                self.on_kexinit(ctx, rng, payload)?
            }
            (KexState::AwaitingEcdhInit, Some(MessageType::KexEcdhInit)) => {
                self.on_ecdh_init(ctx, rng, session_id, payload)?
            }
            (KexState::AwaitingReply { ephemeral }, Some(MessageType::KexEcdhReply)) => {
                self.on_ecdh_reply(ctx, ephemeral, session_id, payload)?
            }
            (KexState::AwaitingNewKeys { inbound }, Some(MessageType::NewKeys)) => {
                (KexState::Done, vec![KexAction::InstallInbound(inbound)])
            }
            _ => {
                return Err(ProtocolError::UnexpectedMessage {
                    state: SessionState::KeyExchange,
                    message,
                }
                .into());
            }
        };
        self.state = next;
        Ok(actions)
    }

    fn on_kexinit(
        &mut self,
        ctx: &KexContext,
        rng: &mut dyn SecureRandom,
        payload: &[u8],
    ) -> TransportResult<(KexState, Vec<KexAction>)> {
        let peer = KexInit::decode(payload)?;
        let ours = KexInit::decode(&self.our_kexinit)?;
        let (client, server) = match ctx.role {
            SessionRole::Initiator => (&ours, &peer),
            SessionRole::Responder => (&peer, &ours),
        };
        let negotiated = negotiate(client, server)?;
        if peer.first_kex_packet_follows && !guess_matches(client, server) {
            self.ignore_guessed_packet = true;
        }
        debug!(role = %ctx.role, algorithms = %negotiated, strict = negotiated.strict_kex, "negotiated");

        self.peer_kexinit = Some(Bytes::copy_from_slice(payload));
        self.negotiated = Some(negotiated);

        match ctx.role {
            SessionRole::Initiator => {
                let ephemeral = EphemeralKeyPair::generate(negotiated.kex, rng)?;
                let init = KexEcdhInit {
                    client_public: Bytes::copy_from_slice(ephemeral.public_bytes()),
                };
                Ok((
                    KexState::AwaitingReply { ephemeral },
                    vec![KexAction::Send(init.encode())],
                ))
            }
            SessionRole::Responder => {
                let host_key = ctx.host_key.as_ref().ok_or_else(|| {
                    TransportError::HostKeyRejected("responder has no host key".into())
                })?;
                if host_key.algorithm() != negotiated.host_key {
                    return Err(TransportError::Negotiation {
                        category: "host key",
                        ours: host_key.algorithm().name().to_string(),
                        theirs: negotiated.host_key.name().to_string(),
                    });
                }
                Ok((KexState::AwaitingEcdhInit, Vec::new()))
            }
        }
    }

    fn on_ecdh_init(
        &mut self,
        ctx: &KexContext,
        rng: &mut dyn SecureRandom,
        session_id: &mut Option<Bytes>,
        payload: &[u8],
    ) -> TransportResult<(KexState, Vec<KexAction>)> {
        let negotiated = self.negotiated_or_err()?;
        let host_key = ctx
            .host_key
            .as_ref()
            .ok_or_else(|| TransportError::HostKeyRejected("responder has no host key".into()))?;
        let init = KexEcdhInit::decode(payload)?;

        let ephemeral = EphemeralKeyPair::generate(negotiated.kex, rng)?;
        let server_public = Bytes::copy_from_slice(ephemeral.public_bytes());
        let shared = ephemeral.agree(&init.client_public)?;
        let host_key_blob = host_key.public_key().to_blob();

        let peer_kexinit = self.peer_kexinit.clone().unwrap_or_default();
        let h = exchange_hash(
            &ExchangeHashInput {
                client_identification: ctx.client_id().as_bytes(),
                server_identification: ctx.server_id().as_bytes(),
                client_kexinit: &peer_kexinit,
                server_kexinit: &self.our_kexinit,
                host_key_blob: &host_key_blob,
                client_public: &init.client_public,
                server_public: &server_public,
            },
            &shared,
        );
        let sid = session_id.get_or_insert_with(|| Bytes::copy_from_slice(&h));

        let reply = KexEcdhReply {
            host_key: host_key_blob,
            server_public,
            signature: host_key.sign(&h),
        };

        let (out_dir, in_dir) = negotiated.directions(ctx.role);
        let outbound = DirectionKeys::derive(
            &shared,
            &h,
            sid,
            out_dir,
            negotiated.algorithms_for(out_dir),
        );
        let inbound =
            DirectionKeys::derive(&shared, &h, sid, in_dir, negotiated.algorithms_for(in_dir));
        self.sent_newkeys = true;

        Ok((
            KexState::AwaitingNewKeys { inbound },
            vec![
                KexAction::Send(reply.encode()),
                KexAction::SendNewKeys(outbound),
            ],
        ))
    }

    fn on_ecdh_reply(
        &mut self,
        ctx: &KexContext,
        ephemeral: EphemeralKeyPair,
        session_id: &mut Option<Bytes>,
        payload: &[u8],
    ) -> TransportResult<(KexState, Vec<KexAction>)> {
        let negotiated = self.negotiated_or_err()?;
        let reply = KexEcdhReply::decode(payload)?;

        let host_key = PublicHostKey::from_blob(&reply.host_key)?;
        if !host_key.supports(negotiated.host_key) {
            return Err(TransportError::HostKeyRejected(format!(
                "server sent a {} key, negotiated {}",
                host_key.key_type(),
                negotiated.host_key
            )));
        }

        let client_public = Bytes::copy_from_slice(ephemeral.public_bytes());
        let shared = ephemeral.agree(&reply.server_public)?;
        let peer_kexinit = self.peer_kexinit.clone().unwrap_or_default();
        let h = exchange_hash(
            &ExchangeHashInput {
                client_identification: ctx.client_id().as_bytes(),
                server_identification: ctx.server_id().as_bytes(),
                client_kexinit: &self.our_kexinit,
                server_kexinit: &peer_kexinit,
                host_key_blob: &reply.host_key,
                client_public: &client_public,
                server_public: &reply.server_public,
            },
            &shared,
        );

        // The signature proves the exchange; trust in the key is a separate decision
        host_key.verify(negotiated.host_key, &h, &reply.signature)?;
        let fingerprint = host_key.fingerprint();
        if let Some(verifier) = &ctx.verifier {
            if !verifier.verify(&host_key) {
                return Err(TransportError::HostKeyRejected(fingerprint));
            }
        }
        if self.initial {
            info!(host_key = %fingerprint, algorithm = %negotiated.host_key, "server host key");
        }
        self.peer_host_key = Some(host_key);

        let sid = session_id.get_or_insert_with(|| Bytes::copy_from_slice(&h));
        let (out_dir, in_dir) = negotiated.directions(ctx.role);
        let outbound = DirectionKeys::derive(
            &shared,
            &h,
            sid,
            out_dir,
            negotiated.algorithms_for(out_dir),
        );
        let inbound =
            DirectionKeys::derive(&shared, &h, sid, in_dir, negotiated.algorithms_for(in_dir));
        self.sent_newkeys = true;

        Ok((
            KexState::AwaitingNewKeys { inbound },
            vec![KexAction::SendNewKeys(outbound)],
        ))
    }

    fn negotiated_or_err(&self) -> TransportResult<NegotiatedAlgorithms> {
        self.negotiated.ok_or_else(|| {
            ProtocolError::UnexpectedMessage {
                state: SessionState::KeyExchange,
                message: MessageType::KexInit.to_byte(),
            }
            .into()
        })
    }
}

/// NEWKEYS payload
pub(crate) fn newkeys() -> Bytes {
    encode_bare(MessageType::NewKeys)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::AcceptAnyHostKey;
    use crypto_session::{HostKey, seeded_rng};

    fn names(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    fn kexinit_with(kex: &[&str], host_key: &[&str], ciphers: &[&str], macs: &[&str]) -> KexInit {
        KexInit {
            cookie: [0u8; 16],
            kex_algorithms: names(kex),
            server_host_key_algorithms: names(host_key),
            encryption_client_to_server: names(ciphers),
            encryption_server_to_client: names(ciphers),
            mac_client_to_server: names(macs),
            mac_server_to_client: names(macs),
            compression_client_to_server: names(&["none"]),
            compression_server_to_client: names(&["none"]),
            languages_client_to_server: Vec::new(),
            languages_server_to_client: Vec::new(),
            first_kex_packet_follows: false,
        }
    }

    #[test]
    fn test_client_order_wins() {
        let client = kexinit_with(
            &["ecdh-sha2-nistp256", "curve25519-sha256"],
            &["ssh-ed25519"],
            &["aes128-ctr", "chacha20-poly1305@openssh.com"],
            &["hmac-sha2-512", "hmac-sha2-256"],
        );
        let server = kexinit_with(
            &["curve25519-sha256", "ecdh-sha2-nistp256"],
            &["ssh-ed25519"],
            &["chacha20-poly1305@openssh.com", "aes128-ctr"],
            &["hmac-sha2-256", "hmac-sha2-512"],
        );
        let negotiated = negotiate(&client, &server).unwrap();
        assert_eq!(negotiated.kex, KexAlgorithm::EcdhSha2Nistp256);
        assert_eq!(negotiated.client_to_server.cipher, CipherAlgorithm::Aes128Ctr);
        assert_eq!(
            negotiated.client_to_server.mac,
            Some(MacAlgorithm::HmacSha512)
        );
        assert!(!negotiated.strict_kex);
    }

    #[test]
    fn test_aead_skips_mac_negotiation() {
        let client = kexinit_with(
            &["curve25519-sha256"],
            &["ssh-ed25519"],
            &["aes256-gcm@openssh.com"],
            &["hmac-md5"],
        );
        let server = kexinit_with(
            &["curve25519-sha256"],
            &["ssh-ed25519"],
            &["aes256-gcm@openssh.com"],
            &["hmac-sha2-256"],
        );
        let negotiated = negotiate(&client, &server).unwrap();
        assert_eq!(negotiated.server_to_client.mac, None);
    }

    #[test]
    fn test_empty_intersection_names_category() {
        let client = kexinit_with(
            &["curve25519-sha256"],
            &["rsa-sha2-512"],
            &["aes128-ctr"],
            &["hmac-sha2-256"],
        );
        let server = kexinit_with(
            &["curve25519-sha256"],
            &["ssh-ed25519"],
            &["aes128-ctr"],
            &["hmac-sha2-256"],
        );
        assert!(matches!(
            negotiate(&client, &server),
            Err(TransportError::Negotiation {
                category: "host key",
                ..
            })
        ));
    }

    #[test]
    fn test_strict_kex_requires_both_markers() {
        let mut client = kexinit_with(
            &["curve25519-sha256", STRICT_KEX_CLIENT],
            &["ssh-ed25519"],
            &["aes128-ctr"],
            &["hmac-sha2-256"],
        );
        let server = kexinit_with(
            &["curve25519-sha256", STRICT_KEX_SERVER],
            &["ssh-ed25519"],
            &["aes128-ctr"],
            &["hmac-sha2-256"],
        );
        assert!(negotiate(&client, &server).unwrap().strict_kex);

        client.kex_algorithms.pop();
        assert!(!negotiate(&client, &server).unwrap().strict_kex);
    }

    #[test]
    fn test_markers_only_on_initial_kexinit() {
        let config = TransportConfig::default();
        let mut rng = seeded_rng(3);
        let initial = build_kexinit(&config, SessionRole::Initiator, None, true, &mut *rng);
        assert!(initial.kex_algorithms.iter().any(|n| n == STRICT_KEX_CLIENT));
        let rekey = build_kexinit(&config, SessionRole::Initiator, None, false, &mut *rng);
        assert!(!rekey.kex_algorithms.iter().any(|n| n.starts_with("kex-strict")));
        assert_ne!(initial.cookie, rekey.cookie);
    }

    #[test]
    fn test_responder_offers_only_its_key_type() {
        let config = TransportConfig::default();
        let mut rng = seeded_rng(4);
        let key = HostKey::generate(&mut *rng);
        let kexinit = build_kexinit(&config, SessionRole::Responder, Some(&key), true, &mut *rng);
        assert_eq!(kexinit.server_host_key_algorithms, names(&["ssh-ed25519"]));
    }

    fn contexts() -> (KexContext, KexContext) {
        let mut rng = seeded_rng(12);
        let config = Arc::new(TransportConfig::default());
        let client_id = Identification::local("client_1").unwrap();
        let server_id = Identification::local("server_1").unwrap();
        let client = KexContext {
            role: SessionRole::Initiator,
            config: config.clone(),
            local_id: client_id.clone(),
            peer_id: server_id.clone(),
            host_key: None,
            verifier: Some(Arc::new(AcceptAnyHostKey)),
        };
        let server = KexContext {
            role: SessionRole::Responder,
            config,
            local_id: server_id,
            peer_id: client_id,
            host_key: Some(Arc::new(HostKey::generate(&mut *rng))),
            verifier: None,
        };
        (client, server)
    }

    fn sends(actions: &[KexAction]) -> Vec<Bytes> {
        actions
            .iter()
            .filter_map(|action| match action {
                KexAction::Send(payload) => Some(payload.clone()),
                KexAction::SendNewKeys(_) => Some(newkeys()),
                KexAction::InstallInbound(_) => None,
            })
            .collect()
    }

    #[test]
    fn test_machines_agree_on_session_id() {
        let (client_ctx, server_ctx) = contexts();
        let mut client_rng = seeded_rng(20);
        let mut server_rng = seeded_rng(21);
        let mut client_sid = None;
        let mut server_sid = None;

        let (mut client, client_init) = KeyExchange::new(&client_ctx, &mut *client_rng, true);
        let (mut server, server_init) = KeyExchange::new(&server_ctx, &mut *server_rng, true);

        let to_server = client
            .handle(&client_ctx, &mut *client_rng, &mut client_sid, &server_init)
            .unwrap();
        assert!(server
            .handle(&server_ctx, &mut *server_rng, &mut server_sid, &client_init)
            .unwrap()
            .is_empty());

        // ECDH_INIT
        let to_server = sends(&to_server);
        let to_client = server
            .handle(&server_ctx, &mut *server_rng, &mut server_sid, &to_server[0])
            .unwrap();
        assert!(server.sent_newkeys());

        // ECDH_REPLY, NEWKEYS
        let to_client = sends(&to_client);
        assert_eq!(to_client.len(), 2);
        let actions = client
            .handle(&client_ctx, &mut *client_rng, &mut client_sid, &to_client[0])
            .unwrap();
        assert!(matches!(actions[..], [KexAction::SendNewKeys(_)]));
        let actions = client
            .handle(&client_ctx, &mut *client_rng, &mut client_sid, &to_client[1])
            .unwrap();
        assert!(matches!(actions[..], [KexAction::InstallInbound(_)]));
        assert!(client.is_done());

        let actions = server
            .handle(&server_ctx, &mut *server_rng, &mut server_sid, &newkeys())
            .unwrap();
        assert!(matches!(actions[..], [KexAction::InstallInbound(_)]));
        assert!(server.is_done());

        assert!(client.strict());
        assert_eq!(client_sid, server_sid);
        assert_eq!(client_sid.map(|sid| sid.len()), Some(32));
        assert!(client.peer_host_key().is_some());
    }

    #[test]
    fn test_out_of_order_message_is_protocol_error() {
        let (client_ctx, _) = contexts();
        let mut rng = seeded_rng(30);
        let mut sid = None;
        let (mut client, _) = KeyExchange::new(&client_ctx, &mut *rng, true);
        assert!(matches!(
            client.handle(&client_ctx, &mut *rng, &mut sid, &newkeys()),
            Err(TransportError::Protocol(
                ProtocolError::UnexpectedMessage { message: 21, .. }
            ))
        ));
    }
}
