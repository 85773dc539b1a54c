//! Binary packet protocol codec (RFC 4253 §6)
//!
//! `uint32 packet_length || byte padding_length || payload || padding || mac`
//!
//! The codec starts in clear mode. Keys are switched by the session once a
//! NEWKEYS message has been written ([`PacketCodec::install_outbound`]) or
//! read ([`PacketCodec::install_inbound`]).

use std::sync::Arc;

use bytes::{BufMut, Bytes, BytesMut};
use crypto_session::{BoxedRng, PacketProtection};
use rand::RngCore;
use shared_protocol::{MAX_PACKET_LENGTH, MIN_PADDING};
use tokio_util::codec::{Decoder, Encoder};
use tracing::trace;

use crate::{TrafficCounters, TrafficStats, TransportError, TransportResult};

/// Alignment used before any cipher is active
const CLEAR_BLOCK_SIZE: usize = 8;

/// Packets allowed under one set of keys before a sequence number repeats
const SEQUENCE_SPACE: u64 = 1 << 32;

#[derive(Debug, Clone, Copy)]
enum DecodeState {
    Head,
    Body { packet_length: usize },
}

pub struct PacketCodec {
    outbound: Option<PacketProtection>,
    inbound: Option<PacketProtection>,
    send_seq: u32,
    recv_seq: u32,
    sent_under_keys: u64,
    received_under_keys: u64,
    counters: TrafficCounters,
    stats: Arc<TrafficStats>,
    state: DecodeState,
    rng: BoxedRng,
}

impl PacketCodec {
    pub fn new(rng: BoxedRng, stats: Arc<TrafficStats>) -> Self {
        Self {
            outbound: None,
            inbound: None,
            send_seq: 0,
            recv_seq: 0,
            sent_under_keys: 0,
            received_under_keys: 0,
            counters: TrafficCounters::default(),
            stats,
            state: DecodeState::Head,
            rng,
        }
    }

    /// Switch outgoing keys. Call right after NEWKEYS has been encoded.
    pub fn install_outbound(&mut self, protection: PacketProtection, reset_sequence: bool) {
        self.outbound = Some(protection);
        self.sent_under_keys = 0;
        self.counters.bytes_sent = 0;
        self.counters.packets_sent = 0;
        if reset_sequence {
            self.send_seq = 0;
        }
    }

    /// Switch incoming keys. Call right after NEWKEYS has been decoded.
    pub fn install_inbound(&mut self, protection: PacketProtection, reset_sequence: bool) {
        self.inbound = Some(protection);
        self.received_under_keys = 0;
        self.counters.bytes_received = 0;
        self.counters.packets_received = 0;
        if reset_sequence {
            self.recv_seq = 0;
        }
    }

    pub fn send_sequence(&self) -> u32 {
        self.send_seq
    }

    pub fn recv_sequence(&self) -> u32 {
        self.recv_seq
    }

    /// Traffic since the last key installation
    pub fn counters(&self) -> &TrafficCounters {
        &self.counters
    }

    fn outbound_layout(&self) -> (usize, bool) {
        match &self.outbound {
            Some(p) => (p.block_size().max(CLEAR_BLOCK_SIZE), p.aligns_length_field()),
            None => (CLEAR_BLOCK_SIZE, true),
        }
    }

    fn inbound_layout(&self) -> (usize, bool, usize, usize) {
        match &self.inbound {
            Some(p) => (
                p.block_size().max(CLEAR_BLOCK_SIZE),
                p.aligns_length_field(),
                p.head_len(),
                p.tag_len(),
            ),
            None => (CLEAR_BLOCK_SIZE, true, 4, 0),
        }
    }

    /// Read the length field and validate it
    fn decode_head(&mut self, src: &mut BytesMut) -> TransportResult<Option<usize>> {
        let (block, aligns_length, head_len, _) = self.inbound_layout();
        if src.len() < head_len {
            return Ok(None);
        }

        let packet_length = match &mut self.inbound {
            Some(p) => p.packet_length(self.recv_seq, &mut src[..head_len]),
            None => u32::from_be_bytes([src[0], src[1], src[2], src[3]]),
        } as usize;

        if packet_length > MAX_PACKET_LENGTH {
            return Err(TransportError::Framing(format!(
                "packet length {} exceeds {}",
                packet_length, MAX_PACKET_LENGTH
            )));
        }
        if packet_length < 1 + MIN_PADDING {
            return Err(TransportError::Framing(format!(
                "packet length {} too small",
                packet_length
            )));
        }
        let aligned = if aligns_length {
            packet_length + 4
        } else {
            packet_length
        };
        if aligned % block != 0 || packet_length + 4 < head_len {
            return Err(TransportError::Framing(format!(
                "packet length {} not aligned to {}",
                packet_length, block
            )));
        }
        Ok(Some(packet_length))
    }

    fn check_sequence(under_keys: u64) -> TransportResult<()> {
        if under_keys >= SEQUENCE_SPACE {
            return Err(TransportError::Sequence);
        }
        Ok(())
    }
}

impl std::fmt::Debug for PacketCodec {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PacketCodec")
            .field("outbound", &self.outbound)
            .field("inbound", &self.inbound)
            .field("send_seq", &self.send_seq)
            .field("recv_seq", &self.recv_seq)
            .finish_non_exhaustive()
    }
}

impl Encoder<Bytes> for PacketCodec {
    type Error = TransportError;

    fn encode(&mut self, payload: Bytes, dst: &mut BytesMut) -> TransportResult<()> {
        if payload.is_empty() {
            return Err(TransportError::Framing("empty payload".into()));
        }
        Self::check_sequence(self.sent_under_keys)?;

        let (block, aligns_length) = self.outbound_layout();
        let unpadded = 1 + payload.len() + if aligns_length { 4 } else { 0 };
        let mut padding = block - unpadded % block;
        if padding < MIN_PADDING {
            padding += block;
        }
        let packet_length = 1 + payload.len() + padding;
        if packet_length > MAX_PACKET_LENGTH {
            return Err(TransportError::Framing(format!(
                "payload of {} bytes does not fit a packet",
                payload.len()
            )));
        }

        let tag_len = self.outbound.as_ref().map_or(0, |p| p.tag_len());
        let mut packet = BytesMut::with_capacity(4 + packet_length + tag_len);
        packet.put_u32(packet_length as u32);
        packet.put_u8(padding as u8);
        packet.put_slice(&payload);
        let mut pad = [0u8; 2 * 32];
        self.rng.fill_bytes(&mut pad[..padding]);
        packet.put_slice(&pad[..padding]);

        if let Some(protection) = &mut self.outbound {
            protection.seal(self.send_seq, &mut packet)?;
        }

        trace!(
            seq = self.send_seq,
            message = payload[0],
            len = packet.len(),
            "encoded packet"
        );
        dst.extend_from_slice(&packet);

        self.send_seq = self.send_seq.wrapping_add(1);
        self.sent_under_keys += 1;
        self.counters.packets_sent += 1;
        self.counters.bytes_sent += packet.len() as u64;
        self.stats.record_sent(packet.len());
        Ok(())
    }
}

impl Decoder for PacketCodec {
    type Item = Bytes;
    type Error = TransportError;

    fn decode(&mut self, src: &mut BytesMut) -> TransportResult<Option<Bytes>> {
        let packet_length = match self.state {
            DecodeState::Head => match self.decode_head(src)? {
                Some(len) => {
                    self.state = DecodeState::Body { packet_length: len };
                    len
                }
                None => return Ok(None),
            },
            DecodeState::Body { packet_length } => packet_length,
        };

        let (_, _, _, tag_len) = self.inbound_layout();
        let needed = 4 + packet_length + tag_len;
        if src.len() < needed {
            src.reserve(needed - src.len());
            return Ok(None);
        }
        Self::check_sequence(self.received_under_keys)?;

        let seq = self.recv_seq;
        let mut packet = src.split_to(4 + packet_length);
        let tag = src.split_to(tag_len);
        if let Some(protection) = &mut self.inbound {
            protection
                .open(seq, &mut packet, &tag)
                .map_err(|_| TransportError::Integrity { seq })?;
        }
        self.state = DecodeState::Head;

        let padding = packet[4] as usize;
        if padding < MIN_PADDING || padding + 1 >= packet_length {
            return Err(TransportError::Framing(format!(
                "invalid padding length {} for packet length {}",
                padding, packet_length
            )));
        }
        let payload_len = packet_length - padding - 1;
        let payload = packet.freeze().slice(5..5 + payload_len);

        trace!(seq, message = payload[0], len = needed, "decoded packet");

        self.recv_seq = self.recv_seq.wrapping_add(1);
        self.received_under_keys += 1;
        self.counters.packets_received += 1;
        self.counters.bytes_received += needed as u64;
        self.stats.record_received(needed);
        Ok(Some(payload))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crypto_session::{
        CipherAlgorithm, Direction, DirectionAlgorithms, DirectionKeys, MacAlgorithm,
        SharedSecret, seeded_rng,
    };

    fn codec() -> PacketCodec {
        PacketCodec::new(seeded_rng(1), Arc::new(TrafficStats::default()))
    }

    fn keys(algorithms: DirectionAlgorithms) -> DirectionKeys {
        let shared = SharedSecret::from_bytes(&[0x21; 32]);
        let h = [0x42u8; 32];
        DirectionKeys::derive(&shared, &h, &h, Direction::ClientToServer, algorithms)
    }

    fn keyed_pair(algorithms: DirectionAlgorithms, strict: bool) -> (PacketCodec, PacketCodec) {
        let mut sender = codec();
        let mut receiver = codec();
        sender.install_outbound(keys(algorithms).protection().unwrap(), strict);
        receiver.install_inbound(keys(algorithms).protection().unwrap(), strict);
        (sender, receiver)
    }

    #[test]
    fn test_clear_frame_layout() {
        let mut codec = codec();
        let mut buf = BytesMut::new();
        codec
            .encode(Bytes::from_static(b"\x15"), &mut buf)
            .unwrap();

        // 4 + 1 + 1 + padding is a multiple of 8 with at least 4 bytes of padding
        assert_eq!(buf.len() % 8, 0);
        let packet_length = u32::from_be_bytes([buf[0], buf[1], buf[2], buf[3]]) as usize;
        assert_eq!(packet_length + 4, buf.len());
        assert!(buf[4] as usize >= MIN_PADDING);

        let payload = codec.decode(&mut buf).unwrap().unwrap();
        assert_eq!(&payload[..], b"\x15");
        assert!(buf.is_empty());
        assert_eq!(codec.send_sequence(), 1);
        assert_eq!(codec.recv_sequence(), 1);
    }

    #[test]
    fn test_partial_input_waits_for_more() {
        let mut codec = codec();
        let mut wire = BytesMut::new();
        codec
            .encode(Bytes::from_static(b"\x02partial"), &mut wire)
            .unwrap();

        let mut src = BytesMut::new();
        for (i, byte) in wire.iter().enumerate() {
            src.put_u8(*byte);
            let decoded = codec.decode(&mut src).unwrap();
            if i + 1 < wire.len() {
                assert!(decoded.is_none());
            } else {
                assert_eq!(&decoded.unwrap()[..], b"\x02partial");
            }
        }
    }

    #[test]
    fn test_encrypted_modes_frame_and_unframe() {
        let modes = [
            DirectionAlgorithms {
                cipher: CipherAlgorithm::ChaCha20Poly1305,
                mac: None,
            },
            DirectionAlgorithms {
                cipher: CipherAlgorithm::Aes128Gcm,
                mac: None,
            },
            DirectionAlgorithms {
                cipher: CipherAlgorithm::Aes256Ctr,
                mac: Some(MacAlgorithm::HmacSha256),
            },
            DirectionAlgorithms {
                cipher: CipherAlgorithm::Aes128Ctr,
                mac: Some(MacAlgorithm::HmacSha512Etm),
            },
        ];
        for algorithms in modes {
            let (mut sender, mut receiver) = keyed_pair(algorithms, false);
            let mut wire = BytesMut::new();
            let payloads: Vec<Bytes> = (1..=20u8)
                .map(|n| Bytes::from(vec![94u8; n as usize * 13]))
                .collect();
            for payload in &payloads {
                sender.encode(payload.clone(), &mut wire).unwrap();
            }
            for payload in &payloads {
                let decoded = receiver.decode(&mut wire).unwrap().unwrap();
                assert_eq!(&decoded, payload, "{:?}", algorithms);
            }
            assert!(receiver.decode(&mut wire).unwrap().is_none());
        }
    }

    #[test]
    fn test_bit_flip_is_integrity_error() {
        let algorithms = DirectionAlgorithms {
            cipher: CipherAlgorithm::ChaCha20Poly1305,
            mac: None,
        };
        let (mut sender, mut receiver) = keyed_pair(algorithms, false);
        let mut wire = BytesMut::new();
        sender
            .encode(Bytes::from_static(b"\x5einteresting"), &mut wire)
            .unwrap();
        let mid = wire.len() / 2;
        wire[mid] ^= 0x04;

        assert!(matches!(
            receiver.decode(&mut wire),
            Err(TransportError::Integrity { seq: 0 })
        ));
    }

    #[test]
    fn test_oversized_length_is_framing_error() {
        let mut codec = codec();
        let mut src = BytesMut::new();
        src.put_u32(MAX_PACKET_LENGTH as u32 + 8);
        src.put_slice(&[0u8; 12]);
        assert!(matches!(
            codec.decode(&mut src),
            Err(TransportError::Framing(_))
        ));
    }

    #[test]
    fn test_short_padding_is_framing_error() {
        let mut codec = codec();
        let mut src = BytesMut::new();
        src.put_u32(12);
        src.put_u8(2);
        src.put_slice(&[0x5e; 11]);
        assert!(matches!(
            codec.decode(&mut src),
            Err(TransportError::Framing(_))
        ));
    }

    #[test]
    fn test_strict_install_resets_sequence() {
        let mut codec = codec();
        let mut buf = BytesMut::new();
        for _ in 0..3 {
            codec.encode(Bytes::from_static(b"\x02"), &mut buf).unwrap();
        }
        assert_eq!(codec.send_sequence(), 3);

        let algorithms = DirectionAlgorithms {
            cipher: CipherAlgorithm::Aes256Gcm,
            mac: None,
        };
        codec.install_outbound(keys(algorithms).protection().unwrap(), false);
        assert_eq!(codec.send_sequence(), 3);
        codec.install_outbound(keys(algorithms).protection().unwrap(), true);
        assert_eq!(codec.send_sequence(), 0);
        assert_eq!(codec.counters().packets_sent, 0);
    }

    #[test]
    fn test_sequence_exhaustion() {
        let mut codec = codec();
        codec.sent_under_keys = SEQUENCE_SPACE;
        let mut buf = BytesMut::new();
        assert!(matches!(
            codec.encode(Bytes::from_static(b"\x02"), &mut buf),
            Err(TransportError::Sequence)
        ));
    }
}
