//! Per-direction key material and packet protection
//!
//! A key exchange produces one [`DirectionKeys`] for each direction. The
//! codec turns them into a [`PacketProtection`], which seals outgoing binary
//! packets and opens incoming ones.

use bytes::BytesMut;
use zeroize::Zeroizing;

use crate::{
    AesCtr, AesGcm, ChaChaPoly, CipherAlgorithm, CryptoError, CryptoResult, MacAlgorithm, MacKey,
    SharedSecret, AEAD_TAG_SIZE, derive_key,
};

/// Direction of traffic, named from the client's point of view
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    ClientToServer,
    ServerToClient,
}

impl Direction {
    /// RFC 4253 §7.2 letters for (IV, encryption key, integrity key)
    fn letters(self) -> (u8, u8, u8) {
        match self {
            Self::ClientToServer => (b'A', b'C', b'E'),
            Self::ServerToClient => (b'B', b'D', b'F'),
        }
    }
}

/// Negotiated algorithms for one direction
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DirectionAlgorithms {
    pub cipher: CipherAlgorithm,
    /// `None` for AEAD ciphers
    pub mac: Option<MacAlgorithm>,
}

impl DirectionAlgorithms {
    pub fn mac_name(&self) -> &'static str {
        match self.mac {
            Some(mac) => mac.name(),
            None => "<implicit>",
        }
    }
}

/// Derived key material for one direction
pub struct DirectionKeys {
    algorithms: DirectionAlgorithms,
    iv: Zeroizing<Vec<u8>>,
    key: Zeroizing<Vec<u8>>,
    mac_key: Zeroizing<Vec<u8>>,
}

impl DirectionKeys {
    pub fn derive(
        shared: &SharedSecret,
        exchange_hash: &[u8],
        session_id: &[u8],
        direction: Direction,
        algorithms: DirectionAlgorithms,
    ) -> Self {
        let (iv_letter, key_letter, mac_letter) = direction.letters();
        let cipher = algorithms.cipher;
        let iv = if cipher.iv_len() == 0 {
            Zeroizing::new(Vec::new())
        } else {
            derive_key(shared, exchange_hash, iv_letter, session_id, cipher.iv_len())
        };
        let key = derive_key(shared, exchange_hash, key_letter, session_id, cipher.key_len());
        let mac_key = match algorithms.mac {
            Some(mac) => derive_key(shared, exchange_hash, mac_letter, session_id, mac.key_len()),
            None => Zeroizing::new(Vec::new()),
        };
        Self {
            algorithms,
            iv,
            key,
            mac_key,
        }
    }

    pub fn algorithms(&self) -> DirectionAlgorithms {
        self.algorithms
    }

    /// Instantiate the cipher and MAC state
    pub fn protection(&self) -> CryptoResult<PacketProtection> {
        let DirectionAlgorithms { cipher, mac } = self.algorithms;
        let state = match cipher {
            CipherAlgorithm::ChaCha20Poly1305 => CipherState::ChaChaPoly(ChaChaPoly::new(&self.key)?),
            CipherAlgorithm::Aes256Gcm | CipherAlgorithm::Aes128Gcm => {
                CipherState::Gcm(AesGcm::new(cipher, &self.key, &self.iv)?)
            }
            CipherAlgorithm::Aes256Ctr | CipherAlgorithm::Aes128Ctr => {
                CipherState::Ctr(AesCtr::new(cipher, &self.key, &self.iv)?)
            }
        };
        let mac = match (cipher.is_aead(), mac) {
            (true, None) => None,
            (false, Some(mac)) => Some(MacKey::new(mac, &self.mac_key)?),
            (true, Some(mac)) => {
                return Err(CryptoError::UnsupportedAlgorithm(format!(
                    "{} with {}",
                    cipher, mac
                )));
            }
            (false, None) => {
                return Err(CryptoError::UnsupportedAlgorithm(format!(
                    "{} without a MAC",
                    cipher
                )));
            }
        };
        Ok(PacketProtection {
            algorithms: self.algorithms,
            cipher: state,
            mac,
        })
    }
}

impl std::fmt::Debug for DirectionKeys {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DirectionKeys")
            .field("algorithms", &self.algorithms)
            .finish_non_exhaustive()
    }
}

enum CipherState {
    ChaChaPoly(ChaChaPoly),
    Gcm(AesGcm),
    Ctr(AesCtr),
}

/// Sealing or opening state for one direction of a binary packet stream
pub struct PacketProtection {
    algorithms: DirectionAlgorithms,
    cipher: CipherState,
    mac: Option<MacKey>,
}

impl PacketProtection {
    pub fn algorithms(&self) -> DirectionAlgorithms {
        self.algorithms
    }

    pub fn block_size(&self) -> usize {
        self.algorithms.cipher.block_size()
    }

    fn is_etm(&self) -> bool {
        self.mac.as_ref().is_some_and(|mac| mac.algorithm().is_etm())
    }

    /// Whether the length field counts towards block alignment
    pub fn aligns_length_field(&self) -> bool {
        !self.algorithms.cipher.is_aead() && !self.is_etm()
    }

    /// Bytes needed before the packet length is known
    pub fn head_len(&self) -> usize {
        match self.cipher {
            CipherState::Ctr(_) if !self.is_etm() => self.block_size(),
            _ => 4,
        }
    }

    /// Length of the trailing tag or MAC
    pub fn tag_len(&self) -> usize {
        match &self.mac {
            Some(mac) => mac.algorithm().tag_len(),
            None => AEAD_TAG_SIZE,
        }
    }

    /// Recover `packet_length` from the first [`head_len`](Self::head_len)
    /// bytes. For plain CTR the head is decrypted in place and must not be
    /// decrypted again by [`open`](Self::open).
    pub fn packet_length(&mut self, seq: u32, head: &mut [u8]) -> u32 {
        let clear = |head: &[u8]| u32::from_be_bytes([head[0], head[1], head[2], head[3]]);
        match &mut self.cipher {
            CipherState::ChaChaPoly(cipher) => {
                cipher.decrypt_length(seq, [head[0], head[1], head[2], head[3]])
            }
            CipherState::Gcm(_) => clear(&*head),
            CipherState::Ctr(cipher) => {
                if !self.mac.as_ref().is_some_and(|mac| mac.algorithm().is_etm()) {
                    cipher.apply(head);
                }
                clear(&*head)
            }
        }
    }

    /// Encrypt a complete plaintext packet in place and append its tag
    pub fn seal(&mut self, seq: u32, packet: &mut BytesMut) -> CryptoResult<()> {
        match (&mut self.cipher, &self.mac) {
            (CipherState::ChaChaPoly(cipher), _) => {
                let tag = cipher.seal(seq, packet);
                packet.extend_from_slice(&tag);
            }
            (CipherState::Gcm(cipher), _) => {
                let tag = cipher.seal(packet)?;
                packet.extend_from_slice(&tag);
            }
            (CipherState::Ctr(cipher), Some(mac)) if mac.algorithm().is_etm() => {
                cipher.apply(&mut packet[4..]);
                let tag = mac.sign(seq, packet);
                packet.extend_from_slice(&tag);
            }
            (CipherState::Ctr(cipher), Some(mac)) => {
                let tag = mac.sign(seq, packet);
                cipher.apply(packet);
                packet.extend_from_slice(&tag);
            }
            (CipherState::Ctr(_), None) => {
                return Err(CryptoError::UnsupportedAlgorithm(
                    self.algorithms.cipher.name().to_string(),
                ));
            }
        }
        Ok(())
    }

    /// Authenticate and decrypt a packet (length field first, tag excluded)
    pub fn open(&mut self, seq: u32, packet: &mut [u8], tag: &[u8]) -> CryptoResult<()> {
        let head_len = self.head_len();
        match (&mut self.cipher, &self.mac) {
            (CipherState::ChaChaPoly(cipher), _) => cipher.open(seq, packet, tag),
            (CipherState::Gcm(cipher), _) => cipher.open(packet, tag),
            (CipherState::Ctr(cipher), Some(mac)) if mac.algorithm().is_etm() => {
                mac.verify(seq, packet, tag)?;
                cipher.apply(&mut packet[4..]);
                Ok(())
            }
            (CipherState::Ctr(cipher), Some(mac)) => {
                cipher.apply(&mut packet[head_len..]);
                mac.verify(seq, packet, tag)
            }
            (CipherState::Ctr(_), None) => Err(CryptoError::UnsupportedAlgorithm(
                self.algorithms.cipher.name().to_string(),
            )),
        }
    }
}

impl std::fmt::Debug for PacketProtection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PacketProtection")
            .field("algorithms", &self.algorithms)
            .finish_non_exhaustive()
    }
}
