//! Packet ciphers
//!
//! - `chacha20-poly1305@openssh.com` (OpenSSH PROTOCOL.chacha20poly1305)
//! - `aes128-gcm@openssh.com`, `aes256-gcm@openssh.com` (RFC 5647)
//! - `aes128-ctr`, `aes256-ctr` (RFC 4344), paired with an HMAC

use aes_gcm::aead::{AeadInPlace, KeyInit};
use aes_gcm::{Aes128Gcm, Aes256Gcm, Nonce, Tag};
use chacha20::ChaCha20Legacy;
use ctr::cipher::{KeyIvInit, StreamCipher, StreamCipherSeek};
use poly1305::Poly1305;
use subtle::ConstantTimeEq;
use zeroize::Zeroizing;

use crate::{CryptoError, CryptoResult};

type Aes128Ctr = ctr::Ctr128BE<aes::Aes128>;
type Aes256Ctr = ctr::Ctr128BE<aes::Aes256>;

/// Authentication tag size of the AEAD modes
pub const AEAD_TAG_SIZE: usize = 16;

/// Cipher algorithms, in default preference order
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CipherAlgorithm {
    ChaCha20Poly1305,
    Aes256Gcm,
    Aes128Gcm,
    Aes256Ctr,
    Aes128Ctr,
}

impl CipherAlgorithm {
    pub const ALL: [CipherAlgorithm; 5] = [
        Self::ChaCha20Poly1305,
        Self::Aes256Gcm,
        Self::Aes128Gcm,
        Self::Aes256Ctr,
        Self::Aes128Ctr,
    ];

    pub fn name(self) -> &'static str {
        match self {
            Self::ChaCha20Poly1305 => "chacha20-poly1305@openssh.com",
            Self::Aes256Gcm => "aes256-gcm@openssh.com",
            Self::Aes128Gcm => "aes128-gcm@openssh.com",
            Self::Aes256Ctr => "aes256-ctr",
            Self::Aes128Ctr => "aes128-ctr",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|alg| alg.name() == name)
    }

    pub fn key_len(self) -> usize {
        match self {
            // main key followed by header key
            Self::ChaCha20Poly1305 => 64,
            Self::Aes256Gcm | Self::Aes256Ctr => 32,
            Self::Aes128Gcm | Self::Aes128Ctr => 16,
        }
    }

    pub fn iv_len(self) -> usize {
        match self {
            Self::ChaCha20Poly1305 => 0,
            Self::Aes256Gcm | Self::Aes128Gcm => 12,
            Self::Aes256Ctr | Self::Aes128Ctr => 16,
        }
    }

    pub fn block_size(self) -> usize {
        match self {
            Self::ChaCha20Poly1305 => 8,
            _ => 16,
        }
    }

    /// AEAD ciphers carry their own tag and need no MAC
    pub fn is_aead(self) -> bool {
        matches!(
            self,
            Self::ChaCha20Poly1305 | Self::Aes256Gcm | Self::Aes128Gcm
        )
    }
}

impl std::fmt::Display for CipherAlgorithm {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

fn check_len(expected: usize, actual: usize) -> CryptoResult<()> {
    if expected != actual {
        return Err(CryptoError::InvalidKeyLength { expected, actual });
    }
    Ok(())
}

/// `chacha20-poly1305@openssh.com` keys for one direction
pub struct ChaChaPoly {
    main_key: Zeroizing<[u8; 32]>,
    header_key: Zeroizing<[u8; 32]>,
}

impl ChaChaPoly {
    pub fn new(key: &[u8]) -> CryptoResult<Self> {
        check_len(64, key.len())?;
        let mut main_key = Zeroizing::new([0u8; 32]);
        let mut header_key = Zeroizing::new([0u8; 32]);
        main_key.copy_from_slice(&key[..32]);
        header_key.copy_from_slice(&key[32..]);
        Ok(Self {
            main_key,
            header_key,
        })
    }

    fn stream(key: &[u8; 32], seq: u32) -> ChaCha20Legacy {
        let nonce = u64::from(seq).to_be_bytes();
        <ChaCha20Legacy as KeyIvInit>::new(key.into(), &nonce.into())
    }

    /// Decrypt the length field without touching the buffer
    pub fn decrypt_length(&self, seq: u32, encrypted: [u8; 4]) -> u32 {
        let mut length = encrypted;
        Self::stream(&self.header_key, seq).apply_keystream(&mut length);
        u32::from_be_bytes(length)
    }

    fn poly1305(&self, seq: u32) -> (Poly1305, ChaCha20Legacy) {
        let mut main = Self::stream(&self.main_key, seq);
        let mut poly_key = Zeroizing::new([0u8; 32]);
        main.apply_keystream(&mut *poly_key);
        // payload keystream starts at block 1
        main.seek(64u64);
        (<Poly1305 as KeyInit>::new((&*poly_key).into()), main)
    }

    /// Encrypt `packet` (length field first) in place and return the tag
    pub fn seal(&self, seq: u32, packet: &mut [u8]) -> [u8; AEAD_TAG_SIZE] {
        let (length, body) = packet.split_at_mut(4);
        Self::stream(&self.header_key, seq).apply_keystream(length);
        let (mac, mut main) = self.poly1305(seq);
        main.apply_keystream(body);
        mac.compute_unpadded(packet).into()
    }

    /// Verify the tag, then decrypt `packet` in place
    pub fn open(&self, seq: u32, packet: &mut [u8], tag: &[u8]) -> CryptoResult<()> {
        let (mac, mut main) = self.poly1305(seq);
        let expected = mac.compute_unpadded(packet);
        if !bool::from(expected.as_slice().ct_eq(tag)) {
            return Err(CryptoError::DecryptionFailed);
        }
        let (length, body) = packet.split_at_mut(4);
        Self::stream(&self.header_key, seq).apply_keystream(length);
        main.apply_keystream(body);
        Ok(())
    }
}

enum GcmCipher {
    Aes128(Box<Aes128Gcm>),
    Aes256(Box<Aes256Gcm>),
}

/// AES-GCM with the RFC 5647 invocation counter
pub struct AesGcm {
    cipher: GcmCipher,
    fixed: [u8; 4],
    invocation: u64,
}

impl AesGcm {
    pub fn new(algorithm: CipherAlgorithm, key: &[u8], iv: &[u8]) -> CryptoResult<Self> {
        check_len(algorithm.key_len(), key.len())?;
        check_len(12, iv.len())?;
        let invalid = |_| CryptoError::InvalidKeyLength {
            expected: algorithm.key_len(),
            actual: key.len(),
        };
        let cipher = match algorithm {
            CipherAlgorithm::Aes128Gcm => {
                GcmCipher::Aes128(Box::new(Aes128Gcm::new_from_slice(key).map_err(invalid)?))
            }
            CipherAlgorithm::Aes256Gcm => {
                GcmCipher::Aes256(Box::new(Aes256Gcm::new_from_slice(key).map_err(invalid)?))
            }
            other => return Err(CryptoError::UnsupportedAlgorithm(other.name().to_string())),
        };
        let mut fixed = [0u8; 4];
        fixed.copy_from_slice(&iv[..4]);
        let mut invocation = [0u8; 8];
        invocation.copy_from_slice(&iv[4..]);
        Ok(Self {
            cipher,
            fixed,
            invocation: u64::from_be_bytes(invocation),
        })
    }

    fn next_nonce(&mut self) -> [u8; 12] {
        let mut nonce = [0u8; 12];
        nonce[..4].copy_from_slice(&self.fixed);
        nonce[4..].copy_from_slice(&self.invocation.to_be_bytes());
        self.invocation = self.invocation.wrapping_add(1);
        nonce
    }

    /// Encrypt everything after the clear length field, which is the AAD
    pub fn seal(&mut self, packet: &mut [u8]) -> CryptoResult<[u8; AEAD_TAG_SIZE]> {
        let nonce = self.next_nonce();
        let nonce = Nonce::from_slice(&nonce);
        let (aad, body) = packet.split_at_mut(4);
        let tag = match &self.cipher {
            GcmCipher::Aes128(c) => c.encrypt_in_place_detached(nonce, aad, body),
            GcmCipher::Aes256(c) => c.encrypt_in_place_detached(nonce, aad, body),
        }
        .map_err(|_| CryptoError::Encryption("aes-gcm".into()))?;
        Ok(tag.into())
    }

    pub fn open(&mut self, packet: &mut [u8], tag: &[u8]) -> CryptoResult<()> {
        let nonce = self.next_nonce();
        if tag.len() != AEAD_TAG_SIZE {
            return Err(CryptoError::DecryptionFailed);
        }
        let nonce = Nonce::from_slice(&nonce);
        let tag = Tag::from_slice(tag);
        let (aad, body) = packet.split_at_mut(4);
        match &self.cipher {
            GcmCipher::Aes128(c) => c.decrypt_in_place_detached(nonce, aad, body, tag),
            GcmCipher::Aes256(c) => c.decrypt_in_place_detached(nonce, aad, body, tag),
        }
        .map_err(|_| CryptoError::DecryptionFailed)
    }
}

/// AES in counter mode; the keystream runs on across packets
pub enum AesCtr {
    Aes128(Box<Aes128Ctr>),
    Aes256(Box<Aes256Ctr>),
}

impl AesCtr {
    pub fn new(algorithm: CipherAlgorithm, key: &[u8], iv: &[u8]) -> CryptoResult<Self> {
        check_len(algorithm.key_len(), key.len())?;
        check_len(16, iv.len())?;
        let invalid = |_| CryptoError::InvalidKeyLength {
            expected: algorithm.key_len(),
            actual: key.len(),
        };
        Ok(match algorithm {
            CipherAlgorithm::Aes128Ctr => {
                Self::Aes128(Box::new(Aes128Ctr::new_from_slices(key, iv).map_err(invalid)?))
            }
            CipherAlgorithm::Aes256Ctr => {
                Self::Aes256(Box::new(Aes256Ctr::new_from_slices(key, iv).map_err(invalid)?))
            }
            other => return Err(CryptoError::UnsupportedAlgorithm(other.name().to_string())),
        })
    }

    pub fn apply(&mut self, data: &mut [u8]) {
        match self {
            Self::Aes128(c) => c.apply_keystream(data),
            Self::Aes256(c) => c.apply_keystream(data),
        }
    }
}
