//! HMAC packet authentication (RFC 6668, OpenSSH PROTOCOL §1.5)

use hmac::{Hmac, Mac};
use sha2::{Sha256, Sha512};

use crate::{CryptoError, CryptoResult};

type HmacSha256 = Hmac<Sha256>;
type HmacSha512 = Hmac<Sha512>;

/// MAC algorithms, in default preference order
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MacAlgorithm {
    HmacSha256Etm,
    HmacSha512Etm,
    HmacSha256,
    HmacSha512,
}

impl MacAlgorithm {
    pub const ALL: [MacAlgorithm; 4] = [
        Self::HmacSha256Etm,
        Self::HmacSha512Etm,
        Self::HmacSha256,
        Self::HmacSha512,
    ];

    pub fn name(self) -> &'static str {
        match self {
            Self::HmacSha256Etm => "hmac-sha2-256-etm@openssh.com",
            Self::HmacSha512Etm => "hmac-sha2-512-etm@openssh.com",
            Self::HmacSha256 => "hmac-sha2-256",
            Self::HmacSha512 => "hmac-sha2-512",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|alg| alg.name() == name)
    }

    pub fn key_len(self) -> usize {
        match self {
            Self::HmacSha256Etm | Self::HmacSha256 => 32,
            Self::HmacSha512Etm | Self::HmacSha512 => 64,
        }
    }

    pub fn tag_len(self) -> usize {
        self.key_len()
    }

    /// Encrypt-then-MAC: the tag covers the ciphertext and the length stays clear
    pub fn is_etm(self) -> bool {
        matches!(self, Self::HmacSha256Etm | Self::HmacSha512Etm)
    }
}

impl std::fmt::Display for MacAlgorithm {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// Keyed HMAC state, cloned for every packet
#[derive(Clone)]
enum Keyed {
    Sha256(HmacSha256),
    Sha512(HmacSha512),
}

impl Keyed {
    fn new(algorithm: MacAlgorithm, key: &[u8]) -> CryptoResult<Self> {
        let invalid = |_| CryptoError::InvalidKeyLength {
            expected: algorithm.key_len(),
            actual: key.len(),
        };
        Ok(match algorithm {
            MacAlgorithm::HmacSha256Etm | MacAlgorithm::HmacSha256 => {
                Self::Sha256(<HmacSha256 as Mac>::new_from_slice(key).map_err(invalid)?)
            }
            MacAlgorithm::HmacSha512Etm | MacAlgorithm::HmacSha512 => {
                Self::Sha512(<HmacSha512 as Mac>::new_from_slice(key).map_err(invalid)?)
            }
        })
    }

    fn sign(&self, seq: u32, data: &[u8]) -> Vec<u8> {
        match self.clone() {
            Self::Sha256(mut mac) => {
                mac.update(&seq.to_be_bytes());
                mac.update(data);
                mac.finalize().into_bytes().to_vec()
            }
            Self::Sha512(mut mac) => {
                mac.update(&seq.to_be_bytes());
                mac.update(data);
                mac.finalize().into_bytes().to_vec()
            }
        }
    }

    fn verify(&self, seq: u32, data: &[u8], tag: &[u8]) -> CryptoResult<()> {
        let result = match self.clone() {
            Self::Sha256(mut mac) => {
                mac.update(&seq.to_be_bytes());
                mac.update(data);
                mac.verify_slice(tag)
            }
            Self::Sha512(mut mac) => {
                mac.update(&seq.to_be_bytes());
                mac.update(data);
                mac.verify_slice(tag)
            }
        };
        result.map_err(|_| CryptoError::MacMismatch)
    }
}

/// One direction's integrity key
pub struct MacKey {
    algorithm: MacAlgorithm,
    keyed: Keyed,
}

impl MacKey {
    pub fn new(algorithm: MacAlgorithm, key: &[u8]) -> CryptoResult<Self> {
        if key.len() != algorithm.key_len() {
            return Err(CryptoError::InvalidKeyLength {
                expected: algorithm.key_len(),
                actual: key.len(),
            });
        }
        Ok(Self {
            algorithm,
            keyed: Keyed::new(algorithm, key)?,
        })
    }

    pub fn algorithm(&self) -> MacAlgorithm {
        self.algorithm
    }

    /// `MAC(key, uint32 seq || data)`
    pub fn sign(&self, seq: u32, data: &[u8]) -> Vec<u8> {
        self.keyed.sign(seq, data)
    }

    /// Constant-time check of a received tag
    pub fn verify(&self, seq: u32, data: &[u8], tag: &[u8]) -> CryptoResult<()> {
        self.keyed.verify(seq, data, tag)
    }
}

impl std::fmt::Debug for MacKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MacKey")
            .field("algorithm", &self.algorithm)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rfc4231_case_2_through_sequence_prefix() {
        // HMAC-SHA-256 of "what do ya want for nothing?" with key "Jefe",
        // split so the first four bytes play the sequence number role
        let data = b"what do ya want for nothing?";
        let seq = u32::from_be_bytes([data[0], data[1], data[2], data[3]]);
        let keyed = Keyed::new(MacAlgorithm::HmacSha256, b"Jefe").unwrap();
        let tag = keyed.sign(seq, &data[4..]);
        let expected: [u8; 32] = [
            0x5b, 0xdc, 0xc1, 0x46, 0xbf, 0x60, 0x75, 0x4e, 0x6a, 0x04, 0x24, 0x26, 0x08, 0x95,
            0x75, 0xc7, 0x5a, 0x00, 0x3f, 0x08, 0x9d, 0x27, 0x39, 0x83, 0x9d, 0xec, 0x58, 0xb9,
            0x64, 0xec, 0x38, 0x43,
        ];
        assert_eq!(tag, expected);
    }

    #[test]
    fn test_verify_detects_tampering() {
        for alg in MacAlgorithm::ALL {
            let key = MacKey::new(alg, &vec![0x11; alg.key_len()]).unwrap();
            let mut tag = key.sign(3, b"packet");
            assert_eq!(tag.len(), alg.tag_len());
            assert!(key.verify(3, b"packet", &tag).is_ok());
            assert!(key.verify(4, b"packet", &tag).is_err());

            tag[0] ^= 1;
            assert!(matches!(
                key.verify(3, b"packet", &tag),
                Err(CryptoError::MacMismatch)
            ));
        }
    }

    #[test]
    fn test_key_length_checked() {
        assert!(matches!(
            MacKey::new(MacAlgorithm::HmacSha512, &[0u8; 32]),
            Err(CryptoError::InvalidKeyLength {
                expected: 64,
                actual: 32
            })
        ));
    }
}
