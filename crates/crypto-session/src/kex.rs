//! Key agreement, exchange hash and key derivation (RFC 4253 §7-8, RFC 5656,
//! RFC 8731, RFC 8268)

use bytes::{BufMut, BytesMut};
use p256::elliptic_curve::sec1::ToEncodedPoint;
use rsa::BigUint;
use sha2::{Digest, Sha256};
use shared_protocol::WireWriteExt;
use zeroize::Zeroizing;

use crate::{CryptoError, CryptoResult, EXCHANGE_HASH_SIZE, SecureRandom, random_array};

/// RFC 3526 2048-bit MODP group (group 14), generator 2
const GROUP14_PRIME: &[u8] = b"\
FFFFFFFFFFFFFFFFC90FDAA22168C234C4C6628B80DC1CD129024E088A67CC74\
020BBEA63B139B22514A08798E3404DDEF9519B3CD3A431B302B0A6DF25F1437\
4FE1356D6D51C245E485B576625E7EC6F44C42E9A637ED6B0BFF5CB6F406B7ED\
EE386BFB5A899FA5AE9F24117C4B1FE649286651ECE45B3DC2007CB8A163BF05\
98DA48361C55D39A69163FA8FD24CF5F83655D23DCA3AD961C62F356208552BB\
9ED529077096966D670C354E4ABC9804F1746C08CA18217C32905E462E36CE3B\
E39E772C180E86039B2783A2EC07A28FB5C55DF06F4C52C9DE2BCBF695581718\
3995497CEA956AE515D2261898FA051015728E5A8AACAA68FFFFFFFFFFFFFFFF";
const GROUP14_GENERATOR: u32 = 2;

/// Private exponent size for group 14
const DH_SECRET_SIZE: usize = 64;

fn group14_prime() -> CryptoResult<BigUint> {
    BigUint::parse_bytes(GROUP14_PRIME, 16)
        .ok_or_else(|| CryptoError::KeyExchange("bad group14 prime".into()))
}

/// Magnitude as an `mpint` body, the form e and f travel in
fn mpint_body(value: &BigUint) -> Vec<u8> {
    let mut out = Vec::new();
    out.put_mpint(&value.to_bytes_be());
    out.split_off(4)
}

/// Key exchange methods, in default preference order
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum KexAlgorithm {
    Curve25519Sha256,
    Curve25519Sha256Libssh,
    EcdhSha2Nistp256,
    DiffieHellmanGroup14Sha256,
}

impl KexAlgorithm {
    pub const ALL: [KexAlgorithm; 4] = [
        Self::Curve25519Sha256,
        Self::Curve25519Sha256Libssh,
        Self::EcdhSha2Nistp256,
        Self::DiffieHellmanGroup14Sha256,
    ];

    pub fn name(self) -> &'static str {
        match self {
            Self::Curve25519Sha256 => "curve25519-sha256",
            Self::Curve25519Sha256Libssh => "curve25519-sha256@libssh.org",
            Self::EcdhSha2Nistp256 => "ecdh-sha2-nistp256",
            Self::DiffieHellmanGroup14Sha256 => "diffie-hellman-group14-sha256",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|alg| alg.name() == name)
    }
}

impl std::fmt::Display for KexAlgorithm {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// Our half of an ephemeral key agreement
pub enum EphemeralKeyPair {
    Curve25519 {
        secret: x25519_dalek::EphemeralSecret,
        public: [u8; 32],
    },
    Nistp256 {
        secret: p256::ecdh::EphemeralSecret,
        public: Vec<u8>,
    },
    /// Finite field group 14; `public` is the `mpint` body of e or f
    Group14 {
        secret: Zeroizing<Vec<u8>>,
        public: Vec<u8>,
    },
}

impl EphemeralKeyPair {
    pub fn generate(algorithm: KexAlgorithm, rng: &mut dyn SecureRandom) -> CryptoResult<Self> {
        let pair = match algorithm {
            KexAlgorithm::Curve25519Sha256 | KexAlgorithm::Curve25519Sha256Libssh => {
                let secret = x25519_dalek::EphemeralSecret::random_from_rng(&mut *rng);
                let public = x25519_dalek::PublicKey::from(&secret);
                Self::Curve25519 {
                    secret,
                    public: *public.as_bytes(),
                }
            }
            KexAlgorithm::EcdhSha2Nistp256 => {
                let mut rng = rng;
                let secret = p256::ecdh::EphemeralSecret::random(&mut rng);
                let public = secret
                    .public_key()
                    .to_encoded_point(false)
                    .as_bytes()
                    .to_vec();
                Self::Nistp256 { secret, public }
            }
            KexAlgorithm::DiffieHellmanGroup14Sha256 => {
                let prime = group14_prime()?;
                let mut secret = Zeroizing::new(random_array::<DH_SECRET_SIZE>(rng).to_vec());
                secret[0] |= 0x80;
                let x = BigUint::from_bytes_be(&secret);
                let e = BigUint::from(GROUP14_GENERATOR).modpow(&x, &prime);
                Self::Group14 {
                    secret,
                    public: mpint_body(&e),
                }
            }
        };
        Ok(pair)
    }

    /// Public value sent to the peer (Q_C or Q_S)
    pub fn public_bytes(&self) -> &[u8] {
        match self {
            Self::Curve25519 { public, .. } => public,
            Self::Nistp256 { public, .. } => public,
            Self::Group14 { public, .. } => public,
        }
    }

    /// Combine with the peer's public value
    pub fn agree(self, peer_public: &[u8]) -> CryptoResult<SharedSecret> {
        match self {
            Self::Curve25519 { secret, .. } => {
                let peer: [u8; 32] = peer_public
                    .try_into()
                    .map_err(|_| CryptoError::InvalidPublicKey)?;
                let shared = secret.diffie_hellman(&x25519_dalek::PublicKey::from(peer));
                if !shared.was_contributory() {
                    return Err(CryptoError::KeyExchange(
                        "curve25519 shared secret is all zeros".into(),
                    ));
                }
                Ok(SharedSecret(Zeroizing::new(shared.as_bytes().to_vec())))
            }
            Self::Nistp256 { secret, .. } => {
                let peer = p256::PublicKey::from_sec1_bytes(peer_public)
                    .map_err(|_| CryptoError::InvalidPublicKey)?;
                let shared = secret.diffie_hellman(&peer);
                Ok(SharedSecret(Zeroizing::new(
                    shared.raw_secret_bytes().to_vec(),
                )))
            }
            Self::Group14 { secret, .. } => {
                if peer_public.first().is_none_or(|b| b & 0x80 != 0) {
                    return Err(CryptoError::InvalidPublicKey);
                }
                let prime = group14_prime()?;
                let peer = BigUint::from_bytes_be(peer_public);
                let one = BigUint::from(1u32);
                if peer <= one || peer >= &prime - &one {
                    return Err(CryptoError::InvalidPublicKey);
                }
                let x = BigUint::from_bytes_be(&secret);
                let shared = peer.modpow(&x, &prime);
                Ok(SharedSecret(Zeroizing::new(shared.to_bytes_be())))
            }
        }
    }
}

impl std::fmt::Debug for EphemeralKeyPair {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let kind = match self {
            Self::Curve25519 { .. } => "Curve25519",
            Self::Nistp256 { .. } => "Nistp256",
            Self::Group14 { .. } => "Group14",
        };
        f.debug_struct("EphemeralKeyPair")
            .field("kind", &kind)
            .field("public_len", &self.public_bytes().len())
            .finish()
    }
}

/// Shared secret K as an unsigned big-endian magnitude
pub struct SharedSecret(Zeroizing<Vec<u8>>);

impl SharedSecret {
    pub fn from_bytes(bytes: &[u8]) -> Self {
        Self(Zeroizing::new(bytes.to_vec()))
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    /// K encoded as `mpint`, the form that enters every hash
    fn encode_mpint(&self) -> Zeroizing<Vec<u8>> {
        let mut buf = Vec::with_capacity(self.0.len() + 5);
        buf.put_mpint(&self.0);
        Zeroizing::new(buf)
    }
}

impl std::fmt::Debug for SharedSecret {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("SharedSecret(..)")
    }
}

/// Inputs to the exchange hash H
#[derive(Debug, Clone, Copy)]
pub struct ExchangeHashInput<'a> {
    pub client_identification: &'a [u8],
    pub server_identification: &'a [u8],
    pub client_kexinit: &'a [u8],
    pub server_kexinit: &'a [u8],
    pub host_key_blob: &'a [u8],
    pub client_public: &'a [u8],
    pub server_public: &'a [u8],
}

/// H = SHA-256(V_C || V_S || I_C || I_S || K_S || Q_C || Q_S || K)
///
/// All supported methods use SHA-256. For group 14 the public values are
/// the `mpint` e and f, which encode exactly like strings of their bodies.
pub fn exchange_hash(
    input: &ExchangeHashInput<'_>,
    shared: &SharedSecret,
) -> [u8; EXCHANGE_HASH_SIZE] {
    let mut buf = BytesMut::with_capacity(1024);
    buf.put_ssh_string(input.client_identification);
    buf.put_ssh_string(input.server_identification);
    buf.put_ssh_string(input.client_kexinit);
    buf.put_ssh_string(input.server_kexinit);
    buf.put_ssh_string(input.host_key_blob);
    buf.put_ssh_string(input.client_public);
    buf.put_ssh_string(input.server_public);
    buf.put_slice(&shared.encode_mpint());
    Sha256::digest(&buf).into()
}

/// RFC 4253 §7.2 key derivation for letter `A`..`F`
///
/// `K1 = HASH(K || H || letter || session_id)`, then
/// `Kn = HASH(K || H || K1 || ... || Kn-1)` until `len` bytes exist.
pub fn derive_key(
    shared: &SharedSecret,
    exchange_hash: &[u8],
    letter: u8,
    session_id: &[u8],
    len: usize,
) -> Zeroizing<Vec<u8>> {
    let k = shared.encode_mpint();

    let mut hasher = Sha256::new();
    hasher.update(&*k);
    hasher.update(exchange_hash);
    hasher.update([letter]);
    hasher.update(session_id);

    let mut out = Zeroizing::new(hasher.finalize().to_vec());
    while out.len() < len {
        let mut hasher = Sha256::new();
        hasher.update(&*k);
        hasher.update(exchange_hash);
        hasher.update(&*out);
        let next = hasher.finalize();
        out.extend_from_slice(&next);
    }
    out.truncate(len);
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::seeded_rng;

    #[test]
    fn test_algorithm_names() {
        for alg in KexAlgorithm::ALL {
            assert_eq!(KexAlgorithm::from_name(alg.name()), Some(alg));
        }
        assert_eq!(KexAlgorithm::from_name("diffie-hellman-group1-sha1"), None);
    }

    #[test]
    fn test_agreement_every_method() {
        let mut rng = seeded_rng(7);
        for alg in KexAlgorithm::ALL {
            let client = EphemeralKeyPair::generate(alg, &mut *rng).unwrap();
            let server = EphemeralKeyPair::generate(alg, &mut *rng).unwrap();
            let client_pub = client.public_bytes().to_vec();
            let server_pub = server.public_bytes().to_vec();

            let k1 = client.agree(&server_pub).unwrap();
            let k2 = server.agree(&client_pub).unwrap();
            assert_eq!(k1.as_bytes(), k2.as_bytes());
            match alg {
                KexAlgorithm::DiffieHellmanGroup14Sha256 => {
                    assert!(k1.as_bytes().len() > 200 && k1.as_bytes().len() <= 256)
                }
                _ => assert_eq!(k1.as_bytes().len(), 32),
            }
        }
    }

    #[test]
    fn test_group14_public_is_positive_mpint() {
        let mut rng = seeded_rng(3);
        let pair =
            EphemeralKeyPair::generate(KexAlgorithm::DiffieHellmanGroup14Sha256, &mut *rng)
                .unwrap();
        let public = pair.public_bytes();
        assert!(public.len() <= 257);
        assert_eq!(public[0] & 0x80, 0);
        if public[0] == 0 {
            assert_ne!(public[1] & 0x80, 0);
        }
    }

    #[test]
    fn test_group14_rejects_degenerate_values() {
        let prime = group14_prime().unwrap();
        let p_minus_one = mpint_body(&(&prime - BigUint::from(1u32)));
        let negative = [0x80u8; 256];
        for bad in [&[][..], &[1][..], &[0][..], &negative[..], &p_minus_one[..], &mpint_body(&prime)[..]] {
            let mut rng = seeded_rng(4);
            let pair =
                EphemeralKeyPair::generate(KexAlgorithm::DiffieHellmanGroup14Sha256, &mut *rng)
                    .unwrap();
            assert!(matches!(pair.agree(bad), Err(CryptoError::InvalidPublicKey)));
        }
    }

    #[test]
    fn test_curve25519_rejects_low_order_point() {
        let mut rng = seeded_rng(1);
        let pair = EphemeralKeyPair::generate(KexAlgorithm::Curve25519Sha256, &mut *rng).unwrap();
        assert!(matches!(
            pair.agree(&[0u8; 32]),
            Err(CryptoError::KeyExchange(_))
        ));
    }

    #[test]
    fn test_nistp256_rejects_garbage_point() {
        let mut rng = seeded_rng(1);
        let pair = EphemeralKeyPair::generate(KexAlgorithm::EcdhSha2Nistp256, &mut *rng).unwrap();
        assert!(matches!(
            pair.agree(&[4u8; 65]),
            Err(CryptoError::InvalidPublicKey)
        ));
    }

    #[test]
    fn test_derive_key_extends_output() {
        let shared = SharedSecret::from_bytes(&[0x80; 32]);
        let h = [1u8; 32];
        let key = derive_key(&shared, &h, b'C', &h, 64);
        assert_eq!(key.len(), 64);

        // The first block is the plain letter hash
        let short = derive_key(&shared, &h, b'C', &h, 32);
        assert_eq!(&key[..32], &short[..]);

        // Extension hashes K || H || K1
        let mut hasher = Sha256::new();
        hasher.update(shared.encode_mpint().as_slice());
        hasher.update(h);
        hasher.update(&short[..]);
        assert_eq!(&key[32..], hasher.finalize().as_slice());
    }

    #[test]
    fn test_derive_key_letters_differ() {
        let shared = SharedSecret::from_bytes(&[9u8; 32]);
        let h = [2u8; 32];
        let a = derive_key(&shared, &h, b'A', &h, 16);
        let b = derive_key(&shared, &h, b'B', &h, 16);
        assert_ne!(a, b);
    }

    #[test]
    fn test_exchange_hash_depends_on_every_input() {
        let shared = SharedSecret::from_bytes(&[3u8; 32]);
        let base = ExchangeHashInput {
            client_identification: b"SSH-2.0-a",
            server_identification: b"SSH-2.0-b",
            client_kexinit: b"ic",
            server_kexinit: b"is",
            host_key_blob: b"ks",
            client_public: b"qc",
            server_public: b"qs",
        };
        let h = exchange_hash(&base, &shared);
        let swapped = ExchangeHashInput {
            client_identification: b"SSH-2.0-b",
            server_identification: b"SSH-2.0-a",
            ..base
        };
        assert_ne!(h, exchange_hash(&swapped, &shared));
        assert_ne!(h, exchange_hash(&base, &SharedSecret::from_bytes(&[4u8; 32])));
    }
}
