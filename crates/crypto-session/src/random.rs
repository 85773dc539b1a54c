//! Randomness sources
//!
//! Everything random in a session (KEXINIT cookies, ephemeral keys, packet
//! padding) is drawn from one injected generator. Production code uses the
//! operating system; tests plug in a seeded `StdRng`.

use rand::rngs::{OsRng, StdRng};
use rand::{CryptoRng, RngCore, SeedableRng};

/// A cryptographically secure generator that can move between tasks
pub trait SecureRandom: RngCore + CryptoRng + Send {}

impl<T: RngCore + CryptoRng + Send> SecureRandom for T {}

pub type BoxedRng = Box<dyn SecureRandom>;

/// Operating system generator
pub fn os_rng() -> BoxedRng {
    Box::new(OsRng)
}

/// Deterministic generator for reproducible sessions
pub fn seeded_rng(seed: u64) -> BoxedRng {
    Box::new(StdRng::seed_from_u64(seed))
}

/// Fill a fixed-size array
pub fn random_array<const N: usize>(rng: &mut dyn SecureRandom) -> [u8; N] {
    let mut out = [0u8; N];
    rng.fill_bytes(&mut out);
    out
}
