//! Transport configuration

use std::sync::Arc;
use std::time::Duration;

use crypto_session::{
    BoxedRng, CipherAlgorithm, HostKeyAlgorithm, KexAlgorithm, MacAlgorithm, os_rng,
};

use crate::RekeyLimits;

/// Produces the generator used by one session
pub type RngSource = Arc<dyn Fn() -> BoxedRng + Send + Sync>;

/// Algorithm preference lists, most preferred first
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AlgorithmPreferences {
    pub kex: Vec<KexAlgorithm>,
    pub host_key: Vec<HostKeyAlgorithm>,
    pub ciphers: Vec<CipherAlgorithm>,
    pub macs: Vec<MacAlgorithm>,
}

impl Default for AlgorithmPreferences {
    fn default() -> Self {
        Self {
            kex: KexAlgorithm::ALL.to_vec(),
            host_key: HostKeyAlgorithm::ALL.to_vec(),
            ciphers: CipherAlgorithm::ALL.to_vec(),
            macs: MacAlgorithm::ALL.to_vec(),
        }
    }
}

/// Transport session configuration
#[derive(Clone)]
pub struct TransportConfig {
    /// Software version token of our identification string
    pub software_version: String,
    /// Algorithms offered during key exchange
    pub algorithms: AlgorithmPreferences,
    /// When keys are renewed
    pub rekey: RekeyLimits,
    /// Deadline for everything before `Established`
    pub handshake_timeout: Duration,
    /// Depth of the per-session packet queues
    pub channel_capacity: usize,
    /// Randomness for cookies, ephemeral keys and padding
    rng_source: RngSource,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            software_version: format!("SSHPassProxy_{}", env!("CARGO_PKG_VERSION")),
            algorithms: AlgorithmPreferences::default(),
            rekey: RekeyLimits::default(),
            handshake_timeout: Duration::from_secs(30),
            channel_capacity: 64,
            rng_source: Arc::new(os_rng),
        }
    }
}

impl TransportConfig {
    pub fn with_algorithms(mut self, algorithms: AlgorithmPreferences) -> Self {
        self.algorithms = algorithms;
        self
    }

    pub fn with_rekey_limits(mut self, rekey: RekeyLimits) -> Self {
        self.rekey = rekey;
        self
    }

    pub fn with_handshake_timeout(mut self, timeout: Duration) -> Self {
        self.handshake_timeout = timeout;
        self
    }

    pub fn with_rng_source(mut self, source: RngSource) -> Self {
        self.rng_source = source;
        self
    }

    /// A fresh generator for one session
    pub fn rng(&self) -> BoxedRng {
        (self.rng_source)()
    }
}

impl std::fmt::Debug for TransportConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TransportConfig")
            .field("software_version", &self.software_version)
            .field("algorithms", &self.algorithms)
            .field("rekey", &self.rekey)
            .field("handshake_timeout", &self.handshake_timeout)
            .field("channel_capacity", &self.channel_capacity)
            .finish_non_exhaustive()
    }
}
