//! Rekey policy
//!
//! Keys are renewed after a volume of traffic or an amount of time,
//! whichever comes first (RFC 4253 §9, RFC 4344 §3).

use std::time::Duration;

use tokio::time::Instant;

/// Rekey thresholds
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RekeyLimits {
    /// Bytes in either direction under one set of keys
    pub max_bytes: u64,
    /// Packets in either direction under one set of keys
    pub max_packets: u64,
    /// Time since the last completed key exchange
    pub max_interval: Duration,
}

impl Default for RekeyLimits {
    fn default() -> Self {
        Self {
            max_bytes: 1 << 30,
            max_packets: 1 << 31,
            max_interval: Duration::from_secs(3600),
        }
    }
}

/// Traffic seen under the current keys, per direction
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TrafficCounters {
    pub bytes_sent: u64,
    pub packets_sent: u64,
    pub bytes_received: u64,
    pub packets_received: u64,
}

/// Why a rekey was started
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RekeyReason {
    Volume,
    Packets,
    Interval,
}

impl std::fmt::Display for RekeyReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Volume => f.write_str("byte limit"),
            Self::Packets => f.write_str("packet limit"),
            Self::Interval => f.write_str("time limit"),
        }
    }
}

/// Tracks when the next rekey is due
#[derive(Debug, Clone)]
pub struct RekeyPolicy {
    limits: RekeyLimits,
    last_exchange: Instant,
}

impl RekeyPolicy {
    pub fn new(limits: RekeyLimits) -> Self {
        Self {
            limits,
            last_exchange: Instant::now(),
        }
    }

    /// Record a completed key exchange
    pub fn reset(&mut self) {
        self.last_exchange = Instant::now();
    }

    /// When the interval limit expires
    pub fn deadline(&self) -> Instant {
        self.last_exchange + self.limits.max_interval
    }

    /// Volume or packet limit reached
    pub fn check_traffic(&self, counters: &TrafficCounters) -> Option<RekeyReason> {
        if counters.bytes_sent >= self.limits.max_bytes
            || counters.bytes_received >= self.limits.max_bytes
        {
            return Some(RekeyReason::Volume);
        }
        if counters.packets_sent >= self.limits.max_packets
            || counters.packets_received >= self.limits.max_packets
        {
            return Some(RekeyReason::Packets);
        }
        None
    }
}
