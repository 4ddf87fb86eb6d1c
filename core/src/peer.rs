//! Shared peer data model used by the registry and both discovery channels.

use serde::{Deserialize, Serialize};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

/// Which discovery channel produced a sighting.
///
/// Retained on every record so the aggregator can prefer a LAN address
/// over a relay-reported one when both are known.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PeerSource {
    /// Heard directly on the local network segment (UDP beacon).
    Local,
    /// Reported by the relay registry.
    Global,
}

/// A single peer sighting.
///
/// `peer_id` is an opaque identifier chosen by the peer at startup and
/// stable for its process lifetime. `address` is the reachable
/// `host:port` endpoint as seen through the reporting channel; the two
/// channels may legitimately disagree on it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PeerRecord {
    pub peer_id: String,
    pub address: String,
    /// Unix timestamp (seconds) of the most recent announcement.
    pub last_seen: u64,
    pub source: PeerSource,
}

impl PeerRecord {
    /// Create a record stamped with the current time.
    pub fn new(peer_id: impl Into<String>, address: impl Into<String>, source: PeerSource) -> Self {
        Self {
            peer_id: peer_id.into(),
            address: address.into(),
            last_seen: unix_now(),
            source,
        }
    }

    /// The TTL deadline has passed: `last_seen + ttl < now`.
    pub fn is_expired(&self, now: u64, ttl: Duration) -> bool {
        now.saturating_sub(self.last_seen) > ttl.as_secs()
    }
}

/// Current unix time in seconds.
pub fn unix_now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}
