//! Peer Registry — relay-side directory of known peers with TTL expiry.
//!
//! The registry is the authoritative table behind the relay's API:
//! peers register themselves periodically, list each other, and are
//! evicted once they stop re-announcing. All mutation goes through the
//! operations here; the table itself is never exposed.

use crate::peer::{unix_now, PeerRecord, PeerSource};
use parking_lot::RwLock;
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use thiserror::Error;
use tokio::sync::watch;
use tracing::debug;

/// Registry configuration
#[derive(Debug, Clone)]
pub struct RegistryConfig {
    /// How long a peer stays listed without re-registering
    pub ttl: Duration,
    /// Interval between cleanup passes (should be shorter than the TTL)
    pub cleanup_interval: Duration,
}

impl Default for RegistryConfig {
    fn default() -> Self {
        let ttl = Duration::from_secs(30);
        Self {
            cleanup_interval: ttl / 3,
            ttl,
        }
    }
}

/// Registry error types, surfaced to API callers
#[derive(Debug, Error, PartialEq, Eq)]
pub enum RegistryError {
    #[error("invalid request: {0}")]
    InvalidRequest(String),
    #[error("unsupported action: {0}")]
    UnsupportedAction(String),
    #[error("not_found")]
    NotFound,
}

/// Read-only registry status
#[derive(Debug, Clone, Serialize)]
pub struct RegistryHealth {
    pub peer_count: usize,
    pub uptime_seconds: u64,
}

/// In-memory peer directory with TTL-based expiry.
///
/// One write lock guards the whole table, so concurrent registrations
/// for different peers serialize cleanly and a cleanup pass re-reads
/// every deadline under the same lock — a refresh that lands before the
/// pass always wins.
pub struct PeerRegistry {
    config: RegistryConfig,
    peers: RwLock<HashMap<String, PeerRecord>>,
    started_at: Instant,
}

impl PeerRegistry {
    pub fn new(config: RegistryConfig) -> Self {
        Self {
            config,
            peers: RwLock::new(HashMap::new()),
            started_at: Instant::now(),
        }
    }

    pub fn config(&self) -> &RegistryConfig {
        &self.config
    }

    /// Insert or refresh a peer. A re-registration overwrites the
    /// stored address and extends the TTL deadline.
    pub fn register_or_update(&self, peer_id: &str, address: &str) -> Result<(), RegistryError> {
        if peer_id.is_empty() {
            return Err(RegistryError::InvalidRequest("missing peer_id".into()));
        }
        if address.is_empty() {
            return Err(RegistryError::InvalidRequest("missing address".into()));
        }

        let record = PeerRecord::new(peer_id, address, PeerSource::Global);
        self.peers.write().insert(peer_id.to_string(), record);
        Ok(())
    }

    /// All peers whose TTL deadline has not passed. Expired entries are
    /// filtered, not evicted — eviction belongs to the cleanup pass.
    pub fn list_peers(&self) -> Vec<PeerRecord> {
        let now = unix_now();
        let peers = self.peers.read();
        let mut listed: Vec<PeerRecord> = peers
            .values()
            .filter(|r| !r.is_expired(now, self.config.ttl))
            .cloned()
            .collect();
        listed.sort_by(|a, b| a.peer_id.cmp(&b.peer_id));
        listed
    }

    /// Delete a peer's record (clean shutdown).
    pub fn remove(&self, peer_id: &str) -> Result<(), RegistryError> {
        match self.peers.write().remove(peer_id) {
            Some(_) => Ok(()),
            None => Err(RegistryError::NotFound),
        }
    }

    pub fn health(&self) -> RegistryHealth {
        let now = unix_now();
        let peer_count = self
            .peers
            .read()
            .values()
            .filter(|r| !r.is_expired(now, self.config.ttl))
            .count();
        RegistryHealth {
            peer_count,
            uptime_seconds: self.started_at.elapsed().as_secs(),
        }
    }

    /// Evict every record whose deadline has passed. Returns the number
    /// evicted. Deadlines are re-read under the write lock, so a record
    /// refreshed since the caller last looked is kept.
    pub fn evict_expired(&self, now: u64) -> usize {
        let mut peers = self.peers.write();
        let before = peers.len();
        peers.retain(|_, r| !r.is_expired(now, self.config.ttl));
        before - peers.len()
    }

    /// Background cleanup pass on a fixed interval, stopping when the
    /// shutdown signal flips.
    pub fn spawn_cleanup(
        self: &Arc<Self>,
        mut shutdown: watch::Receiver<bool>,
    ) -> tokio::task::JoinHandle<()> {
        let registry = Arc::clone(self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(registry.config.cleanup_interval);
            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        let evicted = registry.evict_expired(unix_now());
                        if evicted > 0 {
                            debug!(evicted, "registry cleanup evicted expired peers");
                        }
                    }
                    changed = shutdown.changed() => {
                        // A dropped sender counts as shutdown too.
                        if changed.is_err() || *shutdown.borrow() {
                            break;
                        }
                    }
                }
            }
        })
    }
}

impl Default for PeerRegistry {
    fn default() -> Self {
        Self::new(RegistryConfig::default())
    }
}
