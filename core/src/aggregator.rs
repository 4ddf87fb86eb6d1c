//! Discovery Aggregator — one canonical peer view from two channels.
//!
//! Both discovery channels feed sightings into a single task over an
//! mpsc channel; the task owns the per-channel tables outright, so
//! there is exactly one writer and no lock. Every observation or sweep
//! that changes the merged result publishes a fresh snapshot through a
//! watch channel — consumers only ever see fully formed snapshots.

use crate::peer::{unix_now, PeerRecord, PeerSource};
use std::collections::HashMap;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tracing::debug;

/// One entry of the merged view. `source` names the channel whose
/// address won the merge.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MergedPeer {
    pub peer_id: String,
    pub address: String,
    pub last_seen: u64,
    pub source: PeerSource,
}

/// The merged, de-duplicated peer view, sorted by `peer_id`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PeerSnapshot {
    pub peers: Vec<MergedPeer>,
}

impl PeerSnapshot {
    pub fn get(&self, peer_id: &str) -> Option<&MergedPeer> {
        self.peers.iter().find(|p| p.peer_id == peer_id)
    }
}

/// Merges local and global sightings, excluding self, with TTL sweeps.
pub struct Aggregator {
    self_id: String,
    ttl: Duration,
    local: HashMap<String, PeerRecord>,
    global: HashMap<String, PeerRecord>,
}

impl Aggregator {
    pub fn new(self_id: String, ttl: Duration) -> Self {
        Self {
            self_id,
            ttl,
            local: HashMap::new(),
            global: HashMap::new(),
        }
    }

    /// Upsert a sighting into its channel's table. Most recent write
    /// wins within a channel, including a peer re-announcing from a new
    /// address.
    pub fn observe(&mut self, record: PeerRecord) {
        if record.peer_id == self.self_id {
            return;
        }
        let table = match record.source {
            PeerSource::Local => &mut self.local,
            PeerSource::Global => &mut self.global,
        };
        table.insert(record.peer_id.clone(), record);
    }

    /// Drop entries whose TTL deadline has passed. Returns true when
    /// anything was evicted.
    pub fn sweep(&mut self, now: u64) -> bool {
        let before = self.local.len() + self.global.len();
        self.local.retain(|_, r| !r.is_expired(now, self.ttl));
        self.global.retain(|_, r| !r.is_expired(now, self.ttl));
        before != self.local.len() + self.global.len()
    }

    /// Rebuild the merged view: one entry per `peer_id`, local address
    /// preferred over global, `last_seen` the max across both channels.
    pub fn snapshot(&self) -> PeerSnapshot {
        let mut merged: HashMap<&str, MergedPeer> = HashMap::new();

        for record in self.global.values().chain(self.local.values()) {
            match merged.get_mut(record.peer_id.as_str()) {
                Some(entry) => {
                    // Local iterates second, so it takes the address slot.
                    if record.source == PeerSource::Local {
                        entry.address = record.address.clone();
                        entry.source = PeerSource::Local;
                    }
                    entry.last_seen = entry.last_seen.max(record.last_seen);
                }
                None => {
                    merged.insert(
                        &record.peer_id,
                        MergedPeer {
                            peer_id: record.peer_id.clone(),
                            address: record.address.clone(),
                            last_seen: record.last_seen,
                            source: record.source,
                        },
                    );
                }
            }
        }

        let mut peers: Vec<MergedPeer> = merged.into_values().collect();
        peers.sort_by(|a, b| a.peer_id.cmp(&b.peer_id));
        PeerSnapshot { peers }
    }

    /// Run the aggregation loop: consume sightings, sweep on a fixed
    /// interval, publish a snapshot whenever the merged view changes.
    pub fn spawn(
        mut self,
        mut sightings: mpsc::Receiver<PeerRecord>,
        snapshots: watch::Sender<PeerSnapshot>,
        sweep_interval: Duration,
        mut shutdown: watch::Receiver<bool>,
    ) -> tokio::task::JoinHandle<()> {
        tokio::spawn(async move {
            let mut published = PeerSnapshot::default();
            let mut ticker = tokio::time::interval(sweep_interval);
            loop {
                tokio::select! {
                    sighting = sightings.recv() => {
                        match sighting {
                            Some(record) => self.observe(record),
                            // All channels gone; nothing more will arrive.
                            None => return,
                        }
                    }
                    _ = ticker.tick() => {
                        if self.sweep(unix_now()) {
                            debug!("aggregator swept expired sightings");
                        }
                    }
                    changed = shutdown.changed() => {
                        // A dropped sender counts as shutdown too.
                        if changed.is_err() || *shutdown.borrow() {
                            return;
                        }
                    }
                }

                let current = self.snapshot();
                if current != published {
                    published = current.clone();
                    if snapshots.send(current).is_err() {
                        return;
                    }
                }
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(peer_id: &str, address: &str, last_seen: u64, source: PeerSource) -> PeerRecord {
        PeerRecord {
            peer_id: peer_id.into(),
            address: address.into(),
            last_seen,
            source,
        }
    }

    fn aggregator() -> Aggregator {
        Aggregator::new("me".into(), Duration::from_secs(30))
    }

    #[test]
    fn test_merge_prefers_local_address_and_max_last_seen() {
        let mut agg = aggregator();
        agg.observe(record("A", "192.168.1.5:7000", 100, PeerSource::Local));
        agg.observe(record("A", "203.0.113.9:7000", 150, PeerSource::Global));

        let snapshot = agg.snapshot();
        assert_eq!(snapshot.peers.len(), 1);
        let merged = snapshot.get("A").unwrap();
        assert_eq!(merged.address, "192.168.1.5:7000");
        assert_eq!(merged.source, PeerSource::Local);
        assert_eq!(merged.last_seen, 150);
    }

    #[test]
    fn test_merge_order_independent() {
        let mut first = aggregator();
        first.observe(record("A", "192.168.1.5:7000", 200, PeerSource::Local));
        first.observe(record("A", "203.0.113.9:7000", 100, PeerSource::Global));

        let mut second = aggregator();
        second.observe(record("A", "203.0.113.9:7000", 100, PeerSource::Global));
        second.observe(record("A", "192.168.1.5:7000", 200, PeerSource::Local));

        assert_eq!(first.snapshot(), second.snapshot());
    }

    #[test]
    fn test_self_excluded() {
        let mut agg = aggregator();
        agg.observe(record("me", "192.168.1.5:7000", 100, PeerSource::Local));
        agg.observe(record("me", "203.0.113.9:7000", 100, PeerSource::Global));
        assert!(agg.snapshot().peers.is_empty());
    }

    #[test]
    fn test_rapid_reannounce_most_recent_wins_within_channel() {
        let mut agg = aggregator();
        agg.observe(record("A", "192.168.1.5:7000", 100, PeerSource::Local));
        agg.observe(record("A", "10.0.0.8:7000", 101, PeerSource::Local));

        let snapshot = agg.snapshot();
        assert_eq!(snapshot.get("A").unwrap().address, "10.0.0.8:7000");
    }

    #[test]
    fn test_cached_global_entries_survive_until_ttl() {
        let mut agg = aggregator();
        let seen = 1_000;
        agg.observe(record("A", "203.0.113.9:7000", seen, PeerSource::Global));

        // Relay becomes unreachable: no new sightings arrive, but the
        // cached entry stays visible until its deadline.
        assert!(!agg.sweep(seen + 29));
        assert_eq!(agg.snapshot().peers.len(), 1);

        assert!(agg.sweep(seen + 31));
        assert!(agg.snapshot().peers.is_empty());
    }

    #[test]
    fn test_sweep_is_per_channel() {
        let mut agg = aggregator();
        agg.observe(record("A", "192.168.1.5:7000", 1_000, PeerSource::Local));
        agg.observe(record("B", "203.0.113.9:7000", 1_050, PeerSource::Global));

        assert!(agg.sweep(1_040));
        let snapshot = agg.snapshot();
        assert!(snapshot.get("A").is_none());
        assert!(snapshot.get("B").is_some());
    }

    #[test]
    fn test_snapshot_sorted_by_peer_id() {
        let mut agg = aggregator();
        agg.observe(record("charlie", "10.0.0.3:1", 100, PeerSource::Local));
        agg.observe(record("alice", "10.0.0.1:1", 100, PeerSource::Local));
        agg.observe(record("bob", "10.0.0.2:1", 100, PeerSource::Global));

        let snapshot = agg.snapshot();
        let ids: Vec<&str> = snapshot
            .peers
            .iter()
            .map(|p| p.peer_id.as_str())
            .collect();
        assert_eq!(ids, vec!["alice", "bob", "charlie"]);
    }

    #[tokio::test]
    async fn test_loop_exits_when_shutdown_sender_drops() {
        let (_sightings_tx, sightings_rx) = mpsc::channel(8);
        let (snapshot_tx, _snapshot_rx) = watch::channel(PeerSnapshot::default());
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        let handle = aggregator().spawn(
            sightings_rx,
            snapshot_tx,
            Duration::from_secs(60),
            shutdown_rx,
        );

        drop(shutdown_tx);
        tokio::time::timeout(Duration::from_secs(5), handle)
            .await
            .expect("loop exits once the shutdown sender is gone")
            .unwrap();
    }

    #[tokio::test]
    async fn test_spawned_loop_publishes_on_change() {
        let (sightings_tx, sightings_rx) = mpsc::channel(8);
        let (snapshot_tx, mut snapshot_rx) = watch::channel(PeerSnapshot::default());
        let (_shutdown_tx, shutdown_rx) = watch::channel(false);

        let handle = aggregator().spawn(
            sightings_rx,
            snapshot_tx,
            Duration::from_secs(60),
            shutdown_rx,
        );

        sightings_tx
            .send(record("A", "192.168.1.5:7000", unix_now(), PeerSource::Local))
            .await
            .unwrap();

        tokio::time::timeout(Duration::from_secs(5), snapshot_rx.changed())
            .await
            .expect("snapshot published")
            .unwrap();
        let snapshot = snapshot_rx.borrow().clone();
        assert_eq!(snapshot.peers.len(), 1);
        assert_eq!(snapshot.peers[0].peer_id, "A");

        drop(sightings_tx);
        tokio::time::timeout(Duration::from_secs(5), handle)
            .await
            .expect("loop exits when channels close")
            .unwrap();
    }
}
