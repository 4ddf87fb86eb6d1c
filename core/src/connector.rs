//! Connection Initiator — dials newly discovered peers.
//!
//! Watches the aggregator's snapshot; every peer that appears gets one
//! dial attempt per snapshot update until it connects or disappears.
//! Established streams are handed off whole to the message layer —
//! what happens on them afterwards is not discovery's business.

use crate::aggregator::{MergedPeer, PeerSnapshot};
use futures::future::join_all;
use std::collections::HashSet;
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::sync::{mpsc, watch};
use tracing::{debug, info};

/// Connector configuration
#[derive(Debug, Clone)]
pub struct ConnectorConfig {
    /// Bound on a single dial attempt
    pub dial_timeout: Duration,
}

impl Default for ConnectorConfig {
    fn default() -> Self {
        Self {
            dial_timeout: Duration::from_secs(5),
        }
    }
}

/// A freshly established outbound connection, ready for the message
/// layer to adopt.
pub struct PeerConnection {
    pub peer: MergedPeer,
    pub stream: TcpStream,
}

/// Dial loop: one task, driven entirely by snapshot updates.
pub struct Connector {
    config: ConnectorConfig,
    connected: HashSet<String>,
}

impl Connector {
    pub fn new(config: ConnectorConfig) -> Self {
        Self {
            config,
            connected: HashSet::new(),
        }
    }

    pub fn spawn(
        mut self,
        mut snapshots: watch::Receiver<PeerSnapshot>,
        established: mpsc::Sender<PeerConnection>,
        mut shutdown: watch::Receiver<bool>,
    ) -> tokio::task::JoinHandle<()> {
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    changed = snapshots.changed() => {
                        if changed.is_err() {
                            return;
                        }
                    }
                    _ = shutdown.changed() => {
                        if *shutdown.borrow() {
                            return;
                        }
                    }
                }

                let snapshot = snapshots.borrow_and_update().clone();
                self.reconcile(&snapshot);

                let pending: Vec<MergedPeer> = snapshot
                    .peers
                    .iter()
                    .filter(|p| !self.connected.contains(&p.peer_id))
                    .cloned()
                    .collect();
                if pending.is_empty() {
                    continue;
                }

                let timeout = self.config.dial_timeout;
                let dials = pending.into_iter().map(|peer| async move {
                    let attempt =
                        tokio::time::timeout(timeout, TcpStream::connect(&peer.address)).await;
                    match attempt {
                        Ok(Ok(stream)) => Some(PeerConnection { peer, stream }),
                        Ok(Err(e)) => {
                            debug!(peer_id = %peer.peer_id, "dial failed: {e}");
                            None
                        }
                        Err(_) => {
                            debug!(peer_id = %peer.peer_id, "dial timed out");
                            None
                        }
                    }
                });

                for connection in join_all(dials).await.into_iter().flatten() {
                    info!(
                        peer_id = %connection.peer.peer_id,
                        address = %connection.peer.address,
                        "connected to peer"
                    );
                    self.connected.insert(connection.peer.peer_id.clone());
                    if established.send(connection).await.is_err() {
                        return;
                    }
                }
            }
        })
    }

    /// A peer that left the snapshot expired; forget it so a later
    /// rediscovery triggers a fresh dial. The already-open stream, if
    /// any, belongs to the message layer now.
    fn reconcile(&mut self, snapshot: &PeerSnapshot) {
        self.connected
            .retain(|peer_id| snapshot.get(peer_id).is_some());
    }
}
