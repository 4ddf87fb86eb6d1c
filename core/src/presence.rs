//! Local Discovery Channel — UDP LAN presence beacons.
//!
//! Each instance broadcasts a small JSON announcement on a well-known
//! port and listens on the same port for announcements from neighbors.
//! No internet dependency; if broadcast is blocked by network policy
//! the channel quietly produces no sightings and nothing else in the
//! process cares.

use crate::peer::{PeerRecord, PeerSource};
use serde::{Deserialize, Serialize};
use socket2::{Domain, Protocol, Socket, Type};
use std::net::SocketAddr;
use std::time::Duration;
use tokio::net::UdpSocket;
use tokio::sync::{mpsc, watch};
use tracing::{debug, warn};

/// One beacon datagram: who we are and where we accept connections.
///
/// The announced host is advisory — receivers trust the datagram's
/// source IP and take only the port from the announced address, so a
/// peer that binds 0.0.0.0 still advertises a reachable endpoint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Announcement {
    pub peer_id: String,
    pub address: String,
}

/// Local channel configuration
#[derive(Debug, Clone)]
pub struct PresenceConfig {
    /// Shared UDP discovery port
    pub broadcast_port: u16,
    /// Where beacons are sent; the limited broadcast address by default
    pub broadcast_addr: String,
    /// Seconds between beacons
    pub announce_interval: Duration,
}

impl Default for PresenceConfig {
    fn default() -> Self {
        Self {
            broadcast_port: 54545,
            broadcast_addr: "255.255.255.255".to_string(),
            announce_interval: Duration::from_millis(2500),
        }
    }
}

/// LAN presence: a broadcaster task and a receiver task.
pub struct Presence {
    peer_id: String,
    address: String,
    config: PresenceConfig,
    sightings: mpsc::Sender<PeerRecord>,
}

impl Presence {
    pub fn new(
        peer_id: String,
        address: String,
        config: PresenceConfig,
        sightings: mpsc::Sender<PeerRecord>,
    ) -> Self {
        Self {
            peer_id,
            address,
            config,
            sightings,
        }
    }

    /// Start both halves of the channel. Either half failing to set up
    /// disables that half with a warning; neither is ever fatal.
    pub fn spawn(self, shutdown: watch::Receiver<bool>) -> Vec<tokio::task::JoinHandle<()>> {
        let announcement = Announcement {
            peer_id: self.peer_id.clone(),
            address: self.address.clone(),
        };

        let broadcaster = tokio::spawn(broadcast_loop(
            announcement,
            self.config.clone(),
            shutdown.clone(),
        ));
        let receiver = tokio::spawn(receive_loop(
            self.peer_id,
            self.config,
            self.sightings,
            shutdown,
        ));

        vec![broadcaster, receiver]
    }
}

async fn broadcast_loop(
    announcement: Announcement,
    config: PresenceConfig,
    mut shutdown: watch::Receiver<bool>,
) {
    let socket = match UdpSocket::bind("0.0.0.0:0").await {
        Ok(s) => s,
        Err(e) => {
            warn!("presence broadcaster disabled: {e}");
            return;
        }
    };
    if let Err(e) = socket.set_broadcast(true) {
        warn!("presence broadcaster disabled: {e}");
        return;
    }

    let payload = match serde_json::to_vec(&announcement) {
        Ok(p) => p,
        Err(e) => {
            warn!("presence broadcaster disabled: {e}");
            return;
        }
    };
    let target = format!("{}:{}", config.broadcast_addr, config.broadcast_port);

    let mut ticker = tokio::time::interval(config.announce_interval);
    loop {
        tokio::select! {
            _ = ticker.tick() => {
                if let Err(e) = socket.send_to(&payload, &target).await {
                    // Transient: broadcast may be blocked by policy.
                    debug!("presence beacon send failed: {e}");
                }
            }
            changed = shutdown.changed() => {
                // A dropped sender means no shutdown signal is coming;
                // treat it as one rather than polling a closed channel.
                if changed.is_err() || *shutdown.borrow() {
                    return;
                }
            }
        }
    }
}

/// Bind the shared discovery port with address reuse, so several
/// instances on the same host can all listen for beacons at once.
fn discovery_socket(port: u16) -> std::io::Result<UdpSocket> {
    let socket = Socket::new(Domain::IPV4, Type::DGRAM, Some(Protocol::UDP))?;
    socket.set_reuse_address(true)?;
    #[cfg(unix)]
    socket.set_reuse_port(true)?;
    socket.set_nonblocking(true)?;
    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    socket.bind(&addr.into())?;
    UdpSocket::from_std(socket.into())
}

async fn receive_loop(
    self_id: String,
    config: PresenceConfig,
    sightings: mpsc::Sender<PeerRecord>,
    mut shutdown: watch::Receiver<bool>,
) {
    let socket = match discovery_socket(config.broadcast_port) {
        Ok(s) => s,
        Err(e) => {
            warn!(
                port = config.broadcast_port,
                "presence receiver disabled: {e}"
            );
            return;
        }
    };

    let mut buf = [0u8; 2048];
    loop {
        tokio::select! {
            received = socket.recv_from(&mut buf) => {
                let (len, src) = match received {
                    Ok(r) => r,
                    Err(e) => {
                        debug!("presence receive failed: {e}");
                        continue;
                    }
                };
                if let Some(record) = parse_beacon(&buf[..len], src.ip(), &self_id) {
                    if sightings.send(record).await.is_err() {
                        // Aggregator gone; nothing left to feed.
                        return;
                    }
                }
            }
            changed = shutdown.changed() => {
                // A dropped sender means no shutdown signal is coming;
                // treat it as one rather than polling a closed channel.
                if changed.is_err() || *shutdown.borrow() {
                    return;
                }
            }
        }
    }
}

/// Decode a beacon into a local sighting. Returns None for our own
/// beacons, malformed datagrams, and addresses without a usable port —
/// out-of-order and garbage traffic is expected on this port.
fn parse_beacon(
    datagram: &[u8],
    src_ip: std::net::IpAddr,
    self_id: &str,
) -> Option<PeerRecord> {
    let announcement: Announcement = serde_json::from_slice(datagram).ok()?;
    if announcement.peer_id.is_empty() || announcement.peer_id == self_id {
        return None;
    }

    let port: u16 = announcement.address.rsplit(':').next()?.parse().ok()?;
    if port == 0 {
        return None;
    }

    Some(PeerRecord::new(
        announcement.peer_id,
        format!("{src_ip}:{port}"),
        PeerSource::Local,
    ))
}
