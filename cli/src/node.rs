// Node runtime for `peerlink start` — wires both discovery channels,
// the aggregator, the connection initiator, and the inbound listener
// into one process.

use crate::config::Config;
use anyhow::{Context, Result};
use colored::*;
use peerlink_core::aggregator::{Aggregator, PeerSnapshot};
use peerlink_core::connector::{Connector, ConnectorConfig, PeerConnection};
use peerlink_core::global::{self, GlobalConfig, GlobalDiscovery};
use peerlink_core::peer::PeerSource;
use peerlink_core::presence::{Presence, PresenceConfig};
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::sync::{mpsc, watch};
use tracing::{info, warn};
use uuid::Uuid;

pub async fn run(config: Config, port: Option<u16>, name: Option<String>) -> Result<()> {
    let peer_id = match name {
        Some(name) => format!("{name}-{}", &Uuid::new_v4().to_string()[..8]),
        None => Uuid::new_v4().to_string(),
    };

    // Inbound listener for peers that discover us first.
    let listener = TcpListener::bind(("0.0.0.0", port.unwrap_or(0)))
        .await
        .context("Failed to bind inbound TCP listener")?;
    let tcp_port = listener
        .local_addr()
        .context("Failed to read listener address")?
        .port();

    println!("{}", "Peerlink node".bold());
    println!("  ID:      {}", peer_id.bright_cyan());
    println!("  Inbound: {}", format!("0.0.0.0:{tcp_port}").bright_yellow());
    println!();

    let (sightings_tx, sightings_rx) = mpsc::channel(256);
    let (snapshot_tx, mut snapshot_rx) = watch::channel(PeerSnapshot::default());
    let (established_tx, mut established_rx) = mpsc::channel::<PeerConnection>(32);
    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    Aggregator::new(peer_id.clone(), config.ttl()).spawn(
        sightings_rx,
        snapshot_tx,
        config.cleanup_interval(),
        shutdown_rx.clone(),
    );

    Presence::new(
        peer_id.clone(),
        format!("0.0.0.0:{tcp_port}"),
        PresenceConfig {
            broadcast_port: config.broadcast_port,
            announce_interval: config.announce_interval(),
            ..Default::default()
        },
        sightings_tx.clone(),
    )
    .spawn(shutdown_rx.clone());

    // Cross-network discovery needs a publicly visible address; without
    // one the LAN channel still carries the node.
    let global_config = GlobalConfig {
        relay_scheme: config.relay_scheme.clone(),
        relay_host: config.relay_host.clone(),
        relay_port: config.relay_port,
        announce_interval: config.announce_interval(),
        request_timeout: Duration::from_secs(10),
    };
    let global_handle = match global::detect_public_ip(Duration::from_secs(5)).await {
        Some(public_ip) => {
            info!(%public_ip, "public address detected");
            Some(
                GlobalDiscovery::new(
                    peer_id.clone(),
                    format!("{public_ip}:{tcp_port}"),
                    global_config,
                    sightings_tx.clone(),
                )
                .spawn(shutdown_rx.clone()),
            )
        }
        None => {
            warn!("no public IP detected, global discovery disabled");
            println!("  {} Global discovery disabled (no public IP)", "!".yellow());
            None
        }
    };
    drop(sightings_tx);

    Connector::new(ConnectorConfig::default()).spawn(
        snapshot_rx.clone(),
        established_tx.clone(),
        shutdown_rx.clone(),
    );

    spawn_inbox(listener, established_tx, shutdown_rx);

    // Connections stay open here until the message layer takes over;
    // dropping them would hang up on the peer.
    let mut open_connections: Vec<PeerConnection> = Vec::new();

    loop {
        tokio::select! {
            connection = established_rx.recv() => {
                let Some(connection) = connection else { break };
                println!(
                    "  {} connection with {} ({})",
                    "✓".green(),
                    connection.peer.peer_id.bright_cyan(),
                    connection.peer.address
                );
                open_connections.push(connection);
            }
            changed = snapshot_rx.changed() => {
                if changed.is_err() {
                    break;
                }
                print_snapshot(&snapshot_rx.borrow());
            }
            _ = tokio::signal::ctrl_c() => {
                println!();
                println!("{}", "Shutting down...".bold());
                break;
            }
        }
    }

    // Signal every task; the global channel deregisters on its way out.
    let _ = shutdown_tx.send(true);
    if let Some(handle) = global_handle {
        if tokio::time::timeout(Duration::from_secs(10), handle)
            .await
            .is_err()
        {
            warn!("global channel did not stop in time, abandoning");
        }
    }

    Ok(())
}

fn print_snapshot(snapshot: &PeerSnapshot) {
    if snapshot.peers.is_empty() {
        println!("  {} no peers in view", "·".dimmed());
        return;
    }
    println!("  {} {} peer(s) in view:", "·".dimmed(), snapshot.peers.len());
    for peer in &snapshot.peers {
        let via = match peer.source {
            PeerSource::Local => "local".green(),
            PeerSource::Global => "global".blue(),
        };
        println!(
            "    {} {} via {}",
            peer.peer_id.bright_cyan(),
            peer.address,
            via
        );
    }
}

/// Accept inbound connections and hand them to the same channel as
/// outbound dials. The peer's identity is whatever the message layer
/// negotiates later; discovery only knows the remote address.
fn spawn_inbox(
    listener: TcpListener,
    established: mpsc::Sender<PeerConnection>,
    mut shutdown: watch::Receiver<bool>,
) -> tokio::task::JoinHandle<()> {
    use peerlink_core::aggregator::MergedPeer;
    use peerlink_core::peer::unix_now;

    tokio::spawn(async move {
        loop {
            tokio::select! {
                accepted = listener.accept() => {
                    match accepted {
                        Ok((stream, addr)) => {
                            info!(%addr, "inbound connection");
                            let connection = PeerConnection {
                                peer: MergedPeer {
                                    peer_id: format!("inbound@{addr}"),
                                    address: addr.to_string(),
                                    last_seen: unix_now(),
                                    source: PeerSource::Local,
                                },
                                stream,
                            };
                            if established.send(connection).await.is_err() {
                                return;
                            }
                        }
                        Err(e) => {
                            warn!("accept failed: {e}");
                        }
                    }
                }
                changed = shutdown.changed() => {
                    // A dropped sender counts as shutdown too.
                    if changed.is_err() || *shutdown.borrow() {
                        return;
                    }
                }
            }
        }
    })
}
