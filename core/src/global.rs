//! Global Discovery Channel — client side of the relay registry.
//!
//! On a fixed interval: announce ourselves with `register`, then fetch
//! the peer list and forward every entry (except ourselves) to the
//! aggregator as a `global` sighting. Every failure here is transient
//! by definition: log it, keep the previous cache, try again next
//! cycle. On shutdown we send a best-effort `remove` so the relay can
//! drop us before the TTL does.

use crate::peer::{PeerRecord, PeerSource};
use serde_json::{json, Value};
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tracing::{debug, info, warn};

/// Services asked for our public address, in order, until one answers.
const PUBLIC_IP_SERVICES: [&str; 3] = [
    "https://api.ipify.org",
    "https://ipv4.icanhazip.com",
    "https://checkip.amazonaws.com",
];

/// Global channel configuration
#[derive(Debug, Clone)]
pub struct GlobalConfig {
    /// http or https
    pub relay_scheme: String,
    pub relay_host: String,
    pub relay_port: u16,
    /// Seconds between announce/fetch cycles
    pub announce_interval: Duration,
    /// Bound on every relay call
    pub request_timeout: Duration,
}

impl Default for GlobalConfig {
    fn default() -> Self {
        Self {
            relay_scheme: "https".to_string(),
            relay_host: "relay.peerlink.dev".to_string(),
            relay_port: 443,
            announce_interval: Duration::from_secs(5),
            request_timeout: Duration::from_secs(10),
        }
    }
}

impl GlobalConfig {
    pub fn api_url(&self) -> String {
        format!(
            "{}://{}:{}/api",
            self.relay_scheme, self.relay_host, self.relay_port
        )
    }
}

/// The announce/fetch loop against one relay.
pub struct GlobalDiscovery {
    peer_id: String,
    address: String,
    config: GlobalConfig,
    sightings: mpsc::Sender<PeerRecord>,
}

impl GlobalDiscovery {
    pub fn new(
        peer_id: String,
        address: String,
        config: GlobalConfig,
        sightings: mpsc::Sender<PeerRecord>,
    ) -> Self {
        Self {
            peer_id,
            address,
            config,
            sightings,
        }
    }

    pub fn spawn(self, mut shutdown: watch::Receiver<bool>) -> tokio::task::JoinHandle<()> {
        tokio::spawn(async move {
            let client = match reqwest::Client::builder()
                .timeout(self.config.request_timeout)
                .build()
            {
                Ok(c) => c,
                Err(e) => {
                    warn!("global discovery disabled: {e}");
                    return;
                }
            };

            let url = self.config.api_url();
            let mut ticker = tokio::time::interval(self.config.announce_interval);
            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        self.cycle(&client, &url).await;
                    }
                    changed = shutdown.changed() => {
                        // A dropped sender counts as shutdown too.
                        if changed.is_err() || *shutdown.borrow() {
                            break;
                        }
                    }
                }
            }

            // Best effort; the relay's TTL is the real backstop.
            self.remove_presence(&client, &url).await;
        })
    }

    /// One announce/fetch cycle. Fetch only runs after a successful
    /// announcement, so the relay never lists us with a stale address.
    async fn cycle(&self, client: &reqwest::Client, url: &str) {
        let registered = self
            .post(client, url, &json!({
                "action": "register",
                "peer_id": self.peer_id,
                "address": self.address,
            }))
            .await;

        match registered {
            Ok(_) => {}
            Err(e) => {
                debug!("relay announce failed: {e}");
                return;
            }
        }

        match self.post(client, url, &json!({ "action": "list" })).await {
            Ok(response) => self.forward_peers(&response).await,
            Err(e) => debug!("relay list failed: {e}"),
        }
    }

    async fn forward_peers(&self, response: &Value) {
        let Some(peers) = response.get("peers").and_then(Value::as_array) else {
            debug!("relay list response missing peers array");
            return;
        };

        for entry in peers {
            let Some(peer_id) = entry.get("peer_id").and_then(Value::as_str) else {
                continue;
            };
            let Some(address) = entry.get("address").and_then(Value::as_str) else {
                continue;
            };
            if peer_id == self.peer_id {
                continue;
            }

            // Stamped with our own clock: cached entries age out locally
            // even if the relay's clock disagrees with ours.
            let record = PeerRecord::new(peer_id, address, PeerSource::Global);
            if self.sightings.send(record).await.is_err() {
                return;
            }
        }
    }

    async fn remove_presence(&self, client: &reqwest::Client, url: &str) {
        let body = json!({ "action": "remove", "peer_id": self.peer_id });
        match self.post(client, url, &body).await {
            Ok(_) => info!("deregistered from relay"),
            Err(e) => debug!("relay deregistration failed (TTL will expire us): {e}"),
        }
    }

    async fn post(
        &self,
        client: &reqwest::Client,
        url: &str,
        body: &Value,
    ) -> Result<Value, reqwest::Error> {
        client
            .post(url)
            .json(body)
            .send()
            .await?
            .error_for_status()?
            .json::<Value>()
            .await
    }
}

/// Ask the public-IP services who we are. Returns None when none of
/// them answer, in which case the caller should disable the global
/// channel — exactly what an instance on an isolated LAN wants.
pub async fn detect_public_ip(timeout: Duration) -> Option<String> {
    let client = reqwest::Client::builder().timeout(timeout).build().ok()?;

    for service in PUBLIC_IP_SERVICES {
        match client.get(service).send().await {
            Ok(response) => {
                if let Ok(text) = response.text().await {
                    let ip = text.trim();
                    if !ip.is_empty() && ip.parse::<std::net::IpAddr>().is_ok() {
                        return Some(ip.to_string());
                    }
                }
            }
            Err(e) => debug!("public IP probe {service} failed: {e}"),
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_api_url_formatting() {
        let config = GlobalConfig {
            relay_scheme: "http".into(),
            relay_host: "127.0.0.1".into(),
            relay_port: 8080,
            ..Default::default()
        };
        assert_eq!(config.api_url(), "http://127.0.0.1:8080/api");
    }

    #[tokio::test]
    async fn test_forward_peers_excludes_self_and_stamps_global() {
        let (tx, mut rx) = mpsc::channel(8);
        let discovery = GlobalDiscovery::new(
            "me".into(),
            "1.2.3.4:7000".into(),
            GlobalConfig::default(),
            tx,
        );

        let response = json!({ "peers": [
            { "peer_id": "me", "address": "1.2.3.4:7000", "last_seen": 0 },
            { "peer_id": "other", "address": "5.6.7.8:7001", "last_seen": 0 },
            { "address": "no-id.example:1" },
        ]});
        discovery.forward_peers(&response).await;
        drop(discovery);

        let record = rx.recv().await.unwrap();
        assert_eq!(record.peer_id, "other");
        assert_eq!(record.address, "5.6.7.8:7001");
        assert_eq!(record.source, PeerSource::Global);
        assert!(rx.recv().await.is_none());
    }

    #[tokio::test]
    async fn test_forward_peers_tolerates_malformed_response() {
        let (tx, mut rx) = mpsc::channel(8);
        let discovery = GlobalDiscovery::new(
            "me".into(),
            "1.2.3.4:7000".into(),
            GlobalConfig::default(),
            tx,
        );

        discovery.forward_peers(&json!({ "ok": true })).await;
        discovery.forward_peers(&json!({ "peers": "nope" })).await;
        drop(discovery);

        assert!(rx.recv().await.is_none());
    }
}
