// Configuration management for the Peerlink CLI
//
// Cross-platform config stored in:
// - macOS/Linux: ~/.config/peerlink/config.json
// - Windows: %APPDATA%\peerlink\config.json

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Relay scheme: http or https
    pub relay_scheme: String,

    /// Relay registry host
    pub relay_host: String,

    /// Relay registry port
    pub relay_port: u16,

    /// Shared UDP port for LAN presence beacons
    pub broadcast_port: u16,

    /// Seconds until a peer sighting expires
    pub ttl_secs: u64,

    /// Seconds between announcements (both channels)
    pub announce_interval_secs: u64,

    /// Seconds between TTL cleanup passes
    pub cleanup_interval_secs: u64,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            relay_scheme: "https".to_string(),
            relay_host: "relay.peerlink.dev".to_string(),
            relay_port: 443,
            broadcast_port: 54545,
            ttl_secs: 30,
            announce_interval_secs: 5,
            cleanup_interval_secs: 10,
        }
    }
}

impl Config {
    /// Get the config directory path (cross-platform)
    pub fn config_dir() -> Result<PathBuf> {
        let config_dir = dirs::config_dir()
            .context("Failed to determine config directory")?
            .join("peerlink");

        std::fs::create_dir_all(&config_dir).context("Failed to create config directory")?;

        Ok(config_dir)
    }

    /// Get the config file path
    pub fn config_file() -> Result<PathBuf> {
        Ok(Self::config_dir()?.join("config.json"))
    }

    /// Load config from file, or create default if not exists
    pub fn load() -> Result<Self> {
        let config_file = Self::config_file()?;

        if config_file.exists() {
            let contents =
                std::fs::read_to_string(&config_file).context("Failed to read config file")?;
            let config: Config =
                serde_json::from_str(&contents).context("Failed to parse config file")?;
            Ok(config)
        } else {
            let config = Config::default();
            config.save()?;
            Ok(config)
        }
    }

    /// Save config to file
    pub fn save(&self) -> Result<()> {
        let config_file = Self::config_file()?;
        let contents =
            serde_json::to_string_pretty(self).context("Failed to serialize config")?;
        std::fs::write(&config_file, contents).context("Failed to write config file")?;
        Ok(())
    }

    pub fn ttl(&self) -> Duration {
        Duration::from_secs(self.ttl_secs)
    }

    pub fn announce_interval(&self) -> Duration {
        Duration::from_secs(self.announce_interval_secs)
    }

    pub fn cleanup_interval(&self) -> Duration {
        Duration::from_secs(self.cleanup_interval_secs)
    }

    pub fn relay_base_url(&self) -> String {
        format!(
            "{}://{}:{}",
            self.relay_scheme, self.relay_host, self.relay_port
        )
    }

    /// Set a config value
    pub fn set(&mut self, key: &str, value: &str) -> Result<()> {
        match key {
            "relay_scheme" => {
                if value != "http" && value != "https" {
                    anyhow::bail!("relay_scheme must be http or https");
                }
                self.relay_scheme = value.to_string();
            }
            "relay_host" => {
                self.relay_host = value.to_string();
            }
            "relay_port" => {
                self.relay_port = value.parse().context("Invalid port number")?;
            }
            "broadcast_port" => {
                self.broadcast_port = value.parse().context("Invalid port number")?;
            }
            "ttl_secs" => {
                self.ttl_secs = value.parse().context("Invalid number")?;
            }
            "announce_interval_secs" => {
                self.announce_interval_secs = value.parse().context("Invalid number")?;
            }
            "cleanup_interval_secs" => {
                self.cleanup_interval_secs = value.parse().context("Invalid number")?;
            }
            _ => anyhow::bail!("Unknown config key: {}", key),
        }
        self.save()?;
        Ok(())
    }

    /// Get a config value
    pub fn get(&self, key: &str) -> Option<String> {
        match key {
            "relay_scheme" => Some(self.relay_scheme.clone()),
            "relay_host" => Some(self.relay_host.clone()),
            "relay_port" => Some(self.relay_port.to_string()),
            "broadcast_port" => Some(self.broadcast_port.to_string()),
            "ttl_secs" => Some(self.ttl_secs.to_string()),
            "announce_interval_secs" => Some(self.announce_interval_secs.to_string()),
            "cleanup_interval_secs" => Some(self.cleanup_interval_secs.to_string()),
            _ => None,
        }
    }

    /// List all config values
    pub fn list(&self) -> Vec<(String, String)> {
        vec![
            ("relay_scheme".to_string(), self.relay_scheme.clone()),
            ("relay_host".to_string(), self.relay_host.clone()),
            ("relay_port".to_string(), self.relay_port.to_string()),
            ("broadcast_port".to_string(), self.broadcast_port.to_string()),
            ("ttl_secs".to_string(), format!("{}s", self.ttl_secs)),
            (
                "announce_interval_secs".to_string(),
                format!("{}s", self.announce_interval_secs),
            ),
            (
                "cleanup_interval_secs".to_string(),
                format!("{}s", self.cleanup_interval_secs),
            ),
        ]
    }
}
