// peerlink — Hybrid Peer Discovery CLI
//
// Cross-platform (macOS, Linux, Windows) command-line interface for
// running Peerlink nodes and relay registries.

mod config;
mod node;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use colored::*;
use peerlink_core::api;
use peerlink_core::registry::{PeerRegistry, RegistryConfig};
use std::sync::Arc;
use tokio::sync::watch;

#[derive(Parser)]
#[command(name = "peerlink")]
#[command(about = "Peerlink — Hybrid Peer Discovery", long_about = None)]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start a discovery node
    Start {
        /// Inbound TCP port (random free port when omitted)
        #[arg(short, long)]
        port: Option<u16>,
        /// Human-readable prefix for the generated peer ID
        #[arg(short, long)]
        name: Option<String>,
    },
    /// Run a relay registry
    Relay {
        #[arg(short, long, default_value = "8080")]
        port: u16,
    },
    /// Configure settings
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
    /// Show relay health
    Status,
}

#[derive(Subcommand)]
enum ConfigAction {
    Set { key: String, value: String },
    Get { key: String },
    List,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
        )
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Start { port, name } => cmd_start(port, name).await,
        Commands::Relay { port } => cmd_relay(port).await,
        Commands::Config { action } => cmd_config(action).await,
        Commands::Status => cmd_status().await,
    }
}

async fn cmd_start(port: Option<u16>, name: Option<String>) -> Result<()> {
    let config = config::Config::load()?;
    node::run(config, port, name).await
}

async fn cmd_relay(port: u16) -> Result<()> {
    let config = config::Config::load()?;
    let registry = Arc::new(PeerRegistry::new(RegistryConfig {
        ttl: config.ttl(),
        cleanup_interval: config.cleanup_interval(),
    }));

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    registry.spawn_cleanup(shutdown_rx);

    println!("{}", "Peerlink relay".bold());
    println!("  API:    {}", format!("http://0.0.0.0:{port}/api").bright_yellow());
    println!("  Health: {}", format!("http://0.0.0.0:{port}/health").bright_yellow());
    println!("  TTL:    {}s", config.ttl_secs);
    println!();
    println!("Press Ctrl+C to stop.");

    let routes = api::routes(Arc::clone(&registry));
    let (_addr, server) =
        warp::serve(routes).bind_with_graceful_shutdown(([0, 0, 0, 0], port), async {
            let _ = tokio::signal::ctrl_c().await;
        });
    server.await;

    let _ = shutdown_tx.send(true);
    println!();
    println!("{} Relay stopped", "✓".green());

    Ok(())
}

async fn cmd_config(action: ConfigAction) -> Result<()> {
    let mut config = config::Config::load()?;

    match action {
        ConfigAction::Set { key, value } => {
            config.set(&key, &value)?;
            println!("{} {} = {}", "✓".green(), key.bright_cyan(), value);
        }
        ConfigAction::Get { key } => match config.get(&key) {
            Some(value) => println!("{} = {}", key.bright_cyan(), value),
            None => anyhow::bail!("Unknown config key: {}", key),
        },
        ConfigAction::List => {
            println!("{}", "Configuration".bold());
            println!("  File: {}", config::Config::config_file()?.display());
            println!();
            for (key, value) in config.list() {
                println!("  {} = {}", key.bright_cyan(), value);
            }
        }
    }

    Ok(())
}

async fn cmd_status() -> Result<()> {
    let config = config::Config::load()?;
    let url = format!("{}/health", config.relay_base_url());

    println!("{}", "Relay Status".bold());
    println!("  Relay: {}", config.relay_base_url().bright_yellow());
    println!();

    let client = reqwest::Client::builder()
        .timeout(std::time::Duration::from_secs(10))
        .build()
        .context("Failed to build HTTP client")?;

    match client.get(&url).send().await {
        Ok(response) if response.status().is_success() => {
            let health: serde_json::Value =
                response.json().await.context("Invalid health response")?;
            println!("  {} Relay is up", "✓".green());
            if let Some(peers) = health.get("peer_count").and_then(|v| v.as_u64()) {
                println!("  Registered peers: {}", peers.to_string().bright_cyan());
            }
            if let Some(uptime) = health.get("uptime_seconds").and_then(|v| v.as_u64()) {
                println!("  Uptime:           {}s", uptime);
            }
        }
        Ok(response) => {
            println!("  {} Relay returned {}", "✗".red(), response.status());
        }
        Err(e) => {
            println!("  {} Relay unreachable: {}", "✗".red(), e);
        }
    }

    Ok(())
}
