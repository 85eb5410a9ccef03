//! Shardcast Manager Service
//!
//! Runs a Shard Manager with in-process collaborators: an in-memory
//! storage layer and a loopback pod transport. Pods listed on the command
//! line are registered at startup, then the service keeps rebalancing and
//! health-checking until shut down.

use clap::Parser;
use shardcast_manager::{LoopbackPods, ManagerConfig, MemoryStorage, PingPodsHealth, ShardManager};
use shardcast_core::{Pod, PodAddress};
use std::sync::Arc;
use std::time::Duration;
use tokio::signal;
use tracing::{info, Level};

#[derive(Parser)]
#[command(name = "shardcast-manager")]
#[command(about = "Shardcast shard placement service")]
struct Cli {
    /// Size of the shard id space
    #[arg(long, default_value = "300")]
    number_of_shards: u32,

    /// Seconds between periodic rebalance rounds
    #[arg(long, default_value = "20")]
    rebalance_interval: u64,

    /// Seconds between full-cluster health sweeps
    #[arg(long, default_value = "60")]
    health_check_interval: u64,

    /// Pods to register at startup, as host:port
    #[arg(long = "pod")]
    pods: Vec<String>,

    /// Version reported for the startup pods
    #[arg(long, default_value = "1.0.0")]
    pod_version: String,
}

fn parse_pod(spec: &str, version: &str) -> anyhow::Result<Pod> {
    let (host, port) = spec
        .rsplit_once(':')
        .ok_or_else(|| anyhow::anyhow!("Invalid pod address '{}', expected host:port", spec))?;
    let port: u16 = port
        .parse()
        .map_err(|_| anyhow::anyhow!("Invalid port in pod address '{}'", spec))?;
    Ok(Pod::new(PodAddress::new(host, port), version))
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_max_level(Level::INFO)
        .with_target(true)
        .init();

    let cli = Cli::parse();

    let config = ManagerConfig {
        number_of_shards: cli.number_of_shards,
        rebalance_interval_secs: cli.rebalance_interval,
        ..ManagerConfig::from_env()
    };

    info!(
        number_of_shards = config.number_of_shards,
        rebalance_interval = config.rebalance_interval_secs,
        startup_pods = cli.pods.len(),
        "Starting Shardcast manager"
    );

    let pods = Arc::new(LoopbackPods::new());
    let health = Arc::new(PingPodsHealth::new(pods.clone(), config.ping_timeout()));
    let storage = Arc::new(MemoryStorage::new());
    let manager = ShardManager::new(pods, health, storage, config);

    manager.start().await;

    for spec in &cli.pods {
        manager.register(parse_pod(spec, &cli.pod_version)?).await;
    }

    loop {
        tokio::select! {
            _ = tokio::time::sleep(Duration::from_secs(cli.health_check_interval)) => {
                manager.check_all_pods_health().await;
            }
            _ = signal::ctrl_c() => {
                info!("Shutdown signal received");
                break;
            }
        }
    }

    info!("Shardcast manager stopped");
    Ok(())
}
