//! balloond - Memory-balloon rebalancing daemon
//!
//! Periodically resizes every running VM on the host so each keeps a
//! comfortable amount of free guest memory, while the sum of all VM
//! allocations stays under the host's physical memory minus a reserve.

use clap::Parser;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

mod config;
mod daemon;
mod error;

use config::{DaemonConfig, GatewayConfig};
use daemon::Daemon;
use error::DaemonResult;

/// balloond CLI
#[derive(Parser)]
#[command(name = "balloond")]
#[command(about = "Rebalance VM memory through the balloon driver", long_about = None)]
#[command(version)]
struct Cli {
    /// Configuration file path
    #[arg(short, long, env = "BALLOON_CONFIG")]
    config: Option<String>,

    /// libvirt connection URI (selects the virsh gateway)
    #[arg(long, env = "BALLOON_CONNECT", conflicts_with = "simulate")]
    connect: Option<String>,

    /// Run against a simulated host instead of a hypervisor
    #[arg(long)]
    simulate: bool,

    /// Run a single rebalance cycle and exit
    #[arg(long)]
    once: bool,

    /// Log level
    #[arg(long, env = "BALLOON_LOG_LEVEL")]
    log_level: Option<String>,

    /// Enable JSON logging
    #[arg(long, env = "BALLOON_LOG_JSON")]
    json: bool,
}

#[tokio::main]
async fn main() -> DaemonResult<()> {
    let cli = Cli::parse();

    // Load configuration
    let mut config = DaemonConfig::load(cli.config.as_deref())?;

    // Initialize tracing
    let log_level = cli.log_level.clone().unwrap_or_else(|| config.logging.level.clone());
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| log_level.into());

    if cli.json || config.logging.json {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(tracing_subscriber::fmt::layer().json())
            .init();
    } else {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(tracing_subscriber::fmt::layer())
            .init();
    }

    // Override with CLI args
    if let Some(uri) = cli.connect {
        let program = match config.gateway {
            GatewayConfig::Virsh { program, .. } => program,
            GatewayConfig::Simulated { .. } => "virsh".to_string(),
        };
        config.gateway = GatewayConfig::Virsh {
            uri: Some(uri),
            program,
        };
    }
    if cli.simulate && !matches!(config.gateway, GatewayConfig::Simulated { .. }) {
        config.gateway = GatewayConfig::simulated();
    }

    tracing::info!(version = env!("CARGO_PKG_VERSION"), "Starting balloond");

    let mut daemon = Daemon::new(config).await?;

    if cli.once {
        let report = daemon.run_once().await?;
        println!("{}", report);
        return Ok(());
    }

    daemon.run().await
}
