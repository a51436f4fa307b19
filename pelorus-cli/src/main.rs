//! Pelorus CLI - run and inspect an agent fleet

use anyhow::Result;
use clap::{Parser, Subcommand};
use pelorus_core::config::FleetConfig;
use pelorus_core::events::SupervisorEvent;
use pelorus_core::metrics::InMemoryMetricsStore;
use pelorus_supervisor::AgentSupervisor;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{error, info};

#[derive(Parser)]
#[command(name = "pelorus")]
#[command(about = "Pelorus agent fleet supervisor", long_about = None)]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the fleet until interrupted
    Run {
        /// Path to the fleet configuration file
        #[arg(short, long, env = "PELORUS_CONFIG", default_value = "pelorus.toml")]
        config: PathBuf,
    },
    /// Validate a configuration file without launching anything
    CheckConfig {
        /// Path to the fleet configuration file
        #[arg(short, long, env = "PELORUS_CONFIG", default_value = "pelorus.toml")]
        config: PathBuf,
    },
    /// Version information
    Version,
}

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Version => {
            println!("pelorus {}", env!("CARGO_PKG_VERSION"));
            println!("pelorus-core {}", pelorus_core::VERSION);
        }
        Commands::CheckConfig { config } => {
            let fleet = FleetConfig::load(&config)?;
            println!(
                "{} is valid: {} agent(s) configured",
                config.display(),
                fleet.agents.len()
            );
            for agent in &fleet.agents {
                println!("  {} -> {}", agent.id, agent.command);
            }
        }
        Commands::Run { config } => {
            run_fleet(config).await?;
        }
    }

    Ok(())
}

async fn run_fleet(config_path: PathBuf) -> Result<()> {
    let config = FleetConfig::load(&config_path)?;
    info!(config = %config_path.display(), agents = config.agents.len(), "starting fleet");

    let store = Arc::new(InMemoryMetricsStore::new());
    let supervisor = AgentSupervisor::new(config, store);

    let mut events = supervisor.subscribe();
    tokio::spawn(async move {
        loop {
            match events.recv().await {
                Ok(event) => log_event(&event),
                Err(tokio::sync::broadcast::error::RecvError::Lagged(missed)) => {
                    tracing::warn!(missed, "event log fell behind");
                }
                Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
            }
        }
    });

    supervisor.initialize().await?;

    tokio::signal::ctrl_c().await?;
    info!("interrupt received");
    supervisor.shutdown().await?;
    Ok(())
}

fn log_event(event: &SupervisorEvent) {
    match event {
        SupervisorEvent::AgentStarted { id } => info!(agent = %id, "agent started"),
        SupervisorEvent::AgentRecovered { id } => info!(agent = %id, "agent recovered"),
        SupervisorEvent::AgentRestarted { id } => info!(agent = %id, "agent restarted"),
        SupervisorEvent::AgentFailed { id } => {
            error!(agent = %id, "agent failed, operator intervention required");
        }
        SupervisorEvent::CapabilityUpdate { id, capabilities } => {
            info!(agent = %id, ?capabilities, "capabilities updated");
        }
        SupervisorEvent::AgentMetrics { id, metrics } => {
            info!(
                agent = %id,
                cpu = metrics.cpu,
                memory_mb = metrics.memory,
                requests = metrics.requests_processed,
                "metrics"
            );
        }
        SupervisorEvent::FleetHealth { summary } => {
            info!(
                total = summary.total,
                healthy = summary.healthy,
                unhealthy = summary.unhealthy,
                maintenance = summary.maintenance,
                "fleet health"
            );
        }
    }
}
