//! rugate CLI
//!
//! One binary for both tunnel roles: `rugate provider` terminates peers
//! under the announcement domain, `rugate requester` originates tunnels
//! to the configured providers.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tokio::signal;
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use gate_wg::WgDriver;
use rugate_provider::{serve, AppState, ProviderConfig, VpnManager};
use rugate_requester::supervisor::START_FAILURE_EXIT_CODE;
use rugate_requester::{RequesterConfig, Supervisor};

/// rugate - expose local services through a cooperating tunnel provider
#[derive(Parser)]
#[command(name = "rugate")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Log level (error, warn, info, debug, trace)
    #[arg(short, long, default_value = "info")]
    log_level: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the provider: admit peers, resolve names for the edge proxy
    Provider,

    /// Run the requester: one supervised tunnel per configured provider
    Requester {
        /// Path to the declarative provider file
        #[arg(short, long, default_value = "providers.json")]
        providers: PathBuf,
    },

    /// Generate a sample provider file for the requester
    GenConfig {
        /// Output path for the provider file
        #[arg(short, long, default_value = "providers.json")]
        output: PathBuf,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    init_logging(&cli.log_level);

    match cli.command {
        Commands::Provider => run_provider().await,
        Commands::Requester { providers } => run_requester(providers).await,
        Commands::GenConfig { output } => generate_config(output),
    }
}

fn init_logging(level: &str) {
    // Library crates log through the `log` facade; bridge it into tracing
    tracing_log::LogTracer::init().ok();

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer())
        .init();
}

async fn run_provider() -> Result<()> {
    info!("Starting rugate provider...");

    let config = ProviderConfig::from_env().context("Failed to load provider configuration")?;
    let api_port = config.api_port;

    let driver = Arc::new(WgDriver::new());
    let manager = VpnManager::init(config, driver)
        .await
        .context("Failed to bring the provider tunnel up")?;

    let state = AppState::new(Arc::new(manager));
    serve(state, api_port, async {
        wait_for_shutdown().await;
        info!("Shutting down provider...");
    })
    .await
    .context("Admission API failed")?;

    Ok(())
}

async fn run_requester(providers: PathBuf) -> Result<()> {
    info!("Starting rugate requester...");

    let config = RequesterConfig::load(&providers)
        .with_context(|| format!("Failed to load provider file {:?}", providers))?;
    info!("Supervising {} provider(s)", config.providers.len());

    let supervisor = Supervisor::new(config, Arc::new(WgDriver::new()));
    let shutdown_tx = supervisor.shutdown_handle();

    let mut handle = tokio::spawn(async move { supervisor.run().await });

    tokio::select! {
        result = &mut handle => {
            match result {
                Ok(Ok(())) => {}
                Ok(Err(e)) => {
                    error!("Requester failed: {}", e);
                    std::process::exit(START_FAILURE_EXIT_CODE);
                }
                Err(e) => {
                    error!("Requester task panicked: {}", e);
                    std::process::exit(START_FAILURE_EXIT_CODE);
                }
            }
        }
        _ = wait_for_shutdown() => {
            info!("Shutting down requester...");
            let _ = shutdown_tx.send(true);

            // Give the supervisor a moment to bring interfaces down
            let _ = tokio::time::timeout(Duration::from_secs(10), handle).await;
        }
    }

    Ok(())
}

fn generate_config(output: PathBuf) -> Result<()> {
    std::fs::write(&output, RequesterConfig::sample())
        .with_context(|| format!("Failed to write provider file to {:?}", output))?;

    println!("Sample provider file written to {:?}", output);
    println!("\nEach entry's provider string is \"<backendUrl>,<userId>,<signature>\",");
    println!("as handed out by the provider you are registering with.");

    Ok(())
}

async fn wait_for_shutdown() {
    #[cfg(unix)]
    {
        let mut sigterm = signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("Failed to register SIGTERM handler");
        let mut sigint = signal::unix::signal(signal::unix::SignalKind::interrupt())
            .expect("Failed to register SIGINT handler");

        tokio::select! {
            _ = sigterm.recv() => {
                info!("Received SIGTERM");
            }
            _ = sigint.recv() => {
                info!("Received SIGINT");
            }
        }
    }

    #[cfg(windows)]
    {
        signal::ctrl_c().await.expect("Failed to listen for Ctrl+C");
        info!("Received Ctrl+C");
    }
}
