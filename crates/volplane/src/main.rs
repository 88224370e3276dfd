mod config;

use clap::{Parser, Subcommand, ValueEnum};
use config::Config;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{error, info, warn};
use volplane_driver::{DriverRegistry, MockMounter, Mounter, NfsDriver, SystemMounter};
use volplane_storage::{KVStore, MemoryBackend, RedbBackend};

#[derive(Parser)]
#[command(name = "volplane", about = "Volplane volume driver host")]
struct Cli {
    /// Log output format
    #[arg(
        long,
        value_enum,
        default_value_t = LogFormat::Text,
        env = "VOLPLANE_LOG_FORMAT",
        global = true
    )]
    log_format: LogFormat,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Clone, Copy, ValueEnum)]
enum LogFormat {
    Text,
    Json,
}

#[derive(Subcommand)]
enum Commands {
    /// Initialize the configured drivers and hold them until ctrl-c
    Serve {
        /// Path to the YAML configuration file
        #[arg(long, env = "VOLPLANE_CONFIG", default_value = "./volplane.yaml")]
        config: PathBuf,
        /// Record mounts in memory instead of calling mount(8)
        #[arg(long)]
        mock_mounts: bool,
    },
    /// List the built-in drivers
    Drivers,
}

#[tokio::main]
async fn main() -> miette::Result<()> {
    let cli = Cli::parse();

    // Initialize tracing
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));
    match cli.log_format {
        LogFormat::Text => tracing_subscriber::fmt().with_env_filter(filter).init(),
        LogFormat::Json => tracing_subscriber::fmt()
            .json()
            .with_env_filter(filter)
            .init(),
    }

    match cli.command {
        Commands::Serve {
            config,
            mock_mounts,
        } => run_serve(&config, mock_mounts).await,
        Commands::Drivers => list_drivers(),
    }
}

/// Register every built-in backend with `registry`
fn register_builtin(registry: &DriverRegistry, mounter: Arc<dyn Mounter>) -> miette::Result<()> {
    NfsDriver::register(registry, mounter)?;
    Ok(())
}

fn create_mounter(mock: bool) -> Arc<dyn Mounter> {
    if mock {
        warn!("Using MockMounter: volumes are not mounted on this host");
        Arc::new(MockMounter::new())
    } else {
        Arc::new(SystemMounter::new())
    }
}

/// Open the store, bring up the configured drivers, wait for ctrl-c
async fn run_serve(config_path: &Path, mock_mounts: bool) -> miette::Result<()> {
    let config = Config::load(config_path)?;
    info!("Starting volplane with configuration {}", config_path.display());

    let store: Arc<dyn KVStore> = Arc::new(RedbBackend::new(&config.data_file).map_err(|e| {
        miette::miette!(
            "Failed to open storage at '{}': {}",
            config.data_file.display(),
            e
        )
    })?);

    let registry = Arc::new(DriverRegistry::new(store));
    if DriverRegistry::install_global(Arc::clone(&registry)).is_err() {
        warn!("A process-wide driver registry was already installed");
    }
    register_builtin(&registry, create_mounter(mock_mounts))?;

    let mut ready = 0;
    for driver in &config.drivers {
        match registry.get(&driver.name, &driver.params).await {
            Ok(instance) => {
                ready += 1;
                info!(
                    driver = %driver.name,
                    category = %instance.category(),
                    "Driver ready"
                );
            }
            // A driver that fails to come up is unavailable, the process is not
            Err(e) => error!(driver = %driver.name, "Driver unavailable: {}", e),
        }
    }

    info!(
        "{} of {} configured drivers initialized",
        ready,
        config.drivers.len()
    );

    // Wait for shutdown signal
    tokio::signal::ctrl_c()
        .await
        .map_err(|e| miette::miette!("Failed to listen for ctrl-c: {}", e))?;

    info!("Shutting down gracefully...");
    let failures = registry.shutdown().await;
    if !failures.is_empty() {
        warn!("{} drivers failed to shut down cleanly", failures.len());
    }

    info!("Shutdown complete");

    Ok(())
}

/// Print the built-in drivers and their categories
fn list_drivers() -> miette::Result<()> {
    let registry = DriverRegistry::new(Arc::new(MemoryBackend::new()));
    register_builtin(&registry, Arc::new(MockMounter::new()))?;

    for (name, category) in registry.registered() {
        println!("{}\t{}", name, category);
    }
    Ok(())
}
