//! WolfBlock - Replicated Block Volume Controller
//!
//! Tracks the replicas of a block volume, drives their rebuild handshake
//! and enforces quorum before snapshot and revert.

use std::path::PathBuf;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use tokio_util::sync::CancellationToken;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, Layer};

use wolfblock::api::HttpServer;
use wolfblock::catalog::open_catalog;
use wolfblock::config::WolfBlockConfig;
use wolfblock::controller::{ControllerConfig, VolumeController};
use wolfblock::error::Result;
use wolfblock::rebuild::TicketReaper;

/// WolfBlock - Replicated Block Volume Controller
#[derive(Parser)]
#[command(name = "wolfblock")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Path to configuration file
    #[arg(short, long, default_value = "wolfblock.toml")]
    config: PathBuf,

    /// Log level (trace, debug, info, warn, error); overrides the config file
    #[arg(short, long)]
    log_level: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the volume controller
    Start,

    /// Initialize a new configuration file
    Init {
        /// Output path for configuration file
        #[arg(short, long, default_value = "wolfblock.toml")]
        output: PathBuf,

        /// Controller ID
        #[arg(long, default_value = "controller-1")]
        node_id: String,

        /// Volume name
        #[arg(long, default_value = "vol1")]
        volume: String,
    },

    /// Validate configuration file
    Validate,

    /// Show controller information
    Info,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Start => run_start(cli.config, cli.log_level).await,
        Commands::Init {
            output,
            node_id,
            volume,
        } => {
            init_logging(cli.log_level.as_deref().unwrap_or("info"), "pretty");
            run_init(output, node_id, volume)
        }
        Commands::Validate => {
            init_logging(cli.log_level.as_deref().unwrap_or("info"), "pretty");
            run_validate(cli.config)
        }
        Commands::Info => {
            init_logging(cli.log_level.as_deref().unwrap_or("info"), "pretty");
            run_info(cli.config)
        }
    }
}

/// Initialize logging
fn init_logging(level: &str, format: &str) {
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| level.into());

    let fmt_layer = if format == "json" {
        tracing_subscriber::fmt::layer().json().boxed()
    } else {
        tracing_subscriber::fmt::layer().boxed()
    };

    tracing_subscriber::registry()
        .with(env_filter)
        .with(fmt_layer)
        .init();
}

/// Start the volume controller
async fn run_start(config_path: PathBuf, log_level: Option<String>) -> Result<()> {
    let config = match WolfBlockConfig::from_file(&config_path) {
        Ok(c) => c,
        Err(e) => {
            init_logging(log_level.as_deref().unwrap_or("info"), "pretty");
            tracing::error!("Failed to load configuration from {:?}: {}", config_path, e);
            return Err(e);
        }
    };
    init_logging(
        log_level.as_deref().unwrap_or(&config.logging.level),
        &config.logging.format,
    );
    tracing::info!("Starting WolfBlock controller {}", config.node.id);

    if let Err(e) = std::fs::create_dir_all(config.data_dir()) {
        tracing::error!("Failed to create data directory {:?}: {}", config.data_dir(), e);
        return Err(e.into());
    }

    let catalog = open_catalog(&config.catalog, config.data_dir())?;
    let controller = Arc::new(
        VolumeController::open(ControllerConfig::from_config(&config), catalog).await?,
    );
    let volume = controller.volume().await;
    tracing::info!(
        "Volume {} is {} at generation {} ({} replicas)",
        volume.name,
        volume.state,
        volume.generation,
        volume.replicas.len()
    );

    let shutdown = CancellationToken::new();
    let reaper = TicketReaper::new(
        Arc::clone(&controller),
        config.reaper_interval(),
        shutdown.clone(),
    )
    .spawn();

    let signal = shutdown.clone();
    tokio::spawn(async move {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!("Failed to listen for shutdown signal: {}", e);
            return;
        }
        tracing::info!("Received shutdown signal");
        signal.cancel();
    });

    let server = HttpServer::new(config.api.clone(), config.node.id.clone(), controller);
    let stopped = shutdown.clone();
    let result = server.start(async move { stopped.cancelled().await }).await;

    shutdown.cancel();
    if let Err(e) = reaper.await {
        tracing::warn!("Ticket reaper exited abnormally: {}", e);
    }
    tracing::info!("WolfBlock controller stopped");
    result
}

/// Initialize configuration file
fn run_init(output: PathBuf, node_id: String, volume: String) -> Result<()> {
    let config_content = format!(r#"# WolfBlock Configuration
# Generated configuration file

[node]
id = "{node_id}"
data_dir = "/var/lib/wolfblock/{node_id}"

[volume]
name = "{volume}"
size_bytes = 10737418240
# Start the volume once all of these replicas have registered
replicas = []
# replicas = ["tcp://10.0.0.1:9502", "tcp://10.0.0.2:9502", "tcp://10.0.0.3:9502"]

[rebuild]
ticket_ttl_secs = 300
reaper_interval_ms = 1000

[catalog]
backend = "sqlite"
# path = "/var/lib/wolfblock/{node_id}/catalog.db"

[api]
enabled = true
bind_address = "0.0.0.0:9501"
cors_enabled = false

[journal]
capacity = 1024

[logging]
level = "info"
format = "pretty"
"#);

    std::fs::write(&output, config_content)?;
    println!("Configuration file created: {}", output.display());
    println!("\nEdit the file to configure the volume and its replicas.");
    println!("Then start with: wolfblock start --config {}", output.display());

    Ok(())
}

/// Validate configuration
fn run_validate(config_path: PathBuf) -> Result<()> {
    match WolfBlockConfig::from_file(&config_path) {
        Ok(config) => {
            println!("✓ Configuration is valid");
            println!("  Controller ID: {}", config.node.id);
            println!("  Volume: {}", config.volume.name);
            println!("  Catalog: {}", config.catalog.backend);
            println!("  API: {}", config.api.bind_address);
            Ok(())
        }
        Err(e) => {
            eprintln!("✗ Configuration error: {}", e);
            Err(e)
        }
    }
}

/// Show controller information
fn run_info(config_path: PathBuf) -> Result<()> {
    let config = WolfBlockConfig::from_file(&config_path)?;

    println!("WolfBlock Controller Information");
    println!("================================");
    println!();
    println!("Controller ID:    {}", config.node.id);
    println!("Data Directory:   {}", config.data_dir().display());
    println!();
    println!("Volume:");
    println!("  Name:           {}", config.volume.name);
    println!("  Size:           {} bytes", config.volume.size_bytes);
    println!("  Start With:     {:?}", config.volume.replicas);
    println!();
    println!("Rebuild:");
    println!("  Ticket TTL:     {:?}", config.ticket_ttl());
    println!("  Sweep Interval: {:?}", config.reaper_interval());
    println!();
    println!("Catalog:");
    println!("  Backend:        {}", config.catalog.backend);
    if config.catalog.backend == "sqlite" {
        println!("  Path:           {}", config.catalog_path().display());
    }
    println!();
    println!("API:");
    println!("  Enabled:        {}", config.api.enabled);
    println!("  Bind Address:   {}", config.api.bind_address);

    Ok(())
}
