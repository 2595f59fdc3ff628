//! WolfBlockCtl - Command line tool for managing WolfBlock volumes
//!
//! Usage:
//!   wolfblockctl volume                     - Show volume status
//!   wolfblockctl ls                         - List replicas
//!   wolfblockctl prepare-rebuild <address>  - Issue a rebuild ticket
//!   wolfblockctl verify-rebuild <address>   - Report a finished rebuild

use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use serde::Deserialize;

use wolfblock::api::types::ReplicaResource;
use wolfblock::client::ControllerClient;
use wolfblock::state::{PeerDetails, Registration, ReplicaState, ReplicaType};

const DEFAULT_ENDPOINT: &str = "http://127.0.0.1:9501";

/// WolfBlock Volume Control Tool
#[derive(Parser)]
#[command(name = "wolfblockctl")]
#[command(about = "Control and monitor WolfBlock volumes", long_about = None)]
struct Cli {
    /// Path to config file
    #[arg(short, long, default_value = "/etc/wolfblock/config.toml")]
    config: PathBuf,

    /// API endpoint to connect to (overrides config)
    #[arg(short, long)]
    endpoint: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Show volume status, quorum and snapshot chain
    Volume,
    /// List replicas
    Ls,
    /// Add a replica
    Add {
        address: String,
        /// Replica type: quorum or non-quorum
        #[arg(long, default_value = "quorum")]
        replica_type: ReplicaType,
    },
    /// Remove a replica
    Rm { address: String },
    /// Set a replica's state (e.g. failed)
    Update { address: String, state: ReplicaState },
    /// Start the volume from the given replicas
    Start {
        #[arg(required = true)]
        replicas: Vec<String>,
    },
    /// Take a snapshot (a name is generated when omitted)
    Snapshot { name: Option<String> },
    /// Revert the volume to a snapshot
    Revert { name: String },
    /// Register a replica as the replica process would
    Register {
        address: String,
        #[arg(long, default_value_t = 0)]
        revision: u64,
        #[arg(long, default_value = "quorum")]
        replica_type: ReplicaType,
        #[arg(long, default_value = "registering")]
        state: ReplicaState,
        #[arg(long, default_value_t = 0)]
        up_time_secs: u64,
    },
    /// Issue a rebuild ticket and print its descriptor
    PrepareRebuild { address: String },
    /// Report the result of a rebuild
    VerifyRebuild {
        address: String,
        /// Failure reason; omit when the rebuild succeeded
        #[arg(long)]
        failure: Option<String>,
    },
    /// Show recent operations
    Journal {
        #[arg(short = 'n', long, default_value_t = 20)]
        limit: usize,
    },
}

// ============ Config ============

#[derive(Debug, Deserialize)]
struct Config {
    #[serde(default)]
    api: ApiConfig,
}

#[derive(Debug, Deserialize, Default)]
struct ApiConfig {
    #[serde(default)]
    bind_address: Option<String>,
}

/// Work out the endpoint from the flag or the controller's config file
fn resolve_endpoint(cli: &Cli) -> String {
    if let Some(e) = &cli.endpoint {
        return e.clone();
    }

    let bind = std::fs::read_to_string(&cli.config)
        .ok()
        .and_then(|content| toml::from_str::<Config>(&content).ok())
        .and_then(|config| config.api.bind_address);

    match bind {
        Some(addr) if addr.starts_with("0.0.0.0") => format!(
            "http://127.0.0.1:{}",
            addr.rsplit(':').next().unwrap_or("9501")
        ),
        Some(addr) => format!("http://{}", addr),
        None => DEFAULT_ENDPOINT.to_string(),
    }
}

// ============ Main ============

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    let endpoint = resolve_endpoint(&cli);

    if let Err(e) = run(cli, &endpoint).await {
        eprintln!("Error: {:#}", e);
        std::process::exit(1);
    }
}

async fn run(cli: Cli, endpoint: &str) -> Result<()> {
    let client = ControllerClient::new(endpoint)
        .with_context(|| format!("cannot create client for {}", endpoint))?;

    match cli.command {
        Commands::Volume => show_volume(&client).await,
        Commands::Ls => list_replicas(&client).await,
        Commands::Add {
            address,
            replica_type,
        } => {
            let replica = client.create_replica(&address, replica_type).await?;
            println!("Added {} ({})", replica.address, replica.state);
            Ok(())
        }
        Commands::Rm { address } => {
            let replica = client.delete_replica(&address).await?;
            println!("Removed {} (was {})", replica.address, replica.state);
            Ok(())
        }
        Commands::Update { address, state } => {
            let replica = client.update_replica(&address, state).await?;
            print_replica_row(&replica);
            Ok(())
        }
        Commands::Start { replicas } => {
            let volume = client.start(replicas).await?;
            println!("Volume {} started at generation {} ({})", volume.name, volume.generation, volume.state);
            Ok(())
        }
        Commands::Snapshot { name } => {
            let id = client.snapshot(name.as_deref().unwrap_or("")).await?;
            println!("{}", id);
            Ok(())
        }
        Commands::Revert { name } => {
            let volume = client
                .revert_volume(&name)
                .await
                .with_context(|| format!("revert to {} failed", name))?;
            println!("Volume {} reverted to {} ({})", volume.name, name, volume.state);
            Ok(())
        }
        Commands::Register {
            address,
            revision,
            replica_type,
            state,
            up_time_secs,
        } => {
            let replica = client
                .register(Registration {
                    address,
                    revision_count: revision,
                    peer_details: PeerDetails::default(),
                    replica_type,
                    up_time: Duration::from_secs(up_time_secs),
                    state,
                })
                .await?;
            print_replica_row(&replica);
            Ok(())
        }
        Commands::PrepareRebuild { address } => {
            let descriptor = client.prepare_rebuild(&address).await?;
            println!("{}", serde_json::to_string_pretty(&descriptor)?);
            Ok(())
        }
        Commands::VerifyRebuild { address, failure } => {
            let replica = client.verify_rebuild_replica(&address, failure).await?;
            print_replica_row(&replica);
            Ok(())
        }
        Commands::Journal { limit } => show_journal(&client, limit).await,
    }
}

// ============ Commands ============

async fn show_volume(client: &ControllerClient) -> Result<()> {
    let volume = client.get_volume().await?;

    let state = format!("{:?}", volume.state);
    let state_colored = match state.as_str() {
        "Healthy" => format!("\x1b[32m{}\x1b[0m", state),
        "Degraded" | "Rebuilding" => format!("\x1b[33m{}\x1b[0m", state),
        _ => format!("\x1b[31m{}\x1b[0m", state),
    };

    println!();
    println!("WolfBlock Volume (wolfblockctl v{})", env!("CARGO_PKG_VERSION"));
    println!("========================================");
    println!();
    println!("Name:        {}", volume.name);
    println!("State:       {}", state_colored);
    println!("Generation:  {}", volume.generation);
    println!(
        "Quorum:      {}/{} ready ({})",
        volume.quorum.ready,
        volume.quorum.required,
        if volume.quorum.satisfied { "satisfied" } else { "NOT satisfied" }
    );
    println!("Replicas:    {}", volume.replicas.len());
    println!();

    if !volume.snapshots.is_empty() {
        println!("{:<38} {:<12} {:<25}", "SNAPSHOT", "GENERATION", "SOURCE");
        println!("{}", "-".repeat(75));
        for snap in &volume.snapshots {
            println!("{:<38} {:<12} {:<25}", snap.name, snap.generation, snap.source);
        }
        println!();
    }

    Ok(())
}

async fn list_replicas(client: &ControllerClient) -> Result<()> {
    let replicas = client.list_replicas().await?;

    println!();
    println!("{:<30} {:<11} {:<18} {:<10} {}", "ADDRESS", "TYPE", "STATE", "REVISION", "UPTIME");
    println!("{}", "-".repeat(80));
    for replica in &replicas {
        print_replica_row(replica);
    }
    println!();

    Ok(())
}

fn print_replica_row(replica: &ReplicaResource) {
    // Pad state to fixed width BEFORE adding color codes
    let state_padded = format!("{:<18}", replica.state.to_string());
    let state_colored = match replica.state {
        ReplicaState::Ready => format!("\x1b[32m{}\x1b[0m", state_padded),
        ReplicaState::Failed => format!("\x1b[31m{}\x1b[0m", state_padded),
        _ => format!("\x1b[33m{}\x1b[0m", state_padded),
    };

    println!(
        "{:<30} {:<11} {} {:<10} {}s",
        replica.address,
        replica.replica_type.to_string(),
        state_colored,
        replica.revision_count,
        replica.up_time_secs
    );
    if let Some(reason) = &replica.failure_reason {
        println!("    reason: {}", reason);
    }
}

async fn show_journal(client: &ControllerClient, limit: usize) -> Result<()> {
    let entries = client.list_journal(limit).await?;

    println!();
    println!("{:<6} {:<26} {:<16} {:<30} {}", "SEQ", "TIME", "OPERATION", "TARGET", "RESULT");
    println!("{}", "-".repeat(100));
    for entry in &entries {
        let result = match &entry.error {
            None => "\x1b[32mok\x1b[0m".to_string(),
            Some(e) => format!("\x1b[31m{}\x1b[0m", e),
        };
        println!(
            "{:<6} {:<26} {:<16} {:<30} {}",
            entry.seq,
            entry.at.format("%Y-%m-%d %H:%M:%S%.3f"),
            entry.kind.to_string(),
            entry.target,
            result
        );
    }
    println!();

    Ok(())
}
