//! fleetd: the fleetgrid daemon.
//!
//! Single binary that assembles every fleetgrid subsystem:
//! - State store (redb)
//! - Provider registry and queue counts
//! - Provisioner
//! - Fleet scanner
//! - Expiry sweeper
//! - Metrics (tracing log + Prometheus text file)
//!
//! # Usage
//!
//! ```text
//! fleetd init-config --data-dir /var/lib/fleetgrid
//! fleetd pool apply --id proj/builder --file builder.json
//! fleetd run --config fleetgrid.toml
//! ```

use std::path::{Path, PathBuf};

use anyhow::Context;
use chrono::Utc;
use clap::{Parser, Subcommand};
use tokio::sync::watch;
use tracing::{info, warn};

use fleetd::{Fleet, telemetry};
use fleetgrid_api::{ListOptions, PoolDefinition};
use fleetgrid_core::FleetConfig;

#[derive(Parser)]
#[command(name = "fleetd", about = "fleetgrid worker fleet daemon", version)]
struct Cli {
    /// Path to fleetgrid.toml.
    #[arg(short, long, global = true, default_value = "fleetgrid.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run every control loop until Ctrl-C.
    Run,
    /// Run one provisioning pass and exit.
    Provision,
    /// Run one scan and print the verdicts.
    Scan,
    /// Write a fleetgrid.toml scaffold.
    InitConfig {
        /// Data directory written into the scaffold.
        #[arg(long, default_value = "/var/lib/fleetgrid")]
        data_dir: PathBuf,
        /// Overwrite an existing file.
        #[arg(long)]
        force: bool,
    },
    /// Manage worker pools.
    Pool {
        #[command(subcommand)]
        action: PoolAction,
    },
    /// Ask whether a worker should shut down.
    Verdict {
        #[arg(long)]
        pool: String,
        #[arg(long)]
        group: String,
        #[arg(long)]
        worker: String,
    },
}

#[derive(Subcommand)]
enum PoolAction {
    /// Create or replace a pool from a JSON definition.
    Apply {
        #[arg(long)]
        id: String,
        #[arg(long)]
        file: PathBuf,
    },
    /// List pools as JSON.
    List,
    /// Switch a pool to the null provider.
    Delete {
        #[arg(long)]
        id: String,
    },
    /// Show a pool's capacity breakdown.
    Stats {
        #[arg(long)]
        id: String,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    if let Command::InitConfig { data_dir, force } = &cli.command {
        return init_config(&cli.config, data_dir, *force);
    }

    let config = load_config(&cli.config)?;
    telemetry::init(&config.daemon.log_level, config.daemon.log_format)?;
    let fleet = Fleet::open(config)?;

    match cli.command {
        Command::Run => run(fleet).await,
        Command::Provision => {
            let report = fleet.provisioner.provision_all(Utc::now()).await?;
            for pool in &report.pools {
                println!(
                    "{}: to_spawn={} requested={} failed={}",
                    pool.worker_pool_id,
                    pool.to_spawn,
                    pool.requested.len(),
                    pool.failed
                );
            }
            for (pool, error) in &report.failed {
                println!("{pool}: FAILED {error}");
            }
            Ok(())
        }
        Command::Scan => {
            let report = fleet.scanner.scan_all(Utc::now()).await?;
            for pool in &report.pools {
                println!("{} (target {})", pool.worker_pool_id, pool.target_capacity);
                for v in &pool.verdicts {
                    let action = if v.verdict.terminate { "terminate" } else { "keep" };
                    println!("  {}/{}: {action} ({})", v.worker_group, v.worker_id, v.verdict.reason);
                }
            }
            for (pool, error) in &report.failed {
                println!("{pool}: FAILED {error}");
            }
            for pool in &report.not_scanned {
                println!("{pool}: not scanned (deadline)");
            }
            Ok(())
        }
        Command::Pool { action } => pool_command(&fleet, action),
        Command::Verdict {
            pool,
            group,
            worker,
        } => {
            let advice = fleet.api.should_worker_terminate(&pool, &group, &worker)?;
            println!("{}", serde_json::to_string_pretty(&advice)?);
            Ok(())
        }
        Command::InitConfig { .. } => Ok(()),
    }
}

fn load_config(path: &Path) -> anyhow::Result<FleetConfig> {
    if path.exists() {
        Ok(FleetConfig::from_file(path)?)
    } else {
        eprintln!("{} not found, using defaults", path.display());
        Ok(FleetConfig::scaffold(Path::new("/var/lib/fleetgrid")))
    }
}

fn init_config(path: &Path, data_dir: &Path, force: bool) -> anyhow::Result<()> {
    if path.exists() && !force {
        anyhow::bail!("{} already exists (use --force to overwrite)", path.display());
    }
    let config = FleetConfig::scaffold(data_dir);
    std::fs::write(path, config.to_toml_string()?)
        .with_context(|| format!("writing {}", path.display()))?;
    println!("wrote {}", path.display());
    Ok(())
}

fn pool_command(fleet: &Fleet, action: PoolAction) -> anyhow::Result<()> {
    match action {
        PoolAction::Apply { id, file } => {
            let body = std::fs::read_to_string(&file)
                .with_context(|| format!("reading {}", file.display()))?;
            let definition: PoolDefinition = serde_json::from_str(&body)
                .with_context(|| format!("parsing {}", file.display()))?;
            let pool = match fleet.api.pool(&id) {
                Ok(_) => fleet.api.update_pool(&id, definition)?,
                Err(fleetgrid_api::ApiError::NotFound(_)) => fleet.api.create_pool(&id, definition)?,
                Err(e) => return Err(e.into()),
            };
            println!("{}", serde_json::to_string_pretty(&pool)?);
        }
        PoolAction::List => {
            let mut options = ListOptions::default();
            loop {
                let page = fleet.api.list_pools(&options)?;
                for pool in &page.items {
                    println!("{}", serde_json::to_string(pool)?);
                }
                match page.continuation {
                    Some(token) => options.continuation_token = Some(token),
                    None => break,
                }
            }
        }
        PoolAction::Delete { id } => {
            let pool = fleet.api.delete_pool(&id)?;
            println!("{} switched to {}", pool.worker_pool_id, pool.provider_id);
        }
        PoolAction::Stats { id } => {
            let stats = fleet.api.pool_stats(&id)?;
            println!("{}", serde_json::to_string_pretty(&stats)?);
        }
    }
    Ok(())
}

async fn run(fleet: Fleet) -> anyhow::Result<()> {
    info!(data_dir = ?fleet.config().daemon.data_dir, "fleetd starting");

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    tokio::spawn(async move {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!(error = %e, "failed to listen for Ctrl-C");
            return;
        }
        info!("shutdown signal received");
        let _ = shutdown_tx.send(true);
    });

    fleet.run(shutdown_rx).await?;
    info!("fleetd stopped");
    Ok(())
}
