//! Operator CLI over a SQLite-backed coordinator.
//!
//! Usage:
//!   branchguard --db locks.db locks list --branch main
//!   branchguard --db locks.db branch recover main --by ops --reason "index rebuilt"
//!   branchguard --config branchguard.yaml serve < events.ndjson

use anyhow::{Context, Result};
use branchguard_coordinator::{Coordinator, CoordinatorConfig};
use clap::{Parser, Subcommand};
use serde::Serialize;
use std::path::PathBuf;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{info, warn};
use tracing_subscriber::filter::Directive;
use tracing_subscriber::EnvFilter;
use uuid::Uuid;

#[derive(Parser, Debug)]
#[command(name = "branchguard", version, about = "Branch lock and shadow index coordination")]
struct Cli {
    /// YAML configuration file (defaults apply when omitted)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// SQLite database holding locks, branch state and shadow builds
    #[arg(long, global = true, default_value = "branchguard.db")]
    db: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Inspect and administer locks
    Locks {
        #[command(subcommand)]
        command: LockCommands,
    },
    /// Inspect and repair branch state
    Branch {
        #[command(subcommand)]
        command: BranchCommands,
    },
    /// Inspect shadow builds
    Shadow {
        #[command(subcommand)]
        command: ShadowCommands,
    },
    /// Run one TTL, heartbeat and shadow monitor pass
    Sweep,
    /// Run background tasks and consume NDJSON indexing events from stdin
    Serve,
}

#[derive(Subcommand, Debug)]
enum LockCommands {
    List {
        #[arg(long)]
        branch: Option<String>,
    },
    Release {
        lock_id: Uuid,
        #[arg(long)]
        by: String,
    },
    ForceUnlock {
        branch: String,
        #[arg(long)]
        by: String,
        #[arg(long)]
        reason: String,
    },
    Extend {
        lock_id: Uuid,
        #[arg(long)]
        seconds: i64,
        #[arg(long)]
        by: String,
        #[arg(long, default_value = "")]
        reason: String,
    },
    Health,
}

#[derive(Subcommand, Debug)]
enum BranchCommands {
    Status { branch: String },
    List,
    Recover {
        branch: String,
        #[arg(long)]
        by: String,
        #[arg(long)]
        reason: String,
    },
}

#[derive(Subcommand, Debug)]
enum ShadowCommands {
    List {
        #[arg(long)]
        branch: Option<String>,
    },
    Status { shadow_index_id: Uuid },
    Cancel {
        shadow_index_id: Uuid,
        #[arg(long)]
        by: String,
        #[arg(long)]
        reason: String,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive("branchguard=info".parse::<Directive>()?))
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let config = match &cli.config {
        Some(path) => CoordinatorConfig::from_yaml(path)
            .with_context(|| format!("loading {}", path.display()))?,
        None => CoordinatorConfig::default(),
    };
    let coordinator = Coordinator::open_sqlite(config, &cli.db)
        .with_context(|| format!("opening {}", cli.db.display()))?;

    match cli.command {
        Commands::Locks { command } => run_locks(&coordinator, command).await,
        Commands::Branch { command } => run_branch(&coordinator, command).await,
        Commands::Shadow { command } => run_shadow(&coordinator, command).await,
        Commands::Sweep => {
            let locks = coordinator.locks().run_sweeps().await?;
            let shadows = coordinator.shadows().monitor_sweep().await?;
            print_json(&serde_json::json!({ "locks": locks, "shadows": shadows }))
        }
        Commands::Serve => serve(&coordinator).await,
    }
}

async fn run_locks(coordinator: &Coordinator, command: LockCommands) -> Result<()> {
    let locks = coordinator.locks();
    match command {
        LockCommands::List { branch } => print_json(&locks.list_active_locks(branch.as_deref()).await?),
        LockCommands::Release { lock_id, by } => {
            print_json(&serde_json::json!({ "released": locks.release_lock(lock_id, &by).await? }))
        }
        LockCommands::ForceUnlock { branch, by, reason } => print_json(
            &serde_json::json!({ "released": locks.force_unlock(&branch, &by, &reason).await? }),
        ),
        LockCommands::Extend {
            lock_id,
            seconds,
            by,
            reason,
        } => {
            let extended = locks
                .extend_lock_ttl(lock_id, chrono::Duration::seconds(seconds), &by, &reason)
                .await?;
            print_json(&serde_json::json!({
                "extended": extended,
                "lock": locks.get_lock_status(lock_id).await?,
            }))
        }
        LockCommands::Health => print_json(&locks.health_report().await?),
    }
}

async fn run_branch(coordinator: &Coordinator, command: BranchCommands) -> Result<()> {
    let locks = coordinator.locks();
    match command {
        BranchCommands::Status { branch } => print_json(&locks.get_branch_state(&branch).await?),
        BranchCommands::List => print_json(&locks.list_branch_states().await?),
        BranchCommands::Recover { branch, by, reason } => {
            print_json(&locks.recover_branch(&branch, &by, &reason).await?)
        }
    }
}

async fn run_shadow(coordinator: &Coordinator, command: ShadowCommands) -> Result<()> {
    let shadows = coordinator.shadows();
    match command {
        ShadowCommands::List { branch } => print_json(&shadows.list_active_shadows(branch.as_deref()).await?),
        ShadowCommands::Status { shadow_index_id } => {
            print_json(&shadows.get_shadow_status(shadow_index_id).await?)
        }
        ShadowCommands::Cancel {
            shadow_index_id,
            by,
            reason,
        } => print_json(&serde_json::json!({
            "cancelled": shadows.cancel_shadow_build(shadow_index_id, &by, &reason).await?
        })),
    }
}

async fn serve(coordinator: &Coordinator) -> Result<()> {
    coordinator.start();
    info!("Reading indexing events from stdin");

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                info!("Interrupted");
                break;
            }
            line = lines.next_line() => {
                let Some(line) = line? else {
                    info!("stdin closed; background tasks run until interrupted");
                    tokio::signal::ctrl_c().await?;
                    break;
                };
                if line.trim().is_empty() {
                    continue;
                }
                match serde_json::from_str::<serde_json::Value>(&line) {
                    Ok(payload) => {
                        let handled = coordinator.events().handle_raw(&payload).await;
                        println!("{}", serde_json::json!({ "handled": handled }));
                    }
                    Err(e) => warn!("Skipping non-JSON line: {}", e),
                }
            }
        }
    }

    coordinator.shutdown().await;
    Ok(())
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}
