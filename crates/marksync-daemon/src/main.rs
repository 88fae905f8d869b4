//! marksync: Cross-browser bookmark sync from the command line.
//!
//! Offline subcommands convert and compare bookmark documents, and `resolve`
//! settles two versions of one record under the replica's configured conflict
//! strategy. `sync` runs a
//! single cycle for one replica; `watch` keeps a replica in sync as its
//! bookmark file changes.

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use serde_json::Value;
use std::path::{Path, PathBuf};
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, warn};
use tracing_subscriber::EnvFilter;

use marksync_core::{ConflictStrategy, SyncOutcome};
use marksync_daemon::tools;
use marksync_daemon::{DaemonConfig, FileWatcher, Replica, ReplicaPaths, TreeFileEvent};

#[derive(Parser, Debug)]
#[command(name = "marksync")]
#[command(about = "Cross-browser bookmark sync")]
struct Args {
    /// Enable verbose logging
    #[arg(long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Print the checksum of a bookmark document
    Checksum { file: PathBuf },

    /// Print a browser tree as a flat item list
    Flatten { tree: PathBuf },

    /// Print a flat item list as a nested export
    Nest { items: PathBuf },

    /// Merge one document into another and print the result
    Merge { existing: PathBuf, incoming: PathBuf },

    /// Resolve two versions of one bookmark or folder record
    Resolve {
        local: PathBuf,
        remote: PathBuf,

        /// Directory holding the replica config that names the strategy
        #[arg(long, default_value = ".marksync")]
        state_dir: PathBuf,

        /// Override the configured strategy (e.g. local-wins, merge, manual)
        #[arg(long, value_parser = tools::parse_strategy)]
        strategy: Option<ConflictStrategy>,
    },

    /// Run one sync cycle
    Sync {
        #[command(flatten)]
        replica: ReplicaArgs,

        /// Sync even if nothing changed locally
        #[arg(long, conflicts_with_all = ["force_push", "force_pull"])]
        force: bool,

        /// Overwrite the shared record with the local bookmarks
        #[arg(long, conflicts_with = "force_pull")]
        force_push: bool,

        /// Overwrite the local bookmarks with the shared record
        #[arg(long)]
        force_pull: bool,
    },

    /// Keep a replica in sync until interrupted
    Watch {
        #[command(flatten)]
        replica: ReplicaArgs,
    },
}

#[derive(clap::Args, Debug)]
struct ReplicaArgs {
    /// Path to the JSON bookmark tree
    #[arg(short, long)]
    bookmarks: PathBuf,

    /// Shared directory all replicas sync through
    #[arg(short, long)]
    remote: PathBuf,

    /// Directory for this replica's state and config
    #[arg(long, default_value = ".marksync")]
    state_dir: PathBuf,
}

impl ReplicaArgs {
    fn paths(&self) -> ReplicaPaths {
        ReplicaPaths {
            bookmarks: self.bookmarks.clone(),
            remote: self.remote.clone(),
            state_dir: self.state_dir.clone(),
        }
    }
}

fn read_document(path: &Path) -> Result<Value> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read {:?}", path))?;
    serde_json::from_str(&content).with_context(|| format!("Failed to parse {:?}", path))
}

fn print_json(value: &Value) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

/// Log an outcome and turn failures into an error exit.
fn report(outcome: &SyncOutcome) -> Result<()> {
    match outcome {
        SyncOutcome::Synced(report) => {
            info!(
                "Synced: {} created, {} updated, {} deleted locally; {} added, {} updated remotely",
                report.created,
                report.updated,
                report.deleted,
                report.pushed_added,
                report.pushed_updated
            );
            Ok(())
        }
        SyncOutcome::UpToDate => {
            info!("Already up to date");
            Ok(())
        }
        SyncOutcome::AlreadyInProgress => {
            info!("A sync is already in progress");
            Ok(())
        }
        SyncOutcome::AuthRequired { message } => bail!("Authentication required: {}", message),
        SyncOutcome::Failed { message } => bail!("Sync failed: {}", message),
    }
}

fn run_resolve(
    local: &Path,
    remote: &Path,
    state_dir: &Path,
    strategy: Option<ConflictStrategy>,
) -> Result<()> {
    let mut config = DaemonConfig::load(state_dir)?;
    if let Some(strategy) = strategy {
        config.sync.conflict_strategy = strategy;
    }
    debug!("Resolving with {:?}", config.sync.conflict_strategy);
    print_json(&tools::resolve_documents(
        &read_document(local)?,
        &read_document(remote)?,
        &config.sync,
    )?)
}

async fn run_sync(args: &ReplicaArgs, force: bool, force_push: bool, force_pull: bool) -> Result<()> {
    let replica = Replica::open(&args.paths()).await?;
    let orchestrator = replica.orchestrator();
    let outcome = if force_push {
        orchestrator.force_push().await
    } else if force_pull {
        orchestrator.force_pull().await
    } else {
        orchestrator.sync(force).await
    };
    println!("{}", serde_json::to_string_pretty(&outcome)?);
    report(&outcome)
}

async fn run_watch(args: &ReplicaArgs) -> Result<()> {
    let replica = Replica::open(&args.paths()).await?;
    let mut watcher = FileWatcher::new(args.bookmarks.clone())?;
    info!("Watching {:?}", watcher.path());

    let mut interval = tokio::time::interval(replica.config().sync_interval());
    interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

    info!("Daemon running. Press Ctrl+C to stop.");

    loop {
        tokio::select! {
            Some(event) = watcher.event_rx().recv() => {
                match event {
                    TreeFileEvent::Modified => match replica.refresh().await {
                        Ok(0) => debug!("Bookmark file rewritten without changes"),
                        Ok(count) => info!("Picked up {} external change(s)", count),
                        Err(e) => warn!("Failed to refresh bookmarks: {:#}", e),
                    },
                    TreeFileEvent::Deleted => {
                        warn!("Bookmark file {:?} was removed", watcher.path());
                    }
                }
            }

            // First tick fires immediately, giving a startup sync
            _ = interval.tick() => {
                let outcome = replica.orchestrator().sync(true).await;
                if let Err(e) = report(&outcome) {
                    error!("{:#}", e);
                }
            }

            _ = tokio::signal::ctrl_c() => {
                info!("Shutdown signal received");
                break;
            }
        }
    }

    info!("Shutting down");
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Set up logging - respects RUST_LOG env var, defaults to info (or debug with --verbose)
    let default_filter = if args.verbose {
        "debug,marksync_core=debug,marksync_daemon=debug"
    } else {
        "info,marksync_core=info,marksync_daemon=info"
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    match &args.command {
        Command::Checksum { file } => {
            println!("{}", tools::checksum_document(&read_document(file)?));
            Ok(())
        }
        Command::Flatten { tree } => print_json(&tools::flatten_document(&read_document(tree)?)),
        Command::Nest { items } => print_json(&tools::nest_document(&read_document(items)?)),
        Command::Merge { existing, incoming } => print_json(&tools::merge_documents(
            &read_document(existing)?,
            &read_document(incoming)?,
        )),
        Command::Resolve {
            local,
            remote,
            state_dir,
            strategy,
        } => run_resolve(local, remote, state_dir, *strategy),
        Command::Sync {
            replica,
            force,
            force_push,
            force_pull,
        } => run_sync(replica, *force, *force_push, *force_pull).await,
        Command::Watch { replica } => run_watch(replica).await,
    }
}
