//! Sumi-Paths main entry point
//!
//! This is the command-line interface for the Sumi-Paths linked-data crawler.

use anyhow::{bail, Context};
use chrono::Utc;
use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use sumi_paths::config::{load_config_with_hash, load_process_definition, load_step_definition, Config};
use sumi_paths::crawler::DomainGate;
use sumi_paths::jobs::JobIdMinter;
use sumi_paths::output::{load_statistics, print_statistics};
use sumi_paths::process::{LogNotifier, ProcessController};
use sumi_paths::storage::{self, open_storage, ProcessStore};
use tracing_subscriber::EnvFilter;

/// Sumi-Paths: a polite linked-data path crawler
///
/// Sumi-Paths crawls RDF documents across many domains while respecting
/// robots.txt and per-domain crawl delays, and grows bounded paths of
/// connected resources outward from seed URLs.
#[derive(Parser, Debug)]
#[command(name = "sumi-paths")]
#[command(version = "1.0.0")]
#[command(about = "A polite linked-data path crawler", long_about = None)]
struct Cli {
    /// Path to TOML configuration file
    #[arg(value_name = "CONFIG")]
    config: PathBuf,

    /// Increase logging verbosity (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    /// Suppress non-error output
    #[arg(short, long, conflicts_with = "verbose", global = true)]
    quiet: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run the manager and local workers until interrupted
    Run {
        /// Stop once no process is left to work on
        #[arg(long)]
        exit_when_idle: bool,
    },

    /// Queue a new process from a process definition file
    AddProcess {
        #[arg(value_name = "DEFINITION")]
        definition: PathBuf,
    },

    /// Append a step with new limits to a process
    AddStep {
        #[arg(value_name = "PID")]
        pid: i64,

        #[arg(value_name = "STEP")]
        step: PathBuf,
    },

    /// Show statistics of one or all processes
    Stats {
        #[arg(value_name = "PID")]
        pid: Option<i64>,
    },

    /// Forget the robots policy and error state of a domain
    ResetDomain {
        #[arg(value_name = "ORIGIN")]
        origin: String,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Setup logging based on verbosity
    setup_logging(cli.verbose, cli.quiet);

    // Load and validate configuration
    tracing::info!("Loading configuration from: {}", cli.config.display());
    let (config, config_hash) = load_config_with_hash(&cli.config)
        .with_context(|| format!("failed to load {}", cli.config.display()))?;
    tracing::info!("Configuration loaded successfully (hash: {})", config_hash);

    match cli.command {
        Command::Run { exit_when_idle } => handle_run(config, exit_when_idle).await,
        Command::AddProcess { definition } => handle_add_process(&config, &definition),
        Command::AddStep { pid, step } => handle_add_step(&config, pid, &step),
        Command::Stats { pid } => handle_stats(&config, pid),
        Command::ResetDomain { origin } => handle_reset_domain(&config, &origin),
    }
}

/// Sets up the logging/tracing subscriber based on verbosity level
fn setup_logging(verbose: u8, quiet: bool) {
    let filter = if quiet {
        // Only show errors
        EnvFilter::new("error")
    } else {
        match verbose {
            0 => EnvFilter::new("sumi_paths=info,warn"),
            1 => EnvFilter::new("sumi_paths=debug,info"),
            2 => EnvFilter::new("sumi_paths=trace,debug"),
            _ => EnvFilter::new("trace"),
        }
    };

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_thread_ids(false)
        .with_file(false)
        .init();
}

fn open_shared(config: &Config) -> anyhow::Result<storage::SharedStorage> {
    let path = Path::new(&config.storage.database_path);
    let storage = open_storage(path)
        .with_context(|| format!("failed to open database {}", path.display()))?;
    Ok(storage::shared(storage))
}

/// Handles the `run` command: manager plus local workers until Ctrl-C
async fn handle_run(config: Config, exit_when_idle: bool) -> anyhow::Result<()> {
    let storage = open_shared(&config)?;

    let shutdown = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!("Failed to listen for Ctrl-C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    match sumi_paths::crawler::run(config, storage, shutdown, exit_when_idle).await {
        Ok(()) => {
            tracing::info!("Manager stopped");
            Ok(())
        }
        Err(e) => {
            tracing::error!("Manager failed: {}", e);
            Err(e.into())
        }
    }
}

/// Handles the `add-process` command
fn handle_add_process(config: &Config, definition: &Path) -> anyhow::Result<()> {
    let definition = load_process_definition(definition)
        .with_context(|| format!("failed to load {}", definition.display()))?;
    let controller = ProcessController::new(open_shared(config)?, Box::new(LogNotifier));
    let pid = controller.create_process(&definition)?;
    println!("Queued process {}", pid);
    Ok(())
}

/// Handles the `add-step` command
fn handle_add_step(config: &Config, pid: i64, step: &Path) -> anyhow::Result<()> {
    let step = load_step_definition(step)
        .with_context(|| format!("failed to load {}", step.display()))?;
    let controller = ProcessController::new(open_shared(config)?, Box::new(LogNotifier));
    let index = controller.add_step(pid, &step)?;
    println!("Process {} now uses step {}", pid, index);
    Ok(())
}

/// Handles the `stats` command: shows statistics from the database
fn handle_stats(config: &Config, pid: Option<i64>) -> anyhow::Result<()> {
    println!("Database: {}\n", config.storage.database_path);
    let storage = open_storage(Path::new(&config.storage.database_path))?;

    let processes = match pid {
        Some(pid) => match storage.get_process(pid)? {
            Some(process) => vec![process],
            None => bail!("process {} not found", pid),
        },
        None => storage.list_processes()?,
    };

    if processes.is_empty() {
        println!("No processes");
    }
    for process in &processes {
        let stats = load_statistics(&storage, process)?;
        print_statistics(&stats);
        println!();
    }
    Ok(())
}

/// Handles the `reset-domain` command
fn handle_reset_domain(config: &Config, origin: &str) -> anyhow::Result<()> {
    let mut storage = open_storage(Path::new(&config.storage.database_path))?;
    let gate = DomainGate::new(
        config.politeness.clone(),
        config.user_agent.crawler_name.clone(),
        std::sync::Arc::new(JobIdMinter::starting_after(0)),
    );

    if !gate.reset_domain(&mut storage, origin, Utc::now())? {
        bail!("unknown domain {}", origin);
    }
    println!("Domain {} reset", origin);
    Ok(())
}
