//! Label Agent CLI Entry Point
//!
//! This is the main entry point for the Label Agent binary.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{info, warn};

use label_agent::agent::labels::LabelSet;
use label_agent::agent::restart::Relauncher;
use label_agent::agent::watcher::LabelFileWatcher;
use label_agent::cli::config::Config;
use label_agent::cli::logging;
use label_agent::controller::client::{ControllerConnector, HttpConnector, LabelSession};

#[derive(Parser)]
#[command(name = "label-agent")]
#[command(author, version, about = "Label Agent - keeps agent labels in sync with a label file")]
struct Cli {
    /// Path to configuration file
    #[arg(short, long, default_value = "config/agent.toml")]
    config: PathBuf,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Push the label file and watch it for changes
    Start {
        /// Label file to watch (overrides the config file)
        #[arg(short, long)]
        labels_file: Option<PathBuf>,

        /// Agent name known to the controller (overrides the config file)
        #[arg(short, long)]
        name: Option<String>,
    },
    /// Show the label file next to the controller's view of this agent
    Labels {
        /// Agent name known to the controller (overrides the config file)
        #[arg(short, long)]
        name: Option<String>,
    },
    /// Show version information
    Version,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Start { labels_file, name } => {
            let config = load_config(&cli.config, labels_file, name)?;
            logging::init(&config.logging, cli.verbose)?;
            start_agent(config).await?;
        }
        Commands::Labels { name } => {
            let config = load_config(&cli.config, None, name)?;
            logging::init(&config.logging, cli.verbose)?;
            show_labels(&config).await?;
        }
        Commands::Version => {
            show_version();
        }
    }

    Ok(())
}

fn load_config(
    path: &Path,
    labels_file: Option<PathBuf>,
    name: Option<String>,
) -> Result<Config> {
    let mut config = Config::load(path)?;
    if let Some(labels_file) = labels_file {
        config.labels_file = labels_file;
    }
    if let Some(name) = name {
        config.agent_name = name;
    }
    config.validate()?;
    Ok(config)
}

async fn start_agent(config: Config) -> Result<()> {
    info!(
        agent = %config.agent_name,
        url = %config.controller.url,
        "Starting Label Agent..."
    );

    let connector: Arc<dyn ControllerConnector> =
        Arc::new(HttpConnector::new(config.controller.clone()));

    let mut watcher =
        LabelFileWatcher::new(&config, connector, Relauncher::for_current_process())
            .context("Failed to initialize label file watcher")?;

    if config.watcher.sync_on_startup {
        let outcome = watcher.push_known_labels().await;
        if !outcome.is_success() {
            warn!(%outcome, "Initial label push failed; watching for changes anyway");
        }
    }

    let handle = watcher.handle();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("Shutdown signal received");
            handle.shutdown();
        }
    });

    watcher.run().await;

    // A hard restart has already spawned our replacement, so vacate
    warn!("Label file watcher stopped. Shutting down this agent instance.");
    std::process::exit(0);
}

async fn show_labels(config: &Config) -> Result<()> {
    println!("Agent: {}", config.agent_name);

    match LabelSet::read(&config.labels_file).await {
        Ok(labels) => println!(
            "  Label file ({}): {}",
            config.labels_file.display(),
            labels.tokens().collect::<Vec<_>>().join(" ")
        ),
        Err(e) => println!(
            "  Label file ({}): unreadable - {}",
            config.labels_file.display(),
            e
        ),
    }

    let connector = HttpConnector::new(config.controller.clone());
    let mut session = connector
        .session()
        .context("Failed to create controller session")?;
    match session.get_labels(&config.agent_name).await {
        Ok(labels) => println!("  Controller ({}): {}", connector.url(), labels.trim()),
        Err(e) => println!("  Controller ({}): error - {}", connector.url(), e),
    }

    Ok(())
}

fn show_version() {
    println!("label-agent {}", env!("CARGO_PKG_VERSION"));
    println!("Keeps agent labels in sync with a label file");
    println!();
    println!("Features:");
    println!("  - Label file polling");
    println!("  - Soft label updates through the controller API");
    println!("  - Self-relaunch when a soft update fails");
}
