//! ---
//! chroma_section: "05-networking-external-interfaces"
//! chroma_subsection: "binary"
//! chroma_type: "source"
//! chroma_scope: "code"
//! chroma_description: "Operator CLI driving a running bot backend."
//! chroma_version: "v0.0.0-prealpha"
//! chroma_owner: "tbd"
//! ---
use std::path::PathBuf;

use anyhow::{Context, Result};
use chroma_common::{init_tracing, ClientConfig};
use chroma_logging as logging;
use clap::{Args, Parser, Subcommand};

mod control;
mod watch;

const DEFAULT_CONFIG_CANDIDATES: [&str; 2] = ["configs/chroma.toml", "chroma.toml"];

#[derive(Debug, Parser)]
#[command(
    author,
    version,
    about = "Control a running colour-detection bot backend",
    long_about = None
)]
struct Cli {
    #[command(flatten)]
    global: GlobalOptions,
    #[command(subcommand)]
    command: Commands,
}

/// Options shared by every subcommand.
#[derive(Debug, Args)]
pub struct GlobalOptions {
    /// Configuration file (falls back to CHROMA_CONFIG, then configs/chroma.toml).
    #[arg(long, global = true, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Override the backend base URL from configuration.
    #[arg(long, global = true, value_name = "URL", env = "CHROMA_BACKEND")]
    backend: Option<String>,

    /// Also write rolling log files to the configured logging directory.
    #[arg(long = "persist-logs", global = true)]
    persist_logs: bool,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Stream telemetry until interrupted.
    Watch(watch::WatchCommand),
    #[command(flatten)]
    Control(control::ControlCommand),
}

fn load_config(options: &GlobalOptions) -> Result<ClientConfig> {
    let mut candidates = Vec::new();
    if let Some(path) = &options.config {
        candidates.push(path.clone());
    }
    candidates.extend(DEFAULT_CONFIG_CANDIDATES.iter().map(PathBuf::from));

    let mut config = if options.config.is_some() {
        ClientConfig::load(&candidates)?
    } else {
        ClientConfig::load_or_default(&candidates)?.config
    };
    if let Some(base_url) = &options.backend {
        config.backend.base_url = base_url.clone();
        config
            .validate()
            .context("backend override produced an invalid configuration")?;
    }
    Ok(config)
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    let config = load_config(&cli.global)?;
    if cli.global.persist_logs {
        init_tracing("chromactl", &config.logging)?;
    } else {
        logging::init();
    }

    let runtime = tokio::runtime::Runtime::new().context("failed to start async runtime")?;
    match cli.command {
        Commands::Watch(cmd) => runtime.block_on(watch::run(cmd, config)),
        Commands::Control(cmd) => runtime.block_on(control::run(cmd, config)),
    }
}
