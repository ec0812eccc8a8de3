//! ---
//! chroma_section: "05-networking-external-interfaces"
//! chroma_subsection: "binary"
//! chroma_type: "source"
//! chroma_scope: "code"
//! chroma_description: "Operator CLI driving a running bot backend."
//! chroma_version: "v0.0.0-prealpha"
//! chroma_owner: "tbd"
//! ---
use std::time::Duration;

use anyhow::{Context, Result};
use chroma_common::ClientConfig;
use chroma_core::{ControlClient, StartOutcome};
use clap::{Args, Subcommand};
use tracing::debug;

/// One-shot commands. Each builds a fresh client and tears it down on exit.
#[derive(Debug, Subcommand)]
pub enum ControlCommand {
    /// List the scripts that can be selected.
    Scripts(OutputOptions),
    /// Show the current parameter values, grouped by pair.
    Sliders(OutputOptions),
    /// Move one parameter and wait until the backend has it.
    Set(SetCommand),
    /// Select a script and start it.
    Start(StartCommand),
    /// Start the inspection target.
    Inspect(LifecycleOptions),
    /// Stop the running script.
    Stop(LifecycleOptions),
    /// Save a named colour, optionally with an RGB seed.
    Colour(ColourCommand),
}

#[derive(Debug, Args)]
pub struct OutputOptions {
    /// Print JSON instead of plain text.
    #[arg(long)]
    json: bool,
}

#[derive(Debug, Args)]
pub struct SetCommand {
    /// Parameter key, for example `hueMin`.
    key: String,
    /// Requested value. Clamped to the pair's range and ordering.
    #[arg(allow_negative_numbers = true)]
    value: i64,
}

#[derive(Debug, Args)]
pub struct LifecycleOptions {
    /// How long to wait for the backend's run state after connecting.
    #[arg(long = "settle-ms", value_name = "MILLIS", default_value_t = 750)]
    settle_ms: u64,
}

#[derive(Debug, Args)]
pub struct StartCommand {
    /// Script identifier as listed by `chromactl scripts`.
    script: String,
    #[command(flatten)]
    lifecycle: LifecycleOptions,
}

#[derive(Debug, Args)]
pub struct ColourCommand {
    /// Colour name; must not contain whitespace.
    name: String,
    /// Optional `R,G,B` seed, each channel in 0..=255.
    #[arg(long, value_delimiter = ',', allow_negative_numbers = true, value_name = "R,G,B")]
    rgb: Option<Vec<i64>>,
}

/// Execute a one-shot control command.
pub async fn run(command: ControlCommand, config: ClientConfig) -> Result<()> {
    let client = ControlClient::builder(config)
        .build()
        .context("failed to build control client")?;
    let result = execute(&client, command).await;
    client
        .shutdown()
        .await
        .context("failed to close telemetry streams")?;
    result
}

async fn execute(client: &ControlClient, command: ControlCommand) -> Result<()> {
    match command {
        ControlCommand::Scripts(output) => {
            let scripts = client
                .refresh_scripts()
                .await
                .context("failed to list scripts")?;
            if output.json {
                println!("{}", serde_json::to_string_pretty(&scripts)?);
            } else if scripts.is_empty() {
                println!("No selectable scripts");
            } else {
                for script in scripts {
                    println!("{script}");
                }
            }
        }
        ControlCommand::Sliders(output) => {
            let values = client
                .sync_parameters()
                .await
                .context("failed to read parameters")?;
            if output.json {
                println!("{}", serde_json::to_string_pretty(&values)?);
            } else {
                for (name, pair) in &client.config().parameters {
                    let min = values.get(&pair.min_key).copied().unwrap_or_default();
                    let max = values.get(&pair.max_key).copied().unwrap_or_default();
                    println!("{name:<6} {min:>4} .. {max:<4} (limit {})", pair.limit);
                }
            }
        }
        ControlCommand::Set(cmd) => {
            client
                .sync_parameters()
                .await
                .context("failed to read parameters")?;
            let update = client.set_parameter(&cmd.key, cmd.value)?;
            if update.slider_value != cmd.value {
                println!(
                    "{} adjusted to {} to keep its pair ordered",
                    update.slider_name, update.slider_value
                );
            }
            client.updates().wait_idle().await;
            println!("{} = {}", update.slider_name, update.slider_value);
        }
        ControlCommand::Start(cmd) => {
            connect_and_settle(client, &cmd.lifecycle).await?;
            client.select_script(&cmd.script).await?;
            report_start(client.start().await?);
        }
        ControlCommand::Inspect(options) => {
            connect_and_settle(client, &options).await?;
            report_start(client.inspect().await?);
        }
        ControlCommand::Stop(options) => {
            connect_and_settle(client, &options).await?;
            client.stop().await?;
            println!("Stop requested");
        }
        ControlCommand::Colour(cmd) => {
            client.submit_colour(&cmd.name, cmd.rgb.as_deref()).await?;
            println!("Colour '{}' saved", cmd.name.trim());
        }
    }
    Ok(())
}

/// Connect and give the state stream a moment to report a script that is
/// already running.
async fn connect_and_settle(client: &ControlClient, options: &LifecycleOptions) -> Result<()> {
    client
        .connect()
        .await
        .context("failed to connect telemetry streams")?;
    let mut run_state = client.watch_run_state();
    let settle = Duration::from_millis(options.settle_ms);
    match tokio::time::timeout(settle, run_state.wait_for(|state| state.is_running())).await {
        Ok(Ok(state)) => {
            let state = state.to_string();
            debug!(state = %state, "backend reports a running script");
        }
        Ok(Err(_)) | Err(_) => debug!("no running script reported"),
    }
    Ok(())
}

fn report_start(outcome: StartOutcome) {
    match outcome {
        StartOutcome::Reinitialize { target } => println!("Started {target}"),
    }
}
