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
use chroma_core::{ClientEvent, ControlClient};
use chroma_msg::LogLevel;
use clap::Args;
use tokio::sync::broadcast::error::RecvError;
use tracing::{info, warn};

#[derive(Debug, Args)]
pub struct WatchCommand {
    /// Stop after this many seconds instead of waiting for Ctrl-C.
    #[arg(long, value_name = "SECS")]
    duration: Option<u64>,

    /// Only print log lines at WARN or above.
    #[arg(long)]
    quiet: bool,
}

/// Connect every stream and print telemetry as it arrives.
pub async fn run(command: WatchCommand, config: ClientConfig) -> Result<()> {
    let client = ControlClient::builder(config)
        .build()
        .context("failed to build control client")?;
    let mut events = client.subscribe();
    client
        .connect()
        .await
        .context("failed to connect telemetry streams")?;
    for (topic, state) in client.channel_states().await {
        info!(topic = %topic, url = %state.url, "stream registered");
    }

    let deadline = async {
        match command.duration {
            Some(secs) => tokio::time::sleep(Duration::from_secs(secs)).await,
            None => std::future::pending().await,
        }
    };
    tokio::pin!(deadline);

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                info!("interrupted");
                break;
            }
            _ = &mut deadline => break,
            event = events.recv() => match event {
                Ok(event) => print_event(&event, command.quiet),
                Err(RecvError::Lagged(skipped)) => {
                    warn!(skipped, "terminal fell behind; events dropped");
                }
                Err(RecvError::Closed) => break,
            },
        }
    }

    client
        .shutdown()
        .await
        .context("failed to close telemetry streams")?;
    Ok(())
}

fn print_event(event: &ClientEvent, quiet: bool) {
    match event {
        ClientEvent::Log(entry) => {
            let loud = matches!(entry.level, LogLevel::Warn | LogLevel::Error);
            if loud || !quiet {
                println!("{}", entry.text);
            }
        }
        ClientEvent::Stats(stats) if !quiet => println!(
            "stats: {} elapsed, {} cycles, {} inputs, {} objects",
            stats.elapsed, stats.cycles, stats.input_count, stats.object_count
        ),
        ClientEvent::Semantic(state) if !quiet => {
            println!("state: {} ({:?})", state.label, state.tone())
        }
        ClientEvent::Frame { first: true } => println!("viewport: first frame received"),
        ClientEvent::RunState(state) => println!("run state: {state}"),
        ClientEvent::Reinitialized => println!("client reinitialized"),
        _ => {}
    }
}
