//! `chorus` — the voice agent server binary.

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tracing::info;

use chorus_core::PlatformConfig;

#[derive(Parser)]
#[command(name = "chorus", version, about = "Real-time voice agent server")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run the server.
    Serve {
        /// Listen port (overrides CHORUS_PORT).
        #[arg(long)]
        port: Option<u16>,

        /// Worker source for single-agent mode, served on `/session`.
        /// Without it only deployed slugs are routable.
        #[arg(long, value_name = "WORKER_JS")]
        agent: Option<PathBuf>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    // `.env` is optional; the environment always wins.
    let _ = dotenvy::dotenv();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "chorus=info,tower_http=warn".into()),
        )
        .init();

    let cli = Cli::parse();
    match cli.command {
        Command::Serve { port, agent } => serve(port, agent).await,
    }
}

async fn serve(port: Option<u16>, agent: Option<PathBuf>) -> Result<()> {
    let mut config = PlatformConfig::from_env().context("loading configuration")?;
    if let Some(port) = port {
        config.port = port;
    }

    let default_worker = match agent {
        Some(path) => Some(
            std::fs::read_to_string(&path)
                .with_context(|| format!("reading worker source {}", path.display()))?,
        ),
        None => None,
    };

    let state = chorus_server::build_context(config, default_worker).await?;
    let handle = chorus_server::serve(state).await?;
    info!(addr = %handle.addr, "chorus is up");

    handle.task.await?.context("server terminated")?;
    Ok(())
}
