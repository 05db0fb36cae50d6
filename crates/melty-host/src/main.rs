//! Melty host binary.
//!
//! Serves the task engine over newline-delimited JSON on stdio. The editor
//! spawns this process, writes requests to its stdin, and reads results and
//! pushes from its stdout. Logs go to stderr.
//!
//! Usage:
//!   # Serve the current directory
//!   melty-host
//!
//!   # Explicit workspace and config
//!   melty-host --workspace ~/src/project --config ~/.config/melty/config.toml

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Result;
use clap::Parser;
use tokio::io::BufReader;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::{EnvFilter, fmt};

use melty_host::HostConfig;
use melty_kernel::ScriptedProvider;
use melty_rpc::LineTransport;

/// Editor-side host for the melty task engine.
#[derive(Parser, Debug)]
#[command(name = "melty-host")]
#[command(about = "Serves the melty task engine over stdio")]
struct Args {
    /// Config file path (defaults to the platform config dir)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Workspace root to operate on
    #[arg(short, long)]
    workspace: Option<PathBuf>,

    /// Keep tasks in memory instead of the on-disk store
    #[arg(long)]
    ephemeral: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    // Tracing goes to stderr; stdout carries the protocol.
    fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive(tracing::Level::INFO.into()))
        .with_writer(std::io::stderr)
        .with_ansi(false)
        .init();

    let args = Args::parse();

    let mut config = HostConfig::load(args.config.as_deref())?;
    if let Some(workspace) = args.workspace {
        config.workspace = workspace;
    }
    if args.ephemeral {
        config.store_path = None;
    } else if config.store_path.is_none() {
        config.store_path = Some(HostConfig::default_store_path());
    }

    tracing::info!(workspace = %config.workspace.display(), "melty host starting");

    let transport = LineTransport::spawn(BufReader::new(tokio::io::stdin()), tokio::io::stdout());
    let shutdown = CancellationToken::new();

    melty_host::serve(
        config,
        Arc::new(ScriptedProvider::echoing()),
        transport,
        shutdown,
    )
    .await?;

    tracing::info!("melty host shutting down");
    Ok(())
}
