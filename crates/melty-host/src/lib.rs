//! Host wiring.
//!
//! Builds an [`Engine`] from config and serves the RPC bridge over a single
//! transport. The responder and the notifier share that transport, so a
//! handler's pushes always enter the outbound stream before its result.

pub mod config;
pub mod dispatch;
pub mod sink;

pub use config::HostConfig;
pub use dispatch::HostHandler;
pub use sink::NotifierSink;

use std::sync::Arc;

use tokio_util::sync::CancellationToken;

use melty_kernel::{Engine, EventSink, Git, LlmProvider, TaskStore, Workspace};
use melty_rpc::{Notifier, Responder, Transport};

/// Assemble the engine a host serves: store, workspace, repository (when
/// one exists at the workspace root), provider, sink.
pub fn build_engine(
    config: &HostConfig,
    provider: Arc<dyn LlmProvider>,
    sink: Arc<dyn EventSink>,
) -> anyhow::Result<Engine> {
    let store = match &config.store_path {
        Some(path) => {
            if let Some(parent) = path.parent() {
                std::fs::create_dir_all(parent)?;
            }
            TaskStore::open(path)?
        }
        None => TaskStore::in_memory()?,
    };

    let workspace = Workspace::new(config.workspace.clone());
    let git = match Git::open(config.workspace.clone(), config.remote.clone()) {
        Ok(git) => {
            tracing::info!(root = %config.workspace.display(), "opened git repository");
            Some(git)
        }
        Err(err) => {
            tracing::warn!(error = %err, "workspace has no usable git repository");
            None
        }
    };

    let engine = Engine::new(store, workspace, git, provider, sink)?
        .with_branch_prefix(config.branch_prefix.clone());
    Ok(engine)
}

/// Serve the bridge over `transport` until it closes or `shutdown` fires.
pub async fn serve(
    config: HostConfig,
    provider: Arc<dyn LlmProvider>,
    transport: Arc<dyn Transport>,
    shutdown: CancellationToken,
) -> anyhow::Result<()> {
    let notifier = Arc::new(Notifier::new());
    notifier.attach(Arc::clone(&transport));

    let sink: Arc<dyn EventSink> = Arc::new(NotifierSink::new(Arc::clone(&notifier)));
    let engine = Arc::new(build_engine(&config, provider, sink)?);
    let handler = Arc::new(HostHandler::new(engine, &config));

    Responder::new(transport, handler).serve(shutdown).await;
    Ok(())
}
