//! Daemon modes.
//!
//! - `master`: store + master API.
//! - `standalone`: the same, plus one agent per configured host sharing
//!   the embedded store and a local process driver.

use std::sync::Arc;

use armada_agent::{Agent, AgentConfig, ProcessDriver, RuntimeDriver};
use armada_core::config::StoreConfig;
use armada_core::time::epoch_millis;
use armada_core::{DaemonConfig, MasterInfo};
use armada_master::MasterModel;
use armada_store::{CoordStore, Session};
use tokio::net::TcpListener;
use tokio::sync::watch;
use tracing::{error, info, warn};

/// Open the on-disk store, or an in-memory one when no data dir is set.
pub fn open_store(config: &StoreConfig) -> anyhow::Result<CoordStore> {
    match config.db_path() {
        Some(path) => {
            if let Some(dir) = path.parent() {
                std::fs::create_dir_all(dir)?;
            }
            let store = CoordStore::open(&path)?;
            info!(path = ?path, "coordination store opened");
            Ok(store)
        }
        None => {
            warn!("no data dir configured, state will not survive a restart");
            Ok(CoordStore::open_in_memory()?)
        }
    }
}

/// Publish this master's presence under the listener's address.
pub fn register_master(
    model: &MasterModel,
    listener: &TcpListener,
    id: String,
) -> anyhow::Result<Session> {
    let info = MasterInfo {
        id,
        address: listener.local_addr()?.to_string(),
        started_at: epoch_millis(),
    };
    Ok(model.register_master(&info)?)
}

/// Serve the master API until `shutdown` changes or its sender is dropped.
pub async fn serve(
    model: MasterModel,
    listener: TcpListener,
    mut shutdown: watch::Receiver<bool>,
) -> anyhow::Result<()> {
    let addr = listener.local_addr()?;
    let router = armada_api::build_router(model);
    info!(%addr, "master API listening");

    axum::serve(listener, router)
        .with_graceful_shutdown(async move {
            let _ = shutdown.changed().await;
        })
        .await?;
    Ok(())
}

/// Flip `tx` on Ctrl-C.
pub fn shutdown_on_ctrl_c(tx: watch::Sender<bool>) {
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => {
                info!("shutdown signal received");
                let _ = tx.send(true);
            }
            // Without a handler the daemon runs until killed.
            Err(e) => error!(error = %e, "failed to install Ctrl-C handler"),
        }
    });
}

pub async fn run_master(config: DaemonConfig) -> anyhow::Result<()> {
    info!("Armada daemon starting in master mode");
    let model = MasterModel::new(open_store(&config.store)?);
    let listener = TcpListener::bind(&config.master.bind).await?;
    let session = register_master(&model, &listener, config.master.master_id())?;

    let (tx, rx) = watch::channel(false);
    shutdown_on_ctrl_c(tx);
    serve(model, listener, rx).await?;

    session.close()?;
    info!("Armada daemon stopped");
    Ok(())
}

pub async fn run_standalone(config: DaemonConfig) -> anyhow::Result<()> {
    info!(hosts = ?config.agent.hosts, "Armada daemon starting in standalone mode");
    let store = open_store(&config.store)?;
    let model = MasterModel::new(store.clone());
    let (tx, rx) = watch::channel(false);

    if config.agent.hosts.is_empty() {
        warn!("no agent hosts configured, running master only");
    }
    let driver: Arc<dyn RuntimeDriver> = Arc::new(ProcessDriver::new());
    let agents: Vec<_> = config
        .agent
        .hosts
        .iter()
        .map(|host| {
            let agent = Agent::new(
                AgentConfig::from_section(host, &config.agent),
                store.clone(),
                Arc::clone(&driver),
            );
            (host.clone(), tokio::spawn(agent.run(rx.clone())))
        })
        .collect();

    let listener = TcpListener::bind(&config.master.bind).await?;
    let session = register_master(&model, &listener, config.master.master_id())?;
    shutdown_on_ctrl_c(tx);
    serve(model, listener, rx).await?;

    for (host, handle) in agents {
        match handle.await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => error!(%host, error = %e, "agent failed"),
            Err(e) => error!(%host, error = %e, "agent task panicked"),
        }
    }
    session.close()?;
    info!("Armada daemon stopped");
    Ok(())
}
