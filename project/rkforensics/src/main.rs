use anyhow::Context;
use clap::Parser;
use common::{NamespacedName, PodCheckpoint};
use log::info;
use rkforensics::api::scheme::Scheme;
use rkforensics::api::store::ObjectStoreExt;
use rkforensics::api::xlinestore::{XlineOptions, XlineStore};
use rkforensics::cli::{Cli, Commands};
use rkforensics::controllers::{ControllerManager, PodCheckpointController};
use rkforensics::protocol::config::{Config, load_config};
use std::path::Path;
use std::sync::Arc;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    env_logger::init();

    match &cli.command {
        Commands::Start { config } => handle_start_command(config).await,
        Commands::Reconcile { config, key } => handle_reconcile_command(config, key).await,
        Commands::Delete { config, key } => handle_delete_command(config, key).await,
    }
}

async fn connect(config: &Path) -> anyhow::Result<(Config, Arc<Scheme>, Arc<XlineStore>)> {
    let cfg = load_config(config)?;
    let scheme = Arc::new(Scheme::with_defaults());
    let store = XlineStore::new(XlineOptions::from_config(&cfg.xline_config), scheme.clone())
        .await
        .with_context(|| format!("failed to connect to {:?}", cfg.xline_config.endpoints))?;
    Ok((cfg, scheme, Arc::new(store)))
}

async fn handle_start_command(config: &Path) -> anyhow::Result<()> {
    let (cfg, scheme, store) = connect(config).await?;
    let workers = cfg.controller_config.workers;

    let controller = Arc::new(PodCheckpointController::new(
        store.clone(),
        scheme,
        cfg.controller_config,
    ));
    let manager = Arc::new(ControllerManager::new());
    manager.clone().register(controller, workers).await?;
    manager.clone().start_watch(store).await?;
    info!(target: "rkforensics::main", "controller started with {workers} workers");

    tokio::signal::ctrl_c().await?;
    info!(target: "rkforensics::main", "shutting down");
    manager.shutdown().await;
    Ok(())
}

async fn handle_reconcile_command(config: &Path, key: &str) -> anyhow::Result<()> {
    let (cfg, scheme, store) = connect(config).await?;
    let controller = PodCheckpointController::new(store.clone(), scheme, cfg.controller_config);

    let result = controller.reconcile_key(key).await?;
    if let Some(delay) = result.requeue_after {
        println!("requeue after {}s", delay.as_secs());
    }

    let name = NamespacedName::parse(key).with_context(|| format!("invalid key {key}"))?;
    match store.get::<PodCheckpoint>(&name).await {
        Ok(cp) => println!("{}", serde_json::to_string_pretty(&cp.status)?),
        Err(e) if e.is_not_found() => println!("PodCheckpoint {name} not found"),
        Err(e) => return Err(e.into()),
    }
    Ok(())
}

async fn handle_delete_command(config: &Path, key: &str) -> anyhow::Result<()> {
    let (cfg, scheme, store) = connect(config).await?;
    let controller = PodCheckpointController::new(store, scheme, cfg.controller_config);
    let name = NamespacedName::parse(key).with_context(|| format!("invalid key {key}"))?;
    controller.delete(&name).await?;
    println!("deleted PodCheckpoint {name}");
    Ok(())
}
