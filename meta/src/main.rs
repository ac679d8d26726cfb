//! Process entrypoint: configuration, logging, the Checkpoint Store, the
//! Permit Executor, provider registration, the recovery pass, and the
//! stdio RPC surface, wired into one running process.

use std::env;
use std::sync::Arc;

use meta_core::{Config, CoreError, CoreResult};
use meta_executor::LocalQuotaSource;
use meta_rpc::{Dispatcher, RpcClient};
use meta_store::SqliteCheckpointStore;
use meta_transport::stdio;
use tracing::{error, info};

mod controllers;
mod core;
mod registration;
mod rpc_executor;

use crate::core::Core;
use crate::rpc_executor::RpcBackedExecutor;

#[tokio::main]
async fn main() {
    let config = Config::from_env().unwrap_or_else(|e| {
        eprintln!("meta: invalid configuration: {e}");
        std::process::exit(1);
    });
    meta_core::logging::init(&config.log_level, config.log_format);

    if let Err(e) = run(config).await {
        error!(error = %e.wire_message(), "meta exiting on startup error");
        std::process::exit(1);
    }
}

async fn run(config: Config) -> CoreResult<()> {
    let store = Arc::new(SqliteCheckpointStore::connect(&config.session_db_path).await?);
    let quota = Arc::new(LocalQuotaSource::new(config.global_permit_budget));
    let core = Arc::new(Core::new(store, quota));

    let (reader, writer) = stdio().split();
    let writer = Arc::new(tokio::sync::Mutex::new(writer));
    let rpc = Arc::new(RpcClient::new("meta", Arc::clone(&writer)));

    register_providers(&core, &rpc, &config).await?;

    let report = core.run_recovery().await?;
    info!(total = report.total, recovered = report.recovered, skipped = report.skipped, "recovery pass complete");

    let mut dispatcher = Dispatcher::new("meta", reader, writer, rpc.pending_handle());
    controllers::register(&mut dispatcher, Arc::clone(&core));

    let shutdown_core = Arc::clone(&core);
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("shutdown signal received, draining");
            shutdown_core.graceful_shutdown().await;
        }
    });

    dispatcher.run().await;
    Ok(())
}

/// Reads the provider manifest from `META_PROVIDERS_PATH`, if set, and
/// registers one `RpcBackedExecutor` per entry. A deployment with no
/// manifest starts with an empty registry — BOOTSTRAPPING still finishes,
/// it just has nothing to recover or admit.
async fn register_providers(
    core: &Arc<Core<LocalQuotaSource>>,
    rpc: &Arc<RpcClient<tokio::io::Stdout>>,
    config: &Config,
) -> CoreResult<()> {
    let Ok(manifest_path) = env::var("META_PROVIDERS_PATH") else {
        info!("META_PROVIDERS_PATH not set, starting with no registered providers");
        return Ok(());
    };

    let text = tokio::fs::read_to_string(&manifest_path)
        .await
        .map_err(|e| CoreError::internal(format!("reading {manifest_path}: {e}")))?;
    let specs = registration::parse_manifest(&text).map_err(|e| CoreError::internal(format!("parsing {manifest_path}: {e}")))?;

    for spec in specs {
        let executor = Arc::new(RpcBackedExecutor::new(
            Arc::clone(rpc),
            spec.provider_id.clone(),
            spec.source_service,
            spec.storage_service,
            spec.source,
            spec.kind.clone(),
            config.rpc_timeout,
        ));
        core.register_provider(spec.provider_id, spec.kind, spec.dependencies, spec.default_permits, executor)?;
    }
    info!(path = %manifest_path, "providers registered from manifest");
    Ok(())
}
