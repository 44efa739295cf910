//! Process assembly
//!
//! Builds the store, generator, registry and service from a
//! [`WorkbenchConfig`], and runs the HTTP server.

use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::{Context, Result};
use tracing::info;

use crate::api;
use crate::config::{StoreBackend, WorkbenchConfig};
use crate::features::builtin_registry;
use crate::generator;
use crate::log::RunLog;
use crate::pipeline::{ExecutorSettings, PipelineExecutor};
use crate::service::SessionService;
use crate::session::{FileStore, MemoryStore, SessionStore};

/// Open the configured session store.
pub fn open_store(config: &WorkbenchConfig) -> Result<Arc<dyn SessionStore>> {
    match config.store.backend {
        StoreBackend::Memory => Ok(Arc::new(MemoryStore::new())),
        StoreBackend::File => {
            let dir = config.store.data_dir.join("sessions");
            let store = FileStore::open(&dir)
                .with_context(|| format!("Failed to open session store at {}", dir.display()))?;
            Ok(Arc::new(store))
        }
    }
}

/// Build the lifecycle service with the built-in features.
pub fn build_service(config: &WorkbenchConfig) -> Result<SessionService> {
    let store = open_store(config)?;
    let generator = generator::from_config(&config.generator)?;
    info!(generator = generator.name(), "Content generator ready");
    let registry = builtin_registry(&generator).context("Failed to register features")?;

    let mut executor = PipelineExecutor::new(Arc::clone(&store), ExecutorSettings::from(&config.limits));
    if config.log.run_log {
        let run_log = RunLog::new(&config.store.data_dir).context("Failed to open run log")?;
        executor = executor.with_run_log(Arc::new(run_log));
    }

    Ok(SessionService::new(
        registry,
        store,
        executor,
        config.limits.clone(),
    ))
}

/// Recover interrupted sessions and serve HTTP on `addr` until shutdown.
pub async fn serve(config: &WorkbenchConfig, addr: SocketAddr) -> Result<()> {
    let service = Arc::new(build_service(config)?);
    let recovered = service
        .recover_interrupted()
        .context("Failed to recover interrupted sessions")?;
    info!(recovered, "Startup recovery finished");

    let app = api::router(Arc::clone(&service));
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("Failed to bind {addr}"))?;
    info!(%addr, features = ?service.registry().kinds(), "Listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("Server error")?;
    Ok(())
}

async fn shutdown_signal() {
    if tokio::signal::ctrl_c().await.is_ok() {
        info!("Shutdown requested");
    }
}
