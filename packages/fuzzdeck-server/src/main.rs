use std::sync::Arc;

use anyhow::Context;
use tokio::net::TcpListener;
use tokio::signal::unix::{signal, SignalKind};
use tracing::{error, info, warn};

use fuzzdeck_orchestration::Coordinator;
use fuzzdeck_server::{create_router, init_tracing, AppState, Settings};
use fuzzdeck_storage::{JobStore, MemoryJobStore, SqliteJobStore};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let settings = Settings::from_env()?;
    init_tracing(settings.json_logs);

    let config = settings.orchestrator_config()?;
    info!(
        data_dir = %config.data_dir.display(),
        sample_interval_ms = config.sample_interval_ms,
        "Loaded orchestrator config"
    );

    let store: Arc<dyn JobStore> = match &settings.database {
        Some(path) => Arc::new(
            SqliteJobStore::open(path)
                .with_context(|| format!("Opening job database {}", path.display()))?,
        ),
        None => {
            warn!("FUZZDECK_DB not set; job records are kept in memory only");
            Arc::new(MemoryJobStore::new())
        }
    };

    let coordinator = Arc::new(Coordinator::new(config, store));
    match coordinator.reconcile_orphans().await {
        Ok(report) => info!(
            closed = report.closed,
            signalled = report.signalled,
            "Startup reconciliation done"
        ),
        Err(e) => error!(error = %e, "Startup reconciliation failed"),
    }

    let router = create_router(AppState::new(coordinator.clone()));
    let addr = settings.addr();
    let listener = TcpListener::bind(addr)
        .await
        .with_context(|| format!("Binding {}", addr))?;
    info!("Listening on {}", addr);

    axum::serve(listener, router)
        .with_graceful_shutdown(shutdown(coordinator))
        .await?;

    info!("Server stopped");
    Ok(())
}

/// Resolves on SIGINT/SIGTERM after every running job has been stopped, so
/// open event streams see their terminal snapshot before connections drain.
async fn shutdown(coordinator: Arc<Coordinator>) {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!(error = %e, "Failed to listen for SIGINT");
            std::future::pending::<()>().await;
        }
    };
    let terminate = async {
        match signal(SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                error!(error = %e, "Failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }

    info!(running = coordinator.registry().len(), "Shutting down; stopping running jobs");
    coordinator.stop_all().await;
}
