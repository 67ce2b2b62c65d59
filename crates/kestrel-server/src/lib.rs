//! Kestrel HTTP API
//!
//! Accepts `show`, `create`, `delete` and `image` requests under
//! `/api/2/inf/<resource>`, validates them, and hands them to the task
//! queue. Every accepted request is answered with `202` and a `Link` to the
//! task status endpoint.

pub mod api;
pub mod auth;

#[cfg(test)]
mod test_helpers;

use anyhow::Context;
use axum::Router;
use kestrel_common::KestrelConfig;
use kestrel_hypervisor::{Hypervisor, UploadClient};
use kestrel_workflow::{DispatchTable, Provisioner, TaskQueue};
use std::sync::Arc;
use tower_http::trace::TraceLayer;
use tracing::info;

pub use auth::{AuthUser, StaticTokenVerifier, TokenVerifier};

#[derive(Clone)]
pub struct AppState {
    pub config: Arc<KestrelConfig>,
    pub queue: Arc<TaskQueue>,
    pub verifier: Arc<dyn TokenVerifier>,
}

impl AppState {
    pub fn new(
        config: Arc<KestrelConfig>,
        queue: Arc<TaskQueue>,
        verifier: Arc<dyn TokenVerifier>,
    ) -> Self {
        Self {
            config,
            queue,
            verifier,
        }
    }
}

/// API routes with request tracing
pub fn app(state: AppState) -> Router {
    api::api_router()
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Serve the API until Ctrl-C or SIGTERM, then drain the task queue
pub async fn run(
    config: Arc<KestrelConfig>,
    hypervisor: Arc<dyn Hypervisor>,
    uploader: Arc<dyn UploadClient>,
) -> anyhow::Result<()> {
    let resource = config.appliance.resource.clone();
    let provisioner = Arc::new(Provisioner::new(hypervisor, uploader, config.clone()));
    let table = DispatchTable::standard().context("Failed to build task dispatch table")?;
    let queue = Arc::new(TaskQueue::spawn(provisioner, table, &config.worker, &resource));

    let verifier = Arc::new(StaticTokenVerifier::from_config(&config.server));
    let state = AppState::new(config.clone(), queue.clone(), verifier);

    let listener = tokio::net::TcpListener::bind(&config.server.listen)
        .await
        .with_context(|| format!("Failed to bind {}", config.server.listen))?;
    info!(
        listen = %config.server.listen,
        tasks = ?api::routed_tasks(&resource),
        "Kestrel API listening"
    );

    axum::serve(listener, app(state))
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("Server error")?;

    match Arc::try_unwrap(queue) {
        Ok(queue) => {
            info!("Waiting for running tasks to finish");
            queue.shutdown().await;
        }
        Err(_) => info!("Task queue still referenced, not draining"),
    }
    info!("Shutdown complete");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        let _ = tokio::signal::ctrl_c().await;
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(_) => std::future::pending::<()>().await,
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
    info!("Shutdown signal received");
}
