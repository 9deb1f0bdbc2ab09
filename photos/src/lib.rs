pub mod api;
pub mod config;
pub mod errors;
pub mod fetcher;
pub mod fixtures;
pub mod gateway;
pub mod mapper;
pub mod metrics_defs;
pub mod service;
pub mod types;
pub mod validator;

use api::PhotosApi;
use config::Settings;
use gateway::PhotosGateway;
use service::PhotoService;
use shared::http::run_http_service;
use std::sync::Arc;
use std::time::Duration;

/// How long in-flight requests may take to finish after ctrl-c.
const SHUTDOWN_GRACE_PERIOD: Duration = Duration::from_secs(30);

#[derive(thiserror::Error, Debug)]
pub enum ServerError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Serves the API on the configured listener until ctrl-c is received, then lets
/// in-flight requests finish.
pub async fn run(
    settings: Arc<Settings>,
    gateway: Arc<dyn PhotosGateway>,
) -> Result<(), ServerError> {
    let api = PhotosApi::new(PhotoService::new(gateway), settings.clone());

    run_http_service(
        &settings.server.host,
        settings.server.port,
        api,
        shutdown_signal(),
        SHUTDOWN_GRACE_PERIOD,
    )
    .await
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "failed to listen for shutdown signal");
        // Without a signal handler, keep serving until the process is killed
        std::future::pending::<()>().await;
    }
}
