use crate::cli::ServeArgs;
use crate::infra::{AppState, Platform};
use crate::routes::service_router;
use axum::Extension;
use axum_prometheus::PrometheusMetricLayer;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};
use verifly::config::AppConfig;
use verifly::error::AppError;
use verifly::telemetry;
use verifly::verification::RunCoordinator;

const NOTIFICATION_DRAIN: Duration = Duration::from_secs(10);

pub(crate) async fn run(mut args: ServeArgs) -> Result<(), AppError> {
    let mut config = AppConfig::load()?;

    if let Some(host) = args.host.take() {
        config.server.host = host;
    }
    if let Some(port) = args.port.take() {
        config.server.port = port;
    }

    telemetry::init(&config.telemetry, config.environment)?;

    let (prometheus_layer, prometheus_handle) = PrometheusMetricLayer::pair();
    let readiness_flag = Arc::new(AtomicBool::new(false));
    let app_state = AppState {
        readiness: readiness_flag.clone(),
        metrics: Arc::new(prometheus_handle),
    };

    let platform = Platform::default();
    let coordinator = Arc::new(platform.coordinator(config.verification.clone()));

    let app = service_router(Arc::clone(&coordinator), platform)
        .layer(Extension(app_state))
        .layer(prometheus_layer);

    let addr = config.server.socket_addr()?;
    let listener = tokio::net::TcpListener::bind(addr).await?;
    readiness_flag.store(true, Ordering::Release);

    info!(
        ?config.environment,
        %addr,
        workers = config.verification.workers,
        max_concurrent_checks = config.verification.max_concurrent_checks,
        "verification service ready"
    );

    let shutdown = shutdown_signal(Arc::clone(&readiness_flag), Arc::clone(&coordinator));
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown)
        .await?;

    let undelivered = coordinator.drain_notifications(NOTIFICATION_DRAIN).await;
    if undelivered > 0 {
        warn!(undelivered, "exiting with applicant notifications undelivered");
    }
    Ok(())
}

async fn shutdown_signal(readiness: Arc<AtomicBool>, coordinator: Arc<RunCoordinator>) {
    tokio::signal::ctrl_c().await.ok();
    readiness.store(false, Ordering::Release);
    info!(
        pending_runs = coordinator.pending(),
        "shutdown requested, draining connections"
    );
}
