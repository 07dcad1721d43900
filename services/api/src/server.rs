use crate::cli::ServeArgs;
use crate::infra::{in_memory_registry, AppState};
use crate::routes::with_placement_routes;
use axum::http::{header, HeaderName, Method};
use axum::Extension;
use axum_prometheus::PrometheusMetricLayer;
use placement::config::AppConfig;
use placement::error::AppError;
use placement::registry::SUPER_AUTH_HEADER;
use placement::telemetry;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use tokio::signal;
use tower_http::cors::CorsLayer;
use tracing::{info, warn};

pub(crate) async fn run(mut args: ServeArgs) -> Result<(), AppError> {
    let mut config = AppConfig::load()?;

    if let Some(host) = args.host.take() {
        config.server.host = host;
    }
    if let Some(port) = args.port.take() {
        config.server.port = port;
    }

    let _telemetry = telemetry::init(&config.telemetry)?;

    if config.auth.super_auth_token.is_none() {
        warn!("SUPER_AUTH_TOKEN is not set; every registry request will be rejected");
    }

    let (prometheus_layer, prometheus_handle) = PrometheusMetricLayer::pair();
    let readiness_flag = Arc::new(std::sync::atomic::AtomicBool::new(false));
    let app_state = AppState {
        readiness: readiness_flag.clone(),
        metrics: Arc::new(prometheus_handle),
    };

    let registry = in_memory_registry(config.registry.clone());
    let cleanup_worker = registry.spawn_cleanup_worker();

    let cors = CorsLayer::new()
        .allow_methods([Method::GET, Method::POST, Method::PUT, Method::DELETE])
        .allow_headers([
            header::CONTENT_TYPE,
            HeaderName::from_static(SUPER_AUTH_HEADER),
        ]);

    let app = with_placement_routes(Arc::clone(&registry), &config.auth)
        .layer(Extension(app_state))
        .layer(cors)
        .layer(prometheus_layer);

    let addr = config.server.socket_addr()?;
    let listener = tokio::net::TcpListener::bind(addr).await?;
    readiness_flag.store(true, Ordering::Release);

    info!(
        ?config.environment,
        %addr,
        prefix = %config.auth.api_prefix,
        "placement registry ready"
    );

    let served = axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await;

    readiness_flag.store(false, Ordering::Release);
    cleanup_worker.abort();
    let leftover = registry.cleanup_snapshot();
    if !leftover.pending.is_empty() || !leftover.dead_letters.is_empty() {
        warn!(
            pending = leftover.pending.len(),
            dead_letters = leftover.dead_letters.len(),
            "cleanup work left unfinished at shutdown"
        );
    }
    info!("placement registry stopped");
    served?;
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(err) = signal::ctrl_c().await {
            warn!(error = %err, "unable to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(err) => {
                warn!(error = %err, "unable to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
    info!("shutdown signal received; draining connections");
}
