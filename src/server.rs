use crate::{
    app_state::HttpServerState, config::BridgeSettings, handler, metrics,
    relay_query::RelayQueryBridge,
};
use anyhow::{Context, Result};
use axum::http::{header, Method};
use axum::{routing::get, Router};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::{error, info};

pub fn build_router(
    state: Arc<HttpServerState>,
    metrics_handle: metrics::PrometheusHandle,
) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
        .allow_headers([header::CONTENT_TYPE]);

    let metrics_handler = move || async move { metrics_handle.render() };

    Router::new()
        .route("/", get(handler::handle_query).post(handler::handle_query))
        .route(
            "/api/query",
            get(handler::handle_query).post(handler::handle_query),
        )
        .route("/health", get(handler::handle_health))
        .route("/metrics", get(metrics_handler))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

pub async fn run_server(settings: BridgeSettings) -> Result<()> {
    let metrics_handle = metrics::setup_metrics()?;

    let cancellation_token = CancellationToken::new();
    let bridge = RelayQueryBridge::from_settings(&settings);
    let state = Arc::new(HttpServerState::new(bridge, cancellation_token.clone()));
    let router = build_router(state, metrics_handle);

    let addr = settings
        .local_addr
        .parse::<SocketAddr>()
        .with_context(|| format!("Invalid local_addr {}", settings.local_addr))?;

    info!("Relay query timeout: {:?}", settings.query_timeout);
    if let Some(connect_timeout) = settings.connect_timeout {
        info!("Relay connect timeout: {:?}", connect_timeout);
    }

    let handle = axum_server::Handle::new();
    let handle_clone = handle.clone();

    tokio::spawn(async move {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!("Failed to listen for shutdown signal: {}", e);
            return;
        }
        info!("Shutdown signal received");
        cancellation_token.cancel();
        handle_clone.graceful_shutdown(Some(Duration::from_secs(5)));
    });

    info!("Starting server on {}", addr);
    axum_server::bind(addr)
        .handle(handle)
        .serve(router.into_make_service())
        .await
        .context("Server error")?;

    Ok(())
}
