//! HTTP server for the media relay
//!
//! Routes download requests to the relay and serves the resulting chunk
//! streams as response bodies.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use axum::Router;
use axum::routing::get;
use mediarelay_core::MediaRelay;
use mediarelay_core::config::ServerConfig;
use tower_http::cors::CorsLayer;

use crate::handlers::{api_workloads, stream_file};

/// State shared by all handlers.
#[derive(Clone)]
pub struct AppState {
    pub relay: Arc<MediaRelay>,
    /// `max-age` advertised for served files
    pub cache_max_age: Duration,
}

impl AppState {
    pub fn new(relay: Arc<MediaRelay>, config: &ServerConfig) -> Self {
        Self {
            relay,
            cache_max_age: config.cache_max_age,
        }
    }
}

/// Builds the application router.
pub fn build_router(state: AppState) -> Router {
    let api = Router::new()
        .route("/api/workloads", get(api_workloads))
        .layer(CorsLayer::permissive());

    Router::new()
        // Download endpoints; CORS headers are set by the handler itself
        .route(
            "/dl/{chat_id}/{message_id}",
            get(stream_file).head(stream_file),
        )
        .route(
            "/dl/{chat_id}/{message_id}/{name}",
            get(stream_file).head(stream_file),
        )
        .merge(api)
        .with_state(state)
}

/// Serves the relay until Ctrl-C, then cancels streams and stops sessions.
///
/// # Errors
///
/// - `std::io::Error` - Bind address unavailable or the server failed
pub async fn run_server(relay: Arc<MediaRelay>, config: &ServerConfig) -> std::io::Result<()> {
    let app = build_router(AppState::new(Arc::clone(&relay), config));

    let listener = tokio::net::TcpListener::bind(config.bind_address).await?;
    tracing::info!(
        "Media relay listening on http://{}",
        listener.local_addr()?
    );

    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal(relay))
    .await
}

/// Resolves on Ctrl-C once the relay has cancelled its streams, so that
/// in-flight response bodies end and graceful shutdown can complete.
async fn shutdown_signal(relay: Arc<MediaRelay>) {
    if let Err(error) = tokio::signal::ctrl_c().await {
        tracing::error!("Failed to listen for shutdown signal: {}", error);
        std::future::pending::<()>().await;
    }
    tracing::info!("Shutdown signal received");
    relay.shutdown().await;
}
