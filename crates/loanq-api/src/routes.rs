//! Router setup with all API routes and middleware.
//!
//! Configures the axum Router with CORS, tracing, compression,
//! and all endpoint handlers.

use axum::extract::DefaultBodyLimit;
use axum::http::{header, HeaderName, HeaderValue, Method};
use axum::routing::{get, post};
use axum::Router;
use loanq_core::config::LoanqConfig;
use loanq_core::error::CoreError;
use tower_http::compression::CompressionLayer;
use tower_http::cors::{AllowOrigin, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::handlers;
use crate::state::AppState;

/// Create the axum Router with all routes and middleware.
pub fn create_router(state: AppState) -> Router {
    // Browser clients served from the API host itself or its dev port.
    let port = state.config.general.port;
    let dev_port = port.saturating_add(1);
    let origins: Vec<HeaderValue> = [port, dev_port]
        .iter()
        .flat_map(|p| {
            [
                format!("http://127.0.0.1:{}", p),
                format!("http://localhost:{}", p),
            ]
        })
        .filter_map(|origin| origin.parse::<HeaderValue>().ok())
        .collect();
    let cors = CorsLayer::new()
        .allow_origin(AllowOrigin::list(origins))
        .allow_methods([Method::GET, Method::POST, Method::DELETE, Method::OPTIONS])
        .allow_headers([
            header::CONTENT_TYPE,
            header::ACCEPT,
            HeaderName::from_static(handlers::SESSION_HEADER),
        ]);

    Router::new()
        .route("/health", get(handlers::health))
        .route("/schema", get(handlers::schema))
        .route("/query", post(handlers::query))
        .route(
            "/memory",
            get(handlers::get_memory).delete(handlers::reset_memory),
        )
        .layer(DefaultBodyLimit::max(64 * 1024))
        .layer(CompressionLayer::new())
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(state)
}

/// Start the HTTP server on the configured host and port.
pub async fn start_server(config: &LoanqConfig, state: AppState) -> Result<(), CoreError> {
    let addr = format!("{}:{}", config.general.host, config.general.port);

    let router = create_router(state);

    tracing::info!("Starting API server on {}", addr);

    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .map_err(|e| CoreError::Api(format!("Failed to bind {}: {}", addr, e)))?;

    axum::serve(listener, router)
        .await
        .map_err(|e| CoreError::Api(format!("Server error: {}", e)))?;

    Ok(())
}
