//! HTTP API server for livepreview.
//!
//! Provides a REST API and WebSocket endpoint for driving and observing a
//! running preview.
//!
//! # Features
//!
//! - Source updates from any editor (`PUT /source`)
//! - Sandbox refresh, error dismissal and artifact view toggling
//! - State, artifact and rendered frame queries
//! - Real-time WebSocket events
//!
//! # Usage
//!
//! ```ignore
//! use livepreview_http::start_server;
//!
//! let handle = runtime.handle().clone();
//! tokio::spawn(async move {
//!     if let Err(e) = start_server(handle, 1607).await {
//!         log::error!("HTTP server failed: {}", e);
//!     }
//! });
//! ```

mod models;
mod routes;
mod websocket;

use axum::{
    routing::{get, post, put},
    Router,
};
use livepreview_core::PreviewHandle;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::sync::broadcast;
use tower_http::cors::{Any, CorsLayer};

pub use models::*;
pub use websocket::WebSocketEvent;

/// Shared application state for HTTP handlers.
pub struct AppState {
    /// Preview handle for state access and message sending.
    pub handle: PreviewHandle,
    /// Broadcast channel for WebSocket events.
    pub ws_tx: broadcast::Sender<WebSocketEvent>,
}

/// Build the router with all routes.
pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        // Preview state
        .route("/status", get(routes::preview::get_status))
        .route("/source", put(routes::preview::put_source))
        .route("/refresh", post(routes::preview::refresh))
        .route("/dismiss", post(routes::preview::dismiss_error))
        .route("/artifact", get(routes::preview::get_artifact))
        .route("/artifact/toggle", post(routes::preview::toggle_artifact))
        // Rendered output
        .route("/frame", get(routes::frame::get_frame))
        // WebSocket
        .route("/ws", get(websocket::ws_handler))
        // Add shared state
        .with_state(state)
        // Add CORS middleware
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
}

/// Start the HTTP server on the specified port.
///
/// Runs until the listener fails. The WebSocket broadcaster is started
/// alongside it.
pub async fn start_server(handle: PreviewHandle, port: u16) -> std::io::Result<()> {
    // Create broadcast channel for WebSocket events
    let (ws_tx, _) = broadcast::channel::<WebSocketEvent>(1024);

    let state = Arc::new(AppState {
        handle: handle.clone(),
        ws_tx: ws_tx.clone(),
    });

    // Start the event broadcaster in the background
    tokio::spawn(async move {
        websocket::run_event_broadcaster(handle, ws_tx).await;
    });

    let app = router(state);

    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    log::info!(
        "HTTP API server starting on http://{}:{}",
        addr.ip(),
        addr.port()
    );

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await
}
