//! HTTP surface.
//!
//! An axum router over a shared [`PipelineState`]. The state is built once at
//! startup and replaced only by `POST /reload`.
pub mod routes;

use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::{Context, Result};
use axum::Router;
use axum::http::HeaderValue;
use axum::routing::{get, post};
use tokio::sync::{Mutex, RwLock};
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::{info, warn};

use crate::pipeline::{PipelineBuilder, PipelineState};

/// Shared handler state.
#[derive(Clone)]
pub struct AppState {
    pub builder: PipelineBuilder,
    pub pipeline: Arc<RwLock<PipelineState>>,
    /// Held for the duration of a rebuild so two reloads never write the
    /// index file at once.
    pub rebuild: Arc<Mutex<()>>,
}

impl AppState {
    pub fn new(builder: PipelineBuilder, initial: PipelineState) -> Self {
        Self {
            builder,
            pipeline: Arc::new(RwLock::new(initial)),
            rebuild: Arc::new(Mutex::new(())),
        }
    }
}

/// CORS policy from the configured origins; `*` allows any origin.
fn cors_layer(origins: &[String]) -> CorsLayer {
    let cors = CorsLayer::new().allow_methods(Any).allow_headers(Any);

    if origins.iter().any(|o| o == "*") {
        return cors.allow_origin(Any);
    }

    let parsed: Vec<HeaderValue> = origins
        .iter()
        .filter_map(|o| match o.parse::<HeaderValue>() {
            Ok(v) => Some(v),
            Err(_) => {
                warn!("Ignoring invalid CORS origin: {o}");
                None
            }
        })
        .collect();
    cors.allow_origin(parsed)
}

pub fn router(state: AppState) -> Router {
    let cors = cors_layer(&state.builder.config().server.allowed_origins);

    Router::new()
        .route("/", get(routes::root))
        .route("/diagnose", get(routes::diagnose))
        .route("/chat", post(routes::chat))
        .route("/reload", post(routes::reload))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Bind `addr` and serve until Ctrl-C.
pub async fn serve(addr: SocketAddr, state: AppState) -> Result<()> {
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind {addr}"))?;
    info!("Listening on http://{addr}");

    axum::serve(listener, router(state))
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("server error")?;

    info!("Server stopped");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!("Failed to listen for Ctrl-C: {e}");
        std::future::pending::<()>().await;
    }
    info!("Shutdown signal received");
}
