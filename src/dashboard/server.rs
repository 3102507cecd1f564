use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use axum::{
    Router,
    body::Body,
    extract::{DefaultBodyLimit, Request},
    http::{StatusCode, header},
    response::{Html, IntoResponse, Response},
    routing::get,
};
use tokio::sync::broadcast;
use tower_http::cors::CorsLayer;

use super::api::{self, AppState, SharedState};
use super::embedded::Assets;
use super::workflow::Workflow;
use crate::config::PackflowToml;

/// Multipart-free uploads still carry a little framing over the raw file.
const BODY_SLACK: usize = 64 * 1024;

/// How often expired login sessions are dropped.
const SESSION_SWEEP: Duration = Duration::from_secs(15 * 60);

/// Where and how the dashboard listens.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub port: u16,
    pub host: String,
    pub dev_mode: bool,
    pub max_upload_bytes: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self::from(&PackflowToml::default())
    }
}

impl From<&PackflowToml> for ServerConfig {
    fn from(settings: &PackflowToml) -> Self {
        Self {
            port: settings.server.port,
            host: settings.server.host.clone(),
            dev_mode: settings.server.dev_mode,
            max_upload_bytes: settings.server.max_upload_bytes,
        }
    }
}

impl ServerConfig {
    /// Dev mode listens on every interface so a separately served UI can reach it.
    pub fn bind_addr(&self) -> String {
        let host = if self.dev_mode { "0.0.0.0" } else { self.host.as_str() };
        format!("{}:{}", host, self.port)
    }
}

/// Build the full application router with API, event feed and UI serving.
pub fn build_router(state: SharedState, max_upload_bytes: usize) -> Router {
    api::api_router()
        .route("/ws", get(api::ws_feed))
        .fallback(static_handler)
        .layer(DefaultBodyLimit::max(max_upload_bytes.saturating_add(BODY_SLACK)))
        .with_state(state)
}

/// Serve embedded UI files, falling back to index.html for client routing.
async fn static_handler(req: Request<Body>) -> Response {
    let path = req.uri().path().trim_start_matches('/');

    if !path.is_empty()
        && let Some(content) = Assets::get(path)
    {
        let mime = mime_guess::from_path(path).first_or_octet_stream();
        return (
            [(header::CONTENT_TYPE, mime.as_ref().to_string())],
            content.data.into_owned(),
        )
            .into_response();
    }

    match Assets::get("index.html") {
        Some(content) => Html(String::from_utf8_lossy(&content.data).to_string()).into_response(),
        None => (StatusCode::NOT_FOUND, "Dashboard UI not found in this build.").into_response(),
    }
}

/// Start the dashboard and block until Ctrl+C.
pub async fn start_server(config: ServerConfig, workflow: Workflow) -> Result<()> {
    let (ws_tx, _rx) = broadcast::channel::<String>(256);
    let state = Arc::new(AppState::new(workflow, ws_tx));

    let sweeper = {
        let state = state.clone();
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(SESSION_SWEEP);
            loop {
                interval.tick().await;
                let purged = state.sessions.purge_expired().await;
                if purged > 0 {
                    tracing::debug!(purged, "expired sessions removed");
                }
            }
        })
    };

    let mut app = build_router(state, config.max_upload_bytes);
    if config.dev_mode {
        app = app.layer(CorsLayer::permissive());
    }

    let addr = config.bind_addr();
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("Failed to bind to {}", addr))?;

    let local_addr = listener.local_addr()?;
    tracing::info!(%local_addr, dev_mode = config.dev_mode, "dashboard listening");
    println!("Packflow dashboard running at http://{}", local_addr);

    let served = axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("Server error");
    sweeper.abort();
    served?;

    println!("Server shut down gracefully.");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "failed to install Ctrl+C handler");
        std::future::pending::<()>().await;
    }
    println!("\nShutting down...");
}
