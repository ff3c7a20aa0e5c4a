// Copyright (c) 2024-2025 Jesse Morgan / Morgan Forge
// SPDX-License-Identifier: AGPL-3.0-or-later

//! HTTP server
//!
//! Thin pass-throughs to the download client and the search aggregator, plus
//! the placement loop's status. Every download-client call goes through the
//! shared [`QbitClient`] and therefore through the same session manager and
//! re-authentication policy as the placement loop.
//!
//! # Endpoints
//!
//! - `GET  /health` - Liveness, never touches the backend
//! - `GET  /download-api/search?q=&category=` - Search all indexers
//! - `POST /download-api/download` - Add a magnet link
//! - `GET  /download-api/active-downloads` - Torrent list for the UI
//! - `POST /download-api/pause`, `/resume`, `/delete` - Torrent control
//! - `GET  /download-api/debug/files/:hash` - Raw file listing
//! - `GET  /download-api/placement` - Placement loop status
//!
//! `search`, `download`, `active-downloads` and `debug/files` are also
//! served at the root for older front ends.

use anyhow::Result;
use axum::{
    extract::{Path, Query, State},
    response::{IntoResponse, Json, Response},
    routing::{get, post},
    Router,
};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::any::Any;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tower_http::catch_panic::CatchPanicLayer;
use tower_http::cors::{self, CorsLayer};
use tower_http::timeout::TimeoutLayer;

use crate::errors::{ApiResult, UserError};
use crate::jackett::{JackettClient, SearchResult};
use crate::placement::{snapshot, PlacementStatus, SharedStatus};
use crate::qbit::{QbitClient, TorrentInfo};
use crate::utils::panic_message;

/// Upper bound for any request, above the slowest backend call plus one
/// re-authentication.
const REQUEST_TIMEOUT_SECS: u64 = 150;

/// Server state shared across handlers.
pub struct AppState {
    pub qbit: Arc<QbitClient>,
    pub jackett: JackettClient,
    pub placement: SharedStatus,
}

/// API server configuration.
pub struct Server {
    port: u16,
    bind_address: String,
    state: Arc<AppState>,
}

impl Server {
    /// Create a server on `0.0.0.0:8001`.
    pub fn new(qbit: Arc<QbitClient>, jackett: JackettClient, placement: SharedStatus) -> Self {
        Self {
            port: 8001,
            bind_address: "0.0.0.0".to_string(),
            state: Arc::new(AppState {
                qbit,
                jackett,
                placement,
            }),
        }
    }

    pub fn with_port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    pub fn with_bind_address(mut self, addr: impl Into<String>) -> Self {
        self.bind_address = addr.into();
        self
    }

    /// Build the router with all routes.
    pub fn build_router(&self) -> Router {
        let api = Router::new()
            .route("/search", get(search_handler))
            .route("/download", post(download_handler))
            .route("/active-downloads", get(active_downloads_handler))
            .route("/pause", post(pause_handler))
            .route("/resume", post(resume_handler))
            .route("/delete", post(delete_handler))
            .route("/debug/files/:hash", get(debug_files_handler))
            .route("/placement", get(placement_handler));

        Router::new()
            .route("/health", get(health_handler))
            .route("/search", get(search_handler))
            .route("/download", post(download_handler))
            .route("/active-downloads", get(active_downloads_handler))
            .route("/debug/files/:hash", get(debug_files_handler))
            .nest("/download-api", api)
            .layer(TimeoutLayer::new(Duration::from_secs(REQUEST_TIMEOUT_SECS)))
            .layer(
                CorsLayer::new()
                    .allow_origin(cors::Any)
                    .allow_methods(cors::Any)
                    .allow_headers(cors::Any),
            )
            .layer(CatchPanicLayer::custom(handle_panic))
            .with_state(Arc::clone(&self.state))
    }

    /// Bind and serve until `shutdown` is cancelled.
    pub async fn start(&self, shutdown: CancellationToken) -> Result<()> {
        let addr = format!("{}:{}", self.bind_address, self.port);

        let listener = tokio::net::TcpListener::bind(&addr).await.map_err(|e| {
            if e.kind() == std::io::ErrorKind::AddrInUse {
                anyhow::anyhow!(
                    "Port {} is already in use. Stop the other instance or set PORT to a free port.",
                    self.port
                )
            } else {
                anyhow::anyhow!("Failed to bind to {}: {}", addr, e)
            }
        })?;

        tracing::info!("Starting server on {}", addr);
        self.serve(listener, shutdown).await
    }

    /// Serve on an already bound listener until `shutdown` is cancelled.
    pub async fn serve(&self, listener: tokio::net::TcpListener, shutdown: CancellationToken) -> Result<()> {
        axum::serve(listener, self.build_router())
            .with_graceful_shutdown(shutdown.cancelled_owned())
            .await?;

        tracing::info!("server stopped");
        Ok(())
    }

    pub fn port(&self) -> u16 {
        self.port
    }
}

// =============================================================================
// Request/Response Types
// =============================================================================

#[derive(Debug, Deserialize)]
struct SearchParams {
    q: Option<String>,
    category: Option<String>,
}

#[derive(Debug, Deserialize)]
struct DownloadRequest {
    magnet: Option<String>,
}

#[derive(Debug, Deserialize)]
struct HashRequest {
    hash: Option<String>,
}

#[derive(Debug, Deserialize)]
struct DeleteRequest {
    hash: Option<String>,
    #[serde(rename = "deleteFiles", default)]
    delete_files: bool,
}

/// A torrent as the download UI renders it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActiveDownload {
    pub name: String,
    /// Percent complete, `0.0..=100.0`.
    pub progress: f64,
    pub eta: i64,
    pub dlspeed: i64,
    pub state: String,
    pub hash: String,
    pub save_path: String,
}

impl From<TorrentInfo> for ActiveDownload {
    fn from(t: TorrentInfo) -> Self {
        Self {
            name: t.name,
            progress: t.progress * 100.0,
            eta: t.eta,
            dlspeed: t.dlspeed,
            state: t.state,
            hash: t.hash,
            save_path: t.save_path,
        }
    }
}

fn required(value: Option<String>, field: &str, message: &str) -> ApiResult<String> {
    match value {
        Some(value) if !value.trim().is_empty() => Ok(value),
        _ => Err(UserError::invalid_request(message, Some(field))),
    }
}

// =============================================================================
// Handlers
// =============================================================================

async fn health_handler() -> Json<Value> {
    Json(json!({ "status": "healthy" }))
}

async fn search_handler(
    State(state): State<Arc<AppState>>,
    Query(params): Query<SearchParams>,
) -> ApiResult<Json<Vec<SearchResult>>> {
    let query = required(params.q, "q", "No query provided")?;
    let results = state
        .jackett
        .search(&query, params.category.as_deref())
        .await?;
    Ok(Json(results))
}

async fn download_handler(
    State(state): State<Arc<AppState>>,
    Json(request): Json<DownloadRequest>,
) -> ApiResult<Json<Value>> {
    let magnet = required(request.magnet, "magnet", "No magnet link provided")?;
    state.qbit.add(&magnet).await?;
    tracing::info!("torrent added");
    Ok(Json(json!({ "status": "success", "message": "Torrent added" })))
}

/// Always answers with a list so the UI keeps rendering while the backend
/// is down.
async fn active_downloads_handler(State(state): State<Arc<AppState>>) -> Json<Vec<ActiveDownload>> {
    match state.qbit.list_all().await {
        Ok(torrents) => Json(torrents.into_iter().map(ActiveDownload::from).collect()),
        Err(e) => {
            tracing::warn!(operation = e.operation(), error = %e, "failed to fetch active downloads");
            Json(Vec::new())
        }
    }
}

async fn pause_handler(
    State(state): State<Arc<AppState>>,
    Json(request): Json<HashRequest>,
) -> ApiResult<Json<Value>> {
    let hash = required(request.hash, "hash", "No hash provided")?;
    state.qbit.pause(&hash).await?;
    Ok(Json(json!({ "status": "success" })))
}

async fn resume_handler(
    State(state): State<Arc<AppState>>,
    Json(request): Json<HashRequest>,
) -> ApiResult<Json<Value>> {
    let hash = required(request.hash, "hash", "No hash provided")?;
    state.qbit.resume(&hash).await?;
    Ok(Json(json!({ "status": "success" })))
}

async fn delete_handler(
    State(state): State<Arc<AppState>>,
    Json(request): Json<DeleteRequest>,
) -> ApiResult<Json<Value>> {
    let hash = required(request.hash, "hash", "No hash provided")?;
    state.qbit.delete(&hash, request.delete_files).await?;
    tracing::info!(hash = %hash, delete_files = request.delete_files, "torrent deleted");
    Ok(Json(json!({ "status": "success" })))
}

async fn debug_files_handler(
    State(state): State<Arc<AppState>>,
    Path(hash): Path<String>,
) -> ApiResult<Json<Value>> {
    Ok(Json(state.qbit.files(&hash).await?))
}

async fn placement_handler(State(state): State<Arc<AppState>>) -> Json<PlacementStatus> {
    Json(snapshot(&state.placement))
}

/// A panicking handler answers 500 with a reference code instead of
/// dropping the connection.
fn handle_panic(panic: Box<dyn Any + Send + 'static>) -> Response {
    let detail = panic_message(panic.as_ref());
    UserError::internal_error(&format!("request handler panicked: {}", detail)).into_response()
}

/// Wait for SIGINT/SIGTERM, then cancel `token`.
pub async fn shutdown_signal(token: CancellationToken) {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};

        match (signal(SignalKind::terminate()), signal(SignalKind::interrupt())) {
            (Ok(mut sigterm), Ok(mut sigint)) => {
                tokio::select! {
                    _ = sigterm.recv() => {
                        tracing::info!("Received SIGTERM, initiating graceful shutdown...");
                    }
                    _ = sigint.recv() => {
                        tracing::info!("Received SIGINT (Ctrl+C), initiating graceful shutdown...");
                    }
                    _ = token.cancelled() => return,
                }
            }
            _ => {
                tracing::error!("failed to install signal handlers, shutdown only via cancellation");
                token.cancelled().await;
                return;
            }
        }
    }

    #[cfg(not(unix))]
    {
        tokio::select! {
            result = tokio::signal::ctrl_c() => {
                if let Err(e) = result {
                    tracing::error!("failed to listen for Ctrl+C: {}", e);
                }
                tracing::info!("Received Ctrl+C, initiating graceful shutdown...");
            }
            _ = token.cancelled() => return,
        }
    }

    token.cancel();
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::RwLock;

    fn server() -> Server {
        let qbit = Arc::new(QbitClient::new("http://127.0.0.1:9", "admin", "secret").unwrap());
        let jackett = JackettClient::new("http://127.0.0.1:9", "key");
        let status = Arc::new(RwLock::new(PlacementStatus::default()));
        Server::new(qbit, jackett, status)
    }

    #[test]
    fn test_server_builder() {
        let server = server();
        assert_eq!(server.port(), 8001);
        let server = server.with_port(9000).with_bind_address("127.0.0.1");
        assert_eq!(server.port(), 9000);
        assert_eq!(server.bind_address, "127.0.0.1");
    }

    #[test]
    fn test_active_download_projection() {
        let info = TorrentInfo {
            hash: "h".to_string(),
            name: "n".to_string(),
            progress: 0.5,
            eta: 120,
            dlspeed: 2048,
            state: "downloading".to_string(),
            save_path: "/downloads/".to_string(),
        };
        let projected = ActiveDownload::from(info);
        assert_eq!(projected.progress, 50.0);
        assert_eq!(projected.eta, 120);
        assert_eq!(projected.save_path, "/downloads/");
    }

    #[test]
    fn test_required_field() {
        assert_eq!(required(Some("x".to_string()), "q", "missing").unwrap(), "x");
        let err = required(Some("  ".to_string()), "q", "No query provided").unwrap_err();
        assert_eq!(err.status_code(), axum::http::StatusCode::BAD_REQUEST);
        assert!(required(None, "hash", "No hash provided").is_err());
    }

    #[tokio::test]
    async fn test_handler_panic_becomes_internal_error() {
        let response = handle_panic(Box::new("status lock poisoned at src/server/mod.rs:12:3"));
        assert_eq!(response.status(), axum::http::StatusCode::INTERNAL_SERVER_ERROR);

        let body = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let json: Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(json["error"]["error_type"], "internal_error");
        assert_eq!(json["status"], 500);
        assert!(!json["error"]["message"].as_str().unwrap().contains("poisoned"));
    }

    #[tokio::test]
    async fn test_shutdown_signal_returns_on_cancel() {
        let token = CancellationToken::new();
        token.cancel();
        shutdown_signal(token).await;
    }
}
