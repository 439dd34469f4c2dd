//! HTTP API.
//!
//! Non-realtime clients use these routes for chat lists, history and every
//! mutation the socket offers. Mutations go through the same
//! [`FanoutEngine`] entry point, so a message posted here is stored and
//! broadcast exactly as one sent over a connection.

mod auth;
mod chats;
mod extract;
mod rooms;
mod upload;
mod users;

pub use extract::AuthUser;

use crate::auth::IdentityVerifier;
use crate::config::LimitsConfig;
use crate::fanout::FanoutEngine;
use crate::security::UploadPolicy;
use crate::state::Switchboard;
use axum::extract::DefaultBodyLimit;
use axum::routing::{get, post, put};
use axum::{Json, Router};
use serde::Deserialize;
use serde_json::{Value, json};
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::sync::broadcast;

#[derive(Clone)]
pub struct AppState {
    pub engine: FanoutEngine,
    pub verifier: Arc<dyn IdentityVerifier>,
    pub uploads: Arc<UploadPolicy>,
    pub upload_dir: Arc<PathBuf>,
    pub limits: LimitsConfig,
}

impl AppState {
    pub fn switchboard(&self) -> &Arc<Switchboard> {
        self.engine.switchboard()
    }
}

/// `?page=&limit=` query string.
#[derive(Debug, Default, Deserialize)]
pub(crate) struct PageQuery {
    pub page: Option<u32>,
    pub limit: Option<u32>,
}

impl PageQuery {
    pub fn resolve(&self, limits: &LimitsConfig, default_limit: u32) -> (u32, u32) {
        let page = self.page.unwrap_or(1).max(1);
        (page, limits.page_size(self.limit, default_limit))
    }
}

pub(crate) fn pagination(page: u32, limit: u32, returned: usize) -> Value {
    json!({
        "page": page,
        "limit": limit,
        "hasMore": returned == limit as usize,
    })
}

pub fn build_router(state: AppState) -> Router {
    let upload_limit = usize::try_from(state.uploads.max_bytes())
        .unwrap_or(usize::MAX)
        .saturating_add(1024 * 1024);

    Router::new()
        .route("/health", get(health))
        .route("/metrics", get(metrics_handler))
        .route("/api/chats", get(chats::list_chats))
        .route("/api/chats/:id", get(chats::get_chat).delete(chats::delete_chat))
        .route(
            "/api/chats/:id/messages",
            get(chats::history).post(chats::send_message),
        )
        .route(
            "/api/chats/:id/messages/:mid",
            put(chats::edit_message).delete(chats::delete_message),
        )
        .route(
            "/api/chats/:id/messages/:mid/react",
            post(chats::add_reaction).delete(chats::remove_reaction),
        )
        .route(
            "/api/chats/:id/upload",
            post(upload::upload_file).layer(DefaultBodyLimit::max(upload_limit)),
        )
        .route("/api/rooms", get(rooms::list_rooms).post(rooms::create_room))
        .route("/api/auth/verify", post(auth::verify))
        .route("/api/auth/logout", post(auth::logout))
        .route("/api/users", get(users::list_users))
        .route("/api/users/me", get(users::me))
        .route("/api/users/online", get(users::online_users))
        .route("/api/users/search", get(users::search_users))
        .route("/api/users/status", put(users::update_status))
        .route("/api/users/start-chat", post(users::start_chat))
        .route("/api/users/stats/overview", get(users::stats))
        .route("/api/users/:id", get(users::get_user))
        .route("/uploads/:name", get(upload::serve_file))
        .with_state(state)
}

async fn health() -> Json<Value> {
    Json(json!({ "status": "ok", "version": env!("CARGO_PKG_VERSION") }))
}

/// Handler for GET /metrics - returns Prometheus metrics in text format.
async fn metrics_handler() -> String {
    crate::metrics::gather_metrics()
}

/// Serve the API until shutdown is signalled.
pub async fn serve_api(
    listener: TcpListener,
    router: Router,
    mut shutdown: broadcast::Receiver<()>,
) -> std::io::Result<()> {
    axum::serve(listener, router)
        .with_graceful_shutdown(async move {
            let _ = shutdown.recv().await;
        })
        .await
}

/// Run the standalone Prometheus exporter.
///
/// Binds to `0.0.0.0:port` and serves only `/metrics`.
pub async fn run_metrics_server(port: u16) {
    let app = Router::new().route("/metrics", get(metrics_handler));

    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    tracing::info!("Prometheus HTTP server listening on {}", addr);

    let listener = match TcpListener::bind(&addr).await {
        Ok(listener) => listener,
        Err(e) => {
            tracing::error!("Failed to bind metrics server on {}: {}", addr, e);
            return;
        }
    };

    if let Err(e) = axum::serve(listener, app).await {
        tracing::error!("Metrics server error: {}", e);
    }
}
