use std::sync::Arc;

use axum::{extract::State, response::Json, routing::get, Router};
use jukebox_core::Jukebox;
use serde::Serialize;
use tokio::net::TcpListener;
use tower::ServiceBuilder;
use tower_http::cors::CorsLayer;
use tracing::{error, info};

use crate::bridge::BridgeClient;

#[derive(Clone)]
struct HttpState {
    jukebox: Arc<Jukebox>,
    bridge: Arc<BridgeClient>,
}

#[derive(Serialize)]
struct Health {
    bridge_connected: bool,
    sessions: usize,
    live_panels: usize,
}

#[derive(Serialize)]
struct SessionInfo {
    guild: u64,
    idle_secs: u64,
    last_activity: String,
    panel: Option<String>,
    panel_live: bool,
}

fn router(state: HttpState) -> Router {
    Router::new()
        .route("/api/health", get(get_health))
        .route("/api/sessions", get(get_sessions))
        .layer(ServiceBuilder::new().layer(CorsLayer::permissive()))
        .with_state(state)
}

pub fn start_server(
    bind_address: String,
    port: u16,
    jukebox: Arc<Jukebox>,
    bridge: Arc<BridgeClient>,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let app = router(HttpState { jukebox, bridge });

        let addr = format!("{}:{}", bind_address, port);
        let listener = match TcpListener::bind(&addr).await {
            Ok(l) => l,
            Err(e) => {
                error!("Failed to bind HTTP server to {}: {}", addr, e);
                return;
            }
        };

        info!("HTTP status server listening on http://{}", addr);

        if let Err(e) = axum::serve(listener, app).await {
            error!("HTTP server error: {}", e);
        }
    })
}

async fn get_health(State(state): State<HttpState>) -> Json<Health> {
    let sessions = state.jukebox.registry().read().await.len();
    let live_panels = state.jukebox.slots().len().await;
    Json(Health {
        bridge_connected: state.bridge.is_connected().await,
        sessions,
        live_panels,
    })
}

async fn get_sessions(State(state): State<HttpState>) -> Json<Vec<SessionInfo>> {
    let mut sessions: Vec<SessionInfo> = state
        .jukebox
        .sessions()
        .await
        .into_iter()
        .map(|s| SessionInfo {
            guild: s.guild.0,
            idle_secs: s.idle.as_secs(),
            last_activity: s.last_activity_at.to_rfc3339(),
            panel: s.panel.map(|m| m.to_string()),
            panel_live: s.panel_live,
        })
        .collect();
    sessions.sort_by_key(|s| s.guild);
    Json(sessions)
}
