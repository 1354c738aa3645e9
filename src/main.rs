//! CodeRoom Server - Real-Time Collaborative Code Editing
//!
//! A collaborative session backend using:
//! - Axum with WebSocket for per-connection session handling
//! - Sled embedded database for file content, version history and cursors
//! - JWT credential verification at the session handshake
//! - Tagged JSON protocol with room-wide broadcast semantics

use anyhow::Context;
use axum::{
    extract::{
        ws::WebSocketUpgrade,
        Path, State,
    },
    http::Method,
    response::IntoResponse,
    routing::get,
    Json, Router,
};
use serde::Serialize;
use std::{net::SocketAddr, sync::Arc};
use tower_http::{
    cors::{Any, CorsLayer},
    trace::TraceLayer,
};
use tracing::info;

mod auth;
mod history;
mod room;
mod session;
mod storage;

use auth::{IdentityVerifier, JwtVerifier};
use history::VersionHistory;
use room::RoomRegistry;
use session::handler::handle_session;
use storage::{RoomStore, StorageConfig};

// ============================================================================
// APPLICATION STATE
// ============================================================================

/// Shared application state
pub struct AppState {
    /// Live session registry, room → identity → handle
    pub registry: RoomRegistry,
    /// Persistent room store
    pub store: Arc<RoomStore>,
    /// Version ring access over the store
    pub history: VersionHistory,
    /// Credential verification seam
    pub verifier: Arc<dyn IdentityVerifier>,
    /// Server start time
    started_at: std::time::Instant,
}

impl AppState {
    pub fn new(store: RoomStore, verifier: Arc<dyn IdentityVerifier>) -> Self {
        let store = Arc::new(store);
        Self {
            registry: RoomRegistry::new(),
            history: VersionHistory::new(store.clone()),
            store,
            verifier,
            started_at: std::time::Instant::now(),
        }
    }
}

// ============================================================================
// API TYPES
// ============================================================================

#[derive(Debug, Serialize)]
struct HealthResponse {
    status: String,
    version: String,
    uptime_seconds: u64,
    active_rooms: usize,
    active_sessions: usize,
}

#[derive(Debug, Serialize)]
struct CreateRoomResponse {
    room_id: String,
}

// ============================================================================
// HTTP HANDLERS
// ============================================================================

/// Health check endpoint
async fn health_check(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    Json(HealthResponse {
        status: "healthy".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        uptime_seconds: state.started_at.elapsed().as_secs(),
        active_rooms: state.registry.room_count(),
        active_sessions: state.registry.session_count(),
    })
}

/// Mint a fresh room identifier. The room itself materializes on first join.
async fn create_room() -> impl IntoResponse {
    let room_id = uuid::Uuid::new_v4().to_string();
    info!("Minted room id {}", room_id);
    Json(CreateRoomResponse { room_id })
}

// ============================================================================
// WEBSOCKET HANDLER
// ============================================================================

/// WebSocket upgrade handler
async fn ws_handler(
    ws: WebSocketUpgrade,
    Path((room_id, client_id)): Path<(String, String)>,
    State(state): State<Arc<AppState>>,
) -> impl IntoResponse {
    info!("WebSocket upgrade request for room {}", room_id);
    ws.on_upgrade(move |socket| handle_session(socket, room_id, client_id, state))
}

// ============================================================================
// MAIN ENTRY POINT
// ============================================================================

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "coderoom_server=info,tower_http=info".into()),
        )
        .init();

    // Load environment variables
    dotenvy::dotenv().ok();

    // Initialize storage
    let storage_path =
        std::env::var("STORAGE_PATH").unwrap_or_else(|_| "./data/coderoom.sled".to_string());

    info!("Initializing storage at: {}", storage_path);
    let store =
        RoomStore::open(StorageConfig::new(&storage_path)).context("Failed to open storage")?;

    // Credential verification
    let verifier = Arc::new(JwtVerifier::from_env().context("AUTH_SECRET must be set")?);

    // Create application state
    let state = Arc::new(AppState::new(store, verifier));

    // Set up CORS
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
        .allow_headers(Any);

    // Build router
    let app = Router::new()
        .route("/health", get(health_check))
        .route("/create-room", get(create_room))
        .route("/ws/:room_id/:client_id", get(ws_handler))
        .with_state(state)
        .layer(cors)
        .layer(TraceLayer::new_for_http());

    // Start server
    let port: u16 = std::env::var("PORT")
        .ok()
        .and_then(|p| p.parse().ok())
        .unwrap_or(8000);

    let addr = SocketAddr::from(([0, 0, 0, 0], port));

    info!("CodeRoom server v{} starting", env!("CARGO_PKG_VERSION"));
    info!("   Listening on: http://{}", addr);
    info!("   WebSocket: ws://{}/ws/:room_id/:client_id", addr);
    info!("   Health check: http://{}/health", addr);

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .context("Failed to bind to address")?;

    axum::serve(listener, app).await.context("Server error")?;
    Ok(())
}
