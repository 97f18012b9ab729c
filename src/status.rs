// =============================================================================
// Status API — read-only Axum surface over the shared bot state
// =============================================================================
//
// Thin driver over the core: nothing here can place, cancel, or modify
// anything. It exposes the session counters, the last cycle summary, and the
// advisory decision/position lists for a dashboard to poll.
//
// CORS is configured permissively for development use.
// =============================================================================

use std::sync::Arc;

use axum::{
    extract::State,
    response::IntoResponse,
    routing::get,
    Json, Router,
};
use serde::Serialize;
use tower_http::cors::{Any, CorsLayer};
use tracing::info;

use crate::state::BotState;

/// Build the read-only router.
pub fn router(state: Arc<BotState>) -> Router {
    let cors = CorsLayer::new().allow_origin(Any).allow_methods(Any).allow_headers(Any);

    Router::new()
        .route("/api/v1/health", get(health))
        .route("/api/v1/status", get(status))
        .route("/api/v1/positions", get(positions))
        .route("/api/v1/decisions", get(decisions))
        .layer(cors)
        .with_state(state)
}

/// Bind and serve until the process exits. Spawned as a background task; a
/// bind failure is logged, not fatal — the trading loop works without it.
pub async fn serve(state: Arc<BotState>, bind_addr: String) {
    let listener = match tokio::net::TcpListener::bind(&bind_addr).await {
        Ok(l) => l,
        Err(e) => {
            tracing::warn!(addr = %bind_addr, error = %e, "status API failed to bind — continuing without it");
            return;
        }
    };
    info!(addr = %bind_addr, "status API listening");
    if let Err(e) = axum::serve(listener, router(state)).await {
        tracing::warn!(error = %e, "status API terminated");
    }
}

// =============================================================================
// Handlers
// =============================================================================

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    server_time: i64,
}

async fn health() -> impl IntoResponse {
    Json(HealthResponse {
        status: "ok",
        server_time: chrono::Utc::now().timestamp_millis(),
    })
}

#[derive(Serialize)]
struct StatusResponse {
    session: crate::state::SessionInfo,
    elapsed_secs: u64,
    last_cycle: Option<crate::state::CycleSummary>,
}

async fn status(State(state): State<Arc<BotState>>) -> impl IntoResponse {
    Json(StatusResponse {
        session: state.session_info(),
        elapsed_secs: state.elapsed_secs(),
        last_cycle: state.last_cycle(),
    })
}

async fn positions(State(state): State<Arc<BotState>>) -> impl IntoResponse {
    Json(state.positions())
}

#[derive(Serialize)]
struct DecisionsResponse {
    decisions: Vec<crate::decision::Decision>,
    outcomes: Vec<crate::executor::ExecutionOutcome>,
}

async fn decisions(State(state): State<Arc<BotState>>) -> impl IntoResponse {
    Json(DecisionsResponse {
        decisions: state.decisions(),
        outcomes: state.outcomes(),
    })
}
