//! Router assembly.
//!
//! SYSTEM CONTEXT
//! ==============
//! Binds the websocket endpoint, the poll history REST surface and the
//! health checks under a single Axum router. CORS is open so browser
//! clients served from another origin can reach both.

pub mod polls;
pub mod ws;

use axum::Json;
use axum::Router;
use axum::extract::State;
use axum::http::StatusCode;
use axum::routing::get;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::state::AppState;

pub fn app(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/", get(health))
        .route("/healthz", get(healthz))
        .route("/api/ws", get(ws::handle_ws))
        .route("/api/polls/history", get(polls::poll_history))
        .route("/api/polls/{poll_id}/answers/{user_id}", get(polls::answered))
        .route("/api/rooms/{room_id}/stats", get(polls::room_stats))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// `GET /` - liveness document with the server clock in epoch millis.
async fn health(State(state): State<AppState>) -> Json<serde_json::Value> {
    Json(serde_json::json!({
        "message": "Polling App Server is running!",
        "status": "OK",
        "timestamp": state.now(),
    }))
}

async fn healthz() -> StatusCode {
    StatusCode::OK
}

#[cfg(test)]
#[path = "mod_test.rs"]
mod tests;
