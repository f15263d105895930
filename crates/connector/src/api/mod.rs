//! HTTP/WebSocket surface of the connector.

pub mod launch;
pub mod media_ws;
pub mod turn;

use axum::http::StatusCode;
use axum::response::{IntoResponse, Json, Response};
use axum::routing::{get, post};
use axum::Router;
use tower_http::trace::TraceLayer;

use crate::state::AppState;

/// Build a standardized JSON error response: `{ "error": "<message>" }`.
pub(crate) fn api_error(status: StatusCode, message: impl Into<String>) -> Response {
    (status, Json(serde_json::json!({ "error": message.into() }))).into_response()
}

pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/healthz", get(health))
        .route("/runtime/launch", post(launch::launch))
        .route(
            "/runtime/sessions/:call_id/user-turn",
            post(turn::user_turn),
        )
        .route("/twilio/media", get(media_ws::media_stream))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

async fn health(axum::extract::State(state): axum::extract::State<AppState>) -> impl IntoResponse {
    Json(serde_json::json!({
        "status": "ok",
        "active_sessions": state.sessions.active_count(),
    }))
}
