//! One-shot dispatch claim endpoint.
//!
//! `POST /v1/runtime/dispatches/:id/claim` — the single channel through
//! which a join token leaves the database. The caller presents a
//! short-TTL service credential scoped to the dispatch's tenant; the
//! claim itself is atomic in the store, so of two concurrent claimers
//! exactly one receives the token and the other a 409.

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Json, Response};
use uuid::Uuid;

use vx_domain::token;
use vx_store::dispatches::ClaimError;

use crate::api::api_error;
use crate::state::AppState;

pub async fn claim(
    State(state): State<AppState>,
    Path(dispatch_id): Path<Uuid>,
    headers: axum::http::HeaderMap,
) -> Response {
    // Authorize against the owning tenant before consuming the one-shot.
    let service_secret = &state.config.control.service_secret;
    if !service_secret.is_empty() {
        let tenant_id = match state.dispatches.tenant_of(dispatch_id).await {
            Ok(Some(tenant)) => tenant,
            Ok(None) => return api_error(StatusCode::NOT_FOUND, "dispatch not found"),
            Err(e) => {
                tracing::error!(error = %e, "dispatch lookup failed");
                return api_error(StatusCode::INTERNAL_SERVER_ERROR, "internal error");
            }
        };

        let bearer = headers
            .get("authorization")
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.strip_prefix("Bearer "))
            .unwrap_or("");
        if let Err(e) = token::verify_service_token(service_secret, bearer, tenant_id) {
            tracing::warn!(dispatch_id = %dispatch_id, error = %e, "claim credential rejected");
            return api_error(StatusCode::UNAUTHORIZED, "invalid service credential");
        }
    }

    match state.dispatches.claim(dispatch_id).await {
        Ok(Ok(dispatch)) => {
            tracing::info!(
                dispatch_id = %dispatch.id,
                call_id = %dispatch.call_id,
                trace_id = %dispatch.trace_id,
                "dispatch claimed"
            );
            Json(serde_json::json!({
                "dispatch": {
                    "id": dispatch.id,
                    "call_id": dispatch.call_id,
                    "trace_id": dispatch.trace_id,
                    "tenant_id": dispatch.tenant_id,
                    "agent_id": dispatch.agent_id,
                    "twilio_call_sid": dispatch.twilio_call_sid,
                    "room": dispatch.room,
                    "join_token": dispatch.join_token,
                    "claimed_at": dispatch.claimed_at,
                }
            }))
            .into_response()
        }
        Ok(Err(ClaimError::NotFound)) => api_error(StatusCode::NOT_FOUND, "dispatch not found"),
        Ok(Err(ClaimError::Unavailable)) => {
            api_error(StatusCode::CONFLICT, "dispatch_unavailable")
        }
        Ok(Err(ClaimError::Expired)) => api_error(StatusCode::GONE, "dispatch_expired"),
        Err(e) => {
            tracing::error!(error = %e, "dispatch claim failed");
            api_error(StatusCode::INTERNAL_SERVER_ERROR, "internal error")
        }
    }
}
