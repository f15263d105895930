//! Text user-turn endpoint.
//!
//! `POST /runtime/sessions/:call_id/user-turn` runs exactly the voice
//! turn pipeline over typed text — the serializer, command layer and
//! LLM included — and speaks the response into the live session. Used
//! by operator tooling and integration tests.

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Json, Response};
use serde::Deserialize;
use uuid::Uuid;

use vx_store::calls::Speaker;

use crate::api::api_error;
use crate::state::AppState;
use crate::tools::command::syntax_hint;
use crate::turn_flow::{self, TurnError};

const MAX_TEXT_CHARS: usize = 4000;

#[derive(Debug, Deserialize)]
pub struct UserTurnRequest {
    pub text: String,
}

pub async fn user_turn(
    State(state): State<AppState>,
    Path(call_id): Path<Uuid>,
    Json(req): Json<UserTurnRequest>,
) -> Response {
    let text = req.text.trim();
    if text.is_empty() || text.chars().count() > MAX_TEXT_CHARS {
        return api_error(
            StatusCode::BAD_REQUEST,
            format!("text must be 1–{MAX_TEXT_CHARS} characters"),
        );
    }

    if !state.sessions.is_active(call_id) {
        return api_error(StatusCode::NOT_FOUND, "no active session for this call");
    }
    let call = match state.calls.get(call_id).await {
        Ok(Some(call)) => call,
        Ok(None) => return api_error(StatusCode::NOT_FOUND, "unknown call"),
        Err(e) => {
            tracing::error!(error = %e, "call lookup failed");
            return api_error(StatusCode::INTERNAL_SERVER_ERROR, "internal error");
        }
    };

    if let Err(e) = state
        .calls
        .append_utterance(call_id, Speaker::Caller, text, 0, None)
        .await
    {
        tracing::error!(call_id = %call_id, error = %e, "caller utterance persist failed");
    }

    let text_owned = text.to_owned();
    let turn = state
        .turns
        .run_turn(call_id, || async {
            Ok(turn_flow::run_user_turn(&state, &call, &text_owned).await)
        })
        .await;

    let outcome = match turn {
        Err(_) => return api_error(StatusCode::CONFLICT, "call is closing"),
        Ok(Err(TurnError::Syntax(_))) => {
            return api_error(
                StatusCode::BAD_REQUEST,
                syntax_hint(&state.config.tools.command_prefix),
            );
        }
        Ok(Err(TurnError::RateLimited(_))) => {
            return api_error(
                StatusCode::TOO_MANY_REQUESTS,
                "tool executions rate limited for this call",
            );
        }
        Ok(Err(TurnError::LlmUnconfigured)) => {
            return api_error(
                StatusCode::SERVICE_UNAVAILABLE,
                "no LLM configured and mock mode disabled",
            );
        }
        Ok(Err(TurnError::Internal(e))) => {
            tracing::error!(call_id = %call_id, error = %e, "turn failed");
            return api_error(StatusCode::INTERNAL_SERVER_ERROR, "internal error");
        }
        Ok(Ok(outcome)) => outcome,
    };

    if let Err(e) = turn_flow::agent_say(&state, call_id, &outcome.response_text).await {
        tracing::warn!(call_id = %call_id, error = %e, "agent speech failed");
    }

    Json(serde_json::json!({
        "call_id": call_id,
        "trace_id": state.sessions.trace_of(call_id),
        "mode": outcome.mode,
        "response_text": outcome.response_text,
        "tool_execution": outcome.tool_execution,
    }))
    .into_response()
}
