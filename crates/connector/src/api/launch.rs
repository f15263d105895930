//! Session launch endpoint — the launcher's delivery target.
//!
//! `POST /runtime/launch` receives the claimed join token and brings up
//! the per-call session. The handler is idempotent: a relaunch for a
//! live call reports `already_started` with a 2xx so the launcher marks
//! its job done instead of retrying forever.

use std::sync::Arc;

use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Json, Response};
use serde::Deserialize;
use uuid::Uuid;

use vx_speech::TranscriptEvent;

use crate::api::api_error;
use crate::session::{SessionHooks, SessionInput, StartOutcome};
use crate::state::AppState;
use crate::turn_flow::{self, TurnError};

#[derive(Debug, Deserialize)]
pub struct LaunchRequest {
    pub call_id: Uuid,
    pub tenant_id: Uuid,
    pub agent_id: Uuid,
    pub trace_id: Uuid,
    pub room: String,
    pub twilio_call_sid: String,
    pub livekit_url: String,
    pub agent_join_token: String,
}

pub async fn launch(State(state): State<AppState>, Json(req): Json<LaunchRequest>) -> Response {
    let input = SessionInput {
        call_id: req.call_id,
        tenant_id: req.tenant_id,
        agent_id: req.agent_id,
        trace_id: req.trace_id,
        room: req.room,
        twilio_call_sid: req.twilio_call_sid,
        livekit_url: req.livekit_url,
    };

    let hooks = build_hooks(&state);
    let outcome = match state
        .sessions
        .start(input, &req.agent_join_token, hooks)
        .await
    {
        Ok(outcome) => outcome,
        Err(e) => {
            tracing::error!(call_id = %req.call_id, error = %e, "session start failed");
            return api_error(StatusCode::INTERNAL_SERVER_ERROR, "session start failed");
        }
    };

    let status = match outcome {
        StartOutcome::Disabled => "disabled",
        StartOutcome::AlreadyStarted => "already_started",
        StartOutcome::Started => {
            speak_greeting(&state, req.call_id, req.agent_id).await;
            "started"
        }
    };

    Json(serde_json::json!({ "call_id": req.call_id, "status": status })).into_response()
}

/// Wire the session's callbacks into the rest of the connector.
fn build_hooks(state: &AppState) -> SessionHooks {
    // Barge-in also flushes the carrier's playback buffer, so the room
    // and the phone go quiet together.
    let bridges = state.bridges.clone();
    let on_barge_in = Arc::new(move |call_id: Uuid| {
        bridges.send_clear(call_id);
    });

    let turn_state = state.clone();
    let on_final_transcript = Arc::new(move |call_id: Uuid, event: TranscriptEvent| {
        let state = turn_state.clone();
        tokio::spawn(async move {
            handle_final_transcript(state, call_id, event).await;
        });
    });

    SessionHooks {
        on_barge_in: Some(on_barge_in),
        on_final_transcript: Some(on_final_transcript),
    }
}

/// Run the full turn for a final transcript: persist the caller
/// utterance, serialize through the per-call queue, and speak whatever
/// came out.
async fn handle_final_transcript(state: AppState, call_id: Uuid, event: TranscriptEvent) {
    let call = match state.calls.get(call_id).await {
        Ok(Some(call)) => call,
        Ok(None) => {
            tracing::warn!(call_id = %call_id, "transcript for unknown call");
            return;
        }
        Err(e) => {
            tracing::error!(call_id = %call_id, error = %e, "call lookup failed");
            return;
        }
    };

    if let Err(e) = state
        .calls
        .append_utterance(
            call_id,
            vx_store::calls::Speaker::Caller,
            &event.text,
            0,
            Some(event.confidence),
        )
        .await
    {
        tracing::error!(call_id = %call_id, error = %e, "caller utterance persist failed");
    }

    let turn = state
        .turns
        .run_turn(call_id, || async {
            Ok(turn_flow::run_user_turn(&state, &call, &event.text).await)
        })
        .await;

    let response_text = match turn {
        Err(e) => {
            tracing::debug!(call_id = %call_id, error = %e, "turn dropped");
            return;
        }
        Ok(Ok(outcome)) => outcome.response_text,
        Ok(Err(TurnError::Syntax(_))) => {
            crate::tools::command::syntax_hint(&state.config.tools.command_prefix)
        }
        Ok(Err(TurnError::RateLimited(_))) => {
            "Ha usado demasiadas herramientas en poco tiempo. Espere un momento, por favor."
                .to_owned()
        }
        Ok(Err(TurnError::LlmUnconfigured)) => {
            "Lo siento, el asistente no está disponible en este momento.".to_owned()
        }
        Ok(Err(TurnError::Internal(e))) => {
            tracing::error!(call_id = %call_id, error = %e, "turn failed");
            "Lo siento, ha ocurrido un error. ¿Puede repetirlo?".to_owned()
        }
    };

    if let Err(e) = turn_flow::agent_say(&state, call_id, &response_text).await {
        tracing::warn!(call_id = %call_id, error = %e, "agent speech failed");
    }
}

/// Speak the agent's configured greeting, when enabled and present.
async fn speak_greeting(state: &AppState, call_id: Uuid, agent_id: Uuid) {
    if !state.config.voice.auto_greeting_enabled {
        return;
    }
    let greeting = match state.calls.agent(agent_id).await {
        Ok(Some(agent)) => agent.greeting,
        Ok(None) => None,
        Err(e) => {
            tracing::warn!(agent_id = %agent_id, error = %e, "agent lookup failed");
            None
        }
    };
    if let Some(greeting) = greeting.filter(|g| !g.trim().is_empty()) {
        if let Err(e) = turn_flow::agent_say(state, call_id, &greeting).await {
            tracing::warn!(call_id = %call_id, error = %e, "greeting failed");
        }
    }
}
