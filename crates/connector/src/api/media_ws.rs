//! Carrier media-stream WebSocket.
//!
//! Inbound JSON frames: `connected`, `start` (binds stream-sid ↔ call
//! and carries the optional shared token), `media` (base64 μ-law @
//! 8 kHz) and `stop`. Outbound frames are produced by the bridge
//! registry: `media` for agent audio and `clear` on barge-in.
//!
//! Auth: the shared token may arrive as `?token=` on the upgrade URL or
//! as `customParameters.token` in the start frame; either one must
//! match `carrier.media_stream_token` when that is configured.

use axum::extract::ws::{Message, WebSocket};
use axum::extract::{Query, State, WebSocketUpgrade};
use axum::response::IntoResponse;
use futures_util::{SinkExt, StreamExt};
use serde::Deserialize;
use serde_json::Value;
use tokio::sync::mpsc;
use uuid::Uuid;

use vx_domain::token::constant_time_eq;
use vx_media::{carrier, resample, CARRIER_SAMPLE_RATE};

use crate::state::AppState;

#[derive(Debug, Deserialize)]
pub struct MediaQuery {
    pub token: Option<String>,
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Frame parsing
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, PartialEq)]
enum CarrierFrame {
    Connected,
    Start {
        stream_sid: String,
        call_sid: String,
        token: Option<String>,
    },
    Media {
        payload_b64: String,
    },
    Stop,
    /// Unknown or malformed — ignored.
    Other,
}

fn parse_frame(text: &str) -> CarrierFrame {
    let value: Value = match serde_json::from_str(text) {
        Ok(v) => v,
        Err(_) => return CarrierFrame::Other,
    };
    match value.get("event").and_then(Value::as_str) {
        Some("connected") => CarrierFrame::Connected,
        Some("start") => {
            let stream_sid = value
                .get("streamSid")
                .or_else(|| value.pointer("/start/streamSid"))
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_owned();
            let call_sid = value
                .pointer("/start/callSid")
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_owned();
            let token = value
                .pointer("/start/customParameters/token")
                .and_then(Value::as_str)
                .map(str::to_owned);
            if stream_sid.is_empty() || call_sid.is_empty() {
                return CarrierFrame::Other;
            }
            CarrierFrame::Start {
                stream_sid,
                call_sid,
                token,
            }
        }
        Some("media") => match value.pointer("/media/payload").and_then(Value::as_str) {
            Some(payload) => CarrierFrame::Media {
                payload_b64: payload.to_owned(),
            },
            None => CarrierFrame::Other,
        },
        Some("stop") => CarrierFrame::Stop,
        _ => CarrierFrame::Other,
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Handler
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// GET /twilio/media — upgrade to WebSocket.
pub async fn media_stream(
    ws: WebSocketUpgrade,
    State(state): State<AppState>,
    Query(query): Query<MediaQuery>,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_socket(socket, state, query.token))
}

async fn handle_socket(socket: WebSocket, state: AppState, query_token: Option<String>) {
    let (mut ws_tx, mut ws_rx) = socket.split();

    // Outbound frames flow through a channel so the session and hooks
    // never touch the socket directly.
    let (outbound_tx, mut outbound_rx) = mpsc::unbounded_channel::<String>();
    let writer = tokio::spawn(async move {
        while let Some(frame) = outbound_rx.recv().await {
            if ws_tx.send(Message::Text(frame)).await.is_err() {
                break;
            }
        }
    });

    // Query-token auth can pass before the start frame arrives.
    let expected_token = state.config.carrier.media_stream_token.clone();
    let mut authed = match (&expected_token, &query_token) {
        (None, _) => true,
        (Some(expected), Some(provided)) => constant_time_eq(expected, provided),
        (Some(_), None) => false,
    };

    let mut bound_call: Option<Uuid> = None;
    let stt_rate = state.config.stt.sample_rate;

    while let Some(message) = ws_rx.next().await {
        let text = match message {
            Ok(Message::Text(text)) => text,
            Ok(Message::Close(_)) | Err(_) => break,
            Ok(_) => continue,
        };

        match parse_frame(&text) {
            CarrierFrame::Connected | CarrierFrame::Other => {}
            CarrierFrame::Start {
                stream_sid,
                call_sid,
                token,
            } => {
                if !authed {
                    let matches = match (&expected_token, &token) {
                        (Some(expected), Some(provided)) => constant_time_eq(expected, provided),
                        _ => false,
                    };
                    if !matches {
                        tracing::warn!(call_sid = %call_sid, "media stream token rejected");
                        break;
                    }
                    authed = true;
                }

                let call = match state.calls.call_by_sid(&call_sid).await {
                    Ok(Some(call)) => call,
                    Ok(None) => {
                        tracing::warn!(call_sid = %call_sid, "media stream for unknown call");
                        break;
                    }
                    Err(e) => {
                        tracing::error!(error = %e, "call lookup failed");
                        break;
                    }
                };

                tracing::info!(
                    call_id = %call.id,
                    stream_sid = %stream_sid,
                    "media stream bound"
                );
                state
                    .bridges
                    .bind(call.id, stream_sid, outbound_tx.clone());
                bound_call = Some(call.id);
            }
            CarrierFrame::Media { payload_b64 } => {
                let Some(call_id) = bound_call else { continue };
                let narrow = match carrier::decode_inbound(&payload_b64) {
                    Ok(samples) => samples,
                    Err(e) => {
                        tracing::debug!(error = %e, "bad media payload");
                        continue;
                    }
                };
                let wide = resample::resample_linear(&narrow, CARRIER_SAMPLE_RATE, stt_rate);
                // The session may not be launched yet; early audio is
                // dropped rather than failing the stream.
                let _ = state.sessions.ingest_inbound_audio(call_id, &wide);
            }
            CarrierFrame::Stop => break,
        }
    }

    if let Some(call_id) = bound_call {
        teardown(&state, call_id).await;
    }
    writer.abort();
}

/// Close out a call when its media stream ends: unbind the bridge,
/// drop queued turns, stop the session and record the terminal event.
async fn teardown(state: &AppState, call_id: Uuid) {
    let trace_id = state.sessions.trace_of(call_id);

    state.bridges.unbind(call_id);
    state.turns.close(call_id);
    if state.sessions.is_active(call_id) {
        if let Err(e) = state.sessions.stop(call_id) {
            tracing::warn!(call_id = %call_id, error = %e, "session stop failed");
        }
    }

    let ended = vx_domain::events::CallEnded {
        trace_id,
        outcome: Some("resolved".into()),
        handoff_reason: None,
    };
    if let Err(e) = state
        .events
        .append(
            call_id,
            vx_domain::events::CALL_ENDED,
            serde_json::to_value(&ended).unwrap_or_default(),
        )
        .await
    {
        tracing::error!(call_id = %call_id, error = %e, "call_ended append failed");
    }
    tracing::info!(call_id = %call_id, "media stream closed");
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_start_frame_with_custom_parameters() {
        let frame = parse_frame(
            r#"{
                "event": "start",
                "streamSid": "MZ1",
                "start": {
                    "callSid": "CA1",
                    "customParameters": { "token": "s3cret" }
                }
            }"#,
        );
        assert_eq!(
            frame,
            CarrierFrame::Start {
                stream_sid: "MZ1".into(),
                call_sid: "CA1".into(),
                token: Some("s3cret".into()),
            }
        );
    }

    #[test]
    fn parses_media_and_stop_frames() {
        assert_eq!(
            parse_frame(r#"{"event":"media","media":{"payload":"AAAA"}}"#),
            CarrierFrame::Media {
                payload_b64: "AAAA".into()
            }
        );
        assert_eq!(parse_frame(r#"{"event":"stop"}"#), CarrierFrame::Stop);
        assert_eq!(parse_frame(r#"{"event":"connected"}"#), CarrierFrame::Connected);
    }

    #[test]
    fn malformed_frames_are_other() {
        assert_eq!(parse_frame("not json"), CarrierFrame::Other);
        assert_eq!(parse_frame(r#"{"event":"start"}"#), CarrierFrame::Other);
        assert_eq!(parse_frame(r#"{"event":"media","media":{}}"#), CarrierFrame::Other);
        assert_eq!(parse_frame(r#"{"no_event":true}"#), CarrierFrame::Other);
    }
}
