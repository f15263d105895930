//! Carrier voice webhook — where a telephone call enters the system.
//!
//! Auth is the carrier's request signature: `X-Twilio-Signature` is
//! base64(HMAC-SHA1(auth_token, url + sorted(key+value)...)) over the
//! form body, compared in constant time. With no auth token configured
//! the check is skipped (dev mode).
//!
//! A recognized number gets a call row, a `handoff_requested` event and
//! a `<Connect><Stream>` TwiML answer pointing the media at the
//! connector; an unknown number gets an apology and a hangup.

use std::collections::HashMap;

use axum::extract::{Form, State};
use axum::http::{header, HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use hmac::{Hmac, Mac};
use serde_json::json;
use sha1::Sha1;
use uuid::Uuid;

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;

use vx_domain::events::{self, HandoffRequested};
use vx_domain::token::constant_time_eq;

use crate::api::api_error;
use crate::state::AppState;
use crate::twiml;

type HmacSha1 = Hmac<Sha1>;

const NO_AGENT_MESSAGE: &str =
    "Lo sentimos, este número no tiene un asistente disponible en este momento. Adiós.";
const DEFAULT_GREETING: &str = "Hola, un momento mientras le conectamos con su asistente.";

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Signature
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Carrier webhook signature: HMAC-SHA1 over the full URL followed by
/// every form field as `key` + `value`, keys sorted, then base64.
pub fn compute_signature(auth_token: &str, url: &str, params: &HashMap<String, String>) -> String {
    let mut keys: Vec<&String> = params.keys().collect();
    keys.sort();

    let mut data = url.to_owned();
    for key in keys {
        data.push_str(key);
        data.push_str(&params[key]);
    }

    let mut mac =
        HmacSha1::new_from_slice(auth_token.as_bytes()).expect("HMAC accepts any key length");
    mac.update(data.as_bytes());
    BASE64.encode(mac.finalize().into_bytes())
}

/// The media-stream endpoint on the connector, as a WebSocket URL.
fn media_stream_url(connector_base: &str) -> String {
    let base = connector_base.trim_end_matches('/');
    let ws_base = if let Some(rest) = base.strip_prefix("https://") {
        format!("wss://{rest}")
    } else if let Some(rest) = base.strip_prefix("http://") {
        format!("ws://{rest}")
    } else {
        base.to_owned()
    };
    format!("{ws_base}/twilio/media")
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// POST /twilio/voice
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

pub async fn inbound_voice(
    State(state): State<AppState>,
    headers: HeaderMap,
    Form(params): Form<HashMap<String, String>>,
) -> Response {
    // 1. Verify the carrier signature when an auth token is configured.
    let auth_token = &state.config.carrier.auth_token;
    if !auth_token.is_empty() {
        let provided = headers
            .get("x-twilio-signature")
            .and_then(|v| v.to_str().ok())
            .unwrap_or("");
        let url = format!(
            "{}/twilio/voice",
            state.config.carrier.public_url.trim_end_matches('/')
        );
        let expected = compute_signature(auth_token, &url, &params);
        if !constant_time_eq(&expected, provided) {
            return api_error(StatusCode::FORBIDDEN, "invalid webhook signature");
        }
    }

    // 2. Required form fields.
    let (call_sid, from, to) = match (
        params.get("CallSid"),
        params.get("From"),
        params.get("To"),
    ) {
        (Some(sid), Some(from), Some(to)) if !sid.is_empty() => (sid, from, to),
        _ => return api_error(StatusCode::BAD_REQUEST, "missing CallSid/From/To"),
    };

    // 3. Which agent answers this number?
    let agent = match state.calls.agent_by_phone_number(to).await {
        Ok(Some(agent)) => agent,
        Ok(None) => {
            tracing::info!(to = %to, call_sid = %call_sid, "no agent for dialed number");
            return twiml_response(twiml::say_hangup(NO_AGENT_MESSAGE));
        }
        Err(e) => {
            tracing::error!(error = %e, "agent lookup failed");
            return api_error(StatusCode::INTERNAL_SERVER_ERROR, "internal error");
        }
    };

    // 4. Call row + handoff event.
    let room = format!("call-{call_sid}");
    let call = match state
        .calls
        .upsert_inbound(agent.tenant_id, agent.id, call_sid, &room)
        .await
    {
        Ok(call) => call,
        Err(e) => {
            tracing::error!(error = %e, "call upsert failed");
            return api_error(StatusCode::INTERNAL_SERVER_ERROR, "internal error");
        }
    };

    let trace_id = Uuid::new_v4();
    let request = HandoffRequested {
        trace_id,
        tenant_id: agent.tenant_id,
        agent_id: agent.id,
        twilio_call_sid: call_sid.clone(),
        room: room.clone(),
        from: from.clone(),
        to: to.clone(),
    };
    if let Err(e) = state
        .events
        .append(
            call.id,
            events::HANDOFF_REQUESTED,
            serde_json::to_value(&request).unwrap_or_else(|_| json!({})),
        )
        .await
    {
        tracing::error!(error = %e, "handoff_requested append failed");
        return api_error(StatusCode::INTERNAL_SERVER_ERROR, "internal error");
    }

    tracing::info!(
        call_id = %call.id,
        trace_id = %trace_id,
        call_sid = %call_sid,
        room = %room,
        "inbound call accepted"
    );

    // 5. Hand the media stream to the connector.
    let greeting = agent.greeting.as_deref().unwrap_or(DEFAULT_GREETING);
    let stream_url = media_stream_url(&state.config.connector.base_url);
    twiml_response(twiml::connect_stream(
        greeting,
        &stream_url,
        state.config.carrier.media_stream_token.as_deref(),
    ))
}

fn twiml_response(xml: String) -> Response {
    (
        StatusCode::OK,
        [(header::CONTENT_TYPE, "text/xml; charset=utf-8")],
        xml,
    )
        .into_response()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn params(pairs: &[(&str, &str)]) -> HashMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn signature_concatenates_sorted_params() {
        let form = params(&[
            ("To", "+15550123"),
            ("CallSid", "CA1"),
            ("From", "+15550100"),
        ]);
        let url = "https://gw.example/twilio/voice";
        let signature = compute_signature("tok", url, &form);

        // Independent construction: sorted keys are CallSid, From, To.
        let mut mac = HmacSha1::new_from_slice(b"tok").unwrap();
        mac.update(
            b"https://gw.example/twilio/voiceCallSidCA1From+15550100To+15550123",
        );
        let expected = BASE64.encode(mac.finalize().into_bytes());

        assert_eq!(signature, expected);
    }

    #[test]
    fn signature_changes_with_token_and_body() {
        let form = params(&[("CallSid", "CA1")]);
        let url = "https://gw.example/twilio/voice";
        let a = compute_signature("tok", url, &form);
        let b = compute_signature("other", url, &form);
        let c = compute_signature("tok", url, &params(&[("CallSid", "CA2")]));
        assert_ne!(a, b);
        assert_ne!(a, c);
    }

    #[test]
    fn media_stream_url_switches_scheme() {
        assert_eq!(
            media_stream_url("http://localhost:3310"),
            "ws://localhost:3310/twilio/media"
        );
        assert_eq!(
            media_stream_url("https://connector.example/"),
            "wss://connector.example/twilio/media"
        );
    }
}
