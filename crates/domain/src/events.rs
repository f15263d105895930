//! Call-event vocabulary.
//!
//! Every stage of the handoff pipeline and the per-call session appends
//! one of these typed events to the call log. Workers claim events by
//! type string; payloads are serialized to the `payload` JSON column.
//!
//! Join tokens are written to exactly one place — the dispatch row — and
//! must never appear in any event payload. Payload consumers may dump
//! events into logs and operator UIs verbatim.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Event type strings
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

pub const HANDOFF_REQUESTED: &str = "handoff_requested";
pub const HANDOFF_INVALID_PAYLOAD: &str = "handoff_invalid_payload";
pub const HANDOFF_DISPATCHED: &str = "handoff_dispatched";
pub const HANDOFF_FAILED: &str = "handoff_failed";
pub const DISPATCH_CLAIMED: &str = "dispatch_claimed";
pub const AGENT_SESSION_BOOTSTRAP_READY: &str = "agent_session_bootstrap_ready";
pub const AGENT_SESSION_LAUNCH_SUCCEEDED: &str = "agent_session_launch_succeeded";
pub const AGENT_SESSION_LAUNCH_FAILED: &str = "agent_session_launch_failed";
pub const TOOL_EXECUTION_SUCCEEDED: &str = "tool_execution_succeeded";
pub const TOOL_EXECUTION_FAILED: &str = "tool_execution_failed";
pub const CALL_ENDED: &str = "call_ended";

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Payloads
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Appended by the gateway when the carrier webhook accepts a call.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HandoffRequested {
    pub trace_id: Uuid,
    pub tenant_id: Uuid,
    pub agent_id: Uuid,
    pub twilio_call_sid: String,
    pub room: String,
    pub from: String,
    pub to: String,
}

/// Appended by the handoff worker once a dispatch row holds the join
/// token. Carries the dispatch id only — never the token itself.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HandoffDispatched {
    pub dispatch_id: Uuid,
    pub dispatch_expires_at: DateTime<Utc>,
    pub trace_id: Uuid,
    pub tenant_id: Uuid,
    pub agent_id: Uuid,
    pub room: String,
    pub livekit_url: String,
}

/// Appended on any handoff stage failure (room create, token mint,
/// dispatch upsert).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HandoffFailed {
    pub trace_id: Option<Uuid>,
    pub attempts: i32,
    pub will_retry: bool,
    pub error: String,
}

/// Appended by the dispatch claimer after the one-shot claim succeeds.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DispatchClaimed {
    pub dispatch_id: Uuid,
    pub trace_id: Uuid,
    pub claimed_at: DateTime<Utc>,
}

/// Everything the connector needs to bootstrap the agent session,
/// minus the join token (which travels only in the launch job row).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BootstrapReady {
    pub dispatch_id: Uuid,
    pub launch_job_id: Uuid,
    pub trace_id: Uuid,
    pub room: String,
    pub livekit_url: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LaunchSucceeded {
    pub launch_job_id: Uuid,
    pub trace_id: Uuid,
    pub attempts: i32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LaunchFailed {
    pub launch_job_id: Uuid,
    pub trace_id: Uuid,
    pub attempts: i32,
    pub will_retry: bool,
    pub error: String,
}

/// Outcome of one tool invocation, success or failure.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolExecutionEvent {
    pub execution_id: Uuid,
    pub tool_id: Uuid,
    pub tool_name: String,
    pub status: String,
    pub latency_ms: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_code: Option<String>,
}

/// Appended by the connector when the carrier media stream stops. The
/// worker ingestion loop folds this into the call row.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CallEnded {
    pub trace_id: Option<Uuid>,
    pub outcome: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub handoff_reason: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dispatched_payload_has_no_token_field() {
        let payload = HandoffDispatched {
            dispatch_id: Uuid::new_v4(),
            dispatch_expires_at: Utc::now(),
            trace_id: Uuid::new_v4(),
            tenant_id: Uuid::new_v4(),
            agent_id: Uuid::new_v4(),
            room: "call-CA1".into(),
            livekit_url: "wss://rooms.example".into(),
        };
        let json = serde_json::to_string(&payload).unwrap();
        assert!(!json.contains("token"));
        assert!(json.contains("dispatch_id"));
    }

    #[test]
    fn handoff_requested_round_trips() {
        let payload = HandoffRequested {
            trace_id: Uuid::new_v4(),
            tenant_id: Uuid::new_v4(),
            agent_id: Uuid::new_v4(),
            twilio_call_sid: "CA1".into(),
            room: "call-CA1".into(),
            from: "+15550100".into(),
            to: "+15550123".into(),
        };
        let back: HandoffRequested =
            serde_json::from_value(serde_json::to_value(&payload).unwrap()).unwrap();
        assert_eq!(back.twilio_call_sid, "CA1");
        assert_eq!(back.room, "call-CA1");
    }
}
