//! Calls, utterances and tool executions.

use chrono::{DateTime, Utc};
use serde_json::Value;
use sqlx::{FromRow, PgPool};
use uuid::Uuid;

use vx_domain::Result;

use crate::db_err;

#[derive(Debug, Clone, Copy, PartialEq, Eq, sqlx::Type)]
#[sqlx(type_name = "call_outcome", rename_all = "lowercase")]
pub enum CallOutcome {
    Resolved,
    Handoff,
}

#[derive(Debug, Clone, FromRow)]
pub struct Call {
    pub id: Uuid,
    pub tenant_id: Uuid,
    pub agent_id: Uuid,
    pub twilio_call_sid: String,
    pub room: String,
    pub started_at: DateTime<Utc>,
    pub ended_at: Option<DateTime<Utc>>,
    pub outcome: Option<CallOutcome>,
    pub handoff_reason: Option<String>,
    pub legal_hold: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, sqlx::Type)]
#[sqlx(type_name = "speaker", rename_all = "lowercase")]
pub enum Speaker {
    Caller,
    Agent,
    System,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, sqlx::Type)]
#[sqlx(type_name = "tool_exec_status", rename_all = "lowercase")]
pub enum ToolExecStatus {
    Success,
    Error,
    Timeout,
}

#[derive(Debug, Clone, FromRow)]
pub struct Utterance {
    pub id: Uuid,
    pub call_id: Uuid,
    pub speaker: Speaker,
    pub text: String,
    pub start_ms: i64,
    pub end_ms: i64,
    pub confidence: Option<f64>,
}

/// An agent reachable by phone number, as the webhook needs it.
#[derive(Debug, Clone, FromRow)]
pub struct AgentProfile {
    pub id: Uuid,
    pub tenant_id: Uuid,
    pub name: String,
    pub greeting: Option<String>,
    pub published_version_id: Option<Uuid>,
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Utterance timing
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Gap reserved before the next caller (or system) utterance.
const CALLER_GAP_MS: i64 = 100;
/// Agent playback is scheduled slightly later to avoid overlapping the
/// tail of the caller's utterance.
const AGENT_GAP_MS: i64 = 120;

/// Compute the `[start, end)` window for the next utterance of a call,
/// given the latest `end_ms` persisted so far. Keeps `end_ms` strictly
/// increasing per call.
pub fn utterance_window(prev_end_ms: i64, speaker: Speaker, duration_ms: i64) -> (i64, i64) {
    let gap = match speaker {
        Speaker::Agent => AGENT_GAP_MS,
        Speaker::Caller | Speaker::System => CALLER_GAP_MS,
    };
    let start = prev_end_ms + gap;
    (start, start + duration_ms.max(0))
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Store
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Clone)]
pub struct CallStore {
    pool: PgPool,
}

impl CallStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Create the call row for an accepted webhook. The carrier retries
    /// webhooks, so this upserts on the call SID and returns the same
    /// row each time.
    pub async fn upsert_inbound(
        &self,
        tenant_id: Uuid,
        agent_id: Uuid,
        twilio_call_sid: &str,
        room: &str,
    ) -> Result<Call> {
        sqlx::query_as::<_, Call>(
            r#"
            INSERT INTO calls (tenant_id, agent_id, twilio_call_sid, room)
            VALUES ($1, $2, $3, $4)
            ON CONFLICT (twilio_call_sid) DO UPDATE SET room = EXCLUDED.room
            RETURNING id, tenant_id, agent_id, twilio_call_sid, room,
                      started_at, ended_at, outcome, handoff_reason, legal_hold
            "#,
        )
        .bind(tenant_id)
        .bind(agent_id)
        .bind(twilio_call_sid)
        .bind(room)
        .fetch_one(&self.pool)
        .await
        .map_err(db_err)
    }

    pub async fn call_by_sid(&self, twilio_call_sid: &str) -> Result<Option<Call>> {
        sqlx::query_as::<_, Call>(
            r#"
            SELECT id, tenant_id, agent_id, twilio_call_sid, room,
                   started_at, ended_at, outcome, handoff_reason, legal_hold
            FROM calls WHERE twilio_call_sid = $1
            "#,
        )
        .bind(twilio_call_sid)
        .fetch_optional(&self.pool)
        .await
        .map_err(db_err)
    }

    pub async fn get(&self, call_id: Uuid) -> Result<Option<Call>> {
        sqlx::query_as::<_, Call>(
            r#"
            SELECT id, tenant_id, agent_id, twilio_call_sid, room,
                   started_at, ended_at, outcome, handoff_reason, legal_hold
            FROM calls WHERE id = $1
            "#,
        )
        .bind(call_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(db_err)
    }

    /// Close the call. Only the first close wins; later terminal events
    /// for the same call are no-ops.
    pub async fn finish(
        &self,
        call_id: Uuid,
        outcome: Option<CallOutcome>,
        handoff_reason: Option<&str>,
    ) -> Result<bool> {
        let result = sqlx::query(
            r#"
            UPDATE calls
            SET ended_at = now(), outcome = $2, handoff_reason = $3
            WHERE id = $1 AND ended_at IS NULL
            "#,
        )
        .bind(call_id)
        .bind(outcome)
        .bind(handoff_reason)
        .execute(&self.pool)
        .await
        .map_err(db_err)?;
        Ok(result.rows_affected() > 0)
    }

    pub async fn agent_by_phone_number(&self, number: &str) -> Result<Option<AgentProfile>> {
        sqlx::query_as::<_, AgentProfile>(
            r#"
            SELECT id, tenant_id, name, greeting, published_version_id
            FROM agents WHERE phone_number = $1
            "#,
        )
        .bind(number)
        .fetch_optional(&self.pool)
        .await
        .map_err(db_err)
    }

    pub async fn agent(&self, agent_id: Uuid) -> Result<Option<AgentProfile>> {
        sqlx::query_as::<_, AgentProfile>(
            r#"
            SELECT id, tenant_id, name, greeting, published_version_id
            FROM agents WHERE id = $1
            "#,
        )
        .bind(agent_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(db_err)
    }

    // ── Utterances ──────────────────────────────────────────────────

    /// Persist the next utterance, computing its window from the last
    /// persisted `end_ms`. The read and insert share a transaction so
    /// concurrent appends for one call cannot interleave windows.
    pub async fn append_utterance(
        &self,
        call_id: Uuid,
        speaker: Speaker,
        text: &str,
        duration_ms: i64,
        confidence: Option<f64>,
    ) -> Result<Utterance> {
        let mut tx = self.pool.begin().await.map_err(db_err)?;

        let prev_end: i64 = sqlx::query_scalar(
            "SELECT COALESCE(MAX(end_ms), 0) FROM utterances WHERE call_id = $1",
        )
        .bind(call_id)
        .fetch_one(&mut *tx)
        .await
        .map_err(db_err)?;

        let (start_ms, end_ms) = utterance_window(prev_end, speaker, duration_ms);

        let utterance = sqlx::query_as::<_, Utterance>(
            r#"
            INSERT INTO utterances (call_id, speaker, text, start_ms, end_ms, confidence)
            VALUES ($1, $2, $3, $4, $5, $6)
            RETURNING id, call_id, speaker, text, start_ms, end_ms, confidence
            "#,
        )
        .bind(call_id)
        .bind(speaker)
        .bind(text)
        .bind(start_ms)
        .bind(end_ms)
        .bind(confidence)
        .fetch_one(&mut *tx)
        .await
        .map_err(db_err)?;

        tx.commit().await.map_err(db_err)?;
        Ok(utterance)
    }

    // ── Tool executions ─────────────────────────────────────────────

    pub async fn insert_tool_execution(
        &self,
        call_id: Uuid,
        tool_id: Uuid,
        request: &Value,
        response: Option<&Value>,
        status: ToolExecStatus,
        latency_ms: i64,
        error_code: Option<&str>,
    ) -> Result<Uuid> {
        sqlx::query_scalar(
            r#"
            INSERT INTO tool_executions
                (call_id, tool_id, request, response, status, latency_ms, error_code)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            RETURNING id
            "#,
        )
        .bind(call_id)
        .bind(tool_id)
        .bind(request)
        .bind(response)
        .bind(status)
        .bind(latency_ms)
        .bind(error_code)
        .fetch_one(&self.pool)
        .await
        .map_err(db_err)
    }

    /// Executions recorded for this call in the trailing 60 seconds —
    /// the per-call rate-limit window.
    pub async fn tool_executions_last_minute(&self, call_id: Uuid) -> Result<i64> {
        sqlx::query_scalar(
            r#"
            SELECT COUNT(*) FROM tool_executions
            WHERE call_id = $1 AND created_at > now() - interval '60 seconds'
            "#,
        )
        .bind(call_id)
        .fetch_one(&self.pool)
        .await
        .map_err(db_err)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn caller_window_reserves_100ms() {
        let (start, end) = utterance_window(2400, Speaker::Caller, 1500);
        assert_eq!(start, 2500);
        assert_eq!(end, 4000);
    }

    #[test]
    fn agent_window_starts_120ms_after_caller_end() {
        let (start, end) = utterance_window(4000, Speaker::Agent, 900);
        assert_eq!(start, 4120);
        assert_eq!(end, 5020);
    }

    #[test]
    fn end_ms_is_strictly_increasing() {
        let mut prev_end = 0;
        for (speaker, duration) in [
            (Speaker::Caller, 800),
            (Speaker::Agent, 0),
            (Speaker::Caller, 0),
            (Speaker::System, 50),
            (Speaker::Agent, 1200),
        ] {
            let (start, end) = utterance_window(prev_end, speaker, duration);
            assert!(start > prev_end);
            assert!(end > prev_end, "end must advance even for empty audio");
            prev_end = end;
        }
    }

    #[test]
    fn negative_duration_is_clamped() {
        let (start, end) = utterance_window(100, Speaker::Caller, -50);
        assert_eq!(start, 200);
        assert_eq!(end, 200);
    }
}
