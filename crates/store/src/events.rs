//! Append-only call-event log with claimable processing state.
//!
//! Workers drive the pipeline by claiming batches of one event type at a
//! time. A claim takes row locks with `SKIP LOCKED` (so two replicas
//! polling the same type split the backlog instead of colliding) and
//! bumps `processing_attempts` in the same statement. Retry is implicit:
//! a non-finalized failure leaves `processed_at` NULL and the event
//! reappears on the next poll.

use chrono::{DateTime, Utc};
use serde_json::Value;
use sqlx::{FromRow, PgPool};
use uuid::Uuid;

use vx_domain::Result;

use crate::db_err;

/// One row of the call-event log.
#[derive(Debug, Clone, FromRow)]
pub struct CallEvent {
    pub id: Uuid,
    pub call_id: Uuid,
    pub created_at: DateTime<Utc>,
    pub event_type: String,
    pub payload: Value,
    pub processing_attempts: i32,
    pub processed_at: Option<DateTime<Utc>>,
    pub last_error: Option<String>,
}

#[derive(Clone)]
pub struct EventStore {
    pool: PgPool,
}

impl EventStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Append one event. The payload is opaque JSON; there is no
    /// ordering contract beyond the monotonic `created_at`.
    pub async fn append(
        &self,
        call_id: Uuid,
        event_type: &str,
        payload: Value,
    ) -> Result<CallEvent> {
        sqlx::query_as::<_, CallEvent>(
            r#"
            INSERT INTO call_events (call_id, event_type, payload)
            VALUES ($1, $2, $3)
            RETURNING id, call_id, created_at, event_type, payload,
                      processing_attempts, processed_at, last_error
            "#,
        )
        .bind(call_id)
        .bind(event_type)
        .bind(payload)
        .fetch_one(&self.pool)
        .await
        .map_err(db_err)
    }

    /// Claim up to `limit` unprocessed events of one type, oldest first.
    ///
    /// The CTE locks the selected rows with `SKIP LOCKED` and the outer
    /// UPDATE increments `processing_attempts`, so each event has at
    /// most one claimant per poll cycle across all worker replicas.
    pub async fn claim(&self, event_type: &str, limit: i64) -> Result<Vec<CallEvent>> {
        let mut events = sqlx::query_as::<_, CallEvent>(
            r#"
            WITH next_events AS (
                SELECT id
                FROM call_events
                WHERE event_type = $1 AND processed_at IS NULL
                ORDER BY created_at
                LIMIT $2
                FOR UPDATE SKIP LOCKED
            )
            UPDATE call_events e
            SET processing_attempts = e.processing_attempts + 1
            WHERE e.id IN (SELECT id FROM next_events)
            RETURNING e.id, e.call_id, e.created_at, e.event_type, e.payload,
                      e.processing_attempts, e.processed_at, e.last_error
            "#,
        )
        .bind(event_type)
        .bind(limit)
        .fetch_all(&self.pool)
        .await
        .map_err(db_err)?;

        // UPDATE ... RETURNING does not promise row order.
        events.sort_by_key(|e| e.created_at);
        Ok(events)
    }

    /// Terminal success: the event never comes back.
    pub async fn mark_processed(&self, event_id: Uuid) -> Result<()> {
        sqlx::query(
            "UPDATE call_events SET processed_at = now(), last_error = NULL WHERE id = $1",
        )
        .bind(event_id)
        .execute(&self.pool)
        .await
        .map_err(db_err)?;
        Ok(())
    }

    /// Record a failure. With `finalize` the event moves to the dead
    /// state (processed with an error, never deleted); without it the
    /// event stays claimable and retries on the next poll.
    pub async fn mark_failed(&self, event_id: Uuid, message: &str, finalize: bool) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE call_events
            SET last_error = $2,
                processed_at = CASE WHEN $3 THEN now() ELSE processed_at END
            WHERE id = $1
            "#,
        )
        .bind(event_id)
        .bind(message)
        .bind(finalize)
        .execute(&self.pool)
        .await
        .map_err(db_err)?;
        Ok(())
    }
}
