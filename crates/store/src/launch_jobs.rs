//! Launch jobs — the launcher's durable work queue.
//!
//! One row per claimed dispatch (unique on `dispatch_id`); re-upserting
//! resets the row to pending with zero attempts. Claiming follows the
//! same skip-locked CTE shape as the event log, but over
//! status ∈ {pending, failed} with an attempts ceiling — a failed row
//! simply re-enters the claim set on the next poll.

use chrono::{DateTime, Utc};
use sqlx::{FromRow, PgPool};
use uuid::Uuid;

use vx_domain::Result;

use crate::db_err;

#[derive(Debug, Clone, Copy, PartialEq, Eq, sqlx::Type)]
#[sqlx(type_name = "launch_job_status", rename_all = "lowercase")]
pub enum LaunchJobStatus {
    Pending,
    Processing,
    Failed,
    Succeeded,
}

#[derive(Debug, Clone, FromRow)]
pub struct RuntimeLaunchJob {
    pub id: Uuid,
    pub dispatch_id: Uuid,
    pub call_id: Uuid,
    pub tenant_id: Uuid,
    pub agent_id: Uuid,
    pub trace_id: Uuid,
    pub room: String,
    pub twilio_call_sid: String,
    pub livekit_url: String,
    pub join_token: String,
    pub status: LaunchJobStatus,
    pub attempts: i32,
    pub last_error: Option<String>,
    pub processed_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

pub struct NewLaunchJob<'a> {
    pub dispatch_id: Uuid,
    pub call_id: Uuid,
    pub tenant_id: Uuid,
    pub agent_id: Uuid,
    pub trace_id: Uuid,
    pub room: &'a str,
    pub twilio_call_sid: &'a str,
    pub livekit_url: &'a str,
    pub join_token: &'a str,
}

#[derive(Clone)]
pub struct LaunchJobStore {
    pool: PgPool,
}

impl LaunchJobStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Enqueue (or re-arm) the launch job for a dispatch.
    pub async fn upsert_for_dispatch(&self, new: NewLaunchJob<'_>) -> Result<RuntimeLaunchJob> {
        sqlx::query_as::<_, RuntimeLaunchJob>(
            r#"
            INSERT INTO runtime_launch_jobs
                (dispatch_id, call_id, tenant_id, agent_id, trace_id,
                 room, twilio_call_sid, livekit_url, join_token)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
            ON CONFLICT (dispatch_id) DO UPDATE SET
                join_token = EXCLUDED.join_token,
                livekit_url = EXCLUDED.livekit_url,
                status = 'pending',
                attempts = 0,
                last_error = NULL,
                processed_at = NULL
            RETURNING id, dispatch_id, call_id, tenant_id, agent_id, trace_id,
                      room, twilio_call_sid, livekit_url, join_token,
                      status, attempts, last_error, processed_at, created_at
            "#,
        )
        .bind(new.dispatch_id)
        .bind(new.call_id)
        .bind(new.tenant_id)
        .bind(new.agent_id)
        .bind(new.trace_id)
        .bind(new.room)
        .bind(new.twilio_call_sid)
        .bind(new.livekit_url)
        .bind(new.join_token)
        .fetch_one(&self.pool)
        .await
        .map_err(db_err)
    }

    /// Claim up to `limit` deliverable jobs, oldest first, flipping them
    /// to processing and counting the attempt.
    pub async fn claim(&self, limit: i64, max_attempts: i32) -> Result<Vec<RuntimeLaunchJob>> {
        let mut jobs = sqlx::query_as::<_, RuntimeLaunchJob>(
            r#"
            WITH next_jobs AS (
                SELECT id
                FROM runtime_launch_jobs
                WHERE status IN ('pending', 'failed') AND attempts < $2
                ORDER BY created_at
                LIMIT $1
                FOR UPDATE SKIP LOCKED
            )
            UPDATE runtime_launch_jobs j
            SET status = 'processing',
                attempts = j.attempts + 1,
                last_error = NULL
            WHERE j.id IN (SELECT id FROM next_jobs)
            RETURNING j.id, j.dispatch_id, j.call_id, j.tenant_id, j.agent_id,
                      j.trace_id, j.room, j.twilio_call_sid, j.livekit_url,
                      j.join_token, j.status, j.attempts, j.last_error,
                      j.processed_at, j.created_at
            "#,
        )
        .bind(limit)
        .bind(max_attempts)
        .fetch_all(&self.pool)
        .await
        .map_err(db_err)?;

        jobs.sort_by_key(|j| j.created_at);
        Ok(jobs)
    }

    /// Delivery confirmed — clear the token, the job is terminal.
    pub async fn mark_succeeded(&self, job_id: Uuid) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE runtime_launch_jobs
            SET status = 'succeeded', processed_at = now(), join_token = ''
            WHERE id = $1
            "#,
        )
        .bind(job_id)
        .execute(&self.pool)
        .await
        .map_err(db_err)?;
        Ok(())
    }

    /// Delivery failed — the job re-enters the claim set until its
    /// attempts run out.
    pub async fn mark_failed(&self, job_id: Uuid, message: &str) -> Result<()> {
        sqlx::query(
            "UPDATE runtime_launch_jobs SET status = 'failed', last_error = $2 WHERE id = $1",
        )
        .bind(job_id)
        .bind(message)
        .execute(&self.pool)
        .await
        .map_err(db_err)?;
        Ok(())
    }
}
