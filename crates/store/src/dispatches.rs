//! Runtime dispatches — the one-time bearers of room-join secrets.
//!
//! A dispatch is upserted by `(call_id, trace_id)`, so re-processing the
//! same handoff (worker restart, duplicate webhook) lands on the same
//! row. Claiming is one-shot: the winning transaction flips the status
//! and erases the token atomically, and every later attempt sees a
//! non-pending row.

use chrono::{DateTime, Duration, Utc};
use sqlx::{FromRow, PgPool};
use uuid::Uuid;

use vx_domain::Result;

use crate::db_err;

#[derive(Debug, Clone, Copy, PartialEq, Eq, sqlx::Type)]
#[sqlx(type_name = "dispatch_status", rename_all = "lowercase")]
pub enum DispatchStatus {
    Pending,
    Claimed,
    Expired,
}

#[derive(Debug, Clone, FromRow)]
pub struct RuntimeDispatch {
    pub id: Uuid,
    pub call_id: Uuid,
    pub trace_id: Uuid,
    pub tenant_id: Uuid,
    pub agent_id: Uuid,
    pub twilio_call_sid: String,
    pub room: String,
    pub join_token: String,
    pub status: DispatchStatus,
    pub expires_at: DateTime<Utc>,
    pub claimed_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

/// Why a claim did not hand out a token.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClaimError {
    /// No dispatch with that id.
    NotFound,
    /// The dispatch exists but is not claimable — already claimed,
    /// marked expired, or currently locked by a concurrent claimer.
    Unavailable,
    /// Still pending on paper but past its expiry instant.
    Expired,
}

/// Fields for a dispatch upsert (everything but the generated columns).
pub struct NewDispatch<'a> {
    pub call_id: Uuid,
    pub trace_id: Uuid,
    pub tenant_id: Uuid,
    pub agent_id: Uuid,
    pub twilio_call_sid: &'a str,
    pub room: &'a str,
    pub join_token: &'a str,
    pub ttl_min: i64,
}

#[derive(Clone)]
pub struct DispatchStore {
    pool: PgPool,
}

impl DispatchStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Insert or refresh the dispatch for `(call_id, trace_id)`.
    ///
    /// A conflict resets the row to pending with a fresh token and
    /// expiry and clears `claimed_at` — re-emitting a handoff always
    /// yields a redeemable dispatch.
    pub async fn upsert(&self, new: NewDispatch<'_>) -> Result<RuntimeDispatch> {
        let expires_at = Utc::now() + Duration::minutes(new.ttl_min);
        sqlx::query_as::<_, RuntimeDispatch>(
            r#"
            INSERT INTO runtime_dispatches
                (call_id, trace_id, tenant_id, agent_id, twilio_call_sid,
                 room, join_token, status, expires_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, 'pending', $8)
            ON CONFLICT (call_id, trace_id) DO UPDATE SET
                join_token = EXCLUDED.join_token,
                expires_at = EXCLUDED.expires_at,
                status = 'pending',
                claimed_at = NULL
            RETURNING id, call_id, trace_id, tenant_id, agent_id,
                      twilio_call_sid, room, join_token, status,
                      expires_at, claimed_at, created_at
            "#,
        )
        .bind(new.call_id)
        .bind(new.trace_id)
        .bind(new.tenant_id)
        .bind(new.agent_id)
        .bind(new.twilio_call_sid)
        .bind(new.room)
        .bind(new.join_token)
        .bind(expires_at)
        .fetch_one(&self.pool)
        .await
        .map_err(db_err)
    }

    /// One-shot claim. On success the returned dispatch still carries
    /// the join token — the row it came from no longer does. This is
    /// the only read path for the token.
    pub async fn claim(
        &self,
        dispatch_id: Uuid,
    ) -> Result<std::result::Result<RuntimeDispatch, ClaimError>> {
        let mut tx = self.pool.begin().await.map_err(db_err)?;

        let locked = sqlx::query_as::<_, RuntimeDispatch>(
            r#"
            SELECT id, call_id, trace_id, tenant_id, agent_id,
                   twilio_call_sid, room, join_token, status,
                   expires_at, claimed_at, created_at
            FROM runtime_dispatches
            WHERE id = $1
            FOR UPDATE SKIP LOCKED
            "#,
        )
        .bind(dispatch_id)
        .fetch_optional(&mut *tx)
        .await
        .map_err(db_err)?;

        let dispatch = match locked {
            Some(d) => d,
            None => {
                // Either the id is wrong or a concurrent claimer holds
                // the lock; the losing side of a race gets Unavailable,
                // same as seeing the row already claimed.
                let exists: bool = sqlx::query_scalar(
                    "SELECT EXISTS (SELECT 1 FROM runtime_dispatches WHERE id = $1)",
                )
                .bind(dispatch_id)
                .fetch_one(&mut *tx)
                .await
                .map_err(db_err)?;
                return Ok(Err(if exists {
                    ClaimError::Unavailable
                } else {
                    ClaimError::NotFound
                }));
            }
        };

        if dispatch.status != DispatchStatus::Pending {
            return Ok(Err(ClaimError::Unavailable));
        }
        if dispatch.expires_at <= Utc::now() {
            return Ok(Err(ClaimError::Expired));
        }

        let claimed_at: DateTime<Utc> = sqlx::query_scalar(
            r#"
            UPDATE runtime_dispatches
            SET status = 'claimed', claimed_at = now(), join_token = ''
            WHERE id = $1
            RETURNING claimed_at
            "#,
        )
        .bind(dispatch_id)
        .fetch_one(&mut *tx)
        .await
        .map_err(db_err)?;

        tx.commit().await.map_err(db_err)?;

        Ok(Ok(RuntimeDispatch {
            status: DispatchStatus::Claimed,
            claimed_at: Some(claimed_at),
            ..dispatch
        }))
    }

    /// Tenant owning a dispatch. Deliberately narrow — the claim
    /// endpoint authorizes against the tenant before the one-shot runs,
    /// and must not read the token while doing so.
    pub async fn tenant_of(&self, dispatch_id: Uuid) -> Result<Option<Uuid>> {
        sqlx::query_scalar("SELECT tenant_id FROM runtime_dispatches WHERE id = $1")
            .bind(dispatch_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(db_err)
    }

    /// Sweep pending rows whose expiry has passed. Expired rows are
    /// inert; this just makes their state explicit for operators.
    pub async fn expire_stale(&self) -> Result<u64> {
        let result = sqlx::query(
            r#"
            UPDATE runtime_dispatches
            SET status = 'expired', join_token = ''
            WHERE status = 'pending' AND expires_at <= now()
            "#,
        )
        .execute(&self.pool)
        .await
        .map_err(db_err)?;
        Ok(result.rows_affected())
    }
}
