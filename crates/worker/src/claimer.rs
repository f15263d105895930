//! Dispatch claimer — redeems announced dispatches through the gateway.
//!
//! The claim endpoint is the only channel through which a join token
//! leaves the database, so the claimer authenticates with a per-request,
//! tenant-scoped service credential. Definitive claim refusals (404 /
//! 409 / 410) finalize the event: the one-shot was already consumed or
//! has lapsed, and retrying cannot change that.

use std::time::Duration;

use serde::Deserialize;
use uuid::Uuid;

use vx_domain::config::Config;
use vx_domain::events::{self, BootstrapReady, DispatchClaimed, HandoffDispatched};
use vx_domain::{token, Error, Result};
use vx_store::events::{CallEvent, EventStore};
use vx_store::launch_jobs::{LaunchJobStore, NewLaunchJob};

/// Body of a successful claim response from the gateway.
#[derive(Debug, Deserialize)]
struct ClaimResponse {
    dispatch: ClaimedDispatch,
}

#[derive(Debug, Deserialize)]
struct ClaimedDispatch {
    id: Uuid,
    call_id: Uuid,
    trace_id: Uuid,
    tenant_id: Uuid,
    agent_id: Uuid,
    twilio_call_sid: String,
    room: String,
    join_token: String,
    claimed_at: chrono::DateTime<chrono::Utc>,
}

pub struct DispatchClaimer {
    events: EventStore,
    launch_jobs: LaunchJobStore,
    http: reqwest::Client,
    control_url: String,
    service_secret: String,
    service_token_ttl: u64,
    batch_size: i64,
    max_attempts: i32,
}

impl DispatchClaimer {
    pub fn new(events: EventStore, launch_jobs: LaunchJobStore, cfg: &Config) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(10))
            .build()
            .map_err(|e| Error::Http(e.to_string()))?;
        Ok(Self {
            events,
            launch_jobs,
            http,
            control_url: cfg.control.base_url.trim_end_matches('/').to_owned(),
            service_secret: cfg.control.service_secret.clone(),
            service_token_ttl: cfg.control.service_token_ttl_sec,
            batch_size: cfg.worker.batch_size,
            max_attempts: cfg.worker.max_attempts,
        })
    }

    pub async fn tick(&self) -> Result<usize> {
        let batch = self
            .events
            .claim(events::HANDOFF_DISPATCHED, self.batch_size)
            .await?;
        let count = batch.len();

        for event in &batch {
            self.process(event).await;
        }
        Ok(count)
    }

    async fn process(&self, event: &CallEvent) {
        let announced: HandoffDispatched = match serde_json::from_value(event.payload.clone()) {
            Ok(a) => a,
            Err(e) => {
                let _ = self
                    .events
                    .mark_failed(event.id, &format!("invalid payload: {e}"), true)
                    .await;
                return;
            }
        };

        match self.claim_and_enqueue(event, &announced).await {
            Ok(()) => {
                if let Err(e) = self.events.mark_processed(event.id).await {
                    tracing::error!(event_id = %event.id, error = %e, "mark_processed failed");
                }
            }
            Err(ClaimFailure::Definitive(status)) => {
                // Another claimer won the race, or the dispatch expired.
                // Idempotence holds either way — the launch job exists
                // or the handoff will be re-emitted with a fresh trace.
                tracing::info!(
                    dispatch_id = %announced.dispatch_id,
                    status,
                    "dispatch not claimable, finalizing"
                );
                let _ = self
                    .events
                    .mark_failed(event.id, &format!("dispatch unavailable ({status})"), true)
                    .await;
            }
            Err(ClaimFailure::Transient(e)) => {
                let finalize = event.processing_attempts >= self.max_attempts;
                tracing::warn!(
                    dispatch_id = %announced.dispatch_id,
                    attempts = event.processing_attempts,
                    will_retry = !finalize,
                    error = %e,
                    "dispatch claim failed"
                );
                let _ = self
                    .events
                    .mark_failed(event.id, &e.to_string(), finalize)
                    .await;
            }
        }
    }

    async fn claim_and_enqueue(
        &self,
        event: &CallEvent,
        announced: &HandoffDispatched,
    ) -> std::result::Result<(), ClaimFailure> {
        let credential = token::mint_service_token(
            &self.service_secret,
            announced.tenant_id,
            self.service_token_ttl,
        )
        .map_err(ClaimFailure::Transient)?;

        let response = self
            .http
            .post(format!(
                "{}/v1/runtime/dispatches/{}/claim",
                self.control_url, announced.dispatch_id
            ))
            .bearer_auth(credential)
            .send()
            .await
            .map_err(|e| ClaimFailure::Transient(Error::Http(e.to_string())))?;

        let status = response.status();
        if matches!(status.as_u16(), 404 | 409 | 410) {
            return Err(ClaimFailure::Definitive(status.as_u16()));
        }
        if !status.is_success() {
            return Err(ClaimFailure::Transient(Error::Http(format!(
                "claim returned {status}"
            ))));
        }

        let claim: ClaimResponse = response
            .json()
            .await
            .map_err(|e| ClaimFailure::Transient(Error::Http(e.to_string())))?;
        let dispatch = claim.dispatch;

        let job = self
            .launch_jobs
            .upsert_for_dispatch(NewLaunchJob {
                dispatch_id: dispatch.id,
                call_id: dispatch.call_id,
                tenant_id: dispatch.tenant_id,
                agent_id: dispatch.agent_id,
                trace_id: dispatch.trace_id,
                room: &dispatch.room,
                twilio_call_sid: &dispatch.twilio_call_sid,
                livekit_url: &announced.livekit_url,
                join_token: &dispatch.join_token,
            })
            .await
            .map_err(ClaimFailure::Transient)?;

        let claimed = DispatchClaimed {
            dispatch_id: dispatch.id,
            trace_id: dispatch.trace_id,
            claimed_at: dispatch.claimed_at,
        };
        self.events
            .append(
                event.call_id,
                events::DISPATCH_CLAIMED,
                serde_json::to_value(&claimed).map_err(|e| ClaimFailure::Transient(e.into()))?,
            )
            .await
            .map_err(ClaimFailure::Transient)?;

        let ready = BootstrapReady {
            dispatch_id: dispatch.id,
            launch_job_id: job.id,
            trace_id: dispatch.trace_id,
            room: dispatch.room.clone(),
            livekit_url: announced.livekit_url.clone(),
        };
        self.events
            .append(
                event.call_id,
                events::AGENT_SESSION_BOOTSTRAP_READY,
                serde_json::to_value(&ready).map_err(|e| ClaimFailure::Transient(e.into()))?,
            )
            .await
            .map_err(ClaimFailure::Transient)?;

        Ok(())
    }
}

enum ClaimFailure {
    /// 404 / 409 / 410 — retrying cannot succeed.
    Definitive(u16),
    Transient(Error),
}
