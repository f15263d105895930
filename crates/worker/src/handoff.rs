//! Handoff worker — turns `handoff_requested` events into redeemable
//! dispatches.
//!
//! Per event: validate the payload, make sure the media room exists,
//! mint a room-scoped join token, upsert the dispatch row and announce
//! it with `handoff_dispatched`. The announcement carries the dispatch
//! id and expiry — the token itself lives only in the dispatch row.

use std::time::Duration;

use serde_json::json;

use vx_domain::config::Config;
use vx_domain::events::{self, HandoffDispatched, HandoffFailed, HandoffRequested};
use vx_domain::Result;
use vx_store::dispatches::{DispatchStore, NewDispatch};
use vx_store::events::{CallEvent, EventStore};

use crate::rooms::{JoinGrant, RoomServiceClient};

pub struct HandoffWorker {
    events: EventStore,
    dispatches: DispatchStore,
    rooms: RoomServiceClient,
    batch_size: i64,
    max_attempts: i32,
    dispatch_ttl: Duration,
}

impl HandoffWorker {
    pub fn new(
        events: EventStore,
        dispatches: DispatchStore,
        rooms: RoomServiceClient,
        cfg: &Config,
    ) -> Self {
        Self {
            events,
            dispatches,
            rooms,
            batch_size: cfg.worker.batch_size,
            max_attempts: cfg.worker.max_attempts,
            dispatch_ttl: Duration::from_secs(cfg.rooms.dispatch_ttl_min * 60),
        }
    }

    /// Claim and process one batch. Returns how many events were taken.
    pub async fn tick(&self) -> Result<usize> {
        let batch = self
            .events
            .claim(events::HANDOFF_REQUESTED, self.batch_size)
            .await?;
        let count = batch.len();

        for event in &batch {
            self.process(event).await;
        }
        Ok(count)
    }

    async fn process(&self, event: &CallEvent) {
        // Step 1: payload shape. A malformed payload can never succeed,
        // so it goes straight to the dead state.
        let request: HandoffRequested = match serde_json::from_value(event.payload.clone()) {
            Ok(r) => r,
            Err(e) => {
                tracing::warn!(event_id = %event.id, error = %e, "handoff payload invalid");
                let _ = self
                    .events
                    .append(
                        event.call_id,
                        events::HANDOFF_INVALID_PAYLOAD,
                        json!({ "error": e.to_string() }),
                    )
                    .await;
                let _ = self
                    .events
                    .mark_failed(event.id, &format!("invalid payload: {e}"), true)
                    .await;
                return;
            }
        };

        match self.dispatch(event, &request).await {
            Ok(dispatch_id) => {
                tracing::info!(
                    call_id = %event.call_id,
                    trace_id = %request.trace_id,
                    dispatch_id = %dispatch_id,
                    room = %request.room,
                    "handoff dispatched"
                );
                if let Err(e) = self.events.mark_processed(event.id).await {
                    // The next poll re-delivers; room create and the
                    // dispatch upsert are both idempotent.
                    tracing::error!(event_id = %event.id, error = %e, "mark_processed failed");
                }
            }
            Err(e) => {
                let finalize = event.processing_attempts >= self.max_attempts;
                tracing::warn!(
                    event_id = %event.id,
                    attempts = event.processing_attempts,
                    will_retry = !finalize,
                    error = %e,
                    "handoff failed"
                );
                let failed = HandoffFailed {
                    trace_id: Some(request.trace_id),
                    attempts: event.processing_attempts,
                    will_retry: !finalize,
                    error: e.to_string(),
                };
                let _ = self
                    .events
                    .append(
                        event.call_id,
                        events::HANDOFF_FAILED,
                        serde_json::to_value(&failed).unwrap_or_default(),
                    )
                    .await;
                let _ = self
                    .events
                    .mark_failed(event.id, &e.to_string(), finalize)
                    .await;
            }
        }
    }

    /// Steps 2–5: room, token, dispatch row, announcement.
    async fn dispatch(
        &self,
        event: &CallEvent,
        request: &HandoffRequested,
    ) -> Result<uuid::Uuid> {
        self.rooms.ensure_room(&request.room).await?;

        let join_token = self.rooms.mint_join_token(
            &JoinGrant {
                room: &request.room,
                tenant_id: request.tenant_id,
                agent_id: request.agent_id,
                twilio_call_sid: &request.twilio_call_sid,
                trace_id: request.trace_id,
            },
            self.dispatch_ttl,
        )?;

        let dispatch = self
            .dispatches
            .upsert(NewDispatch {
                call_id: event.call_id,
                trace_id: request.trace_id,
                tenant_id: request.tenant_id,
                agent_id: request.agent_id,
                twilio_call_sid: &request.twilio_call_sid,
                room: &request.room,
                join_token: &join_token,
                ttl_min: self.dispatch_ttl.as_secs() as i64 / 60,
            })
            .await?;

        let announcement = HandoffDispatched {
            dispatch_id: dispatch.id,
            dispatch_expires_at: dispatch.expires_at,
            trace_id: request.trace_id,
            tenant_id: request.tenant_id,
            agent_id: request.agent_id,
            room: request.room.clone(),
            livekit_url: self.rooms.livekit_url().to_owned(),
        };
        self.events
            .append(
                event.call_id,
                events::HANDOFF_DISPATCHED,
                serde_json::to_value(&announcement)?,
            )
            .await?;

        Ok(dispatch.id)
    }
}
