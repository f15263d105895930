//! Ingestion loop — folds terminal call events into the call row.

use vx_domain::config::Config;
use vx_domain::events::{self, CallEnded};
use vx_domain::Result;
use vx_store::calls::{CallOutcome, CallStore};
use vx_store::events::EventStore;

pub struct Ingestor {
    events: EventStore,
    calls: CallStore,
    batch_size: i64,
}

impl Ingestor {
    pub fn new(events: EventStore, calls: CallStore, cfg: &Config) -> Self {
        Self {
            events,
            calls,
            batch_size: cfg.worker.batch_size,
        }
    }

    pub async fn tick(&self) -> Result<usize> {
        let batch = self.events.claim(events::CALL_ENDED, self.batch_size).await?;
        let count = batch.len();

        for event in &batch {
            let ended: CallEnded =
                serde_json::from_value(event.payload.clone()).unwrap_or(CallEnded {
                    trace_id: None,
                    outcome: None,
                    handoff_reason: None,
                });

            let outcome = match ended.outcome.as_deref() {
                Some("resolved") => Some(CallOutcome::Resolved),
                Some("handoff") => Some(CallOutcome::Handoff),
                _ => None,
            };

            match self
                .calls
                .finish(event.call_id, outcome, ended.handoff_reason.as_deref())
                .await
            {
                Ok(closed) => {
                    if closed {
                        tracing::info!(call_id = %event.call_id, "call closed");
                    }
                    let _ = self.events.mark_processed(event.id).await;
                }
                Err(e) => {
                    let _ = self.events.mark_failed(event.id, &e.to_string(), false).await;
                }
            }
        }
        Ok(count)
    }
}
