//! Launcher — delivers launch jobs to the connector.
//!
//! A job is claimed (status → processing, attempts + 1), POSTed to the
//! connector's launch endpoint, and marked succeeded or failed. Failed
//! jobs re-enter the claim set on the next poll until their attempts
//! run out; `runtime_launch_jobs.attempts` is the live retry counter
//! here — the source event was already finalized by the claimer.

use std::time::Duration;

use serde_json::json;

use vx_domain::config::Config;
use vx_domain::events::{self, LaunchFailed, LaunchSucceeded};
use vx_domain::{Error, Result};
use vx_store::events::EventStore;
use vx_store::launch_jobs::{LaunchJobStore, RuntimeLaunchJob};

pub struct Launcher {
    jobs: LaunchJobStore,
    events: EventStore,
    http: reqwest::Client,
    connector_url: String,
    batch_size: i64,
    max_attempts: i32,
}

impl Launcher {
    pub fn new(jobs: LaunchJobStore, events: EventStore, cfg: &Config) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(10))
            .build()
            .map_err(|e| Error::Http(e.to_string()))?;
        Ok(Self {
            jobs,
            events,
            http,
            connector_url: cfg.connector.base_url.trim_end_matches('/').to_owned(),
            batch_size: cfg.worker.batch_size,
            max_attempts: cfg.worker.max_attempts,
        })
    }

    pub async fn tick(&self) -> Result<usize> {
        let batch = self.jobs.claim(self.batch_size, self.max_attempts).await?;
        let count = batch.len();

        for job in &batch {
            self.deliver(job).await;
        }
        Ok(count)
    }

    async fn deliver(&self, job: &RuntimeLaunchJob) {
        let result = self
            .http
            .post(format!("{}/runtime/launch", self.connector_url))
            .json(&json!({
                "call_id": job.call_id,
                "tenant_id": job.tenant_id,
                "agent_id": job.agent_id,
                "trace_id": job.trace_id,
                "room": job.room,
                "twilio_call_sid": job.twilio_call_sid,
                "livekit_url": job.livekit_url,
                "agent_join_token": job.join_token,
            }))
            .send()
            .await;

        let failure = match result {
            Ok(response) if response.status().is_success() => None,
            Ok(response) => Some(format!("connector returned {}", response.status())),
            Err(e) => Some(format!("connector unreachable: {e}")),
        };

        match failure {
            None => {
                tracing::info!(job_id = %job.id, call_id = %job.call_id, "session launched");
                if let Err(e) = self.jobs.mark_succeeded(job.id).await {
                    tracing::error!(job_id = %job.id, error = %e, "mark_succeeded failed");
                    return;
                }
                let succeeded = LaunchSucceeded {
                    launch_job_id: job.id,
                    trace_id: job.trace_id,
                    attempts: job.attempts,
                };
                let _ = self
                    .events
                    .append(
                        job.call_id,
                        events::AGENT_SESSION_LAUNCH_SUCCEEDED,
                        serde_json::to_value(&succeeded).unwrap_or_default(),
                    )
                    .await;
            }
            Some(message) => {
                let will_retry = job.attempts < self.max_attempts;
                tracing::warn!(
                    job_id = %job.id,
                    attempts = job.attempts,
                    will_retry,
                    error = %message,
                    "launch delivery failed"
                );
                let _ = self.jobs.mark_failed(job.id, &message).await;
                let failed = LaunchFailed {
                    launch_job_id: job.id,
                    trace_id: job.trace_id,
                    attempts: job.attempts,
                    will_retry,
                    error: message,
                };
                let _ = self
                    .events
                    .append(
                        job.call_id,
                        events::AGENT_SESSION_LAUNCH_FAILED,
                        serde_json::to_value(&failed).unwrap_or_default(),
                    )
                    .await;
            }
        }
    }
}
