//! Requester side: submit a job and wait for its answer.
//!
//! The client publishes a signed request and then polls every relay for
//! responses that reference it. The first result event wins, an `error`
//! status ends the wait early, and any other status is reported as
//! progress. Running out of time is a [`JobOutcome::Timeout`], not an error.

use crate::config::ClientConfig;
use crate::error::{DvmError, Result};
use crate::inputs::attach_inputs;
use crate::relay_api::RelayApi;
use nostr::{
    Event, JobFeedback, JobRequest, JobResult, JobStatus, KIND_JOB_FEEDBACK,
    KIND_JOB_MEMORY_CURATION, Keys, get_result_kind, request_reference, verify_event,
};
use nostr_client::{ClientError, Filter};
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::{Instant, sleep};
use tracing::{debug, info, warn};

/// How far before the request's `created_at` responses are searched.
const SINCE_SLACK_SECS: u64 = 10;

/// A non-terminal status reported while waiting.
#[derive(Debug, Clone)]
pub struct JobProgress {
    pub status: JobStatus,
    pub extra: Option<String>,
    pub event: Event,
    /// Time since the wait started
    pub elapsed: Duration,
}

pub type ProgressCallback = Arc<dyn Fn(&JobProgress) + Send + Sync>;

/// The winning result event.
#[derive(Debug, Clone)]
pub struct JobResponse {
    pub event: Event,
    pub content: String,
    /// Requested payment in millisats, reported only
    pub amount: Option<u64>,
    pub bolt11: Option<String>,
}

#[derive(Debug, Clone)]
pub enum JobOutcome {
    Success(JobResponse),
    /// The provider answered with an `error` status
    Failed { message: String, event: Event },
    /// Nothing terminal arrived in time
    Timeout {
        elapsed: Duration,
        last_status: Option<JobStatus>,
    },
}

impl JobOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, JobOutcome::Success(_))
    }
}

pub struct JobClient {
    keys: Keys,
    relay: Arc<dyn RelayApi>,
    poll_interval: Duration,
    timeout: Duration,
    query_timeout: Duration,
    on_progress: Option<ProgressCallback>,
}

impl JobClient {
    pub fn new(keys: Keys, relay: Arc<dyn RelayApi>) -> Self {
        Self {
            keys,
            relay,
            poll_interval: Duration::from_secs(3),
            timeout: Duration::from_secs(30),
            query_timeout: Duration::from_secs(5),
            on_progress: None,
        }
    }

    pub fn from_config(config: &ClientConfig, keys: Keys, relay: Arc<dyn RelayApi>) -> Self {
        Self::new(keys, relay)
            .with_poll_interval(config.poll_interval())
            .with_timeout(config.timeout())
            .with_query_timeout(config.query_timeout())
    }

    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_query_timeout(mut self, timeout: Duration) -> Self {
        self.query_timeout = timeout;
        self
    }

    pub fn on_progress(mut self, callback: ProgressCallback) -> Self {
        self.on_progress = Some(callback);
        self
    }

    pub fn public_key(&self) -> &str {
        self.keys.public_key()
    }

    /// Build a memory curation request (kind 5700).
    pub fn curation_request(
        &self,
        daily_log: &str,
        memory_file: Option<&str>,
        style: &str,
    ) -> Result<JobRequest> {
        let mut inputs = vec![("daily_log", daily_log)];
        if let Some(memory) = memory_file {
            inputs.push(("memory_file", memory));
        }
        let request = attach_inputs(JobRequest::new(KIND_JOB_MEMORY_CURATION)?, &inputs)?;
        Ok(request.add_param("style", style))
    }

    /// Sign and publish a request. Its id correlates every response.
    pub async fn submit(&self, request: &JobRequest) -> Result<Event> {
        let event = self.keys.sign(&request.to_template())?;
        let report = self.relay.publish(&event).await?;
        if !report.is_success() {
            return Err(DvmError::Relay(ClientError::PublishFailed(format!(
                "no relay accepted job {}",
                event.id
            ))));
        }
        info!(
            job_id = %event.short_id(),
            kind = event.kind,
            relays = report.sent_to.len(),
            "submitted job"
        );
        Ok(event)
    }

    /// Poll until a result, an error status, or the timeout.
    pub async fn await_response(&self, request: &Event) -> Result<JobOutcome> {
        let result_kind = get_result_kind(request.kind)
            .ok_or(DvmError::UnsupportedKind(request.kind))?;
        let filter = Filter::new()
            .kinds(vec![result_kind, KIND_JOB_FEEDBACK])
            .event_refs(vec![request.id.clone()])
            .since(request.created_at.saturating_sub(SINCE_SLACK_SECS));

        let started = Instant::now();
        let mut reported = HashSet::new();
        let mut last_status = None;

        loop {
            let elapsed = started.elapsed();
            if elapsed >= self.timeout {
                info!(job_id = %request.short_id(), ?elapsed, "timed out waiting for result");
                return Ok(JobOutcome::Timeout {
                    elapsed,
                    last_status,
                });
            }
            sleep(self.poll_interval.min(self.timeout - elapsed)).await;

            let wait = self
                .query_timeout
                .min(self.timeout.saturating_sub(started.elapsed()));
            let events = match self.relay.query(vec![filter.clone()], wait).await
            {
                Ok(events) => events,
                Err(e) => {
                    warn!(job_id = %request.short_id(), error = %e, "poll failed");
                    continue;
                }
            };

            let mut responses: Vec<Event> = events
                .into_iter()
                .filter(|event| request_reference(event) == Some(request.id.as_str()))
                .filter(verify_event)
                .collect();
            responses.sort_by(|a, b| a.created_at.cmp(&b.created_at).then_with(|| a.id.cmp(&b.id)));

            if let Some(result) = responses.iter().find(|event| event.kind == result_kind) {
                return Ok(JobOutcome::Success(response_from(result)));
            }

            for event in responses.iter().filter(|e| e.kind == KIND_JOB_FEEDBACK) {
                let feedback = match JobFeedback::from_event(event) {
                    Ok(feedback) => feedback,
                    Err(e) => {
                        debug!(event_id = %event.short_id(), error = %e, "ignoring bad status");
                        continue;
                    }
                };

                if feedback.status.is_error() {
                    let message = feedback
                        .status_extra
                        .filter(|extra| !extra.is_empty())
                        .or_else(|| (!feedback.content.is_empty()).then(|| feedback.content.clone()))
                        .unwrap_or_else(|| "job failed".to_string());
                    warn!(job_id = %request.short_id(), %message, "job failed");
                    return Ok(JobOutcome::Failed {
                        message,
                        event: event.clone(),
                    });
                }

                last_status = Some(feedback.status);
                if reported.insert(event.id.clone()) {
                    let progress = JobProgress {
                        status: feedback.status,
                        extra: feedback.status_extra,
                        event: event.clone(),
                        elapsed: started.elapsed(),
                    };
                    info!(
                        job_id = %request.short_id(),
                        status = %progress.status,
                        extra = progress.extra.as_deref().unwrap_or(""),
                        "job status"
                    );
                    if let Some(callback) = &self.on_progress {
                        callback(&progress);
                    }
                }
            }
        }
    }

    /// Submit and wait. Returns the signed request with the outcome.
    pub async fn run(&self, request: &JobRequest) -> Result<(Event, JobOutcome)> {
        let event = self.submit(request).await?;
        let outcome = self.await_response(&event).await?;
        Ok((event, outcome))
    }
}

fn response_from(event: &Event) -> JobResponse {
    let (amount, bolt11) = match JobResult::from_event(event) {
        Ok(result) => (result.amount, result.bolt11),
        Err(_) => (None, None),
    };
    JobResponse {
        event: event.clone(),
        content: event.content.clone(),
        amount,
        bolt11,
    }
}
