//! Signed responses to job requests.
//!
//! Every response carries `["e", job_id]` and `["p", requester]`. Status
//! events are kind 7000 with `["status", status, extra]` and empty content.
//! Results are the request kind + 1000 and also carry the original request
//! as JSON.
//!
//! Terminal responses go through the [`JobRecord`]: the result or error is
//! only published when the record's move into a terminal state succeeds, so
//! a job is answered at most once.

use crate::error::{DvmError, Result, ValidationError};
use crate::job::JobRecord;
use crate::relay_api::RelayApi;
use nostr::{Event, JobFeedback, JobResult, JobStatus, Keys};
use nostr_client::PublishReport;
use std::sync::Arc;
use tracing::{debug, info, warn};

pub struct ResponsePublisher {
    keys: Keys,
    relay: Arc<dyn RelayApi>,
    /// Price attached to every result
    amount_msats: Option<u64>,
}

impl ResponsePublisher {
    pub fn new(keys: Keys, relay: Arc<dyn RelayApi>) -> Self {
        Self {
            keys,
            relay,
            amount_msats: None,
        }
    }

    pub fn with_amount(mut self, amount_msats: Option<u64>) -> Self {
        self.amount_msats = amount_msats;
        self
    }

    pub fn public_key(&self) -> &str {
        self.keys.public_key()
    }

    /// Publish a non-terminal status such as `processing`.
    pub async fn status(
        &self,
        request: &Event,
        status: JobStatus,
        extra: &str,
    ) -> Result<PublishReport> {
        let feedback =
            JobFeedback::new(status, &request.id, &request.pubkey).with_status_extra(extra);
        let event = self.keys.sign(&feedback.to_template())?;
        let report = self.relay.publish(&event).await?;
        debug!(
            job_id = %request.short_id(),
            status = %status,
            relays = report.sent_to.len(),
            "published status"
        );
        Ok(report)
    }

    /// Complete the record and publish the result event.
    pub async fn publish_result(
        &self,
        record: &mut JobRecord,
        request: &Event,
        content: &str,
    ) -> Result<Event> {
        if !record.complete(content) {
            return Err(DvmError::AlreadyTerminal(record.id.clone()));
        }

        let mut result = JobResult::new(request.kind, &request.id, &request.pubkey, content)?
            .with_request(serde_json::to_string(request)?);
        if let Some(amount) = self.amount_msats {
            result = result.with_amount(amount, None);
        }
        let event = self.keys.sign(&result.to_template())?;
        let report = self.relay.publish(&event).await?;
        info!(
            job_id = %request.short_id(),
            result_id = %event.short_id(),
            relays = report.sent_to.len(),
            "published result"
        );
        log_failures(&report);
        Ok(event)
    }

    /// Fail the record and publish a terminal `error` status.
    pub async fn publish_error(
        &self,
        record: &mut JobRecord,
        request: &Event,
        error: &ValidationError,
    ) -> Result<Event> {
        let extra = error.status_extra();
        if !record.fail(&extra) {
            return Err(DvmError::AlreadyTerminal(record.id.clone()));
        }

        let feedback = JobFeedback::new(JobStatus::Error, &request.id, &request.pubkey)
            .with_status_extra(extra);
        let event = self.keys.sign(&feedback.to_template())?;
        let report = self.relay.publish(&event).await?;
        warn!(
            job_id = %request.short_id(),
            code = %error.code,
            reason = %error.message,
            "published error status"
        );
        log_failures(&report);
        Ok(event)
    }
}

fn log_failures(report: &PublishReport) {
    for (relay, error) in &report.failed {
        debug!(relay = %relay, error = %error, event_id = %report.event_id, "relay did not take event");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use nostr::{EventTemplate, KIND_JOB_FEEDBACK, KIND_JOB_MEMORY_CURATION, verify_event};
    use nostr_client::Filter;
    use parking_lot::Mutex;
    use std::time::Duration;

    #[derive(Default)]
    struct Recorder {
        events: Mutex<Vec<Event>>,
    }

    #[async_trait]
    impl RelayApi for Recorder {
        async fn publish(&self, event: &Event) -> nostr_client::Result<PublishReport> {
            self.events.lock().push(event.clone());
            Ok(PublishReport {
                event_id: event.id.clone(),
                sent_to: vec!["ws://recorder".to_string()],
                failed: Vec::new(),
            })
        }

        async fn query(
            &self,
            _filters: Vec<Filter>,
            _wait: Duration,
        ) -> nostr_client::Result<Vec<Event>> {
            Ok(Vec::new())
        }
    }

    fn setup() -> (Arc<Recorder>, ResponsePublisher, Event) {
        let recorder = Arc::new(Recorder::default());
        let publisher = ResponsePublisher::new(Keys::generate(), recorder.clone());
        let request = Keys::generate()
            .sign(
                &EventTemplate::new(KIND_JOB_MEMORY_CURATION, "")
                    .with_tag(vec!["i".into(), "log".into(), "text".into()]),
            )
            .unwrap();
        (recorder, publisher, request)
    }

    #[tokio::test]
    async fn test_status_event_shape() {
        let (recorder, publisher, request) = setup();
        publisher
            .status(&request, JobStatus::Processing, "Analyzing daily log...")
            .await
            .unwrap();

        let events = recorder.events.lock();
        let event = &events[0];
        assert_eq!(event.kind, KIND_JOB_FEEDBACK);
        assert_eq!(event.content, "");
        assert_eq!(
            event.tag("status").unwrap(),
            ["status", "processing", "Analyzing daily log..."]
        );
        assert_eq!(event.tag_value("e"), Some(request.id.as_str()));
        assert_eq!(event.tag_value("p"), Some(request.pubkey.as_str()));
        assert!(verify_event(event));
    }

    #[tokio::test]
    async fn test_result_event_shape() {
        let (recorder, publisher, request) = setup();
        let publisher = publisher.with_amount(Some(1000));
        let mut record = JobRecord::new(&request.id, &request.pubkey, request.kind);

        let event = publisher
            .publish_result(&mut record, &request, "## Summary")
            .await
            .unwrap();

        assert_eq!(event.kind, 6700);
        assert_eq!(event.content, "## Summary");
        let embedded: Event = serde_json::from_str(event.tag_value("request").unwrap()).unwrap();
        assert_eq!(embedded, request);
        assert_eq!(event.tag_value("e"), Some(request.id.as_str()));
        assert_eq!(event.tag_value("amount"), Some("1000"));
        assert!(record.is_terminal());
        assert_eq!(recorder.events.lock().len(), 1);
    }

    #[tokio::test]
    async fn test_terminal_response_published_once() {
        let (recorder, publisher, request) = setup();
        let mut record = JobRecord::new(&request.id, &request.pubkey, request.kind);

        publisher
            .publish_result(&mut record, &request, "first")
            .await
            .unwrap();
        let again = publisher.publish_result(&mut record, &request, "second").await;
        assert!(matches!(again, Err(DvmError::AlreadyTerminal(_))));

        let error = ValidationError::processing_failed("late failure");
        let late = publisher.publish_error(&mut record, &request, &error).await;
        assert!(matches!(late, Err(DvmError::AlreadyTerminal(_))));

        assert_eq!(recorder.events.lock().len(), 1);
        assert_eq!(record.result.as_deref(), Some("first"));
    }

    #[tokio::test]
    async fn test_error_status_carries_reason_code() {
        let (recorder, publisher, request) = setup();
        let mut record = JobRecord::new(&request.id, &request.pubkey, request.kind);
        let error = ValidationError::missing_input("No daily log input provided");

        publisher
            .publish_error(&mut record, &request, &error)
            .await
            .unwrap();

        let events = recorder.events.lock();
        assert_eq!(
            events[0].tag("status").unwrap(),
            ["status", "error", "missing_input: No daily log input provided"]
        );
        assert_eq!(events[0].content, "");
    }
}
