//! Job intake: decide which deliveries become jobs, then run them.
//!
//! The same request usually arrives once per relay. [`JobIntake::admit`]
//! filters deliveries and claims the job id in the [`ProcessedJobSet`]
//! before anything is published, so of any number of concurrent
//! deliveries exactly one is accepted.

use crate::dedup::ProcessedJobSet;
use crate::error::{DvmError, Result, ValidationError};
use crate::inputs::JobInputs;
use crate::job::JobRecord;
use crate::processor::{JobProcessor, ProcessorRegistry};
use crate::publisher::ResponsePublisher;
use nostr::{Event, JobRequest, JobStatus, verify_event};
use nostr_client::Filter;
use serde::Serialize;
use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;
use tracing::{debug, error, info, warn};

/// Stored requests replayed by each relay when the intake subscribes.
const REPLAY_LIMIT: u64 = 10;

/// A delivery that became a job.
pub struct AdmittedJob {
    pub event: Event,
    pub request: JobRequest,
    pub inputs: JobInputs,
    pub processor: Arc<dyn JobProcessor>,
    pub record: JobRecord,
}

impl std::fmt::Debug for AdmittedJob {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AdmittedJob")
            .field("id", &self.event.id)
            .field("kind", &self.event.kind)
            .field("processor", &self.processor.name())
            .finish_non_exhaustive()
    }
}

/// Outcome of [`JobIntake::admit`]. Only `Accepted` leads to any response.
#[derive(Debug)]
pub enum Admission {
    Accepted(Box<AdmittedJob>),
    /// Id already taken, by an earlier delivery or a concurrent one
    Duplicate,
    /// Id does not match the fields, or the signature does not verify
    InvalidSignature,
    /// `p` tags name other providers
    RoutedElsewhere,
    UnsupportedKind(u16),
    /// Claimed, but the request could not be read
    Malformed(String),
}

impl Admission {
    pub fn is_accepted(&self) -> bool {
        matches!(self, Admission::Accepted(_))
    }

    fn label(&self) -> &'static str {
        match self {
            Admission::Accepted(_) => "accepted",
            Admission::Duplicate => "duplicate",
            Admission::InvalidSignature => "invalid signature",
            Admission::RoutedElsewhere => "routed to another provider",
            Admission::UnsupportedKind(_) => "unsupported kind",
            Admission::Malformed(_) => "malformed",
        }
    }
}

#[derive(Debug, Default)]
struct IntakeCounters {
    received: AtomicU64,
    accepted: AtomicU64,
    duplicates: AtomicU64,
    rejected: AtomicU64,
    processed: AtomicU64,
    failed: AtomicU64,
}

/// Point-in-time intake counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct IntakeStats {
    /// Every delivery seen
    pub received: u64,
    /// Deliveries that became jobs
    pub accepted: u64,
    pub duplicates: u64,
    /// Dropped for signature, routing, kind or parse problems
    pub rejected: u64,
    /// Jobs answered with a result
    pub processed: u64,
    /// Jobs answered with an error status
    pub failed: u64,
}

pub struct JobIntake {
    pubkey: String,
    processed: ProcessedJobSet,
    registry: ProcessorRegistry,
    publisher: ResponsePublisher,
    counters: IntakeCounters,
}

impl JobIntake {
    pub fn new(
        registry: ProcessorRegistry,
        publisher: ResponsePublisher,
        processed: ProcessedJobSet,
    ) -> Self {
        Self {
            pubkey: publisher.public_key().to_string(),
            processed,
            registry,
            publisher,
            counters: IntakeCounters::default(),
        }
    }

    pub fn public_key(&self) -> &str {
        &self.pubkey
    }

    pub fn registry(&self) -> &ProcessorRegistry {
        &self.registry
    }

    pub fn processed_len(&self) -> usize {
        self.processed.len()
    }

    /// Forget job ids older than the processed-set TTL.
    pub fn purge_expired(&self) -> usize {
        self.processed.purge_expired(Instant::now())
    }

    /// Subscription filters for every registered request kind.
    pub fn filters(&self) -> Vec<Filter> {
        vec![
            Filter::new()
                .kinds(self.registry.kinds())
                .limit(REPLAY_LIMIT),
        ]
    }

    pub fn stats(&self) -> IntakeStats {
        let c = &self.counters;
        IntakeStats {
            received: c.received.load(Ordering::Relaxed),
            accepted: c.accepted.load(Ordering::Relaxed),
            duplicates: c.duplicates.load(Ordering::Relaxed),
            rejected: c.rejected.load(Ordering::Relaxed),
            processed: c.processed.load(Ordering::Relaxed),
            failed: c.failed.load(Ordering::Relaxed),
        }
    }

    /// Decide whether a delivery becomes a job.
    ///
    /// Checks run cheapest first. The insert into the processed set is the
    /// last check, so rejected deliveries never occupy the set.
    pub fn admit(&self, event: Event) -> Admission {
        self.counters.received.fetch_add(1, Ordering::Relaxed);
        let admission = self.classify(event);

        match &admission {
            Admission::Accepted(job) => {
                self.counters.accepted.fetch_add(1, Ordering::Relaxed);
                info!(
                    job_id = %job.event.short_id(),
                    kind = job.event.kind,
                    requester = %job.event.pubkey,
                    processor = job.processor.name(),
                    "accepted job"
                );
            }
            Admission::Duplicate => {
                self.counters.duplicates.fetch_add(1, Ordering::Relaxed);
            }
            other => {
                self.counters.rejected.fetch_add(1, Ordering::Relaxed);
                debug!(reason = other.label(), "dropped delivery");
            }
        }

        admission
    }

    fn classify(&self, event: Event) -> Admission {
        if self.processed.contains(&event.id) {
            return Admission::Duplicate;
        }
        if !verify_event(&event) {
            return Admission::InvalidSignature;
        }

        let routed_elsewhere = {
            let mut providers = event.tags_named("p").filter_map(|tag| tag.get(1)).peekable();
            providers.peek().is_some() && !providers.any(|p| *p == self.pubkey)
        };
        if routed_elsewhere {
            return Admission::RoutedElsewhere;
        }

        let Some(processor) = self.registry.get(event.kind) else {
            return Admission::UnsupportedKind(event.kind);
        };

        if !self.processed.insert(&event.id) {
            return Admission::Duplicate;
        }

        let request = match JobRequest::from_event(&event) {
            Ok(request) => request,
            Err(e) => return Admission::Malformed(e.to_string()),
        };
        let inputs = JobInputs::from_request(&request);
        let record = JobRecord::new(&event.id, &event.pubkey, event.kind);

        Admission::Accepted(Box::new(AdmittedJob {
            event,
            request,
            inputs,
            processor,
            record,
        }))
    }

    /// Validate, process and answer an admitted job.
    ///
    /// A validation failure is answered with a single `error` status and
    /// nothing else. Otherwise a best-effort `processing` status goes out
    /// first, then the result or a `processing_failed` error status. A
    /// processor that panics is answered the same way as one that errors.
    pub async fn run(&self, job: AdmittedJob) -> Result<JobRecord> {
        let AdmittedJob {
            event,
            inputs,
            processor,
            mut record,
            ..
        } = job;

        if let Err(invalid) = processor.validate(&inputs) {
            self.counters.failed.fetch_add(1, Ordering::Relaxed);
            self.publisher
                .publish_error(&mut record, &event, &invalid)
                .await?;
            return Ok(record);
        }

        record.start_processing();
        if let Err(e) = self
            .publisher
            .status(&event, JobStatus::Processing, processor.status_message())
            .await
        {
            warn!(job_id = %event.short_id(), error = %e, "could not publish processing status");
        }

        let outcome = panic::catch_unwind(AssertUnwindSafe(|| processor.process(&inputs)))
            .unwrap_or_else(|payload| {
                Err(DvmError::Processing(format!(
                    "{} panicked: {}",
                    processor.name(),
                    panic_message(payload.as_ref())
                )))
            });

        match outcome {
            Ok(output) => {
                self.publisher
                    .publish_result(&mut record, &event, &output.content)
                    .await?;
                self.counters.processed.fetch_add(1, Ordering::Relaxed);
            }
            Err(e) => {
                let failure = match e {
                    DvmError::Validation(invalid) => invalid,
                    other => {
                        error!(job_id = %event.short_id(), error = %other, "job processing failed");
                        ValidationError::processing_failed(other.to_string())
                    }
                };
                self.counters.failed.fetch_add(1, Ordering::Relaxed);
                self.publisher
                    .publish_error(&mut record, &event, &failure)
                    .await?;
            }
        }

        Ok(record)
    }

    /// Admit and, when accepted, run. `None` for dropped deliveries.
    pub async fn handle(&self, event: Event) -> Result<Option<JobRecord>> {
        match self.admit(event) {
            Admission::Accepted(job) => self.run(*job).await.map(Some),
            _ => Ok(None),
        }
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> &str {
    if let Some(message) = payload.downcast_ref::<&str>() {
        message
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message
    } else {
        "unknown panic"
    }
}
