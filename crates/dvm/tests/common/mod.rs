//! Shared fixtures for the dvm integration tests.

#![allow(dead_code)]

use async_trait::async_trait;
use dvm::{JobInputs, JobProcessor, ProcessorOutput, RelayApi, ValidationError};
use nostr::{Event, EventTemplate, KIND_JOB_FEEDBACK, Keys};
use nostr_client::{Filter, PublishReport};
use parking_lot::Mutex;
use serde_json::Value;
use std::sync::Once;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;

static INIT: Once = Once::new();

pub fn init_tracing() {
    INIT.call_once(|| {
        let _ = tracing_subscriber::fmt()
            .with_env_filter("warn")
            .with_test_writer()
            .try_init();
    });
}

/// Relay stand-in that records publishes and answers queries from a script.
///
/// Query `n` (zero based) returns `script[n]`; once the script runs out,
/// queries return nothing.
#[derive(Default)]
pub struct FakeRelay {
    published: Mutex<Vec<Event>>,
    script: Mutex<Vec<Vec<Event>>>,
    queries: AtomicUsize,
    waits: Mutex<Vec<Duration>>,
    /// Answer each query only after its full wait, like a relay that never
    /// sends EOSE
    slow: AtomicBool,
}

impl FakeRelay {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn script(&self, responses: Vec<Vec<Event>>) {
        *self.script.lock() = responses;
    }

    pub fn published(&self) -> Vec<Event> {
        self.published.lock().clone()
    }

    pub fn published_of_kind(&self, kind: u16) -> Vec<Event> {
        self.published
            .lock()
            .iter()
            .filter(|event| event.kind == kind)
            .cloned()
            .collect()
    }

    /// Published feedback events whose `status` tag equals `status`.
    pub fn statuses(&self, status: &str) -> Vec<Event> {
        self.published_of_kind(KIND_JOB_FEEDBACK)
            .into_iter()
            .filter(|event| event.tag_value("status") == Some(status))
            .collect()
    }

    pub fn query_count(&self) -> usize {
        self.queries.load(Ordering::SeqCst)
    }

    /// The `wait` passed to each query so far.
    pub fn query_waits(&self) -> Vec<Duration> {
        self.waits.lock().clone()
    }

    pub fn hold_queries(&self) {
        self.slow.store(true, Ordering::SeqCst);
    }
}

#[async_trait]
impl RelayApi for FakeRelay {
    async fn publish(&self, event: &Event) -> nostr_client::Result<PublishReport> {
        self.published.lock().push(event.clone());
        Ok(PublishReport {
            event_id: event.id.clone(),
            sent_to: vec!["ws://fake".to_string()],
            failed: Vec::new(),
        })
    }

    async fn query(&self, _filters: Vec<Filter>, wait: Duration) -> nostr_client::Result<Vec<Event>> {
        let n = self.queries.fetch_add(1, Ordering::SeqCst);
        self.waits.lock().push(wait);
        if self.slow.load(Ordering::SeqCst) {
            tokio::time::sleep(wait).await;
        }
        Ok(self.script.lock().get(n).cloned().unwrap_or_default())
    }
}

/// Kind 5050 processor that counts how often it runs.
#[derive(Default)]
pub struct CountingProcessor {
    runs: AtomicUsize,
}

impl CountingProcessor {
    pub fn runs(&self) -> usize {
        self.runs.load(Ordering::SeqCst)
    }
}

impl JobProcessor for CountingProcessor {
    fn kind(&self) -> u16 {
        5050
    }

    fn name(&self) -> &str {
        "counter"
    }

    fn validate(&self, inputs: &JobInputs) -> Result<(), ValidationError> {
        if inputs.unnamed.is_empty() {
            return Err(ValidationError::missing_input("No text input provided"));
        }
        Ok(())
    }

    fn process(&self, inputs: &JobInputs) -> dvm::Result<ProcessorOutput> {
        let run = self.runs.fetch_add(1, Ordering::SeqCst) + 1;
        Ok(ProcessorOutput {
            extraction: Value::Null,
            content: format!("run {run}: {}", inputs.unnamed.join(" ")),
        })
    }
}

pub fn text_input(text: &str) -> Vec<String> {
    vec!["i".into(), text.into(), "text".into()]
}

pub fn signed_request(keys: &Keys, kind: u16, tags: Vec<Vec<String>>) -> Event {
    keys.sign(&EventTemplate::new(kind, "").with_tags(tags))
        .unwrap()
}

/// Processor that always fails, either by error or by panic.
pub struct FaultyProcessor {
    kind: u16,
    panics: bool,
}

impl FaultyProcessor {
    pub fn erroring(kind: u16) -> Self {
        Self {
            kind,
            panics: false,
        }
    }

    pub fn panicking(kind: u16) -> Self {
        Self { kind, panics: true }
    }
}

impl JobProcessor for FaultyProcessor {
    fn kind(&self) -> u16 {
        self.kind
    }

    fn name(&self) -> &str {
        "faulty"
    }

    fn validate(&self, _inputs: &JobInputs) -> Result<(), ValidationError> {
        Ok(())
    }

    fn process(&self, _inputs: &JobInputs) -> dvm::Result<ProcessorOutput> {
        if self.panics {
            panic!("index out of range");
        }
        Err(dvm::DvmError::Processing("boom".to_string()))
    }
}
