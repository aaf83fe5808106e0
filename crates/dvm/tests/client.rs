//! Requester polling, on a paused clock.

mod common;

use common::{FakeRelay, init_tracing};
use dvm::{JobClient, JobOutcome, JobProgress};
use nostr::{Event, JobFeedback, JobResult, JobStatus, Keys};
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;

struct Setup {
    relay: Arc<FakeRelay>,
    client: JobClient,
    provider: Keys,
}

fn setup(poll: Duration, timeout: Duration) -> Setup {
    init_tracing();
    let relay = Arc::new(FakeRelay::new());
    let client = JobClient::new(Keys::generate(), relay.clone())
        .with_poll_interval(poll)
        .with_timeout(timeout);
    Setup {
        relay,
        client,
        provider: Keys::generate(),
    }
}

async fn submit(setup: &Setup) -> Event {
    submit_log(setup, "- [09:00] Built relay-tool.mjs").await
}

async fn submit_log(setup: &Setup, log: &str) -> Event {
    let request = setup.client.curation_request(log, None, "concise").unwrap();
    setup.client.submit(&request).await.unwrap()
}

fn result_for(provider: &Keys, request: &Event, content: &str) -> Event {
    let result = JobResult::new(request.kind, &request.id, &request.pubkey, content).unwrap();
    provider.sign(&result.to_template()).unwrap()
}

fn status_for(provider: &Keys, request: &Event, status: JobStatus, extra: &str) -> Event {
    let feedback = JobFeedback::new(status, &request.id, &request.pubkey).with_status_extra(extra);
    provider.sign(&feedback.to_template()).unwrap()
}

#[tokio::test(start_paused = true)]
async fn test_result_found_on_third_poll() {
    let s = setup(Duration::from_secs(2), Duration::from_secs(30));
    let request = submit(&s).await;
    let result = result_for(&s.provider, &request, "## Summary\n- Events: 1");
    s.relay.script(vec![Vec::new(), Vec::new(), vec![result.clone()]]);

    let started = Instant::now();
    let outcome = s.client.await_response(&request).await.unwrap();

    assert_eq!(started.elapsed(), Duration::from_secs(6));
    assert_eq!(s.relay.query_count(), 3);
    match outcome {
        JobOutcome::Success(response) => {
            assert_eq!(response.event.id, result.id);
            assert_eq!(response.content, "## Summary\n- Events: 1");
            assert!(response.amount.is_none());
        }
        other => panic!("expected success, got {other:?}"),
    }
}

#[tokio::test(start_paused = true)]
async fn test_times_out_at_deadline() {
    let s = setup(Duration::from_secs(2), Duration::from_secs(5));
    let request = submit(&s).await;

    let started = Instant::now();
    let outcome = s.client.await_response(&request).await.unwrap();

    assert_eq!(started.elapsed(), Duration::from_secs(5));
    // Polls at 2s, 4s and a final one at 5s.
    assert_eq!(s.relay.query_count(), 3);
    assert_eq!(
        s.relay.query_waits(),
        vec![Duration::from_secs(3), Duration::from_secs(1), Duration::ZERO]
    );
    match outcome {
        JobOutcome::Timeout {
            elapsed,
            last_status,
        } => {
            assert_eq!(elapsed, Duration::from_secs(5));
            assert!(last_status.is_none());
        }
        other => panic!("expected timeout, got {other:?}"),
    }
}

#[tokio::test(start_paused = true)]
async fn test_slow_poll_does_not_overrun_deadline() {
    let s = setup(Duration::from_secs(2), Duration::from_secs(5));
    s.relay.hold_queries();
    let request = submit(&s).await;

    let started = Instant::now();
    let outcome = s.client.await_response(&request).await.unwrap();

    assert_eq!(started.elapsed(), Duration::from_secs(5));
    assert_eq!(s.relay.query_waits(), vec![Duration::from_secs(3)]);
    match outcome {
        JobOutcome::Timeout { elapsed, .. } => assert_eq!(elapsed, Duration::from_secs(5)),
        other => panic!("expected timeout, got {other:?}"),
    }
}

#[tokio::test(start_paused = true)]
async fn test_error_status_ends_wait() {
    let s = setup(Duration::from_secs(3), Duration::from_secs(30));
    let request = submit(&s).await;
    let processing = status_for(&s.provider, &request, JobStatus::Processing, "Analyzing daily log...");
    let error = status_for(
        &s.provider,
        &request,
        JobStatus::Error,
        "missing_input: No daily log input provided",
    );
    s.relay
        .script(vec![vec![processing.clone()], vec![processing, error.clone()]]);

    let outcome = s.client.await_response(&request).await.unwrap();
    match outcome {
        JobOutcome::Failed { message, event } => {
            assert_eq!(message, "missing_input: No daily log input provided");
            assert_eq!(event.id, error.id);
        }
        other => panic!("expected failure, got {other:?}"),
    }
    assert_eq!(s.relay.query_count(), 2);
}

#[tokio::test(start_paused = true)]
async fn test_progress_reported_once_per_status() {
    let seen: Arc<Mutex<Vec<JobProgress>>> = Arc::new(Mutex::new(Vec::new()));
    let sink = seen.clone();

    let mut s = setup(Duration::from_secs(1), Duration::from_secs(10));
    s.client = s
        .client
        .on_progress(Arc::new(move |progress: &JobProgress| sink.lock().push(progress.clone())));

    let request = submit(&s).await;
    let processing = status_for(&s.provider, &request, JobStatus::Processing, "Analyzing daily log...");
    let result = result_for(&s.provider, &request, "done");
    s.relay.script(vec![
        vec![processing.clone()],
        vec![processing.clone()],
        vec![processing, result],
    ]);

    let outcome = s.client.await_response(&request).await.unwrap();
    assert!(outcome.is_success());

    let seen = seen.lock();
    assert_eq!(seen.len(), 1);
    assert_eq!(seen[0].status, JobStatus::Processing);
    assert_eq!(seen[0].extra.as_deref(), Some("Analyzing daily log..."));
    assert_eq!(seen[0].elapsed, Duration::from_secs(1));
}

#[tokio::test(start_paused = true)]
async fn test_ignores_responses_to_other_jobs_and_forgeries() {
    let s = setup(Duration::from_secs(1), Duration::from_secs(3));
    let request = submit(&s).await;
    let other = submit_log(&s, "- [09:30] Wrote a guide.md").await;
    assert_ne!(other.id, request.id);

    let unrelated = result_for(&s.provider, &other, "not yours");
    let mut forged = result_for(&s.provider, &request, "real");
    forged.content = "tampered".to_string();
    s.relay.script(vec![vec![unrelated], vec![forged]]);

    let outcome = s.client.await_response(&request).await.unwrap();
    match outcome {
        JobOutcome::Timeout { elapsed, .. } => assert_eq!(elapsed, Duration::from_secs(3)),
        other => panic!("expected timeout, got {other:?}"),
    }
}

#[tokio::test(start_paused = true)]
async fn test_timeout_remembers_last_status() {
    let s = setup(Duration::from_secs(2), Duration::from_secs(4));
    let request = submit(&s).await;
    let processing = status_for(&s.provider, &request, JobStatus::Processing, "");
    s.relay.script(vec![vec![processing]]);

    match s.client.await_response(&request).await.unwrap() {
        JobOutcome::Timeout { last_status, .. } => {
            assert_eq!(last_status, Some(JobStatus::Processing));
        }
        other => panic!("expected timeout, got {other:?}"),
    }
}

#[tokio::test(start_paused = true)]
async fn test_run_submits_then_waits() {
    let s = setup(Duration::from_secs(1), Duration::from_secs(2));
    let request = s
        .client
        .curation_request("- Built a tool", Some("## What I Built\n- other"), "detailed")
        .unwrap();

    let (event, outcome) = s.client.run(&request).await.unwrap();
    assert!(matches!(outcome, JobOutcome::Timeout { .. }));

    let published = s.relay.published();
    assert_eq!(published.len(), 1);
    assert_eq!(published[0].id, event.id);
    assert_eq!(event.pubkey, s.client.public_key());
}
