//! Service and client talking through two in-process relays.

mod common;

use common::init_tracing;
use dvm::{DvmConfig, DvmService, JobClient, JobOutcome, list_handlers};
use nostr::{KIND_HANDLER_INFORMATION, KIND_JOB_FEEDBACK, Keys};
use nostr_client::RelayPool;
use nostr_client::testing::MockRelay;
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::oneshot;

const DAILY_LOG: &str = "# 2026-02-05

## Session 1 (10:00)
- [10:00] Built relay-sync.mjs to mirror notes
- [10:05] Key insight: publishing to several relays means every job arrives more than once
- Met **Jeletor** — runs a trust DVM

## Stats
- Nostr notes: 12
";

async fn wait_until_connected(pool: &RelayPool, count: usize) {
    tokio::time::timeout(Duration::from_secs(5), async {
        while pool.connected_count().await < count {
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
    })
    .await
    .expect("pool did not connect");
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_job_answered_once_across_two_relays() {
    init_tracing();
    let a = MockRelay::start().await.unwrap();
    let b = MockRelay::start().await.unwrap();
    let urls = vec![a.url(), b.url()];

    let config = DvmConfig {
        relays: urls.clone(),
        announce: true,
        connect_timeout_secs: 2,
        ..DvmConfig::default()
    };
    let service = Arc::new(DvmService::new(config).unwrap());
    let provider = service.public_key().to_string();
    let (stop_tx, stop_rx) = oneshot::channel::<()>();
    let server = tokio::spawn({
        let service = service.clone();
        async move {
            service
                .run(async {
                    let _ = stop_rx.await;
                })
                .await
        }
    });

    wait_until_connected(service.pool(), 2).await;
    a.wait_for_events(KIND_HANDLER_INFORMATION, 1, Duration::from_secs(5))
        .await;

    let pool = Arc::new(RelayPool::new());
    pool.connect(&urls).await;
    wait_until_connected(&pool, 2).await;

    let client = JobClient::new(Keys::generate(), pool.clone())
        .with_poll_interval(Duration::from_millis(200))
        .with_timeout(Duration::from_secs(10))
        .with_query_timeout(Duration::from_secs(1));
    let request = client.curation_request(DAILY_LOG, None, "detailed").unwrap();
    let (event, outcome) = client.run(&request).await.unwrap();

    let response = match outcome {
        JobOutcome::Success(response) => response,
        other => panic!("expected success, got {other:?}"),
    };
    assert_eq!(response.event.pubkey, provider);
    assert!(response.content.contains("### → What I Built"));
    assert!(response.content.contains("relay-sync.mjs"));
    assert!(response.content.contains("**Jeletor** — runs a trust DVM"));
    assert!(response.content.contains("## Summary"));

    // Both relays delivered the job; give a second answer time to show up.
    a.wait_for_events(6700, 1, Duration::from_secs(5)).await;
    b.wait_for_events(6700, 1, Duration::from_secs(5)).await;
    tokio::time::sleep(Duration::from_millis(300)).await;

    let result_ids: HashSet<String> = a
        .events_of_kind(6700)
        .into_iter()
        .chain(b.events_of_kind(6700))
        .map(|e| e.id)
        .collect();
    assert_eq!(result_ids.len(), 1);

    let processing: HashSet<String> = a
        .events_of_kind(KIND_JOB_FEEDBACK)
        .into_iter()
        .chain(b.events_of_kind(KIND_JOB_FEEDBACK))
        .filter(|e| e.tag_value("status") == Some("processing"))
        .map(|e| e.id)
        .collect();
    assert_eq!(processing.len(), 1);

    let stats = service.intake().stats();
    assert_eq!(stats.accepted, 1);
    assert_eq!(stats.processed, 1);
    assert!(stats.received >= 1);

    let handlers = list_handlers(pool.as_ref(), &provider, Duration::from_secs(1))
        .await
        .unwrap();
    assert!(!handlers.is_empty());
    assert_eq!(handlers[0].1.identifier, "memory-curator-v1");
    assert_eq!(handlers[0].1.kinds, vec![event.kind]);

    stop_tx.send(()).unwrap();
    server.await.unwrap().unwrap();
    pool.disconnect_all().await;
}
