//! The DVM service loop.
//!
//! Connects the pool, optionally announces itself, subscribes to every
//! registered request kind and hands each delivery to the intake. Admitted
//! jobs run on their own task so a slow job never holds up intake.

use crate::announce::{announce, handler_info};
use crate::config::DvmConfig;
use crate::dedup::ProcessedJobSet;
use crate::error::Result;
use crate::intake::{Admission, IntakeStats, JobIntake};
use crate::processor::ProcessorRegistry;
use crate::publisher::ResponsePublisher;
use crate::relay_api::RelayApi;
use nostr::Keys;
use nostr_client::{PoolEvent, RelayPool, SubscriptionItem};
use serde::Serialize;
use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::broadcast::error::RecvError;
use tracing::{debug, info, trace, warn};

/// Snapshot logged on every status tick and at shutdown.
#[derive(Debug, Clone, Serialize)]
pub struct ServiceStats {
    pub intake: IntakeStats,
    pub connected_relays: usize,
    pub total_relays: usize,
    /// Job ids currently held for de-duplication
    pub processed_set: usize,
    pub uptime: Duration,
}

pub struct DvmService {
    config: DvmConfig,
    keys: Keys,
    pool: Arc<RelayPool>,
    intake: Arc<JobIntake>,
    started: Instant,
}

impl DvmService {
    /// Service with the built-in processors and keys from `config`.
    pub fn new(config: DvmConfig) -> Result<Self> {
        let keys = config.keys()?;
        Self::with_registry(config, keys, ProcessorRegistry::with_defaults()?)
    }

    pub fn with_registry(
        config: DvmConfig,
        keys: Keys,
        registry: ProcessorRegistry,
    ) -> Result<Self> {
        let pool = Arc::new(RelayPool::with_config(config.relay_config()));
        let relay: Arc<dyn RelayApi> = pool.clone();
        let publisher =
            ResponsePublisher::new(keys.clone(), relay).with_amount(config.result_amount_msats);
        let processed = ProcessedJobSet::new(config.processed_capacity, config.processed_ttl());
        let intake = Arc::new(JobIntake::new(registry, publisher, processed));

        Ok(Self {
            config,
            keys,
            pool,
            intake,
            started: Instant::now(),
        })
    }

    pub fn public_key(&self) -> &str {
        self.keys.public_key()
    }

    pub fn pool(&self) -> &Arc<RelayPool> {
        &self.pool
    }

    pub fn intake(&self) -> &Arc<JobIntake> {
        &self.intake
    }

    pub async fn stats(&self) -> ServiceStats {
        ServiceStats {
            intake: self.intake.stats(),
            connected_relays: self.pool.connected_count().await,
            total_relays: self.pool.relay_urls().await.len(),
            processed_set: self.intake.processed_len(),
            uptime: self.started.elapsed(),
        }
    }

    async fn log_stats(&self) {
        let stats = self.stats().await;
        info!(
            received = stats.intake.received,
            accepted = stats.intake.accepted,
            duplicates = stats.intake.duplicates,
            processed = stats.intake.processed,
            failed = stats.intake.failed,
            connected_relays = stats.connected_relays,
            total_relays = stats.total_relays,
            processed_set = stats.processed_set,
            uptime_secs = stats.uptime.as_secs(),
            "dvm status"
        );
    }

    /// Serve until `shutdown` resolves.
    pub async fn run(&self, shutdown: impl Future<Output = ()>) -> Result<()> {
        info!(
            pubkey = %self.public_key(),
            kinds = ?self.intake.registry().kinds(),
            "starting dvm"
        );

        let mut connected = 0;
        for (url, result) in self.pool.connect(&self.config.relays).await {
            match result {
                Ok(()) => connected += 1,
                Err(e) => warn!(relay = %url, error = %e, "relay unavailable, will keep retrying"),
            }
        }
        info!(connected, configured = self.config.relays.len(), "relays connected");

        if self.config.announce {
            let info = handler_info(&self.config, self.intake.registry());
            if let Err(e) = announce(self.pool.as_ref(), &self.keys, &info).await {
                warn!(error = %e, "handler announcement failed");
            }
        }

        let (sub_id, mut items) = self.pool.subscribe_channel(self.intake.filters()).await?;
        let mut notifications = self.pool.notifications();
        let mut status_tick = tokio::time::interval(self.config.status_interval());
        status_tick.tick().await;
        tokio::pin!(shutdown);

        loop {
            tokio::select! {
                item = items.recv() => match item {
                    Some(SubscriptionItem::Event { relay_url, event }) => {
                        trace!(relay = %relay_url, event_id = %event.short_id(), "delivery");
                        self.dispatch(event);
                    }
                    Some(SubscriptionItem::Eose { relay_url, all_eose }) => {
                        debug!(relay = %relay_url, all_eose, "stored requests replayed");
                    }
                    None => {
                        warn!("intake subscription closed");
                        break;
                    }
                },
                notification = notifications.recv() => match notification {
                    Ok(PoolEvent::Ok { relay_url, event_id, success: false, message }) => {
                        warn!(relay = %relay_url, event_id = %event_id, %message, "relay rejected event");
                    }
                    Ok(PoolEvent::Notice { relay_url, message }) => {
                        info!(relay = %relay_url, %message, "relay notice");
                    }
                    Ok(other) => trace!(?other, "pool event"),
                    Err(RecvError::Lagged(skipped)) => debug!(skipped, "pool events lagged"),
                    Err(RecvError::Closed) => {}
                },
                _ = status_tick.tick() => {
                    let purged = self.intake.purge_expired();
                    if purged > 0 {
                        debug!(purged, "forgot expired job ids");
                    }
                    self.log_stats().await;
                }
                _ = &mut shutdown => {
                    info!("shutting down");
                    break;
                }
            }
        }

        let _ = self.pool.unsubscribe(&sub_id).await;
        self.log_stats().await;
        self.pool.disconnect_all().await;
        Ok(())
    }

    fn dispatch(&self, event: nostr::Event) {
        let Admission::Accepted(job) = self.intake.admit(event) else {
            return;
        };
        let intake = self.intake.clone();
        tokio::spawn(async move {
            let job_id = job.event.id.clone();
            match intake.run(*job).await {
                Ok(record) => debug!(
                    job_id = %job_id,
                    state = record.state.as_str(),
                    "job finished"
                ),
                Err(e) => warn!(job_id = %job_id, error = %e, "could not answer job"),
            }
        });
    }
}
