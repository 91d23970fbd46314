//! Scheduler: emits probe jobs for due services on a fixed tick.

use crate::db::{Service, Store};
use crate::queue::{JobQueue, ProbeJob};
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::time::MissedTickBehavior;

/// The scheduling stage of the pipeline.
///
/// Never writes `last_checked_at`; that belongs to the worker's state
/// update. A service that is still in flight on the next tick may therefore
/// be scheduled again; the duplicate is absorbed downstream.
pub struct Scheduler {
    store: Store,
    queue: Arc<dyn JobQueue>,
    tick: Duration,
}

impl Scheduler {
    pub fn new(store: Store, queue: Arc<dyn JobQueue>, tick: Duration) -> Self {
        Self { store, queue, tick }
    }

    /// Run until the stop channel fires. The stop signal is observed at the
    /// top of every tick; no further publishes happen after it.
    pub async fn run(self, mut stop: broadcast::Receiver<()>) {
        tracing::info!("Scheduler: started, tick {:?}", self.tick);

        let mut interval = tokio::time::interval(self.tick);
        interval.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                _ = stop.recv() => {
                    tracing::info!("Scheduler: stopped");
                    break;
                }
                _ = interval.tick() => {
                    self.tick_once(Utc::now()).await;
                }
            }
        }
    }

    /// One scheduling round: snapshot the registry and publish a job for
    /// every due service. Per-service failures never abort the round.
    async fn tick_once(&self, now: DateTime<Utc>) {
        let services = match self.store.list_services() {
            Ok(s) => s,
            Err(e) => {
                tracing::error!("Scheduler: failed to list services: {}", e);
                return;
            }
        };

        for service in services {
            if !is_due(&service, now) {
                continue;
            }

            let job = ProbeJob::for_service(&service);
            match self.queue.publish(&job).await {
                Ok(()) => {
                    tracing::debug!(
                        "Scheduler: job scheduled service={} method={} url={}",
                        job.service_name,
                        job.method,
                        job.url
                    );
                }
                Err(e) => {
                    tracing::error!(
                        "Scheduler: job schedule failed service={}: {}",
                        service.name,
                        e
                    );
                }
            }
        }
    }
}

/// A service is due when it has never been checked, or its interval has
/// elapsed since the last check.
pub fn is_due(service: &Service, now: DateTime<Utc>) -> bool {
    match service.last_checked_at {
        None => true,
        Some(last) => now > last + ChronoDuration::seconds(service.interval_secs),
    }
}
