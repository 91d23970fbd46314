//! Worker: consumes probe jobs and drives the check pipeline.
//!
//! Per delivery: decode, resolve the service, probe, append the audit log,
//! advance liveness state, emit the transition event, ack. Every failure is
//! localized to its delivery; the loop itself never aborts.

use crate::db::{Store, StoreError};
use crate::hub::Hub;
use crate::probe;
use crate::queue::{Delivery, JobQueue, ProbeJob, QueueError};
use chrono::Utc;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;

/// The consuming stage of the pipeline.
pub struct Worker {
    store: Store,
    queue: Arc<dyn JobQueue>,
    hub: Hub,
}

impl Worker {
    pub fn new(store: Store, queue: Arc<dyn JobQueue>, hub: Hub) -> Self {
        Self { store, queue, hub }
    }

    /// Run until the stop channel fires or the queue closes. A delivery
    /// already being processed runs to completion, probe deadline included,
    /// and is still acked; only the wait for the next delivery is
    /// interruptible.
    pub async fn run(self, mut stop: broadcast::Receiver<()>) {
        tracing::info!("Worker: started");

        loop {
            tokio::select! {
                _ = stop.recv() => {
                    tracing::info!("Worker: stopped");
                    break;
                }
                delivery = self.queue.consume() => match delivery {
                    Ok(delivery) => self.process(delivery).await,
                    Err(QueueError::Closed) => {
                        tracing::info!("Worker: queue closed");
                        break;
                    }
                    Err(e) => {
                        tracing::error!("Worker: consume failed: {}", e);
                        tokio::time::sleep(Duration::from_secs(1)).await;
                    }
                },
            }
        }
    }

    async fn process(&self, delivery: Delivery) {
        let job: ProbeJob = match serde_json::from_slice(&delivery.payload) {
            Ok(job) => job,
            Err(e) => {
                tracing::error!("Worker: invalid job payload: {}", e);
                self.discard(&delivery).await;
                return;
            }
        };

        let service = match self.store.get_service_by_name(&job.service_name) {
            Ok(service) => service,
            Err(StoreError::NotFound) => {
                tracing::warn!("Worker: service not found service={}", job.service_name);
                self.discard(&delivery).await;
                return;
            }
            Err(e) => {
                // Registry outage: ack and move on, never requeue.
                tracing::error!(
                    "Worker: service lookup failed service={}: {}",
                    job.service_name,
                    e
                );
                self.ack(&delivery).await;
                return;
            }
        };

        // The job's url and deadline are authoritative for the probe; the
        // freshly read service supplies protocol and a method fallback for
        // payloads predating a config change.
        let method = crate::db::Method::parse(&job.method).unwrap_or(service.method);
        let outcome = probe::run_probe(service.protocol, method, &job.url, job.timeout()).await;
        let checked_at = Utc::now();

        if let Err(e) = self.store.append_log(
            service.id,
            outcome.status(),
            outcome.status_code,
            outcome.latency_ms,
            &outcome.error,
            checked_at,
        ) {
            tracing::error!("Worker: log append failed service={}: {}", service.name, e);
        }

        match self.store.update_state(service.id, outcome.success) {
            Ok((updated, Some(change))) => {
                tracing::info!(
                    "Worker: state transition service={} from={} to={}",
                    updated.name,
                    change.from.as_str(),
                    change.to.as_str()
                );
                self.hub.broadcast_change(&updated, &change).await;
            }
            Ok((_, None)) => {}
            Err(e) => {
                tracing::error!("Worker: state update failed service={}: {}", service.name, e);
            }
        }

        tracing::info!(
            "Worker: check completed service={} status={} latency_ms={} error={}",
            service.name,
            outcome.status().as_str(),
            outcome.latency_ms,
            outcome.error
        );

        self.ack(&delivery).await;
    }

    async fn ack(&self, delivery: &Delivery) {
        if let Err(e) = self.queue.ack(delivery).await {
            tracing::error!("Worker: ack failed: {}", e);
        }
    }

    async fn discard(&self, delivery: &Delivery) {
        if let Err(e) = self.queue.nack(delivery, false).await {
            tracing::error!("Worker: nack failed: {}", e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::{NewService, Status};
    use crate::queue::SqliteQueue;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};

    struct Fixture {
        store: Store,
        queue: SqliteQueue,
        worker: Worker,
        hub: Hub,
    }

    fn fixture() -> Fixture {
        let store = Store::open_in_memory().unwrap();
        let queue = SqliteQueue::open_in_memory("probe_jobs").unwrap();
        let hub = Hub::new();
        let worker = Worker::new(
            store.clone(),
            Arc::new(queue.clone()),
            hub.clone(),
        );
        Fixture {
            store,
            queue,
            worker,
            hub,
        }
    }

    async fn spawn_http_stub(status_line: &'static str) -> std::net::SocketAddr {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            while let Ok((mut socket, _)) = listener.accept().await {
                tokio::spawn(async move {
                    let mut buf = [0u8; 1024];
                    let _ = socket.read(&mut buf).await;
                    let response = format!(
                        "HTTP/1.1 {}\r\ncontent-length: 0\r\nconnection: close\r\n\r\n",
                        status_line
                    );
                    let _ = socket.write_all(response.as_bytes()).await;
                });
            }
        });
        addr
    }

    fn register(store: &Store, name: &str, url: String, threshold: i64) -> crate::db::Service {
        store
            .register(&NewService {
                name: name.to_string(),
                url,
                protocol: "HTTP".to_string(),
                method: "GET".to_string(),
                timeout_secs: 5,
                interval_secs: 30,
                failure_threshold: threshold,
            })
            .unwrap()
    }

    async fn run_one_job(f: &Fixture, service: &crate::db::Service) {
        f.queue.publish(&ProbeJob::for_service(service)).await.unwrap();
        let delivery = f.queue.consume().await.unwrap();
        f.worker.process(delivery).await;
    }

    #[tokio::test]
    async fn test_successful_probe_logs_and_acks() {
        let f = fixture();
        let addr = spawn_http_stub("200 OK").await;
        let service = register(&f.store, "A", format!("http://{}/health", addr), 3);

        run_one_job(&f, &service).await;

        // Exactly one log entry, recorded UP.
        let logs = f.store.list_logs(service.id, 0, 0).unwrap();
        assert_eq!(logs.len(), 1);
        assert_eq!(logs[0].status, Status::Up);
        assert_eq!(logs[0].status_code, 200);
        assert!(logs[0].error_message.is_empty());

        // State stamped, still UP, counter zero.
        let stored = f.store.get_service(service.id).unwrap();
        assert_eq!(stored.status, Status::Up);
        assert_eq!(stored.consecutive_failures, 0);
        assert!(stored.last_checked_at.is_some());

        // The delivery was acked, so the queue is empty.
        f.queue.close();
        assert!(matches!(f.queue.consume().await, Err(QueueError::Closed)));
    }

    #[tokio::test]
    async fn test_failures_cross_threshold_and_emit_once() {
        let f = fixture();
        let (_sub, mut rx) = f.hub.subscribe();

        // Nothing listens on this port: every probe is a transport failure.
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let service = register(&f.store, "A", format!("http://{}/health", addr), 3);

        for _ in 0..3 {
            run_one_job(&f, &service).await;
        }

        let stored = f.store.get_service(service.id).unwrap();
        assert_eq!(stored.status, Status::Down);
        assert_eq!(stored.consecutive_failures, 3);

        let logs = f.store.list_logs(service.id, 0, 0).unwrap();
        assert_eq!(logs.len(), 3);
        assert_eq!(logs[0].status_code, 0);
        assert!(!logs[0].error_message.is_empty());

        // Exactly one transition frame.
        let frame = rx.recv().await.unwrap();
        let event: crate::hub::StateChangeEvent = serde_json::from_str(&frame).unwrap();
        assert_eq!(event.kind, "service_state_change");
        assert_eq!(event.name, "A");
        assert_eq!(event.from, Status::Up);
        assert_eq!(event.to, Status::Down);
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_recovery_emits_down_to_up() {
        let f = fixture();
        let (_sub, mut rx) = f.hub.subscribe();

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let dead_addr = listener.local_addr().unwrap();
        drop(listener);

        let service = register(&f.store, "A", format!("http://{}/health", dead_addr), 1);
        run_one_job(&f, &service).await;

        let down = rx.recv().await.unwrap();
        let event: crate::hub::StateChangeEvent = serde_json::from_str(&down).unwrap();
        assert_eq!(event.to, Status::Down);

        // Point the probe at a live endpoint by re-publishing with the new
        // url; the worker probes the job's url.
        let live = spawn_http_stub("200 OK").await;
        let mut recovered = service.clone();
        recovered.url = format!("http://{}/health", live);
        run_one_job(&f, &recovered).await;

        let up = rx.recv().await.unwrap();
        let event: crate::hub::StateChangeEvent = serde_json::from_str(&up).unwrap();
        assert_eq!(event.from, Status::Down);
        assert_eq!(event.to, Status::Up);

        let stored = f.store.get_service(service.id).unwrap();
        assert_eq!(stored.status, Status::Up);
        assert_eq!(stored.consecutive_failures, 0);
    }

    #[tokio::test]
    async fn test_duplicate_delivery_tolerated() {
        let f = fixture();
        let addr = spawn_http_stub("200 OK").await;
        let service = register(&f.store, "A", format!("http://{}/health", addr), 3);

        // Same job processed twice, as after an ack lost to a crash.
        run_one_job(&f, &service).await;
        run_one_job(&f, &service).await;

        let logs = f.store.list_logs(service.id, 0, 0).unwrap();
        assert_eq!(logs.len(), 2);

        let stored = f.store.get_service(service.id).unwrap();
        assert_eq!(stored.status, Status::Up);
        assert_eq!(stored.consecutive_failures, 0);
    }

    #[tokio::test]
    async fn test_malformed_payload_discarded() {
        let f = fixture();

        // Hand-publish garbage through the queue's own insert path.
        let bogus = ProbeJob {
            service_name: "X".to_string(),
            url: "http://x".to_string(),
            timeout_ns: 1,
            method: "GET".to_string(),
        };
        f.queue.publish(&bogus).await.unwrap();
        let mut delivery = f.queue.consume().await.unwrap();
        delivery.payload = b"not json".to_vec();

        f.worker.process(delivery).await;

        // Discarded without requeue: the queue drains empty.
        f.queue.close();
        assert!(matches!(f.queue.consume().await, Err(QueueError::Closed)));
    }

    #[tokio::test]
    async fn test_unknown_service_discarded() {
        let f = fixture();

        let job = ProbeJob {
            service_name: "ghost".to_string(),
            url: "http://127.0.0.1:1/".to_string(),
            timeout_ns: 1_000_000_000,
            method: "GET".to_string(),
        };
        f.queue.publish(&job).await.unwrap();
        let delivery = f.queue.consume().await.unwrap();

        f.worker.process(delivery).await;

        // No log rows were written and the job is gone.
        f.queue.close();
        assert!(matches!(f.queue.consume().await, Err(QueueError::Closed)));
    }

    #[tokio::test]
    async fn test_500_response_counts_as_failure_with_code() {
        let f = fixture();
        let addr = spawn_http_stub("500 Internal Server Error").await;
        let service = register(&f.store, "A", format!("http://{}/health", addr), 2);

        run_one_job(&f, &service).await;

        let logs = f.store.list_logs(service.id, 0, 0).unwrap();
        assert_eq!(logs[0].status, Status::Down);
        assert_eq!(logs[0].status_code, 500);

        let stored = f.store.get_service(service.id).unwrap();
        assert_eq!(stored.status, Status::Up);
        assert_eq!(stored.consecutive_failures, 1);
    }
}
