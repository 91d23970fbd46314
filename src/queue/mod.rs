//! Durable probe job queue.
//!
//! The broker lives behind the [`JobQueue`] trait; the shipped adapter is a
//! SQLite-backed queue whose rows survive restarts. Delivery is
//! at-least-once: anything consumed but never acked comes back.

mod sqlite;

pub use sqlite::SqliteQueue;

use crate::db::Service;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;

/// Queue error types.
#[derive(Error, Debug)]
pub enum QueueError {
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("encode error: {0}")]
    Encode(#[from] serde_json::Error),
    #[error("queue closed")]
    Closed,
}

/// The queued unit of work.
///
/// `timeout` travels as integer nanoseconds in the JSON body. The job
/// carries no state version; the worker re-reads the service on
/// consumption, so redelivery after a config change is safe.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProbeJob {
    pub service_name: String,
    pub url: String,
    #[serde(rename = "timeout")]
    pub timeout_ns: u64,
    pub method: String,
}

impl ProbeJob {
    /// Build the job for one due service.
    pub fn for_service(service: &Service) -> Self {
        Self {
            service_name: service.name.clone(),
            url: service.url.clone(),
            timeout_ns: service.timeout().as_nanos() as u64,
            method: service.method.as_str().to_string(),
        }
    }

    /// Probe deadline carried by the job.
    pub fn timeout(&self) -> Duration {
        Duration::from_nanos(self.timeout_ns)
    }
}

/// One message handed to a consumer.
#[derive(Debug)]
pub struct Delivery {
    pub(crate) id: i64,
    pub payload: Vec<u8>,
}

/// Durable FIFO of probe jobs with per-delivery acknowledgement.
#[async_trait]
pub trait JobQueue: Send + Sync {
    /// Enqueue one job durably.
    async fn publish(&self, job: &ProbeJob) -> Result<(), QueueError>;

    /// Wait for the next delivery. Returns [`QueueError::Closed`] once the
    /// queue has been shut down and drained of ready jobs.
    async fn consume(&self) -> Result<Delivery, QueueError>;

    /// Acknowledge a delivery, removing it permanently.
    async fn ack(&self, delivery: &Delivery) -> Result<(), QueueError>;

    /// Reject a delivery; `requeue` returns it to the back of the ready set,
    /// otherwise it is discarded.
    async fn nack(&self, delivery: &Delivery, requeue: bool) -> Result<(), QueueError>;
}
