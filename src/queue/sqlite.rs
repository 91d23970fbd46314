//! SQLite-backed durable queue adapter.

use async_trait::async_trait;
use rusqlite::{params, Connection};
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::Notify;

use super::{Delivery, JobQueue, ProbeJob, QueueError};

/// Fallback poll interval for consumers that missed a publish wakeup.
const POLL_INTERVAL: Duration = Duration::from_millis(250);

const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS queue_jobs (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    queue TEXT NOT NULL,
    payload BLOB NOT NULL,
    state TEXT NOT NULL DEFAULT 'ready',
    enqueued_at TEXT NOT NULL DEFAULT (strftime('%Y-%m-%dT%H:%M:%fZ', 'now'))
);
CREATE INDEX IF NOT EXISTS idx_queue_jobs_claim ON queue_jobs(queue, state, id);
";

/// Durable job queue over a SQLite file.
///
/// Rows move ready -> unacked on claim; ack deletes, nack either requeues
/// or discards. Unacked rows left behind by a crashed consumer are returned
/// to ready when the queue is reopened, which is where the at-least-once
/// guarantee comes from.
#[derive(Clone)]
pub struct SqliteQueue {
    conn: Arc<Mutex<Connection>>,
    queue: String,
    ready: Arc<Notify>,
    closed: Arc<AtomicBool>,
}

impl SqliteQueue {
    /// Open (or create) the queue database at the given path.
    pub fn new<P: AsRef<Path>>(path: P, queue: &str) -> Result<Self, QueueError> {
        Self::from_connection(Connection::open(path)?, queue)
    }

    /// Open an in-memory queue. Used by tests; not durable.
    pub fn open_in_memory(queue: &str) -> Result<Self, QueueError> {
        Self::from_connection(Connection::open_in_memory()?, queue)
    }

    fn from_connection(conn: Connection, queue: &str) -> Result<Self, QueueError> {
        conn.execute_batch(SCHEMA)?;

        // Redeliver anything a previous consumer claimed but never acked.
        let requeued = conn.execute(
            "UPDATE queue_jobs SET state='ready' WHERE queue=?1 AND state='unacked'",
            params![queue],
        )?;
        if requeued > 0 {
            tracing::info!("Queue: requeued {} unacked job(s) on open", requeued);
        }

        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
            queue: queue.to_string(),
            ready: Arc::new(Notify::new()),
            closed: Arc::new(AtomicBool::new(false)),
        })
    }

    /// Stop the queue: waiting consumers drain remaining ready jobs and then
    /// get [`QueueError::Closed`].
    pub fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
        self.ready.notify_waiters();
    }

    fn try_claim(&self) -> Result<Option<Delivery>, QueueError> {
        let conn = self.conn.lock().unwrap();
        let tx = conn.unchecked_transaction()?;

        let row = tx.query_row(
            "SELECT id, payload FROM queue_jobs WHERE queue=?1 AND state='ready' ORDER BY id LIMIT 1",
            params![self.queue],
            |row| Ok((row.get::<_, i64>(0)?, row.get::<_, Vec<u8>>(1)?)),
        );

        match row {
            Ok((id, payload)) => {
                tx.execute(
                    "UPDATE queue_jobs SET state='unacked' WHERE id=?1",
                    params![id],
                )?;
                tx.commit()?;
                Ok(Some(Delivery { id, payload }))
            }
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }
}

#[async_trait]
impl JobQueue for SqliteQueue {
    async fn publish(&self, job: &ProbeJob) -> Result<(), QueueError> {
        let payload = serde_json::to_vec(job)?;
        {
            let conn = self.conn.lock().unwrap();
            conn.execute(
                "INSERT INTO queue_jobs (queue, payload, state) VALUES (?1, ?2, 'ready')",
                params![self.queue, payload],
            )?;
        }
        self.ready.notify_one();
        Ok(())
    }

    async fn consume(&self) -> Result<Delivery, QueueError> {
        loop {
            if let Some(delivery) = self.try_claim()? {
                return Ok(delivery);
            }
            if self.closed.load(Ordering::SeqCst) {
                return Err(QueueError::Closed);
            }
            // Park until a publish wakes us; the timeout covers a publish
            // that lands between the claim attempt and the park.
            let _ = tokio::time::timeout(POLL_INTERVAL, self.ready.notified()).await;
        }
    }

    async fn ack(&self, delivery: &Delivery) -> Result<(), QueueError> {
        let conn = self.conn.lock().unwrap();
        conn.execute("DELETE FROM queue_jobs WHERE id=?1", params![delivery.id])?;
        Ok(())
    }

    async fn nack(&self, delivery: &Delivery, requeue: bool) -> Result<(), QueueError> {
        let conn = self.conn.lock().unwrap();
        if requeue {
            conn.execute(
                "UPDATE queue_jobs SET state='ready' WHERE id=?1",
                params![delivery.id],
            )?;
            drop(conn);
            self.ready.notify_one();
        } else {
            conn.execute("DELETE FROM queue_jobs WHERE id=?1", params![delivery.id])?;
        }
        Ok(())
    }
}
