//! Broadcast hub for state-transition events.
//!
//! A single reactor task owns the subscriber set. Three channels feed it:
//! register, unregister, and broadcast. Fan-out never waits on a
//! subscriber: a full outbound buffer evicts its owner, so a stalled
//! connection cannot hold up the worker or the other subscribers.

use crate::db::{Service, StateChange, Status};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;

/// Outbound buffer capacity per subscriber, in frames.
pub const SUBSCRIBER_BUFFER: usize = 256;

/// Capacity of the broadcast input channel.
const BROADCAST_BUFFER: usize = 256;

/// The frame pushed to every subscriber on a status crossing.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StateChangeEvent {
    #[serde(rename = "type")]
    pub kind: String,
    pub service_id: i64,
    pub name: String,
    pub from: Status,
    pub to: Status,
    pub timestamp: DateTime<Utc>,
}

impl StateChangeEvent {
    pub fn new(service: &Service, change: &StateChange, timestamp: DateTime<Utc>) -> Self {
        Self {
            kind: "service_state_change".to_string(),
            service_id: service.id,
            name: service.name.clone(),
            from: change.from,
            to: change.to,
            timestamp,
        }
    }
}

struct Subscriber {
    id: u64,
    tx: mpsc::Sender<String>,
}

/// Handle for registering subscribers and broadcasting events.
///
/// The handle is cheap to clone; the reactor task it feeds exits once every
/// handle is gone and the input channels close.
#[derive(Clone)]
pub struct Hub {
    register_tx: mpsc::UnboundedSender<Subscriber>,
    unregister_tx: mpsc::UnboundedSender<u64>,
    broadcast_tx: mpsc::Sender<String>,
    next_id: Arc<AtomicU64>,
}

impl Hub {
    /// Create the hub and spawn its reactor task.
    pub fn new() -> Self {
        let (register_tx, register_rx) = mpsc::unbounded_channel();
        let (unregister_tx, unregister_rx) = mpsc::unbounded_channel();
        let (broadcast_tx, broadcast_rx) = mpsc::channel(BROADCAST_BUFFER);

        tokio::spawn(run_reactor(register_rx, unregister_rx, broadcast_rx));

        Self {
            register_tx,
            unregister_tx,
            broadcast_tx,
            next_id: Arc::new(AtomicU64::new(1)),
        }
    }

    /// Register a new subscriber. Returns its id and the receiving half of
    /// its bounded outbound buffer; the caller owns draining it.
    pub fn subscribe(&self) -> (u64, mpsc::Receiver<String>) {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = mpsc::channel(SUBSCRIBER_BUFFER);
        let _ = self.register_tx.send(Subscriber { id, tx });
        (id, rx)
    }

    /// Remove a subscriber and close its outbound buffer.
    pub fn unsubscribe(&self, id: u64) {
        let _ = self.unregister_tx.send(id);
    }

    /// Queue one serialized event for fan-out.
    pub async fn broadcast(&self, payload: String) {
        if self.broadcast_tx.send(payload).await.is_err() {
            tracing::error!("Hub: reactor gone, event dropped");
        }
    }

    /// Serialize and broadcast a state transition.
    pub async fn broadcast_change(&self, service: &Service, change: &StateChange) {
        let event = StateChangeEvent::new(service, change, Utc::now());
        match serde_json::to_string(&event) {
            Ok(payload) => self.broadcast(payload).await,
            Err(e) => tracing::error!("Hub: failed to serialize event for {}: {}", service.name, e),
        }
    }
}

impl Default for Hub {
    fn default() -> Self {
        Self::new()
    }
}

async fn run_reactor(
    mut register_rx: mpsc::UnboundedReceiver<Subscriber>,
    mut unregister_rx: mpsc::UnboundedReceiver<u64>,
    mut broadcast_rx: mpsc::Receiver<String>,
) {
    let mut subscribers: HashMap<u64, mpsc::Sender<String>> = HashMap::new();
    let (mut register_open, mut unregister_open, mut broadcast_open) = (true, true, true);

    while register_open || unregister_open || broadcast_open {
        // Membership changes are applied before fan-out when both are
        // pending, so a subscriber never sees events from before it joined
        // or after it left.
        tokio::select! {
            biased;

            sub = register_rx.recv(), if register_open => match sub {
                Some(sub) => {
                    tracing::debug!("Hub: subscriber {} registered", sub.id);
                    subscribers.insert(sub.id, sub.tx);
                }
                None => register_open = false,
            },
            id = unregister_rx.recv(), if unregister_open => match id {
                Some(id) => {
                    if subscribers.remove(&id).is_some() {
                        tracing::debug!("Hub: subscriber {} unregistered", id);
                    }
                }
                None => unregister_open = false,
            },
            payload = broadcast_rx.recv(), if broadcast_open => match payload {
                Some(payload) => fan_out(&mut subscribers, &payload),
                None => broadcast_open = false,
            },
        }
    }

    tracing::debug!("Hub: reactor stopped");
}

/// Non-blocking fan-out; a full buffer evicts its subscriber.
fn fan_out(subscribers: &mut HashMap<u64, mpsc::Sender<String>>, payload: &str) {
    let mut evicted = Vec::new();

    for (id, tx) in subscribers.iter() {
        match tx.try_send(payload.to_string()) {
            Ok(()) => {}
            Err(mpsc::error::TrySendError::Full(_)) => {
                tracing::warn!("Hub: evicting slow subscriber {}", id);
                evicted.push(*id);
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {
                evicted.push(*id);
            }
        }
    }

    for id in evicted {
        subscribers.remove(&id);
    }
}
