//! Watchpost - Distributed Health Monitoring
//!
//! Probes a registry of external services on schedule, records every
//! outcome, tracks per-service UP/DOWN state with a failure threshold, and
//! streams state transitions to WebSocket subscribers.

mod config;
mod db;
mod hub;
mod probe;
mod queue;
mod scheduler;
mod state;
mod web;
mod worker;

use config::Config;
use db::Store;
use hub::Hub;
use queue::{JobQueue, SqliteQueue};
use scheduler::Scheduler;
use web::Server;
use worker::Worker;

use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    // Initialize logging
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer())
        .with(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("watchpost=info".parse()?),
        )
        .init();

    // Load configuration
    let cfg = Config::load()?;
    tracing::info!("Starting Watchpost on {}...", cfg.server.address);

    // Registry store and durable job queue
    let store = Store::new(&cfg.database.path)?;
    tracing::info!("Registry database ready at {}", cfg.database.path);

    let queue: Arc<dyn JobQueue> = Arc::new(SqliteQueue::new(&cfg.queue.path, &cfg.queue.name)?);
    tracing::info!("Job queue '{}' ready at {}", cfg.queue.name, cfg.queue.path);

    // Broadcast hub
    let hub = Hub::new();

    // Pipeline stop signal
    let (stop_tx, _) = broadcast::channel(1);

    // Scheduler
    let scheduler = Scheduler::new(
        store.clone(),
        queue.clone(),
        Duration::from_secs(cfg.scheduler.tick_secs),
    );
    tokio::spawn(scheduler.run(stop_tx.subscribe()));

    // Worker
    let worker = Worker::new(store.clone(), queue.clone(), hub.clone());
    tokio::spawn(worker.run(stop_tx.subscribe()));

    // Stop the pipeline cleanly on ctrl-c; in-flight probes finish and ack.
    let stop = stop_tx.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::info!("Shutdown signal received");
            let _ = stop.send(());
        }
    });

    // Admin HTTP server
    let server = Server::new(cfg.server.address.clone(), cfg.auth.clone(), store, hub);
    server.start().await?;

    Ok(())
}
