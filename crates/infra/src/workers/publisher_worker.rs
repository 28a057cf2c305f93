use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{info, warn};

use crate::workflows::ScheduledPostPublisher;

pub const DEFAULT_PUBLISH_INTERVAL: Duration = Duration::from_secs(5 * 60);

/// Handle to control and join a background worker.
#[derive(Debug)]
pub struct WorkerHandle {
    shutdown: watch::Sender<bool>,
    join: Option<JoinHandle<()>>,
}

impl WorkerHandle {
    /// Request graceful shutdown and wait for the worker to stop.
    ///
    /// A sweep already in progress runs to completion first.
    pub async fn shutdown(mut self) {
        let _ = self.shutdown.send(true);
        if let Some(j) = self.join.take() {
            let _ = j.await;
        }
    }
}

/// Periodic trigger for the scheduled post sweep.
///
/// The first sweep runs immediately, then once per `interval`. Missed ticks
/// are not replayed back to back.
#[derive(Debug)]
pub struct PublisherWorker;

impl PublisherWorker {
    pub fn spawn(publisher: Arc<ScheduledPostPublisher>, interval: Duration) -> WorkerHandle {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let join = tokio::spawn(worker_loop(publisher, interval, shutdown_rx));

        WorkerHandle {
            shutdown: shutdown_tx,
            join: Some(join),
        }
    }
}

async fn worker_loop(
    publisher: Arc<ScheduledPostPublisher>,
    interval: Duration,
    mut shutdown_rx: watch::Receiver<bool>,
) {
    let mut ticker = tokio::time::interval(interval.max(Duration::from_millis(1)));
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    info!(interval_secs = interval.as_secs(), "publisher worker started");

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                if let Err(err) = publisher.sweep().await {
                    warn!(error = %err, "scheduled post sweep failed");
                }
            }
            _ = shutdown_rx.changed() => break,
        }

        if *shutdown_rx.borrow() {
            break;
        }
    }

    info!("publisher worker stopped");
}
