//! Persistence worker: relay -> durable store
//!
//! One message in flight per worker. Settlement per outcome:
//!
//! | outcome                  | settle | redelivered |
//! |--------------------------|--------|-------------|
//! | applied / duplicate      | ack    | no          |
//! | video missing            | reject | no          |
//! | malformed body           | reject | no          |
//! | store error              | nack   | yes         |

use anyhow::{Context, Result};
use relay_queue::{Delivery, RelayConsumer};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{debug, error, info, warn};

use crate::metrics::WORKER_MESSAGES_TOTAL;
use crate::repository::{ApplyOutcome, LikeStore};

const ERROR_BACKOFF: Duration = Duration::from_secs(1);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkerOutcome {
    Applied,
    Duplicate,
    /// Target video is gone; message dropped
    Dropped,
    /// Undecodable; message dropped
    Rejected,
    /// Transient store failure; message will come back
    Retried,
}

impl WorkerOutcome {
    fn as_label(self) -> &'static str {
        match self {
            WorkerOutcome::Applied => "applied",
            WorkerOutcome::Duplicate => "duplicate",
            WorkerOutcome::Dropped => "dropped",
            WorkerOutcome::Rejected => "rejected",
            WorkerOutcome::Retried => "retried",
        }
    }
}

pub struct PersistenceWorker<C: RelayConsumer> {
    id: usize,
    consumer: C,
    store: Arc<dyn LikeStore>,
}

impl<C: RelayConsumer> PersistenceWorker<C> {
    pub fn new(id: usize, consumer: C, store: Arc<dyn LikeStore>) -> Self {
        Self {
            id,
            consumer,
            store,
        }
    }

    /// Process one delivery and settle it.
    pub async fn process(&mut self, delivery: &Delivery) -> Result<WorkerOutcome> {
        let event = match delivery.decode() {
            Ok(event) => event,
            Err(e) => {
                error!(
                    worker = self.id,
                    message_id = %delivery.id,
                    error = %e,
                    "Malformed delta event"
                );
                self.consumer
                    .reject(delivery, &e.to_string())
                    .await
                    .context("Failed to reject malformed message")?;
                return Ok(self.record(WorkerOutcome::Rejected));
            }
        };

        let outcome = match self.store.apply_delta(&event).await {
            Ok(ApplyOutcome::Applied { delta, like_count }) => {
                debug!(
                    worker = self.id,
                    video_id = event.video_id,
                    user_id = event.user_id,
                    delta,
                    like_count,
                    "Delta applied"
                );
                self.consumer.ack(delivery).await.context("Failed to ack")?;
                WorkerOutcome::Applied
            }
            Ok(ApplyOutcome::Duplicate) => {
                debug!(
                    worker = self.id,
                    video_id = event.video_id,
                    user_id = event.user_id,
                    delta = %event.delta,
                    redelivered = delivery.redelivered,
                    "Delta already applied"
                );
                self.consumer.ack(delivery).await.context("Failed to ack")?;
                WorkerOutcome::Duplicate
            }
            Ok(ApplyOutcome::VideoMissing) => {
                warn!(
                    worker = self.id,
                    video_id = event.video_id,
                    user_id = event.user_id,
                    delta = %event.delta,
                    "Video missing, dropping delta"
                );
                self.consumer
                    .reject(delivery, "video missing")
                    .await
                    .context("Failed to reject message")?;
                WorkerOutcome::Dropped
            }
            Err(e) => {
                warn!(
                    worker = self.id,
                    video_id = event.video_id,
                    user_id = event.user_id,
                    delta = %event.delta,
                    error = %e,
                    "Failed to apply delta, requeueing"
                );
                self.consumer.nack(delivery).await.context("Failed to nack")?;
                WorkerOutcome::Retried
            }
        };

        Ok(self.record(outcome))
    }

    /// Receive and process at most one message. `None` when nothing arrived.
    pub async fn run_once(&mut self) -> Result<Option<WorkerOutcome>> {
        let Some(delivery) = self
            .consumer
            .receive()
            .await
            .context("Failed to receive from relay")?
        else {
            return Ok(None);
        };

        self.process(&delivery).await.map(Some)
    }

    /// Loop until `shutdown` flips to true. Shutdown is checked between
    /// messages, so an in-flight message is always settled first.
    pub async fn run(mut self, shutdown: watch::Receiver<bool>) -> Result<()> {
        info!(worker = self.id, "Persistence worker started");

        while !*shutdown.borrow() {
            if let Err(e) = self.run_once().await {
                error!(worker = self.id, error = %format!("{:#}", e), "Persistence worker error");
                tokio::time::sleep(ERROR_BACKOFF).await;
            }
        }

        info!(worker = self.id, "Persistence worker stopped");
        Ok(())
    }

    fn record(&self, outcome: WorkerOutcome) -> WorkerOutcome {
        WORKER_MESSAGES_TOTAL
            .with_label_values(&[outcome.as_label()])
            .inc();
        outcome
    }
}
