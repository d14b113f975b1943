//! In-process relay with the same settle semantics as the Redis Streams one.
//!
//! Used by tests and by single-process setups. Messages live only as long as
//! the `InMemoryRelay` handle, so this is not durable.

use async_trait::async_trait;
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, Notify};

use crate::{Delivery, DeltaEvent, RelayConsumer, RelayError, RelayPublisher, RelayResult};

const DEFAULT_RECEIVE_WAIT: Duration = Duration::from_millis(200);

/// A permanently rejected message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeadLetter {
    pub id: String,
    pub payload: String,
    pub reason: String,
}

#[derive(Default)]
struct RelayState {
    next_id: u64,
    ready: VecDeque<Delivery>,
    in_flight: HashMap<String, Delivery>,
    dead: Vec<DeadLetter>,
    acked: u64,
}

/// Shared handle; clone it to hand the same queue to producers and consumers.
#[derive(Clone, Default)]
pub struct InMemoryRelay {
    state: Arc<Mutex<RelayState>>,
    notify: Arc<Notify>,
}

impl InMemoryRelay {
    pub fn new() -> Self {
        Self::default()
    }

    /// Enqueue an arbitrary body, bypassing event encoding.
    pub async fn publish_raw(&self, payload: impl Into<String>) -> String {
        let mut state = self.state.lock().await;
        state.next_id += 1;
        let id = format!("{}-0", state.next_id);
        state.ready.push_back(Delivery {
            id: id.clone(),
            payload: payload.into(),
            redelivered: false,
        });
        drop(state);

        self.notify.notify_one();
        id
    }

    pub fn consumer(&self) -> InMemoryConsumer {
        self.consumer_with_wait(DEFAULT_RECEIVE_WAIT)
    }

    pub fn consumer_with_wait(&self, wait: Duration) -> InMemoryConsumer {
        InMemoryConsumer {
            relay: self.clone(),
            wait,
        }
    }

    /// Messages not yet acknowledged or rejected (queued + in flight).
    pub async fn outstanding(&self) -> usize {
        let state = self.state.lock().await;
        state.ready.len() + state.in_flight.len()
    }

    pub async fn acked(&self) -> u64 {
        self.state.lock().await.acked
    }

    pub async fn dead_letters(&self) -> Vec<DeadLetter> {
        self.state.lock().await.dead.clone()
    }
}

#[async_trait]
impl RelayPublisher for InMemoryRelay {
    async fn publish(&self, event: &DeltaEvent) -> RelayResult<String> {
        let payload = event.encode()?;
        Ok(self.publish_raw(payload).await)
    }
}

/// Consumer handle over an [`InMemoryRelay`].
pub struct InMemoryConsumer {
    relay: InMemoryRelay,
    wait: Duration,
}

impl InMemoryConsumer {
    async fn settle(&self, delivery: &Delivery) -> RelayResult<Delivery> {
        let mut state = self.relay.state.lock().await;
        state
            .in_flight
            .remove(&delivery.id)
            .ok_or_else(|| RelayError::UnknownDelivery(delivery.id.clone()))
    }
}

#[async_trait]
impl RelayConsumer for InMemoryConsumer {
    async fn receive(&mut self) -> RelayResult<Option<Delivery>> {
        loop {
            {
                let mut state = self.relay.state.lock().await;
                if let Some(delivery) = state.ready.pop_front() {
                    state
                        .in_flight
                        .insert(delivery.id.clone(), delivery.clone());
                    return Ok(Some(delivery));
                }
            }

            if tokio::time::timeout(self.wait, self.relay.notify.notified())
                .await
                .is_err()
            {
                return Ok(None);
            }
        }
    }

    async fn ack(&mut self, delivery: &Delivery) -> RelayResult<()> {
        self.settle(delivery).await?;
        self.relay.state.lock().await.acked += 1;
        Ok(())
    }

    async fn nack(&mut self, delivery: &Delivery) -> RelayResult<()> {
        let mut returned = self.settle(delivery).await?;
        returned.redelivered = true;
        // Back to the head so per-producer order is kept for the retry.
        self.relay.state.lock().await.ready.push_front(returned);
        self.relay.notify.notify_one();
        Ok(())
    }

    async fn reject(&mut self, delivery: &Delivery, reason: &str) -> RelayResult<()> {
        let rejected = self.settle(delivery).await?;
        self.relay.state.lock().await.dead.push(DeadLetter {
            id: rejected.id,
            payload: rejected.payload,
            reason: reason.to_string(),
        });
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Delta;

    #[tokio::test]
    async fn test_publish_then_receive_and_ack() {
        let relay = InMemoryRelay::new();
        let event = DeltaEvent::new(42, 7, Delta::Add);
        relay.publish(&event).await.unwrap();

        let mut consumer = relay.consumer();
        let delivery = consumer.receive().await.unwrap().expect("message");
        assert_eq!(delivery.decode().unwrap(), event);
        assert!(!delivery.redelivered);
        assert_eq!(relay.outstanding().await, 1);

        consumer.ack(&delivery).await.unwrap();
        assert_eq!(relay.outstanding().await, 0);
        assert_eq!(relay.acked().await, 1);
    }

    #[tokio::test]
    async fn test_nack_redelivers_same_message_first() {
        let relay = InMemoryRelay::new();
        relay.publish_raw("first").await;
        relay.publish_raw("second").await;

        let mut consumer = relay.consumer();
        let first = consumer.receive().await.unwrap().unwrap();
        consumer.nack(&first).await.unwrap();

        let again = consumer.receive().await.unwrap().unwrap();
        assert_eq!(again.id, first.id);
        assert_eq!(again.payload, "first");
        assert!(again.redelivered);
    }

    #[tokio::test]
    async fn test_reject_is_never_redelivered() {
        let relay = InMemoryRelay::new();
        relay.publish_raw("{broken").await;

        let mut consumer = relay.consumer_with_wait(Duration::from_millis(20));
        let delivery = consumer.receive().await.unwrap().unwrap();
        consumer.reject(&delivery, "malformed").await.unwrap();

        assert!(consumer.receive().await.unwrap().is_none());
        let dead = relay.dead_letters().await;
        assert_eq!(dead.len(), 1);
        assert_eq!(dead[0].payload, "{broken");
        assert_eq!(dead[0].reason, "malformed");
    }

    #[tokio::test]
    async fn test_double_settle_is_an_error() {
        let relay = InMemoryRelay::new();
        relay.publish_raw("x").await;

        let mut consumer = relay.consumer();
        let delivery = consumer.receive().await.unwrap().unwrap();
        consumer.ack(&delivery).await.unwrap();

        let err = consumer.ack(&delivery).await.unwrap_err();
        assert!(matches!(err, RelayError::UnknownDelivery(_)));
    }

    #[tokio::test]
    async fn test_receive_wakes_on_publish() {
        let relay = InMemoryRelay::new();
        let mut consumer = relay.consumer_with_wait(Duration::from_secs(5));

        let producer = relay.clone();
        let handle = tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            producer.publish_raw("late").await;
        });

        let delivery = consumer.receive().await.unwrap().unwrap();
        assert_eq!(delivery.payload, "late");
        handle.await.unwrap();
    }
}
