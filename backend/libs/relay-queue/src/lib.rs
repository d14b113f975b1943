//! # Relay Queue
//!
//! Durable, at-least-once channel that carries like/unlike delta events from
//! the request path to the persistence workers.
//!
//! ## Contract
//!
//! - **Producers** are fire-and-forget: [`RelayPublisher::publish`] returns as
//!   soon as the broker accepts the message. Nothing waits on consumers.
//! - **Consumers** hold one message at a time and settle it individually:
//!   - [`RelayConsumer::ack`]: processed, never delivered again
//!   - [`RelayConsumer::nack`]: transient failure, the same message comes back
//!   - [`RelayConsumer::reject`]: permanently undeliverable (malformed body,
//!     target gone). The message is moved to a dead-letter record and is
//!     never redelivered.
//! - Per-producer enqueue order is preserved. There is no global order across
//!   producers, so consumers must tolerate reordering of independent
//!   `(user, video)` pairs and replays of already-applied events.
//!
//! ## Implementations
//!
//! ```text
//! RedisStreamPublisher ──XADD──▶ stream ──XREADGROUP──▶ RedisStreamConsumer
//!                                   │                        │ XACK / dead-letter
//!                                   └── pending entries ◀────┘ (nack, crash)
//! ```
//!
//! [`InMemoryRelay`] gives the same settle semantics inside one process.

mod error;
mod event;
mod memory;
mod redis_stream;

use async_trait::async_trait;

pub use error::{RelayError, RelayResult};
pub use event::{Delta, DeltaEvent};
pub use memory::{DeadLetter, InMemoryConsumer, InMemoryRelay};
pub use redis_stream::{
    ensure_consumer_group, RedisStreamConfig, RedisStreamConsumer, RedisStreamPublisher,
};

/// A message handed to a consumer, not yet settled.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Delivery {
    /// Broker-assigned message id
    pub id: String,
    /// Raw message body
    pub payload: String,
    /// True when this message was handed out before (nack or crashed consumer)
    pub redelivered: bool,
}

impl Delivery {
    pub fn decode(&self) -> RelayResult<DeltaEvent> {
        DeltaEvent::decode(&self.payload)
    }
}

/// Producer side of the relay.
#[async_trait]
pub trait RelayPublisher: Send + Sync {
    /// Publish one event. Returns the broker message id once accepted.
    async fn publish(&self, event: &DeltaEvent) -> RelayResult<String>;
}

/// Consumer side of the relay. One instance per worker; not shared.
#[async_trait]
pub trait RelayConsumer: Send {
    /// Wait for the next message. `Ok(None)` means the wait timed out with
    /// nothing to deliver, which lets the caller check for shutdown.
    async fn receive(&mut self) -> RelayResult<Option<Delivery>>;

    async fn ack(&mut self, delivery: &Delivery) -> RelayResult<()>;

    async fn nack(&mut self, delivery: &Delivery) -> RelayResult<()>;

    async fn reject(&mut self, delivery: &Delivery, reason: &str) -> RelayResult<()>;
}
