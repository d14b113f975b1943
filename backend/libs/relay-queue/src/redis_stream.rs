//! Redis Streams relay
//!
//! - publish: `XADD <stream> * payload <json>`
//! - receive: `XREADGROUP GROUP <group> <consumer> COUNT 1 BLOCK <ms> STREAMS <stream> >`
//! - ack: `XACK`
//! - nack: leave the entry pending; it is re-read from this consumer's
//!   pending list (`STREAMS <stream> 0`) after the redelivery backoff
//! - reject: copy to `<stream>:dead` with the reason, then `XACK`
//! - entries pending on another consumer for longer than `claim_idle` are
//!   taken over with `XCLAIM`, so a crashed worker's message is not stranded

use async_trait::async_trait;
use redis::aio::ConnectionManager;
use redis::streams::{
    StreamClaimReply, StreamId, StreamPendingCountReply, StreamReadOptions, StreamReadReply,
};
use redis::AsyncCommands;
use redis_utils::{redis_command_timeout, run_with_deadline, run_with_timeout};
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

use crate::{Delivery, DeltaEvent, RelayConsumer, RelayPublisher, RelayResult};

const PAYLOAD_FIELD: &str = "payload";
const PENDING_SCAN_COUNT: usize = 10;

/// Deadline for one XREADGROUP: the block window on top of the command timeout.
fn read_deadline(block: Option<Duration>, command_timeout: Duration) -> Duration {
    block.unwrap_or(Duration::ZERO) + command_timeout
}

/// Stream, group and timing settings shared by publishers and consumers.
#[derive(Debug, Clone)]
pub struct RedisStreamConfig {
    pub stream: String,
    pub group: String,
    /// How long one XREADGROUP waits for new entries
    pub block: Duration,
    /// Minimum idle time before another consumer's pending entry is claimed
    pub claim_idle: Duration,
    /// Pause before re-reading a nacked entry
    pub redelivery_backoff: Duration,
}

impl Default for RedisStreamConfig {
    fn default() -> Self {
        Self {
            stream: "relay:video_like_events".to_string(),
            group: "like-persistence".to_string(),
            block: Duration::from_millis(5_000),
            claim_idle: Duration::from_millis(60_000),
            redelivery_backoff: Duration::from_millis(500),
        }
    }
}

impl RedisStreamConfig {
    pub fn dead_letter_stream(&self) -> String {
        format!("{}:dead", self.stream)
    }
}

/// Create the consumer group if it does not exist yet (idempotent).
pub async fn ensure_consumer_group(
    conn: &mut ConnectionManager,
    config: &RedisStreamConfig,
) -> RelayResult<()> {
    let created: redis::RedisResult<()> = redis::cmd("XGROUP")
        .arg("CREATE")
        .arg(&config.stream)
        .arg(&config.group)
        .arg("0")
        .arg("MKSTREAM")
        .query_async(conn)
        .await;

    match created {
        Ok(()) => {
            info!(stream = %config.stream, group = %config.group, "Created relay consumer group");
            Ok(())
        }
        Err(e) if e.code() == Some("BUSYGROUP") => Ok(()),
        Err(e) => Err(e.into()),
    }
}

/// Producer over the shared multiplexed connection.
#[derive(Clone)]
pub struct RedisStreamPublisher {
    conn: ConnectionManager,
    stream: String,
}

impl RedisStreamPublisher {
    pub fn new(conn: ConnectionManager, stream: impl Into<String>) -> Self {
        Self {
            conn,
            stream: stream.into(),
        }
    }
}

#[async_trait]
impl RelayPublisher for RedisStreamPublisher {
    async fn publish(&self, event: &DeltaEvent) -> RelayResult<String> {
        let payload = event.encode()?;
        let mut conn = self.conn.clone();

        let id: String = run_with_timeout(
            redis::cmd("XADD")
                .arg(&self.stream)
                .arg("*")
                .arg(PAYLOAD_FIELD)
                .arg(&payload)
                .query_async(&mut conn),
        )
        .await?;

        debug!(
            stream = %self.stream,
            message_id = %id,
            video_id = event.video_id,
            user_id = event.user_id,
            delta = %event.delta,
            "Published delta event"
        );
        Ok(id)
    }
}

/// One worker's view of the consumer group.
///
/// Owns a dedicated connection because XREADGROUP BLOCK holds the
/// connection for the whole wait.
pub struct RedisStreamConsumer {
    conn: ConnectionManager,
    config: RedisStreamConfig,
    consumer_name: String,
    redeliver_pending: bool,
    last_claim_scan: Instant,
}

impl RedisStreamConsumer {
    pub async fn new(
        mut conn: ConnectionManager,
        config: RedisStreamConfig,
        consumer_name: impl Into<String>,
    ) -> RelayResult<Self> {
        ensure_consumer_group(&mut conn, &config).await?;

        Ok(Self {
            conn,
            config,
            consumer_name: consumer_name.into(),
            // Pick up anything this consumer name left pending before a restart.
            redeliver_pending: true,
            last_claim_scan: Instant::now(),
        })
    }

    pub fn consumer_name(&self) -> &str {
        &self.consumer_name
    }

    fn to_delivery(entry: StreamId, redelivered: bool) -> Delivery {
        // Entries trimmed while pending come back without fields; an empty
        // payload fails decoding and gets rejected by the worker.
        let payload = entry.get::<String>(PAYLOAD_FIELD).unwrap_or_default();
        Delivery {
            id: entry.id,
            payload,
            redelivered,
        }
    }

    async fn read_group(
        &mut self,
        start_id: &str,
        block: Option<Duration>,
    ) -> RelayResult<Option<Delivery>> {
        let mut options = StreamReadOptions::default()
            .group(&self.config.group, &self.consumer_name)
            .count(1);
        if let Some(block) = block {
            options = options.block(block.as_millis() as usize);
        }

        let deadline = read_deadline(block, redis_command_timeout());
        let reply: Option<StreamReadReply> = run_with_deadline(
            deadline,
            self.conn
                .xread_options(&[&self.config.stream], &[start_id], &options),
        )
        .await?;

        let redelivered = start_id != ">";
        Ok(reply
            .and_then(|r| r.keys.into_iter().next())
            .and_then(|k| k.ids.into_iter().next())
            .map(|entry| Self::to_delivery(entry, redelivered)))
    }

    /// Take over one entry stranded on another consumer.
    async fn claim_orphan(&mut self) -> RelayResult<Option<Delivery>> {
        let idle_ms = self.config.claim_idle.as_millis() as usize;

        let pending: StreamPendingCountReply = run_with_timeout(self.conn.xpending_count(
            &self.config.stream,
            &self.config.group,
            "-",
            "+",
            PENDING_SCAN_COUNT,
        ))
        .await?;

        let Some(orphan) = pending
            .ids
            .into_iter()
            .find(|p| p.consumer != self.consumer_name && p.last_delivered_ms >= idle_ms)
        else {
            return Ok(None);
        };

        let claimed: StreamClaimReply = run_with_timeout(self.conn.xclaim(
            &self.config.stream,
            &self.config.group,
            &self.consumer_name,
            idle_ms,
            &[&orphan.id],
        ))
        .await?;

        let delivery = claimed
            .ids
            .into_iter()
            .next()
            .map(|entry| Self::to_delivery(entry, true));

        if let Some(d) = &delivery {
            warn!(
                message_id = %d.id,
                previous_consumer = %orphan.consumer,
                times_delivered = orphan.times_delivered,
                "Claimed stranded relay message"
            );
        }
        Ok(delivery)
    }
}

#[async_trait]
impl RelayConsumer for RedisStreamConsumer {
    async fn receive(&mut self) -> RelayResult<Option<Delivery>> {
        if self.redeliver_pending {
            if let Some(delivery) = self.read_group("0", None).await? {
                return Ok(Some(delivery));
            }
            self.redeliver_pending = false;
        }

        if self.last_claim_scan.elapsed() >= self.config.claim_idle {
            self.last_claim_scan = Instant::now();
            if let Some(delivery) = self.claim_orphan().await? {
                return Ok(Some(delivery));
            }
        }

        let block = self.config.block;
        self.read_group(">", Some(block)).await
    }

    async fn ack(&mut self, delivery: &Delivery) -> RelayResult<()> {
        let _: i64 = run_with_timeout(self.conn.xack(
            &self.config.stream,
            &self.config.group,
            &[&delivery.id],
        ))
        .await?;
        Ok(())
    }

    async fn nack(&mut self, delivery: &Delivery) -> RelayResult<()> {
        debug!(message_id = %delivery.id, "Relay message left pending for redelivery");
        self.redeliver_pending = true;
        tokio::time::sleep(self.config.redelivery_backoff).await;
        Ok(())
    }

    async fn reject(&mut self, delivery: &Delivery, reason: &str) -> RelayResult<()> {
        let dead_stream = self.config.dead_letter_stream();
        let _: String = run_with_timeout(
            redis::cmd("XADD")
                .arg(&dead_stream)
                .arg("*")
                .arg(PAYLOAD_FIELD)
                .arg(&delivery.payload)
                .arg("reason")
                .arg(reason)
                .arg("source_id")
                .arg(&delivery.id)
                .query_async(&mut self.conn),
        )
        .await?;

        self.ack(delivery).await?;

        warn!(
            message_id = %delivery.id,
            dead_letter_stream = %dead_stream,
            reason = %reason,
            "Rejected relay message"
        );
        Ok(())
    }
}
