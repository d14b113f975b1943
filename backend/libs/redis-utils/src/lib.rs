use anyhow::{Context, Result};
use once_cell::sync::OnceCell;
use redis::aio::ConnectionManager;
use redis::{Client, RedisError};
use std::future::Future;
use tokio::time::{timeout, Duration};
use tracing::info;

const DEFAULT_REDIS_COMMAND_TIMEOUT_MS: u64 = 3_000;
const MIN_REDIS_COMMAND_TIMEOUT_MS: u64 = 500;

/// Redis client plus a shared multiplexed connection manager.
///
/// The manager is cheap to clone and is what request-path code should use.
/// Callers that issue blocking commands (XREADGROUP BLOCK, BLPOP, ...) must
/// open their own connection through [`RedisPool::dedicated_connection`] so
/// they never stall the shared multiplexed pipe.
#[derive(Clone)]
pub struct RedisPool {
    client: Client,
    manager: ConnectionManager,
}

impl RedisPool {
    pub async fn connect(redis_url: &str) -> Result<Self> {
        let client =
            Client::open(redis_url).context("failed to parse REDIS_URL connection string")?;
        let manager = ConnectionManager::new(client.clone())
            .await
            .context("failed to initialize Redis connection manager")?;

        info!("Redis connection manager initialized");
        Ok(Self { client, manager })
    }

    pub fn manager(&self) -> ConnectionManager {
        self.manager.clone()
    }

    pub fn client(&self) -> Client {
        self.client.clone()
    }

    /// Open a connection that is not shared with any other caller.
    pub async fn dedicated_connection(&self) -> Result<ConnectionManager> {
        ConnectionManager::new(self.client.clone())
            .await
            .context("failed to open dedicated Redis connection")
    }
}

/// Per-command timeout, read once from `REDIS_COMMAND_TIMEOUT_MS` (floor 500ms).
pub fn redis_command_timeout() -> Duration {
    static TIMEOUT: OnceCell<Duration> = OnceCell::new();
    *TIMEOUT.get_or_init(|| {
        let ms = std::env::var("REDIS_COMMAND_TIMEOUT_MS")
            .ok()
            .and_then(|v| v.parse::<u64>().ok())
            .unwrap_or(DEFAULT_REDIS_COMMAND_TIMEOUT_MS);
        Duration::from_millis(clamp_timeout_ms(ms))
    })
}

fn clamp_timeout_ms(ms: u64) -> u64 {
    ms.max(MIN_REDIS_COMMAND_TIMEOUT_MS)
}

/// Run a Redis future with the configured command timeout.
///
/// A timeout surfaces as an `IoError` so callers treat it like any other
/// unreachable-Redis condition.
pub async fn run_with_timeout<F, T>(future: F) -> Result<T, RedisError>
where
    F: Future<Output = Result<T, RedisError>>,
{
    run_with_deadline(redis_command_timeout(), future).await
}

/// Same as [`run_with_timeout`] with an explicit deadline.
pub async fn run_with_deadline<F, T>(deadline: Duration, future: F) -> Result<T, RedisError>
where
    F: Future<Output = Result<T, RedisError>>,
{
    match timeout(deadline, future).await {
        Ok(res) => res,
        Err(_) => Err(RedisError::from((
            redis::ErrorKind::IoError,
            "redis command timed out",
        ))),
    }
}
