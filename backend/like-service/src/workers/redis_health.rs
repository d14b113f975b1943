//! Redis Connection Health Check Background Job
//!
//! Periodically pings the like cache to keep the multiplexed connection warm
//! and to drive the `/ready` probe. The flag goes false after
//! `max_consecutive_failures` failed pings and back to true on the first
//! success, so a pod with a dead cache connection stops taking like traffic.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::sleep;

use crate::cache::LikeCache;

/// How often to ping Redis (every 30 seconds)
const HEALTH_CHECK_INTERVAL: Duration = Duration::from_secs(30);

/// Configuration for Redis health checks
#[derive(Clone)]
pub struct RedisHealthConfig {
    pub enabled: bool,
    pub check_interval: Duration,
    pub initial_delay: Duration,
    pub max_consecutive_failures: u32,
}

impl Default for RedisHealthConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            check_interval: HEALTH_CHECK_INTERVAL,
            initial_delay: Duration::from_secs(5),
            max_consecutive_failures: 3,
        }
    }
}

/// Start the Redis health check background job
pub async fn start_redis_health_check(
    cache: Arc<dyn LikeCache>,
    config: RedisHealthConfig,
    ready: Arc<AtomicBool>,
) {
    if !config.enabled {
        tracing::info!("Redis health check disabled by configuration");
        return;
    }

    tracing::info!(
        interval_secs = config.check_interval.as_secs(),
        "Starting Redis health check background job for like-service"
    );

    sleep(config.initial_delay).await;

    let mut consecutive_failures = 0;

    loop {
        consecutive_failures = check_once(cache.as_ref(), &config, &ready, consecutive_failures).await;
        sleep(config.check_interval).await;
    }
}

/// One ping; returns the updated failure streak.
async fn check_once(
    cache: &dyn LikeCache,
    config: &RedisHealthConfig,
    ready: &AtomicBool,
    consecutive_failures: u32,
) -> u32 {
    match cache.ping().await {
        Ok(()) => {
            if consecutive_failures > 0 {
                tracing::info!(
                    previous_failures = consecutive_failures,
                    "Redis connection recovered"
                );
            }
            ready.store(true, Ordering::SeqCst);
            tracing::debug!("Redis health check: OK");
            0
        }
        Err(e) => {
            let failures = consecutive_failures + 1;
            if failures >= config.max_consecutive_failures {
                ready.store(false, Ordering::SeqCst);
                tracing::error!(
                    consecutive_failures = failures,
                    error = %e,
                    "Redis health check: CRITICAL - marking service not ready"
                );
            } else {
                tracing::warn!(
                    consecutive_failures = failures,
                    error = %e,
                    "Redis health check: FAILED"
                );
            }
            failures
        }
    }
}
