//! Configuration management for Like Service
//!
//! Loads configuration from environment variables (and `.env` when present).
use anyhow::{anyhow, Context, Result};
use db_pool::env_utils::{parse_env_flag, parse_env_optional, parse_env_with_default};
use db_pool::DbConfig;
use relay_queue::RedisStreamConfig;
use std::str::FromStr;
use std::time::Duration;

/// Main application configuration
#[derive(Debug, Clone)]
pub struct Config {
    pub app: AppConfig,
    pub database: DbConfig,
    pub redis: RedisConfig,
    pub relay: RelayConfig,
    pub workers: WorkerConfig,
    pub reconcile: ReconcileConfig,
}

/// Which halves of the service this process runs
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServiceRole {
    /// HTTP API and persistence workers
    All,
    Api,
    Worker,
}

impl ServiceRole {
    pub fn runs_api(self) -> bool {
        matches!(self, ServiceRole::All | ServiceRole::Api)
    }

    pub fn runs_workers(self) -> bool {
        matches!(self, ServiceRole::All | ServiceRole::Worker)
    }
}

impl FromStr for ServiceRole {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "all" => Ok(ServiceRole::All),
            "api" => Ok(ServiceRole::Api),
            "worker" => Ok(ServiceRole::Worker),
            other => Err(anyhow!("invalid SERVICE_ROLE '{}': expected all, api or worker", other)),
        }
    }
}

/// Application settings
#[derive(Debug, Clone)]
pub struct AppConfig {
    /// Application environment (dev, staging, prod)
    pub env: String,
    /// Server host to bind to
    pub host: String,
    pub http_port: u16,
    pub role: ServiceRole,
    /// Mount `/admin/*` routes
    pub admin_enabled: bool,
}

#[derive(Debug, Clone)]
pub struct RedisConfig {
    /// Redis URL (redis://host:port)
    pub url: String,
}

/// Relay stream settings
#[derive(Debug, Clone)]
pub struct RelayConfig {
    pub stream: String,
    pub group: String,
    pub block_ms: u64,
    pub claim_idle_ms: u64,
    pub redelivery_backoff_ms: u64,
    /// Prefix for consumer names; one name per worker
    pub consumer_prefix: String,
}

impl RelayConfig {
    pub fn stream_config(&self) -> RedisStreamConfig {
        RedisStreamConfig {
            stream: self.stream.clone(),
            group: self.group.clone(),
            block: Duration::from_millis(self.block_ms),
            claim_idle: Duration::from_millis(self.claim_idle_ms),
            redelivery_backoff: Duration::from_millis(self.redelivery_backoff_ms),
        }
    }
}

#[derive(Debug, Clone)]
pub struct WorkerConfig {
    pub count: usize,
}

#[derive(Debug, Clone)]
pub struct ReconcileConfig {
    /// Sweep period; no periodic sweep when unset
    pub interval: Option<Duration>,
    pub batch_size: usize,
}

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self> {
        let app = AppConfig {
            env: std::env::var("APP_ENV").unwrap_or_else(|_| "development".to_string()),
            host: std::env::var("APP_HOST").unwrap_or_else(|_| "0.0.0.0".to_string()),
            http_port: parse_env_with_default("PORT", 8080),
            role: std::env::var("SERVICE_ROLE")
                .map(|v| v.parse())
                .unwrap_or(Ok(ServiceRole::All))?,
            admin_enabled: parse_env_flag("ADMIN_ENABLED", true),
        };

        let database = DbConfig::from_env("like-service").map_err(|e| anyhow!(e))?;

        let redis = RedisConfig {
            url: std::env::var("REDIS_URL").context("REDIS_URL environment variable not set")?,
        };

        let stream_defaults = RedisStreamConfig::default();
        let relay = RelayConfig {
            stream: std::env::var("RELAY_STREAM").unwrap_or(stream_defaults.stream),
            group: std::env::var("RELAY_GROUP").unwrap_or(stream_defaults.group),
            block_ms: parse_env_with_default("RELAY_BLOCK_MS", 5_000),
            claim_idle_ms: parse_env_with_default("RELAY_CLAIM_IDLE_MS", 60_000),
            redelivery_backoff_ms: parse_env_with_default("RELAY_REDELIVERY_BACKOFF_MS", 500),
            consumer_prefix: std::env::var("RELAY_CONSUMER_NAME")
                .or_else(|_| std::env::var("HOSTNAME"))
                .unwrap_or_else(|_| "like-service".to_string()),
        };

        let workers = WorkerConfig {
            count: parse_env_with_default("WORKER_COUNT", 5usize).max(1),
        };

        let reconcile = ReconcileConfig {
            interval: parse_env_optional::<u64>("RECONCILE_INTERVAL_SECS")
                .filter(|secs| *secs > 0)
                .map(Duration::from_secs),
            batch_size: parse_env_with_default("RECONCILE_BATCH_SIZE", 200usize).max(1),
        };

        Ok(Config {
            app,
            database,
            redis,
            relay,
            workers,
            reconcile,
        })
    }
}
