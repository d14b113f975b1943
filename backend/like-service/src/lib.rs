//! Like service
//!
//! Video likes with a Redis cache as the authoritative read/write path and
//! PostgreSQL as an eventually consistent mirror, connected by a Redis
//! Streams relay:
//!
//! ```text
//! HTTP ──▶ LikeCoordinator ──▶ LikeCache (Redis SET + ZSET)
//!                 │
//!                 └── DeltaEvent ──▶ relay ──▶ PersistenceWorker ──▶ PostgreSQL
//!                                                        ▲
//!                      Reconciler (cache membership ─────┘ is the truth)
//! ```

pub mod cache;
pub mod config;
pub mod domain;
pub mod error;
pub mod handlers;
pub mod metrics;
pub mod repository;
pub mod services;
pub mod workers;

#[cfg(test)]
pub(crate) mod testing;
