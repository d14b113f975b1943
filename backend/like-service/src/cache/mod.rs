//! Authoritative like cache
//!
//! Per video the cache holds a membership set (who likes it) and a score
//! (how many). It is the path of record for "is liked" and "like count"
//! reads; the durable store only mirrors it.
//!
//! The two structures are independent primitives. Callers that change both
//! must sequence them and undo the first step if the second fails.

mod redis_cache;

use async_trait::async_trait;
use std::collections::HashSet;
use thiserror::Error;

pub use redis_cache::{likers_key, video_id_from_likers_key, RedisLikeCache, RANK_KEY};

#[derive(Error, Debug)]
pub enum CacheError {
    /// Command failed, connection dropped, or the command timed out
    #[error("Redis error: {0}")]
    Redis(#[from] redis::RedisError),
}

pub type CacheResult<T> = Result<T, CacheError>;

#[async_trait]
pub trait LikeCache: Send + Sync {
    /// Membership test. A video never liked has an empty set.
    async fn is_member(&self, video_id: i64, user_id: i64) -> CacheResult<bool>;

    /// Returns `false` when the user was already a member.
    async fn add_member(&self, video_id: i64, user_id: i64) -> CacheResult<bool>;

    /// Returns `false` when the user was not a member.
    async fn remove_member(&self, video_id: i64, user_id: i64) -> CacheResult<bool>;

    /// Atomically add `delta` to the score and return the new value, floored at 0.
    async fn adjust_score(&self, video_id: i64, delta: i64) -> CacheResult<i64>;

    /// Current score; 0 for an unknown video.
    async fn score(&self, video_id: i64) -> CacheResult<i64>;

    /// Highest scores first, `limit` entries starting at rank `offset`.
    async fn ranked_page(&self, offset: usize, limit: usize) -> CacheResult<Vec<(i64, i64)>>;

    async fn members(&self, video_id: i64) -> CacheResult<HashSet<i64>>;

    async fn member_count(&self, video_id: i64) -> CacheResult<i64>;

    /// Atomically set the score to the size of the membership set.
    async fn repair_score(&self, video_id: i64) -> CacheResult<i64>;

    /// One SCAN step over the membership sets. Returns the next cursor and
    /// the video ids seen; cursor 0 starts the scan and signals its end.
    /// A video may be reported more than once per scan.
    async fn scan_liked_videos(&self, cursor: u64, count: usize) -> CacheResult<(u64, Vec<i64>)>;

    /// Drop the membership set and the ranking entry of a video.
    async fn evict_video(&self, video_id: i64) -> CacheResult<()>;

    async fn ping(&self) -> CacheResult<()>;

    async fn top_n(&self, limit: usize) -> CacheResult<Vec<(i64, i64)>> {
        self.ranked_page(0, limit).await
    }
}
