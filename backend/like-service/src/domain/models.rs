use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Account record as seen by the like path
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, sqlx::FromRow)]
pub struct UserRecord {
    pub id: i64,
    pub username: String,
}

/// Video record as seen by the like path
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, sqlx::FromRow)]
pub struct VideoRecord {
    pub id: i64,
    pub user_id: i64,
    pub title: String,
    /// Durable mirror of the like count; never read on the hot path
    pub like_count: i64,
    pub created_at: DateTime<Utc>,
}

/// Post-condition of a like/unlike/toggle request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LikeResult {
    pub message: String,
    pub like_count: i64,
    pub is_liked: bool,
}

impl LikeResult {
    pub const LIKED: &'static str = "liked";
    pub const ALREADY_LIKED: &'static str = "already liked";
    pub const UNLIKED: &'static str = "unliked";
    pub const NOT_LIKED: &'static str = "not liked";

    pub fn new(message: &str, like_count: i64, is_liked: bool) -> Self {
        Self {
            message: message.to_string(),
            like_count,
            is_liked,
        }
    }
}

/// Like count plus the caller's membership, read from the cache
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LikeStatus {
    pub video_id: i64,
    pub like_count: i64,
    pub is_liked: bool,
}

/// One entry of the ranking
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RankedVideo {
    pub video_id: i64,
    pub like_count: i64,
}

/// What one reconciliation pass changed for a video
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReconcileReport {
    pub video_id: i64,
    pub cache_score_before: i64,
    pub cache_score_after: i64,
    pub store_count_before: i64,
    pub rows_inserted: u64,
    pub rows_removed: u64,
}

impl ReconcileReport {
    pub fn changed_anything(&self) -> bool {
        self.cache_score_before != self.cache_score_after
            || self.store_count_before != self.cache_score_after
            || self.rows_inserted > 0
            || self.rows_removed > 0
    }
}

/// Totals for one sweep over the ranking and the membership sets
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SweepSummary {
    pub scanned: u64,
    pub drifted: u64,
    pub repaired: u64,
    /// Cache entries dropped because the video is gone from the store
    pub evicted: u64,
    pub failed: u64,
}
