use async_trait::async_trait;
use once_cell::sync::Lazy;
use redis::{aio::ConnectionManager, AsyncCommands, Script};
use redis_utils::run_with_timeout;
use std::collections::HashSet;
use tracing::warn;

use super::{CacheResult, LikeCache};

/// Sorted set of video id -> like count, shared by all videos
pub const RANK_KEY: &str = "video:likes:rank";

/// Set of user ids that currently like the video
pub fn likers_key(video_id: i64) -> String {
    format!("video:{}:likers", video_id)
}

const LIKERS_PATTERN: &str = "video:*:likers";

/// Inverse of [`likers_key`].
pub fn video_id_from_likers_key(key: &str) -> Option<i64> {
    key.strip_prefix("video:")?
        .strip_suffix(":likers")?
        .parse()
        .ok()
}

// ZINCRBY then clamp, in one step, so no reader ever sees a negative score.
static ADJUST_SCORE: Lazy<Script> = Lazy::new(|| {
    Script::new(
        r#"
        local score = tonumber(redis.call('ZINCRBY', KEYS[1], ARGV[1], ARGV[2]))
        if score < 0 then
            redis.call('ZADD', KEYS[1], 0, ARGV[2])
            return 0
        end
        return score
    "#,
    )
});

static REPAIR_SCORE: Lazy<Script> = Lazy::new(|| {
    Script::new(
        r#"
        local n = redis.call('SCARD', KEYS[1])
        redis.call('ZADD', KEYS[2], n, ARGV[1])
        return n
    "#,
    )
});

/// Redis-backed like cache
///
/// Keys:
/// - `video:{id}:likers` SET of user ids
/// - `video:likes:rank` ZSET, member = video id, score = like count
///
/// Every command goes through `run_with_timeout`; a timeout is a `CacheError`.
#[derive(Clone)]
pub struct RedisLikeCache {
    redis: ConnectionManager,
}

impl RedisLikeCache {
    pub fn new(redis: ConnectionManager) -> Self {
        Self { redis }
    }
}

#[async_trait]
impl LikeCache for RedisLikeCache {
    async fn is_member(&self, video_id: i64, user_id: i64) -> CacheResult<bool> {
        let mut conn = self.redis.clone();
        let member: bool =
            run_with_timeout(conn.sismember(likers_key(video_id), user_id)).await?;
        Ok(member)
    }

    async fn add_member(&self, video_id: i64, user_id: i64) -> CacheResult<bool> {
        let mut conn = self.redis.clone();
        let added: i64 = run_with_timeout(conn.sadd(likers_key(video_id), user_id)).await?;
        Ok(added == 1)
    }

    async fn remove_member(&self, video_id: i64, user_id: i64) -> CacheResult<bool> {
        let mut conn = self.redis.clone();
        let removed: i64 = run_with_timeout(conn.srem(likers_key(video_id), user_id)).await?;
        Ok(removed == 1)
    }

    async fn adjust_score(&self, video_id: i64, delta: i64) -> CacheResult<i64> {
        let mut conn = self.redis.clone();
        let score: i64 = run_with_timeout(
            ADJUST_SCORE
                .key(RANK_KEY)
                .arg(delta)
                .arg(video_id)
                .invoke_async(&mut conn),
        )
        .await?;
        Ok(score)
    }

    async fn score(&self, video_id: i64) -> CacheResult<i64> {
        let mut conn = self.redis.clone();
        let score: Option<f64> = run_with_timeout(conn.zscore(RANK_KEY, video_id)).await?;
        Ok(score.map(|s| s as i64).unwrap_or(0))
    }

    async fn ranked_page(&self, offset: usize, limit: usize) -> CacheResult<Vec<(i64, i64)>> {
        if limit == 0 {
            return Ok(Vec::new());
        }

        let start = offset as isize;
        let stop = (offset + limit - 1) as isize;

        let mut conn = self.redis.clone();
        let entries: Vec<(String, f64)> =
            run_with_timeout(conn.zrevrange_withscores(RANK_KEY, start, stop)).await?;

        Ok(entries
            .into_iter()
            .filter_map(|(member, score)| match member.parse::<i64>() {
                Ok(video_id) => Some((video_id, score as i64)),
                Err(_) => {
                    warn!(member = %member, "Skipping non-numeric member in like ranking");
                    None
                }
            })
            .collect())
    }

    async fn members(&self, video_id: i64) -> CacheResult<HashSet<i64>> {
        let mut conn = self.redis.clone();
        let members: HashSet<i64> = run_with_timeout(conn.smembers(likers_key(video_id))).await?;
        Ok(members)
    }

    async fn member_count(&self, video_id: i64) -> CacheResult<i64> {
        let mut conn = self.redis.clone();
        let count: i64 = run_with_timeout(conn.scard(likers_key(video_id))).await?;
        Ok(count)
    }

    async fn repair_score(&self, video_id: i64) -> CacheResult<i64> {
        let mut conn = self.redis.clone();
        let score: i64 = run_with_timeout(
            REPAIR_SCORE
                .key(likers_key(video_id))
                .key(RANK_KEY)
                .arg(video_id)
                .invoke_async(&mut conn),
        )
        .await?;
        Ok(score)
    }

    async fn scan_liked_videos(&self, cursor: u64, count: usize) -> CacheResult<(u64, Vec<i64>)> {
        let mut conn = self.redis.clone();
        let (next, keys): (u64, Vec<String>) = run_with_timeout(
            redis::cmd("SCAN")
                .arg(cursor)
                .arg("MATCH")
                .arg(LIKERS_PATTERN)
                .arg("COUNT")
                .arg(count)
                .query_async(&mut conn),
        )
        .await?;

        let videos = keys
            .iter()
            .filter_map(|key| {
                let video_id = video_id_from_likers_key(key);
                if video_id.is_none() {
                    warn!(key = %key, "Skipping malformed likers key");
                }
                video_id
            })
            .collect();
        Ok((next, videos))
    }

    async fn evict_video(&self, video_id: i64) -> CacheResult<()> {
        let mut conn = self.redis.clone();
        let _: () = run_with_timeout(
            redis::pipe()
                .atomic()
                .del(likers_key(video_id))
                .ignore()
                .zrem(RANK_KEY, video_id)
                .ignore()
                .query_async(&mut conn),
        )
        .await?;
        Ok(())
    }

    async fn ping(&self) -> CacheResult<()> {
        let mut conn = self.redis.clone();
        let _: String = run_with_timeout(redis::cmd("PING").query_async(&mut conn)).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_key_layout() {
        assert_eq!(likers_key(42), "video:42:likers");
        assert_eq!(RANK_KEY, "video:likes:rank");
    }

    #[test]
    fn test_video_id_from_likers_key() {
        assert_eq!(video_id_from_likers_key(&likers_key(42)), Some(42));
        assert_eq!(video_id_from_likers_key("video:abc:likers"), None);
        assert_eq!(video_id_from_likers_key("video:likes:rank"), None);
        assert_eq!(video_id_from_likers_key("user:42:likers"), None);
    }
}
