use std::sync::Arc;

use crate::cache::LikeCache;
use crate::domain::models::{LikeStatus, RankedVideo};
use crate::error::{ServiceError, ServiceResult};
use crate::repository::{LikeStore, UserDirectory};

pub const DEFAULT_LIST_LIMIT: usize = 20;
pub const MAX_LIST_LIMIT: usize = 100;

/// Clamp a caller-supplied page size to 1..=100.
pub fn clamp_limit(limit: Option<usize>) -> usize {
    limit.unwrap_or(DEFAULT_LIST_LIMIT).clamp(1, MAX_LIST_LIMIT)
}

/// Read side: counts and membership from the cache, listings from the store.
#[derive(Clone)]
pub struct LikeQueries {
    cache: Arc<dyn LikeCache>,
    users: Arc<dyn UserDirectory>,
    store: Arc<dyn LikeStore>,
}

impl LikeQueries {
    pub fn new(
        cache: Arc<dyn LikeCache>,
        users: Arc<dyn UserDirectory>,
        store: Arc<dyn LikeStore>,
    ) -> Self {
        Self {
            cache,
            users,
            store,
        }
    }

    /// Anonymous callers get `is_liked = false`.
    pub async fn like_status(&self, username: Option<&str>, video_id: i64) -> ServiceResult<LikeStatus> {
        let like_count = self.cache.score(video_id).await?;

        let is_liked = match username {
            Some(username) => {
                let user_id = self.user_id(username).await?;
                self.cache.is_member(video_id, user_id).await?
            }
            None => false,
        };

        Ok(LikeStatus {
            video_id,
            like_count,
            is_liked,
        })
    }

    pub async fn top_videos(&self, limit: Option<usize>) -> ServiceResult<Vec<RankedVideo>> {
        let ranked = self.cache.top_n(clamp_limit(limit)).await?;

        Ok(ranked
            .into_iter()
            .map(|(video_id, like_count)| RankedVideo {
                video_id,
                like_count,
            })
            .collect())
    }

    /// Durable listing, newest like first. May trail the cache by the relay lag.
    pub async fn liked_videos(&self, username: &str, limit: Option<usize>) -> ServiceResult<Vec<i64>> {
        let user_id = self.user_id(username).await?;
        let video_ids = self
            .store
            .liked_video_ids(user_id, clamp_limit(limit) as i64)
            .await?;
        Ok(video_ids)
    }

    async fn user_id(&self, username: &str) -> ServiceResult<i64> {
        self.users
            .find_user_by_username(username)
            .await?
            .map(|u| u.id)
            .ok_or_else(|| ServiceError::UserNotFound(username.to_string()))
    }
}
