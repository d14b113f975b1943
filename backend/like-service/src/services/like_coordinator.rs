//! Write coordinator for like/unlike/toggle
//!
//! Request path, cache only:
//!
//! ```text
//! resolve user + video
//!   -> IsMember            (already in target state: return current score)
//!   -> Add/RemoveMember    (lost a race: same as above; error: undo, return error)
//!   -> AdjustScore(+-1)    (failure: undo the membership change, return error)
//!   -> publish DeltaEvent  (failure: logged, request still succeeds)
//! ```
//!
//! The durable store is never read or written here. A failed publish leaves
//! the store behind the cache until the reconciliation sweep repairs it.

use relay_queue::{Delta, DeltaEvent, RelayPublisher};
use std::sync::Arc;
use tracing::{debug, error, warn};

use crate::cache::LikeCache;
use crate::domain::models::{LikeResult, UserRecord, VideoRecord};
use crate::error::{ServiceError, ServiceResult};
use crate::metrics::{CACHE_COMPENSATIONS_TOTAL, LIKE_REQUESTS_TOTAL, RELAY_PUBLISH_FAILURES_TOTAL};
use crate::repository::{UserDirectory, VideoCatalog};

#[derive(Clone)]
pub struct LikeCoordinator {
    cache: Arc<dyn LikeCache>,
    users: Arc<dyn UserDirectory>,
    videos: Arc<dyn VideoCatalog>,
    relay: Arc<dyn RelayPublisher>,
}

impl LikeCoordinator {
    pub fn new(
        cache: Arc<dyn LikeCache>,
        users: Arc<dyn UserDirectory>,
        videos: Arc<dyn VideoCatalog>,
        relay: Arc<dyn RelayPublisher>,
    ) -> Self {
        Self {
            cache,
            users,
            videos,
            relay,
        }
    }

    pub async fn add_like(&self, username: &str, video_id: i64) -> ServiceResult<LikeResult> {
        let result: ServiceResult<LikeResult> = async {
            let (user, video) = self.resolve(username, video_id).await?;
            self.like(&user, &video).await
        }
        .await;
        observe("like", &result);
        result
    }

    pub async fn remove_like(&self, username: &str, video_id: i64) -> ServiceResult<LikeResult> {
        let result: ServiceResult<LikeResult> = async {
            let (user, video) = self.resolve(username, video_id).await?;
            self.unlike(&user, &video).await
        }
        .await;
        observe("unlike", &result);
        result
    }

    /// Dispatch on current membership. Not atomic with the check: two
    /// concurrent toggles may both read the same state, and each sub-operation
    /// then resolves idempotently.
    pub async fn toggle_like(&self, username: &str, video_id: i64) -> ServiceResult<LikeResult> {
        let result: ServiceResult<LikeResult> = async {
            let (user, video) = self.resolve(username, video_id).await?;
            if self.cache.is_member(video.id, user.id).await? {
                self.unlike(&user, &video).await
            } else {
                self.like(&user, &video).await
            }
        }
        .await;
        observe("toggle", &result);
        result
    }

    async fn resolve(&self, username: &str, video_id: i64) -> ServiceResult<(UserRecord, VideoRecord)> {
        let user = self
            .users
            .find_user_by_username(username)
            .await?
            .ok_or_else(|| ServiceError::UserNotFound(username.to_string()))?;

        let video = self
            .videos
            .find_video(video_id)
            .await?
            .ok_or(ServiceError::VideoNotFound(video_id))?;

        Ok((user, video))
    }

    async fn like(&self, user: &UserRecord, video: &VideoRecord) -> ServiceResult<LikeResult> {
        if self.cache.is_member(video.id, user.id).await? {
            let score = self.cache.score(video.id).await?;
            return Ok(LikeResult::new(LikeResult::ALREADY_LIKED, score, true));
        }

        let added = match self.cache.add_member(video.id, user.id).await {
            Ok(added) => added,
            Err(e) => {
                // The SADD may have landed before the error.
                self.compensate(video.id, user.id, Delta::Add, "add_member").await;
                return Err(e.into());
            }
        };
        if !added {
            debug!(video_id = video.id, user_id = user.id, "Lost like race to a concurrent request");
            let score = self.cache.score(video.id).await?;
            return Ok(LikeResult::new(LikeResult::ALREADY_LIKED, score, true));
        }

        let score = match self.cache.adjust_score(video.id, Delta::Add.as_i64()).await {
            Ok(score) => score,
            Err(e) => {
                self.compensate(video.id, user.id, Delta::Add, "adjust_score").await;
                return Err(e.into());
            }
        };

        self.publish(DeltaEvent::new(video.id, user.id, Delta::Add)).await;
        Ok(LikeResult::new(LikeResult::LIKED, score, true))
    }

    async fn unlike(&self, user: &UserRecord, video: &VideoRecord) -> ServiceResult<LikeResult> {
        if !self.cache.is_member(video.id, user.id).await? {
            let score = self.cache.score(video.id).await?;
            return Ok(LikeResult::new(LikeResult::NOT_LIKED, score, false));
        }

        let removed = match self.cache.remove_member(video.id, user.id).await {
            Ok(removed) => removed,
            Err(e) => {
                self.compensate(video.id, user.id, Delta::Remove, "remove_member").await;
                return Err(e.into());
            }
        };
        if !removed {
            debug!(video_id = video.id, user_id = user.id, "Lost unlike race to a concurrent request");
            let score = self.cache.score(video.id).await?;
            return Ok(LikeResult::new(LikeResult::NOT_LIKED, score, false));
        }

        let score = match self.cache.adjust_score(video.id, Delta::Remove.as_i64()).await {
            Ok(score) => score,
            Err(e) => {
                self.compensate(video.id, user.id, Delta::Remove, "adjust_score").await;
                return Err(e.into());
            }
        };

        self.publish(DeltaEvent::new(video.id, user.id, Delta::Remove)).await;
        Ok(LikeResult::new(LikeResult::UNLIKED, score, false))
    }

    /// Undo the membership half of a transition that failed at `step`.
    /// Best effort: whatever is left over is repaired by reconciliation.
    async fn compensate(&self, video_id: i64, user_id: i64, attempted: Delta, step: &str) {
        let undo = match attempted {
            Delta::Add => self.cache.remove_member(video_id, user_id).await,
            Delta::Remove => self.cache.add_member(video_id, user_id).await,
        };

        match undo {
            Ok(_) => {
                CACHE_COMPENSATIONS_TOTAL.with_label_values(&["ok"]).inc();
                warn!(
                    video_id,
                    user_id,
                    delta = %attempted,
                    step,
                    "Cache step failed, membership change undone"
                );
            }
            Err(e) => {
                CACHE_COMPENSATIONS_TOTAL.with_label_values(&["failed"]).inc();
                error!(
                    video_id,
                    user_id,
                    delta = %attempted,
                    step,
                    error = %e,
                    "Cache step failed and membership undo failed; left for reconciliation"
                );
            }
        }
    }

    async fn publish(&self, event: DeltaEvent) {
        if let Err(e) = self.relay.publish(&event).await {
            RELAY_PUBLISH_FAILURES_TOTAL.inc();
            error!(
                video_id = event.video_id,
                user_id = event.user_id,
                delta = %event.delta,
                error = %e,
                "Failed to publish delta event; durable store will drift until reconciled"
            );
        }
    }
}

fn observe(action: &str, result: &ServiceResult<LikeResult>) {
    let outcome = match result {
        Ok(r) if r.message == LikeResult::LIKED || r.message == LikeResult::UNLIKED => "applied",
        Ok(_) => "idempotent",
        Err(_) => "error",
    };
    LIKE_REQUESTS_TOTAL
        .with_label_values(&[action, outcome])
        .inc();
}
