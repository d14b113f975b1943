use async_trait::async_trait;
use chrono::{DateTime, Utc};
use relay_queue::{Delta, DeltaEvent};
use sqlx::PgPool;
use std::collections::HashSet;

use super::StoreResult;

/// Result of applying one delta event to the durable store
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApplyOutcome {
    /// Relation row and counter changed
    Applied { delta: i64, like_count: i64 },
    /// Event already reflected in the store (replay or lost race); nothing changed
    Duplicate,
    /// Video row is gone; the transaction was rolled back
    VideoMissing,
}

/// What a store-side reconciliation changed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StoreReconcile {
    pub count_before: i64,
    pub rows_inserted: u64,
    pub rows_removed: u64,
}

/// Effect of `delta` on a relation that is currently `active` or not.
///
/// Re-applying an event whose effect is already present yields 0, which is
/// what absorbs at-least-once redelivery.
pub fn transition(active: bool, delta: Delta) -> i64 {
    match (active, delta) {
        (false, Delta::Add) => 1,
        (true, Delta::Remove) => -1,
        _ => 0,
    }
}

#[async_trait]
pub trait LikeStore: Send + Sync {
    /// Apply one delta event atomically (relation row + counter).
    async fn apply_delta(&self, event: &DeltaEvent) -> StoreResult<ApplyOutcome>;

    /// Durable counter; `None` when the video is missing.
    async fn like_count(&self, video_id: i64) -> StoreResult<Option<i64>>;

    async fn is_active(&self, user_id: i64, video_id: i64) -> StoreResult<bool>;

    /// Active likes of a user, newest first.
    async fn liked_video_ids(&self, user_id: i64, limit: i64) -> StoreResult<Vec<i64>>;

    /// Make the active rows equal `members` and the counter equal its size.
    /// `None` when the video is missing.
    async fn reconcile_video(
        &self,
        video_id: i64,
        members: &HashSet<i64>,
    ) -> StoreResult<Option<StoreReconcile>>;
}

/// PostgreSQL like store
///
/// Tables: `video_likes` (soft-deleted relation rows, one active row per
/// pair enforced by a partial unique index) and `videos.like_count`.
#[derive(Clone)]
pub struct PgLikeStore {
    pool: PgPool,
}

impl PgLikeStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl LikeStore for PgLikeStore {
    async fn apply_delta(&self, event: &DeltaEvent) -> StoreResult<ApplyOutcome> {
        let at = DateTime::<Utc>::from_timestamp(event.timestamp, 0).unwrap_or_else(Utc::now);

        let mut tx = self.pool.begin().await?;

        // Video row first: same lock order as reconcile_video.
        let video_locked: Option<i32> = sqlx::query_scalar(
            r#"
            SELECT 1 FROM videos
            WHERE id = $1 AND deleted_at IS NULL
            FOR UPDATE
            "#,
        )
        .bind(event.video_id)
        .fetch_optional(&mut *tx)
        .await?;

        if video_locked.is_none() {
            tx.rollback().await?;
            return Ok(ApplyOutcome::VideoMissing);
        }

        let active_id: Option<i64> = sqlx::query_scalar(
            r#"
            SELECT id FROM video_likes
            WHERE user_id = $1 AND video_id = $2 AND deleted_at IS NULL
            FOR UPDATE
            "#,
        )
        .bind(event.user_id)
        .bind(event.video_id)
        .fetch_optional(&mut *tx)
        .await?;

        let applied = match (transition(active_id.is_some(), event.delta), active_id) {
            (1, _) => {
                // A concurrent worker may have inserted the same pair since the
                // SELECT; the partial unique index turns that into a no-op.
                let inserted = sqlx::query(
                    r#"
                    INSERT INTO video_likes (user_id, video_id, created_at)
                    VALUES ($1, $2, $3)
                    ON CONFLICT (user_id, video_id) WHERE deleted_at IS NULL DO NOTHING
                    "#,
                )
                .bind(event.user_id)
                .bind(event.video_id)
                .bind(at)
                .execute(&mut *tx)
                .await?;

                if inserted.rows_affected() == 0 {
                    0
                } else {
                    1
                }
            }
            (-1, Some(id)) => {
                sqlx::query(
                    r#"
                    UPDATE video_likes
                    SET deleted_at = GREATEST($2, created_at)
                    WHERE id = $1
                    "#,
                )
                .bind(id)
                .bind(at)
                .execute(&mut *tx)
                .await?;
                -1
            }
            _ => 0,
        };

        if applied == 0 {
            tx.rollback().await?;
            return Ok(ApplyOutcome::Duplicate);
        }

        let like_count: Option<i64> = sqlx::query_scalar(
            r#"
            UPDATE videos
            SET like_count = GREATEST(like_count + $1, 0)
            WHERE id = $2 AND deleted_at IS NULL
            RETURNING like_count
            "#,
        )
        .bind(applied)
        .bind(event.video_id)
        .fetch_optional(&mut *tx)
        .await?;

        match like_count {
            Some(like_count) => {
                tx.commit().await?;
                Ok(ApplyOutcome::Applied {
                    delta: applied,
                    like_count,
                })
            }
            None => {
                tx.rollback().await?;
                Ok(ApplyOutcome::VideoMissing)
            }
        }
    }

    async fn like_count(&self, video_id: i64) -> StoreResult<Option<i64>> {
        let count: Option<i64> = sqlx::query_scalar(
            r#"
            SELECT like_count FROM videos
            WHERE id = $1 AND deleted_at IS NULL
            "#,
        )
        .bind(video_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(count)
    }

    async fn is_active(&self, user_id: i64, video_id: i64) -> StoreResult<bool> {
        let exists: bool = sqlx::query_scalar(
            r#"
            SELECT EXISTS(
                SELECT 1 FROM video_likes
                WHERE user_id = $1 AND video_id = $2 AND deleted_at IS NULL
            )
            "#,
        )
        .bind(user_id)
        .bind(video_id)
        .fetch_one(&self.pool)
        .await?;

        Ok(exists)
    }

    async fn liked_video_ids(&self, user_id: i64, limit: i64) -> StoreResult<Vec<i64>> {
        let video_ids: Vec<i64> = sqlx::query_scalar(
            r#"
            SELECT video_id
            FROM video_likes
            WHERE user_id = $1 AND deleted_at IS NULL
            ORDER BY created_at DESC, id DESC
            LIMIT $2
            "#,
        )
        .bind(user_id)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        Ok(video_ids)
    }

    async fn reconcile_video(
        &self,
        video_id: i64,
        members: &HashSet<i64>,
    ) -> StoreResult<Option<StoreReconcile>> {
        let member_ids: Vec<i64> = members.iter().copied().collect();

        let mut tx = self.pool.begin().await?;

        // Row lock on the video serializes against workers updating its counter.
        let count_before: Option<i64> = sqlx::query_scalar(
            r#"
            SELECT like_count FROM videos
            WHERE id = $1 AND deleted_at IS NULL
            FOR UPDATE
            "#,
        )
        .bind(video_id)
        .fetch_optional(&mut *tx)
        .await?;

        let Some(count_before) = count_before else {
            tx.rollback().await?;
            return Ok(None);
        };

        let removed = sqlx::query(
            r#"
            UPDATE video_likes
            SET deleted_at = NOW()
            WHERE video_id = $1
              AND deleted_at IS NULL
              AND NOT (user_id = ANY($2))
            "#,
        )
        .bind(video_id)
        .bind(&member_ids)
        .execute(&mut *tx)
        .await?;

        let inserted = sqlx::query(
            r#"
            INSERT INTO video_likes (user_id, video_id)
            SELECT m.user_id, $1::BIGINT
            FROM UNNEST($2::BIGINT[]) AS m(user_id)
            ON CONFLICT (user_id, video_id) WHERE deleted_at IS NULL DO NOTHING
            "#,
        )
        .bind(video_id)
        .bind(&member_ids)
        .execute(&mut *tx)
        .await?;

        sqlx::query(
            r#"
            UPDATE videos
            SET like_count = $2
            WHERE id = $1
            "#,
        )
        .bind(video_id)
        .bind(member_ids.len() as i64)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;

        Ok(Some(StoreReconcile {
            count_before,
            rows_inserted: inserted.rows_affected(),
            rows_removed: removed.rows_affected(),
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transition_table() {
        assert_eq!(transition(false, Delta::Add), 1);
        assert_eq!(transition(true, Delta::Add), 0);
        assert_eq!(transition(true, Delta::Remove), -1);
        assert_eq!(transition(false, Delta::Remove), 0);
    }

    #[test]
    fn test_transition_replay_is_noop() {
        // Applying the same event to the state it produced changes nothing.
        let mut active = false;
        for delta in [Delta::Add, Delta::Add, Delta::Remove, Delta::Remove] {
            let applied = transition(active, delta);
            active = match applied {
                1 => true,
                -1 => false,
                _ => active,
            };
        }
        assert!(!active);

        assert_eq!(transition(true, Delta::Add), 0);
        assert_eq!(transition(false, Delta::Remove), 0);
    }
}
