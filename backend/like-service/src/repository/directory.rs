//! Lookups against records owned by other services.
//!
//! Accounts and uploads live elsewhere; the like path only needs to know
//! that the caller and the target video exist.

use async_trait::async_trait;
use sqlx::PgPool;

use super::StoreResult;
use crate::domain::models::{UserRecord, VideoRecord};

#[async_trait]
pub trait UserDirectory: Send + Sync {
    async fn find_user_by_username(&self, username: &str) -> StoreResult<Option<UserRecord>>;
}

#[async_trait]
pub trait VideoCatalog: Send + Sync {
    /// Soft-deleted videos are treated as missing.
    async fn find_video(&self, video_id: i64) -> StoreResult<Option<VideoRecord>>;
}

/// Both lookups over the shared PostgreSQL pool
#[derive(Clone)]
pub struct PgDirectory {
    pool: PgPool,
}

impl PgDirectory {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl UserDirectory for PgDirectory {
    async fn find_user_by_username(&self, username: &str) -> StoreResult<Option<UserRecord>> {
        let user = sqlx::query_as::<_, UserRecord>(
            r#"
            SELECT id, username
            FROM users
            WHERE username = $1
            "#,
        )
        .bind(username)
        .fetch_optional(&self.pool)
        .await?;

        Ok(user)
    }
}

#[async_trait]
impl VideoCatalog for PgDirectory {
    async fn find_video(&self, video_id: i64) -> StoreResult<Option<VideoRecord>> {
        let video = sqlx::query_as::<_, VideoRecord>(
            r#"
            SELECT id, user_id, title, like_count, created_at
            FROM videos
            WHERE id = $1 AND deleted_at IS NULL
            "#,
        )
        .bind(video_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(video)
    }
}
