//! In-memory fakes for unit tests, with failure injection.

use async_trait::async_trait;
use chrono::Utc;
use relay_queue::{Delta, DeltaEvent, RelayError, RelayPublisher, RelayResult};
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Mutex;

use crate::cache::{CacheError, CacheResult, LikeCache};
use crate::domain::models::{UserRecord, VideoRecord};
use crate::repository::{
    transition, ApplyOutcome, LikeStore, StoreError, StoreReconcile, StoreResult, UserDirectory,
    VideoCatalog,
};

fn redis_down() -> CacheError {
    CacheError::Redis(redis::RedisError::from((
        redis::ErrorKind::IoError,
        "redis command timed out",
    )))
}

#[derive(Default)]
struct CacheState {
    members: HashMap<i64, HashSet<i64>>,
    scores: HashMap<i64, i64>,
}

/// Each operation holds the lock for its whole body, like a single Redis command.
#[derive(Default)]
pub struct FakeCache {
    state: Mutex<CacheState>,
    fail_adjust: AtomicBool,
    fail_remove: AtomicBool,
    fail_all: AtomicBool,
    lost_replies: AtomicUsize,
}

impl FakeCache {
    pub fn fail_adjust(&self, on: bool) {
        self.fail_adjust.store(on, Ordering::SeqCst);
    }

    pub fn fail_remove(&self, on: bool) {
        self.fail_remove.store(on, Ordering::SeqCst);
    }

    /// The next `n` add/remove member calls change the set and then report an
    /// error, like a command that lands in Redis after the client timed out.
    pub fn lose_membership_replies(&self, n: usize) {
        self.lost_replies.store(n, Ordering::SeqCst);
    }

    pub fn fail_all(&self, on: bool) {
        self.fail_all.store(on, Ordering::SeqCst);
    }

    pub fn score_of(&self, video_id: i64) -> i64 {
        *self.state.lock().unwrap().scores.get(&video_id).unwrap_or(&0)
    }

    pub fn contains(&self, video_id: i64, user_id: i64) -> bool {
        self.state
            .lock()
            .unwrap()
            .members
            .get(&video_id)
            .map(|m| m.contains(&user_id))
            .unwrap_or(false)
    }

    /// Change membership without touching the score.
    pub fn insert_member(&self, video_id: i64, user_id: i64) {
        self.state
            .lock()
            .unwrap()
            .members
            .entry(video_id)
            .or_default()
            .insert(user_id);
    }

    pub fn set_score(&self, video_id: i64, score: i64) {
        self.state.lock().unwrap().scores.insert(video_id, score);
    }

    fn reply_lost(&self) -> bool {
        self.lost_replies
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
    }

    fn check(&self) -> CacheResult<()> {
        if self.fail_all.load(Ordering::SeqCst) {
            Err(redis_down())
        } else {
            Ok(())
        }
    }
}

#[async_trait]
impl LikeCache for FakeCache {
    async fn is_member(&self, video_id: i64, user_id: i64) -> CacheResult<bool> {
        self.check()?;
        Ok(self.contains(video_id, user_id))
    }

    async fn add_member(&self, video_id: i64, user_id: i64) -> CacheResult<bool> {
        self.check()?;
        let added = self
            .state
            .lock()
            .unwrap()
            .members
            .entry(video_id)
            .or_default()
            .insert(user_id);
        if self.reply_lost() {
            return Err(redis_down());
        }
        Ok(added)
    }

    async fn remove_member(&self, video_id: i64, user_id: i64) -> CacheResult<bool> {
        self.check()?;
        if self.fail_remove.load(Ordering::SeqCst) {
            return Err(redis_down());
        }
        let removed = self
            .state
            .lock()
            .unwrap()
            .members
            .get_mut(&video_id)
            .map(|m| m.remove(&user_id))
            .unwrap_or(false);
        if self.reply_lost() {
            return Err(redis_down());
        }
        Ok(removed)
    }

    async fn adjust_score(&self, video_id: i64, delta: i64) -> CacheResult<i64> {
        self.check()?;
        if self.fail_adjust.load(Ordering::SeqCst) {
            return Err(redis_down());
        }
        let mut state = self.state.lock().unwrap();
        let score = state.scores.entry(video_id).or_insert(0);
        *score = (*score + delta).max(0);
        Ok(*score)
    }

    async fn score(&self, video_id: i64) -> CacheResult<i64> {
        self.check()?;
        Ok(self.score_of(video_id))
    }

    async fn ranked_page(&self, offset: usize, limit: usize) -> CacheResult<Vec<(i64, i64)>> {
        self.check()?;
        let state = self.state.lock().unwrap();
        let mut ranked: Vec<(i64, i64)> = state.scores.iter().map(|(v, s)| (*v, *s)).collect();
        // Redis orders equal scores by member, descending for ZREVRANGE.
        ranked.sort_by(|a, b| b.1.cmp(&a.1).then(b.0.to_string().cmp(&a.0.to_string())));
        Ok(ranked.into_iter().skip(offset).take(limit).collect())
    }

    async fn members(&self, video_id: i64) -> CacheResult<HashSet<i64>> {
        self.check()?;
        let state = self.state.lock().unwrap();
        Ok(state.members.get(&video_id).cloned().unwrap_or_default())
    }

    async fn member_count(&self, video_id: i64) -> CacheResult<i64> {
        self.check()?;
        let state = self.state.lock().unwrap();
        Ok(state.members.get(&video_id).map(|m| m.len() as i64).unwrap_or(0))
    }

    async fn repair_score(&self, video_id: i64) -> CacheResult<i64> {
        self.check()?;
        let mut state = self.state.lock().unwrap();
        let n = state.members.get(&video_id).map(|m| m.len() as i64).unwrap_or(0);
        state.scores.insert(video_id, n);
        Ok(n)
    }

    /// Whole keyspace in one step.
    async fn scan_liked_videos(&self, _cursor: u64, _count: usize) -> CacheResult<(u64, Vec<i64>)> {
        self.check()?;
        let state = self.state.lock().unwrap();
        let mut videos: Vec<i64> = state
            .members
            .iter()
            .filter(|(_, m)| !m.is_empty())
            .map(|(v, _)| *v)
            .collect();
        videos.sort_unstable();
        Ok((0, videos))
    }

    async fn evict_video(&self, video_id: i64) -> CacheResult<()> {
        self.check()?;
        let mut state = self.state.lock().unwrap();
        state.members.remove(&video_id);
        state.scores.remove(&video_id);
        Ok(())
    }

    async fn ping(&self) -> CacheResult<()> {
        self.check()
    }
}

#[derive(Default)]
pub struct FakeDirectory {
    users: HashMap<String, i64>,
    videos: HashSet<i64>,
}

impl FakeDirectory {
    pub fn with_user(mut self, id: i64, username: &str) -> Self {
        self.users.insert(username.to_string(), id);
        self
    }

    pub fn with_video(mut self, id: i64) -> Self {
        self.videos.insert(id);
        self
    }
}

#[async_trait]
impl UserDirectory for FakeDirectory {
    async fn find_user_by_username(&self, username: &str) -> StoreResult<Option<UserRecord>> {
        Ok(self.users.get(username).map(|id| UserRecord {
            id: *id,
            username: username.to_string(),
        }))
    }
}

#[async_trait]
impl VideoCatalog for FakeDirectory {
    async fn find_video(&self, video_id: i64) -> StoreResult<Option<VideoRecord>> {
        Ok(self.videos.get(&video_id).map(|id| VideoRecord {
            id: *id,
            user_id: 0,
            title: format!("video {}", id),
            like_count: 0,
            created_at: Utc::now(),
        }))
    }
}

#[derive(Default)]
struct StoreState {
    /// (user, video) -> insertion sequence
    active: HashMap<(i64, i64), u64>,
    counts: HashMap<i64, i64>,
    seq: u64,
}

/// Same transition rules as the PostgreSQL store, over a map.
#[derive(Default)]
pub struct InMemoryLikeStore {
    state: Mutex<StoreState>,
    failures: AtomicUsize,
}

impl InMemoryLikeStore {
    pub fn with_video(self, video_id: i64) -> Self {
        self.state.lock().unwrap().counts.insert(video_id, 0);
        self
    }

    /// Make the next `n` calls to `apply_delta` fail with a database error.
    pub fn fail_next(&self, n: usize) {
        self.failures.store(n, Ordering::SeqCst);
    }

    pub fn delete_video(&self, video_id: i64) {
        self.state.lock().unwrap().counts.remove(&video_id);
    }

    pub fn count_of(&self, video_id: i64) -> Option<i64> {
        self.state.lock().unwrap().counts.get(&video_id).copied()
    }

    pub fn active_users(&self, video_id: i64) -> HashSet<i64> {
        self.state
            .lock()
            .unwrap()
            .active
            .keys()
            .filter(|(_, v)| *v == video_id)
            .map(|(u, _)| *u)
            .collect()
    }

    pub fn set_count(&self, video_id: i64, count: i64) {
        self.state.lock().unwrap().counts.insert(video_id, count);
    }

    fn take_failure(&self) -> bool {
        self.failures
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
    }
}

#[async_trait]
impl LikeStore for InMemoryLikeStore {
    async fn apply_delta(&self, event: &DeltaEvent) -> StoreResult<ApplyOutcome> {
        if self.take_failure() {
            return Err(StoreError::Database(sqlx::Error::PoolTimedOut));
        }

        let mut state = self.state.lock().unwrap();
        if !state.counts.contains_key(&event.video_id) {
            return Ok(ApplyOutcome::VideoMissing);
        }
        let key = (event.user_id, event.video_id);
        let applied = transition(state.active.contains_key(&key), event.delta);
        if applied == 0 {
            return Ok(ApplyOutcome::Duplicate);
        }

        match event.delta {
            Delta::Add => {
                state.seq += 1;
                let seq = state.seq;
                state.active.insert(key, seq);
            }
            Delta::Remove => {
                state.active.remove(&key);
            }
        }

        let count = state.counts.entry(event.video_id).or_insert(0);
        *count = (*count + applied).max(0);
        Ok(ApplyOutcome::Applied {
            delta: applied,
            like_count: *count,
        })
    }

    async fn like_count(&self, video_id: i64) -> StoreResult<Option<i64>> {
        Ok(self.count_of(video_id))
    }

    async fn is_active(&self, user_id: i64, video_id: i64) -> StoreResult<bool> {
        Ok(self
            .state
            .lock()
            .unwrap()
            .active
            .contains_key(&(user_id, video_id)))
    }

    async fn liked_video_ids(&self, user_id: i64, limit: i64) -> StoreResult<Vec<i64>> {
        let state = self.state.lock().unwrap();
        let mut liked: Vec<(u64, i64)> = state
            .active
            .iter()
            .filter(|((u, _), _)| *u == user_id)
            .map(|((_, v), seq)| (*seq, *v))
            .collect();
        liked.sort_by(|a, b| b.0.cmp(&a.0));
        Ok(liked
            .into_iter()
            .take(limit.max(0) as usize)
            .map(|(_, v)| v)
            .collect())
    }

    async fn reconcile_video(
        &self,
        video_id: i64,
        members: &HashSet<i64>,
    ) -> StoreResult<Option<StoreReconcile>> {
        let mut state = self.state.lock().unwrap();
        let Some(count_before) = state.counts.get(&video_id).copied() else {
            return Ok(None);
        };

        let stale: Vec<(i64, i64)> = state
            .active
            .keys()
            .filter(|(u, v)| *v == video_id && !members.contains(u))
            .copied()
            .collect();
        for key in &stale {
            state.active.remove(key);
        }

        let mut inserted = 0;
        for user_id in members {
            if !state.active.contains_key(&(*user_id, video_id)) {
                state.seq += 1;
                let seq = state.seq;
                state.active.insert((*user_id, video_id), seq);
                inserted += 1;
            }
        }

        state.counts.insert(video_id, members.len() as i64);

        Ok(Some(StoreReconcile {
            count_before,
            rows_inserted: inserted,
            rows_removed: stale.len() as u64,
        }))
    }
}

pub struct FailingPublisher;

#[async_trait]
impl RelayPublisher for FailingPublisher {
    async fn publish(&self, _event: &DeltaEvent) -> RelayResult<String> {
        Err(RelayError::Redis(redis::RedisError::from((
            redis::ErrorKind::IoError,
            "connection refused",
        ))))
    }
}
