//! Cache/store reconciliation
//!
//! Repairs drift the request path cannot: lost publishes, failed
//! compensations, membership changes with unknown outcome. The membership
//! set is treated as the truth for both the cache score and the store.
//!
//! A sweep can overlap with in-flight delta events. Worker application is
//! existence-checked, so an event landing after the sweep is absorbed as a
//! duplicate; anything still off is caught by the next sweep.

use std::collections::HashSet;
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::cache::LikeCache;
use crate::domain::models::{ReconcileReport, SweepSummary};
use crate::error::{ServiceError, ServiceResult};
use crate::metrics::RECONCILED_VIDEOS_TOTAL;
use crate::repository::LikeStore;

#[derive(Clone)]
pub struct Reconciler {
    cache: Arc<dyn LikeCache>,
    store: Arc<dyn LikeStore>,
    batch_size: usize,
}

impl Reconciler {
    pub fn new(cache: Arc<dyn LikeCache>, store: Arc<dyn LikeStore>, batch_size: usize) -> Self {
        Self {
            cache,
            store,
            batch_size: batch_size.max(1),
        }
    }

    pub async fn reconcile_video(&self, video_id: i64) -> ServiceResult<ReconcileReport> {
        let cache_score_before = self.cache.score(video_id).await?;
        let cache_score_after = self.cache.repair_score(video_id).await?;
        let members = self.cache.members(video_id).await?;

        let store = self
            .store
            .reconcile_video(video_id, &members)
            .await?
            .ok_or(ServiceError::VideoNotFound(video_id))?;

        let report = ReconcileReport {
            video_id,
            cache_score_before,
            cache_score_after,
            store_count_before: store.count_before,
            rows_inserted: store.rows_inserted,
            rows_removed: store.rows_removed,
        };

        if report.changed_anything() {
            RECONCILED_VIDEOS_TOTAL.inc();
            info!(
                video_id,
                cache_score_before,
                cache_score_after,
                store_count_before = store.count_before,
                rows_inserted = store.rows_inserted,
                rows_removed = store.rows_removed,
                "Reconciled video likes"
            );
        }

        Ok(report)
    }

    /// Reconcile every video whose score disagrees with its membership set
    /// or with the store counter.
    ///
    /// Candidates come from the ranking and from the membership sets, so a
    /// video whose first like never reached the ranking is still found.
    /// Repairs move videos within the ranking, so the scan finishes before
    /// any repair starts. Videos gone from the store are evicted from the
    /// cache.
    pub async fn sweep(&self) -> ServiceResult<SweepSummary> {
        let mut summary = SweepSummary::default();
        let candidates = self.collect_candidates().await?;

        let mut drifted = Vec::new();
        let mut gone = Vec::new();
        for (video_id, score) in candidates {
            summary.scanned += 1;
            match self.check(video_id, score).await {
                Ok(Drift::InSync) => {}
                Ok(Drift::Drifted) => drifted.push(video_id),
                Ok(Drift::VideoGone) => gone.push(video_id),
                Err(e) => {
                    summary.failed += 1;
                    warn!(video_id, error = %e, "Drift check failed");
                }
            }
        }

        summary.drifted = drifted.len() as u64;
        for video_id in drifted {
            match self.reconcile_video(video_id).await {
                Ok(_) => summary.repaired += 1,
                Err(e) => {
                    summary.failed += 1;
                    warn!(video_id, error = %e, "Reconciliation failed");
                }
            }
        }

        for video_id in gone {
            match self.cache.evict_video(video_id).await {
                Ok(()) => {
                    summary.evicted += 1;
                    info!(video_id, "Evicted likes of deleted video from cache");
                }
                Err(e) => {
                    summary.failed += 1;
                    warn!(video_id, error = %e, "Failed to evict deleted video");
                }
            }
        }

        info!(
            scanned = summary.scanned,
            drifted = summary.drifted,
            repaired = summary.repaired,
            evicted = summary.evicted,
            failed = summary.failed,
            "Reconciliation sweep finished"
        );
        Ok(summary)
    }

    /// `(video, score)` for every ranked video, then every video that has a
    /// membership set but no ranking entry (score 0).
    async fn collect_candidates(&self) -> ServiceResult<Vec<(i64, i64)>> {
        let mut candidates = Vec::new();
        let mut seen = HashSet::new();
        let mut offset = 0;

        loop {
            let page = self.cache.ranked_page(offset, self.batch_size).await?;
            let page_len = page.len();
            for (video_id, score) in page {
                if seen.insert(video_id) {
                    candidates.push((video_id, score));
                }
            }
            if page_len < self.batch_size {
                break;
            }
            offset += page_len;
        }

        let mut cursor = 0;
        loop {
            let (next, videos) = self
                .cache
                .scan_liked_videos(cursor, self.batch_size)
                .await?;
            for video_id in videos {
                if seen.insert(video_id) {
                    debug!(video_id, "Membership set without ranking entry");
                    candidates.push((video_id, 0));
                }
            }
            if next == 0 {
                break;
            }
            cursor = next;
        }

        Ok(candidates)
    }

    async fn check(&self, video_id: i64, score: i64) -> ServiceResult<Drift> {
        let Some(stored) = self.store.like_count(video_id).await? else {
            return Ok(Drift::VideoGone);
        };
        let members = self.cache.member_count(video_id).await?;
        if members != score || stored != score {
            Ok(Drift::Drifted)
        } else {
            Ok(Drift::InSync)
        }
    }
}

enum Drift {
    InSync,
    Drifted,
    VideoGone,
}
