use prometheus::{IntCounter, IntCounterVec};

lazy_static::lazy_static! {
    /// Like/unlike/toggle requests by action and outcome (applied, idempotent, error)
    pub static ref LIKE_REQUESTS_TOTAL: IntCounterVec = prometheus::register_int_counter_vec!(
        "like_requests_total",
        "Like write requests handled by the coordinator",
        &["action", "outcome"]
    ).unwrap();

    pub static ref RELAY_PUBLISH_FAILURES_TOTAL: IntCounter = prometheus::register_int_counter!(
        "like_relay_publish_failures_total",
        "Delta events that could not be published after a cache mutation"
    ).unwrap();

    /// Membership undo after a failed score adjustment, by result (ok, failed)
    pub static ref CACHE_COMPENSATIONS_TOTAL: IntCounterVec = prometheus::register_int_counter_vec!(
        "like_cache_compensations_total",
        "Membership changes undone because the score adjustment failed",
        &["result"]
    ).unwrap();

    pub static ref WORKER_MESSAGES_TOTAL: IntCounterVec = prometheus::register_int_counter_vec!(
        "like_worker_messages_total",
        "Relay messages settled by persistence workers",
        &["outcome"]
    ).unwrap();

    pub static ref RECONCILED_VIDEOS_TOTAL: IntCounter = prometheus::register_int_counter!(
        "like_reconciled_videos_total",
        "Videos whose cache or store state was changed by reconciliation"
    ).unwrap();
}
