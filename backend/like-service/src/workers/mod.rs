pub mod persistence_worker;
pub mod reconcile_worker;
pub mod redis_health;

pub use persistence_worker::{PersistenceWorker, WorkerOutcome};

/// Stable per-process consumer name, so a restarted worker picks up its own
/// pending entries before anyone has to claim them.
pub fn consumer_name(prefix: &str, worker_id: usize) -> String {
    format!("{}-worker-{}", prefix, worker_id)
}
