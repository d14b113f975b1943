use anyhow::Result;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::MissedTickBehavior;
use tracing::{info, warn};

use crate::services::Reconciler;

/// Run a reconciliation sweep every `interval` until shutdown.
pub async fn run(
    reconciler: Arc<Reconciler>,
    interval: Duration,
    mut shutdown: watch::Receiver<bool>,
) -> Result<()> {
    info!(interval_secs = interval.as_secs(), "Starting reconciliation worker");

    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    // First tick fires immediately; skip it so startup is not a full sweep.
    ticker.tick().await;

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                if let Err(e) = reconciler.sweep().await {
                    warn!(error = %e, "Reconciliation sweep aborted");
                }
            }
            changed = shutdown.changed() => {
                if changed.is_err() || *shutdown.borrow() {
                    break;
                }
            }
        }
    }

    info!("Reconciliation worker stopped");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{FakeCache, InMemoryLikeStore};

    #[tokio::test(start_paused = true)]
    async fn test_sweeps_on_interval_and_stops() {
        let cache = Arc::new(FakeCache::default());
        let store = Arc::new(InMemoryLikeStore::default().with_video(42));
        cache.insert_member(42, 1);
        cache.set_score(42, 1);

        let reconciler = Arc::new(Reconciler::new(cache.clone(), store.clone(), 50));
        let (tx, rx) = watch::channel(false);
        let handle = tokio::spawn(run(reconciler, Duration::from_secs(60), rx));

        tokio::time::sleep(Duration::from_secs(61)).await;
        assert_eq!(store.count_of(42), Some(1));

        tx.send(true).unwrap();
        handle.await.unwrap().unwrap();
    }
}
