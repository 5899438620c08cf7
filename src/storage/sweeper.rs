use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

use super::retention::RetentionPolicy;
use super::template::ImageStore;

/// Spawns the periodic expiry sweep.
///
/// The first sweep runs one full interval after startup. Failures are
/// logged and the next tick carries on regardless.
pub fn spawn(
    storage: Arc<dyn ImageStore>,
    policy: RetentionPolicy,
    every: Duration,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(every);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

        // The first tick completes immediately.
        interval.tick().await;

        loop {
            interval.tick().await;
            run_once(storage.as_ref(), &policy).await;
        }
    })
}

pub async fn run_once(storage: &dyn ImageStore, policy: &RetentionPolicy) {
    match storage.sweep_expired(policy, Utc::now()).await {
        Ok(0) => debug!("Expiry sweep found nothing to purge"),
        Ok(purged) => info!("Expiry sweep purged {} images", purged),
        Err(e) => error!("Expiry sweep failed: {}", e),
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::Ordering;

    use bytes::Bytes;

    use super::*;
    use crate::storage::testing::FaultyStore;

    #[tokio::test]
    async fn sweep_errors_are_swallowed() {
        let store = FaultyStore::new("cat.png", Bytes::from_static(b"meow"));

        run_once(&store, &RetentionPolicy::default()).await;
        run_once(&store, &RetentionPolicy::default()).await;

        assert_eq!(store.sweeps.load(Ordering::SeqCst), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn scheduled_sweeps_survive_failures() {
        let store = Arc::new(FaultyStore::new("cat.png", Bytes::from_static(b"meow")));
        let handle = spawn(store.clone(), RetentionPolicy::default(), Duration::from_secs(60));

        tokio::time::sleep(Duration::from_secs(185)).await;
        assert_eq!(store.sweeps.load(Ordering::SeqCst), 3);
        assert!(!handle.is_finished());

        handle.abort();
    }
}
