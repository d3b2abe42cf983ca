//! Background TTL eviction

use crate::cache::CacheStore;
use crate::types::DEFAULT_SWEEP_INTERVAL;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{interval, MissedTickBehavior};
use tracing::{debug, info, warn};

/// Periodically purges entries older than a fixed TTL from a [`CacheStore`].
///
/// The task runs until [`EvictionSweeper::stop`] is awaited or the sweeper is
/// dropped, whichever comes first.
pub struct EvictionSweeper {
    shutdown_tx: watch::Sender<bool>,
    handle: JoinHandle<()>,
}

impl EvictionSweeper {
    /// Spawn the sweep loop; must be called from within a tokio runtime.
    ///
    /// A zero `every` cannot drive an interval and is replaced by
    /// [`DEFAULT_SWEEP_INTERVAL`].
    pub fn start(store: Arc<CacheStore>, every: Duration, ttl: Duration) -> Self {
        let every = if every.is_zero() {
            warn!(
                fallback_secs = DEFAULT_SWEEP_INTERVAL.as_secs(),
                "Zero sweep interval, using the default"
            );
            DEFAULT_SWEEP_INTERVAL
        } else {
            every
        };
        let (shutdown_tx, mut shutdown_rx) = watch::channel(false);

        let handle = tokio::spawn(async move {
            let mut ticker = interval(every);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            // interval fires immediately; the first real pass is one period out
            ticker.tick().await;

            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        let removed = store.sweep(ttl);
                        if removed > 0 {
                            debug!(removed, remaining = store.len(), "Evicted stale cache entries");
                        }
                    }
                    changed = shutdown_rx.changed() => {
                        if changed.is_err() || *shutdown_rx.borrow() {
                            break;
                        }
                    }
                }
            }

            debug!("Eviction sweeper stopped");
        });

        info!(
            interval_secs = every.as_secs(),
            ttl_secs = ttl.as_secs(),
            "Eviction sweeper started"
        );

        Self {
            shutdown_tx,
            handle,
        }
    }

    /// Signal the loop to exit and wait for it
    pub async fn stop(self) {
        let _ = self.shutdown_tx.send(true);
        if let Err(e) = self.handle.await {
            warn!(error = %e, "Eviction sweeper task ended abnormally");
        }
    }

    pub fn is_running(&self) -> bool {
        !self.handle.is_finished()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{CacheKey, CachedEntry};
    use axum::body::Bytes;
    use axum::http::HeaderMap;

    fn put(store: &CacheStore, path: &str) {
        store.put(
            CacheKey::plain(path),
            CachedEntry::new(Bytes::from_static(b"hello"), HeaderMap::new()),
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_entry_present_before_ttl_and_gone_after_tick() {
        let store = Arc::new(CacheStore::new());
        let sweeper = EvictionSweeper::start(
            Arc::clone(&store),
            Duration::from_secs(60),
            Duration::from_secs(600),
        );

        put(&store, "/a.txt");

        // several ticks pass, entry still young
        tokio::time::sleep(Duration::from_secs(590)).await;
        assert!(store.contains(&CacheKey::plain("/a.txt")));

        // past the TTL and at least one tick later
        tokio::time::sleep(Duration::from_secs(75)).await;
        assert!(!store.contains(&CacheKey::plain("/a.txt")));

        sweeper.stop().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_zero_interval_falls_back_to_default() {
        let store = Arc::new(CacheStore::new());
        let sweeper = EvictionSweeper::start(
            Arc::clone(&store),
            Duration::ZERO,
            Duration::from_secs(1),
        );

        put(&store, "/a.txt");
        tokio::time::sleep(DEFAULT_SWEEP_INTERVAL + Duration::from_secs(5)).await;

        assert!(sweeper.is_running());
        assert!(!store.contains(&CacheKey::plain("/a.txt")));
        sweeper.stop().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_stop_ends_task() {
        let store = Arc::new(CacheStore::new());
        let sweeper = EvictionSweeper::start(
            Arc::clone(&store),
            Duration::from_secs(1),
            Duration::from_secs(1),
        );
        assert!(sweeper.is_running());

        sweeper.stop().await;

        // nothing sweeps any more
        put(&store, "/a.txt");
        tokio::time::sleep(Duration::from_secs(10)).await;
        assert!(store.contains(&CacheKey::plain("/a.txt")));
    }

    #[tokio::test(start_paused = true)]
    async fn test_drop_ends_task() {
        let store = Arc::new(CacheStore::new());
        let sweeper = EvictionSweeper::start(
            Arc::clone(&store),
            Duration::from_secs(1),
            Duration::from_secs(1),
        );
        drop(sweeper);

        put(&store, "/a.txt");
        tokio::time::sleep(Duration::from_secs(10)).await;
        assert!(store.contains(&CacheKey::plain("/a.txt")));
    }
}
