//! Warm container pool
//!
//! Per-function cache of idle containers. The pool is pure bookkeeping
//! behind a single lock; every critical section is a pop, push or length
//! check. Docker-side destruction never happens under the lock: mutating
//! calls hand back the containers the caller must destroy.
//!
//! Containers are single-shot (the wrapper exits after one invocation), so
//! a pooled entry is a stopped container keeping the image extracted and
//! its resources allocated on the host. Warmth is image-warmth.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use bollard::Docker;
use parking_lot::Mutex;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::executor::container::force_remove;

/// An idle container parked in the pool
#[derive(Debug)]
pub struct PooledContainer {
    pub container_id: String,
    pub last_returned_at: Instant,
}

impl PooledContainer {
    pub fn new(container_id: String) -> Self {
        Self {
            container_id,
            last_returned_at: Instant::now(),
        }
    }
}

/// Per-function cache of idle containers with max-size and idle-timeout
/// eviction
pub struct ContainerPool {
    max_size: usize,
    idle_timeout: Duration,
    containers: Mutex<HashMap<i64, Vec<PooledContainer>>>,
}

impl ContainerPool {
    pub fn new(max_size: usize, idle_timeout: Duration) -> Self {
        Self {
            max_size,
            idle_timeout,
            containers: Mutex::new(HashMap::new()),
        }
    }

    /// Pop an idle container for this function. `None` means the caller
    /// creates a fresh one (cold start); acquisition never blocks on a slot.
    pub fn acquire(&self, function_id: i64) -> Option<PooledContainer> {
        let mut containers = self.containers.lock();

        let bucket = containers.get_mut(&function_id)?;
        let container = bucket.pop();

        if bucket.is_empty() {
            containers.remove(&function_id);
        }

        container
    }

    /// Return a container to the pool, stamped with now.
    ///
    /// `Err` hands the container back when the bucket is full; the caller
    /// must destroy it (outside this lock).
    pub fn release(
        &self,
        function_id: i64,
        mut container: PooledContainer,
    ) -> Result<(), PooledContainer> {
        let mut containers = self.containers.lock();
        let bucket = containers.entry(function_id).or_default();

        if bucket.len() >= self.max_size {
            return Err(container);
        }

        container.last_returned_at = Instant::now();
        bucket.push(container);
        Ok(())
    }

    /// Remove every container idle longer than the timeout, handing them
    /// back for destruction. Empty buckets are dropped.
    pub fn evict_idle(&self, now: Instant) -> Vec<PooledContainer> {
        let mut containers = self.containers.lock();
        let mut evicted = Vec::new();

        containers.retain(|_, bucket| {
            let mut kept = Vec::with_capacity(bucket.len());
            for container in bucket.drain(..) {
                if now.duration_since(container.last_returned_at) < self.idle_timeout {
                    kept.push(container);
                } else {
                    evicted.push(container);
                }
            }
            *bucket = kept;
            !bucket.is_empty()
        });

        evicted
    }

    /// Empty the pool, handing every container back for destruction
    pub fn drain(&self) -> Vec<PooledContainer> {
        let mut containers = self.containers.lock();
        containers
            .drain()
            .flat_map(|(_, bucket)| bucket)
            .collect()
    }

    /// Idle containers currently pooled for one function
    pub fn idle_count(&self, function_id: i64) -> usize {
        self.containers
            .lock()
            .get(&function_id)
            .map(|b| b.len())
            .unwrap_or(0)
    }

    /// Idle containers across all functions
    pub fn total_idle(&self) -> usize {
        self.containers.lock().values().map(|b| b.len()).sum()
    }
}

/// Background eviction actor: sweeps the pool on an interval, destroying
/// idle containers, and drains everything on shutdown.
pub fn spawn_eviction_task(
    pool: std::sync::Arc<ContainerPool>,
    docker: Docker,
    interval: Duration,
    shutdown: CancellationToken,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        ticker.tick().await; // skip the immediate tick

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => {
                    let drained = pool.drain();
                    info!("Pool shutdown, destroying {} pooled containers", drained.len());
                    for container in drained {
                        force_remove(&docker, &container.container_id).await;
                    }
                    return;
                }
                _ = ticker.tick() => {
                    let evicted = pool.evict_idle(Instant::now());
                    if !evicted.is_empty() {
                        debug!("Evicting {} idle containers", evicted.len());
                    }
                    for container in evicted {
                        force_remove(&docker, &container.container_id).await;
                    }
                }
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pool() -> ContainerPool {
        ContainerPool::new(2, Duration::from_secs(300))
    }

    #[test]
    fn test_acquire_empty_is_cold() {
        let pool = pool();
        assert!(pool.acquire(1).is_none());
    }

    #[test]
    fn test_release_then_acquire_is_warm() {
        let pool = pool();

        pool.release(1, PooledContainer::new("c1".into())).unwrap();
        assert_eq!(pool.idle_count(1), 1);

        let container = pool.acquire(1).unwrap();
        assert_eq!(container.container_id, "c1");
        assert_eq!(pool.idle_count(1), 0);
        assert!(pool.acquire(1).is_none());
    }

    #[test]
    fn test_release_respects_cap() {
        let pool = pool();

        pool.release(1, PooledContainer::new("c1".into())).unwrap();
        pool.release(1, PooledContainer::new("c2".into())).unwrap();

        let rejected = pool.release(1, PooledContainer::new("c3".into())).unwrap_err();
        assert_eq!(rejected.container_id, "c3");
        assert_eq!(pool.idle_count(1), 2);

        // Other functions have their own buckets
        pool.release(2, PooledContainer::new("c4".into())).unwrap();
        assert_eq!(pool.total_idle(), 3);
    }

    #[test]
    fn test_evict_idle() {
        let pool = ContainerPool::new(5, Duration::from_secs(300));

        pool.release(1, PooledContainer::new("old".into())).unwrap();
        pool.release(2, PooledContainer::new("also-old".into())).unwrap();

        // Nothing is idle long enough yet
        assert!(pool.evict_idle(Instant::now()).is_empty());

        // Jump past the idle timeout
        let later = Instant::now() + Duration::from_secs(301);
        let evicted = pool.evict_idle(later);
        assert_eq!(evicted.len(), 2);
        assert_eq!(pool.total_idle(), 0);

        // Buckets are gone, not just empty
        assert!(pool.acquire(1).is_none());
    }

    #[test]
    fn test_evict_keeps_fresh_entries() {
        let pool = ContainerPool::new(5, Duration::from_secs(300));
        let base = Instant::now();

        pool.release_raw(
            1,
            PooledContainer {
                container_id: "stale".into(),
                last_returned_at: base,
            },
        );
        pool.release_raw(
            1,
            PooledContainer {
                container_id: "fresh".into(),
                last_returned_at: base + Duration::from_secs(200),
            },
        );

        let evicted = pool.evict_idle(base + Duration::from_secs(301));
        assert_eq!(evicted.len(), 1);
        assert_eq!(evicted[0].container_id, "stale");
        assert_eq!(pool.idle_count(1), 1);
    }

    #[test]
    fn test_drain() {
        let pool = pool();

        pool.release(1, PooledContainer::new("c1".into())).unwrap();
        pool.release(2, PooledContainer::new("c2".into())).unwrap();

        let drained = pool.drain();
        assert_eq!(drained.len(), 2);
        assert_eq!(pool.total_idle(), 0);
    }
}

#[cfg(test)]
impl ContainerPool {
    /// Insert preserving the entry's timestamp (tests only)
    fn release_raw(&self, function_id: i64, container: PooledContainer) {
        self.containers
            .lock()
            .entry(function_id)
            .or_default()
            .push(container);
    }
}
