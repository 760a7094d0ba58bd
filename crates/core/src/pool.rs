use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use serde::Serialize;
use tokio::sync::Mutex;
use tokio::time;
use tracing::{debug, warn};

use crate::config::PoolConfig;
use crate::error::{Error, Result};
use crate::events::{Event, EventBus};
use crate::page_host::PageHost;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum HostState {
    Warming,
    Available,
    Acquired,
    Recycling,
    Disposed,
}

/// Pool bookkeeping wrapped around a live `PageHost`.
pub struct PoolEntry {
    pub host: Arc<dyn PageHost>,
    pub state: HostState,
    pub created_at: Instant,
    pub last_used: Instant,
    pub health_failures: u32,
    pub profile_id: Option<String>,
}

#[derive(Debug, Default, Serialize)]
pub struct PoolStatus {
    pub available: usize,
    pub acquired: usize,
    pub warming: usize,
    pub acquire_misses: u64,
}

pub type HostFactory = Arc<dyn Fn(String) -> Arc<dyn PageHost> + Send + Sync>;

/// Pre-warms, loans out, recycles, and disposes Page Hosts. The entry
/// map is the sole mutator of pool-entry state; acquire/recycle/dispose
/// are mutually exclusive per entry because they all run under the same
/// mutex.
pub struct WindowPool {
    config: Mutex<PoolConfig>,
    entries: Mutex<VecDeque<PoolEntry>>,
    factory: HostFactory,
    next_id: AtomicU64,
    acquire_misses: AtomicU64,
    events: EventBus,
    running: std::sync::atomic::AtomicBool,
}

impl WindowPool {
    pub fn new(config: PoolConfig, events: EventBus, factory: HostFactory) -> Arc<Self> {
        Arc::new(Self {
            config: Mutex::new(config),
            entries: Mutex::new(VecDeque::new()),
            factory,
            next_id: AtomicU64::new(1),
            acquire_misses: AtomicU64::new(0),
            events,
            running: std::sync::atomic::AtomicBool::new(false),
        })
    }

    fn new_host_id(&self) -> String {
        format!("host-{}", self.next_id.fetch_add(1, Ordering::SeqCst))
    }

    /// Starts the health-check ticker and asynchronously warms the pool
    /// to `min_pool_size`.
    pub async fn initialize(self: &Arc<Self>) -> Result<()> {
        self.running.store(true, Ordering::SeqCst);
        let min = self.config.lock().await.min_pool_size;
        self.warmup(min).await;

        let pool = Arc::clone(self);
        tokio::spawn(async move {
            loop {
                let interval_ms = pool.config.lock().await.health_check_interval_ms;
                time::sleep(Duration::from_millis(interval_ms)).await;
                if !pool.running.load(Ordering::SeqCst) {
                    break;
                }
                pool.health_check_tick().await;
            }
        });
        Ok(())
    }

    /// Adds up to `n` new entries, each transitioning warming -> available
    /// after `warmup_delay_ms` and a successful liveness probe.
    pub async fn warmup(self: &Arc<Self>, n: usize) {
        let delay = Duration::from_millis(self.config.lock().await.warmup_delay_ms);
        for _ in 0..n {
            let id = self.new_host_id();
            let host = (self.factory)(id.clone());
            {
                let mut entries = self.entries.lock().await;
                entries.push_back(PoolEntry {
                    host: Arc::clone(&host),
                    state: HostState::Warming,
                    created_at: Instant::now(),
                    last_used: Instant::now(),
                    health_failures: 0,
                    profile_id: None,
                });
            }
            time::sleep(delay).await;
            let mut entries = self.entries.lock().await;
            if let Some(entry) = entries.iter_mut().find(|e| e.host.id() == id) {
                if entry.host.is_alive() {
                    entry.state = HostState::Available;
                    entry.last_used = Instant::now();
                } else {
                    warn!(host_id = %id, "warmup liveness probe failed");
                    entry.state = HostState::Disposed;
                }
            }
        }
    }

    /// Picks any available entry (FIFO by `last_used`), transitions it to
    /// acquired, and returns the host. Never blocks.
    pub async fn acquire(&self) -> Option<Arc<dyn PageHost>> {
        let mut entries = self.entries.lock().await;
        let candidate = entries
            .iter()
            .enumerate()
            .filter(|(_, e)| e.state == HostState::Available)
            .min_by_key(|(_, e)| e.last_used)
            .map(|(i, _)| i);

        match candidate {
            Some(idx) => {
                let entry = &mut entries[idx];
                entry.state = HostState::Acquired;
                entry.last_used = Instant::now();
                let host = Arc::clone(&entry.host);
                self.events.publish(Event::WindowAcquired { host_id: host.id().to_string() });
                Some(host)
            }
            None => {
                self.acquire_misses.fetch_add(1, Ordering::SeqCst);
                None
            }
        }
    }

    /// Resets and returns a host to the pool, or disposes it if the pool
    /// is already at capacity of available entries.
    pub async fn recycle(&self, host: &Arc<dyn PageHost>) -> Result<bool> {
        if !host.is_alive() {
            return Ok(false);
        }
        let max = self.config.lock().await.max_pool_size;
        let mut entries = self.entries.lock().await;
        let idx = entries.iter().position(|e| e.host.id() == host.id());
        let Some(idx) = idx else { return Ok(false) };

        let available_count = entries.iter().filter(|e| e.state == HostState::Available).count();
        if available_count >= max {
            let entry = entries.remove(idx).unwrap();
            entry.host.close().await.ok();
            return Ok(false);
        }

        host.load_url("about:blank", crate::page_host::LoadOptions { wait_for_load: false })
            .await
            .ok();
        let entry = &mut entries[idx];
        entry.state = HostState::Available;
        entry.last_used = Instant::now();
        entry.health_failures = 0;
        entry.profile_id = None;
        self.events.publish(Event::WindowRecycled { host_id: host.id().to_string() });
        Ok(true)
    }

    /// Disposes every entry.
    pub async fn drain(&self) {
        let mut entries = self.entries.lock().await;
        for entry in entries.drain(..) {
            entry.host.close().await.ok();
        }
    }

    pub async fn status(&self) -> PoolStatus {
        let entries = self.entries.lock().await;
        PoolStatus {
            available: entries.iter().filter(|e| e.state == HostState::Available).count(),
            acquired: entries.iter().filter(|e| e.state == HostState::Acquired).count(),
            warming: entries.iter().filter(|e| e.state == HostState::Warming).count(),
            acquire_misses: self.acquire_misses.load(Ordering::SeqCst),
        }
    }

    pub async fn update_config(&self, config: PoolConfig) {
        *self.config.lock().await = config;
    }

    pub async fn cleanup(&self) {
        self.running.store(false, Ordering::SeqCst);
        self.drain().await;
    }

    async fn health_check_tick(&self) {
        let (max_failures, max_idle, min_pool) = {
            let cfg = self.config.lock().await;
            (cfg.max_health_failures, Duration::from_millis(cfg.max_idle_ms), cfg.min_pool_size)
        };
        let mut entries = self.entries.lock().await;
        let mut to_dispose = Vec::new();
        for (idx, entry) in entries.iter_mut().enumerate() {
            if entry.state == HostState::Disposed {
                continue;
            }
            if !entry.host.is_alive() {
                entry.health_failures += 1;
                if entry.health_failures >= max_failures {
                    to_dispose.push(idx);
                }
                continue;
            }
            let idle = entry.last_used.elapsed();
            let available_count = {
                let count = entries.iter().filter(|e| e.state == HostState::Available).count();
                count
            };
            if entry.state == HostState::Available && idle > max_idle && available_count > min_pool {
                to_dispose.push(idx);
            }
        }
        to_dispose.sort_unstable();
        for idx in to_dispose.into_iter().rev() {
            let entry = entries.remove(idx).unwrap();
            debug!(host_id = %entry.host.id(), "disposing entry after health check");
            entry.host.close().await.ok();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::page_host::NullPageHost;

    fn test_factory() -> HostFactory {
        Arc::new(|id| Arc::new(NullPageHost::new(id)) as Arc<dyn PageHost>)
    }

    #[tokio::test]
    async fn pool_lifecycle_scenario() {
        let cfg = PoolConfig {
            min_pool_size: 2,
            max_pool_size: 5,
            warmup_delay_ms: 1,
            ..Default::default()
        };
        let pool = WindowPool::new(cfg, EventBus::new(16), test_factory());
        pool.initialize().await.unwrap();

        let status = pool.status().await;
        assert_eq!(status.available, 2);

        let host = pool.acquire().await.expect("host available");
        let status = pool.status().await;
        assert_eq!(status.available, 1);
        assert_eq!(status.acquired, 1);

        let recycled = pool.recycle(&host).await.unwrap();
        assert!(recycled);
        let status = pool.status().await;
        assert_eq!(status.available, 2);

        pool.drain().await;
        let status = pool.status().await;
        assert_eq!(status.available, 0);

        pool.cleanup().await;
        pool.cleanup().await;
    }

    #[tokio::test]
    async fn acquire_on_empty_pool_returns_none_and_counts_miss() {
        let pool = WindowPool::new(PoolConfig::default(), EventBus::new(16), test_factory());
        assert!(pool.acquire().await.is_none());
        assert_eq!(pool.status().await.acquire_misses, 1);
    }

    #[tokio::test]
    async fn recycle_dead_host_returns_false() {
        let pool = WindowPool::new(
            PoolConfig { min_pool_size: 1, warmup_delay_ms: 1, ..Default::default() },
            EventBus::new(16),
            test_factory(),
        );
        pool.initialize().await.unwrap();
        let host = pool.acquire().await.unwrap();
        host.close().await.unwrap();
        let recycled = pool.recycle(&host).await.unwrap();
        assert!(!recycled);
    }

    #[tokio::test]
    async fn recycle_beyond_max_pool_size_disposes() {
        let cfg = PoolConfig { min_pool_size: 0, max_pool_size: 1, warmup_delay_ms: 1, ..Default::default() };
        let pool = WindowPool::new(cfg, EventBus::new(16), test_factory());
        pool.warmup(1).await;
        let entries_count = pool.entries.lock().await.len();
        assert_eq!(entries_count, 1);

        let host_a = pool.acquire().await.unwrap();
        pool.warmup(1).await;
        let host_b = pool.acquire().await.unwrap();

        assert!(pool.recycle(&host_a).await.unwrap());
        let recycled_b = pool.recycle(&host_b).await.unwrap();
        assert!(!recycled_b);
    }
}
