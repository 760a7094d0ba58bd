use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tokio::time;
use tracing::warn;

use crate::error::{Error, Result};
use crate::events::{Event, EventBus, ResourceKind};
use crate::page_host::{LoadOptions, PageHost};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProfileName {
    Stealth,
    Balanced,
    Aggressive,
    Single,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct Profile {
    pub max_pages: usize,
    pub max_navs: usize,
    pub min_nav_delay_ms: u64,
    pub domain_delay_ms: u64,
    pub monitoring: bool,
    pub max_memory_mb: u64,
    pub max_cpu_percent: f64,
}

pub fn profile_for(name: ProfileName) -> Profile {
    match name {
        ProfileName::Stealth => Profile {
            max_pages: 2,
            max_navs: 1,
            min_nav_delay_ms: 3000,
            domain_delay_ms: 5000,
            monitoring: true,
            max_memory_mb: 512,
            max_cpu_percent: 40.0,
        },
        ProfileName::Balanced => Profile {
            max_pages: 5,
            max_navs: 3,
            min_nav_delay_ms: 500,
            domain_delay_ms: 1000,
            monitoring: true,
            max_memory_mb: 1024,
            max_cpu_percent: 60.0,
        },
        ProfileName::Aggressive => Profile {
            max_pages: 10,
            max_navs: 5,
            min_nav_delay_ms: 0,
            domain_delay_ms: 200,
            monitoring: true,
            max_memory_mb: 2048,
            max_cpu_percent: 85.0,
        },
        ProfileName::Single => {
            Profile { max_pages: 1, max_navs: 1, min_nav_delay_ms: 0, domain_delay_ms: 0, monitoring: false, max_memory_mb: 512, max_cpu_percent: 100.0 }
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct Page {
    pub page_id: String,
    pub host_id: String,
    pub url: Option<String>,
    pub title: Option<String>,
    pub loading: bool,
    pub created_at_ms: u64,
    pub metadata: HashMap<String, String>,
}

#[derive(Debug, Default, Clone, Serialize)]
pub struct ResourceStats {
    pub current_memory_mb: f64,
    pub peak_memory_mb: f64,
    pub current_cpu_percent: f64,
    pub peak_cpu_percent: f64,
    pub checks_performed: u64,
    pub threshold_exceeded: bool,
}

/// Samples memory/CPU; pluggable so tests never depend on real OS
/// metrics. The monitor's shape (current/peak/checks/threshold) is
/// normative, the sampling mechanism is not.
pub trait ResourceSampler: Send + Sync {
    fn sample(&self) -> (f64, f64);
}

pub struct ProcSampler;

impl ResourceSampler for ProcSampler {
    #[cfg(target_os = "linux")]
    fn sample(&self) -> (f64, f64) {
        let mem_kb = std::fs::read_to_string("/proc/self/status")
            .ok()
            .and_then(|s| {
                s.lines()
                    .find(|l| l.starts_with("VmRSS:"))
                    .and_then(|l| l.split_whitespace().nth(1))
                    .and_then(|v| v.parse::<f64>().ok())
            })
            .unwrap_or(0.0);
        (mem_kb / 1024.0, 0.0)
    }

    #[cfg(not(target_os = "linux"))]
    fn sample(&self) -> (f64, f64) {
        (0.0, 0.0)
    }
}

/// One monitor per navigation profile, per Open Question 1 in
/// DESIGN.md. Disabled monitors always report healthy.
pub struct ResourceMonitor {
    sampler: Box<dyn ResourceSampler>,
    profile: Profile,
    stats: Mutex<ResourceStats>,
    events: EventBus,
}

impl ResourceMonitor {
    pub fn new(profile: Profile, sampler: Box<dyn ResourceSampler>, events: EventBus) -> Self {
        Self { sampler, profile, stats: Mutex::new(ResourceStats::default()), events }
    }

    pub async fn tick(&self) {
        if !self.profile.monitoring {
            return;
        }
        let (mem, cpu) = self.sampler.sample();
        let mut stats = self.stats.lock().await;
        stats.current_memory_mb = mem;
        stats.current_cpu_percent = cpu;
        stats.peak_memory_mb = stats.peak_memory_mb.max(mem);
        stats.peak_cpu_percent = stats.peak_cpu_percent.max(cpu);
        stats.checks_performed += 1;

        let exceeded = mem > self.profile.max_memory_mb as f64 || cpu > self.profile.max_cpu_percent;
        if exceeded && !stats.threshold_exceeded {
            if mem > self.profile.max_memory_mb as f64 {
                self.events.publish(Event::ThresholdExceeded {
                    resource: ResourceKind::Memory,
                    current: mem,
                    limit: self.profile.max_memory_mb as f64,
                });
            } else {
                self.events.publish(Event::ThresholdExceeded {
                    resource: ResourceKind::Cpu,
                    current: cpu,
                    limit: self.profile.max_cpu_percent,
                });
            }
        }
        stats.threshold_exceeded = exceeded;
    }

    pub async fn is_healthy(&self) -> bool {
        if !self.profile.monitoring {
            return true;
        }
        !self.stats.lock().await.threshold_exceeded
    }

    pub async fn stats(&self) -> ResourceStats {
        self.stats.lock().await.clone()
    }
}

struct DomainState {
    last_navigation: Option<Instant>,
}

struct Inner {
    pages: HashMap<String, Page>,
    active_page_id: Option<String>,
    page_hosts: HashMap<String, Arc<dyn PageHost>>,
    domains: HashMap<String, DomainState>,
    active_navigations: usize,
    rate_limit_delays: u64,
    navigations_failed: u64,
    shutdown: bool,
}

/// Concurrency-limited page lifecycle, per-domain politeness, and
/// resource-aware admission over a set of pages loaned from the Window
/// Pool.
pub struct MultiPageManager {
    inner: Mutex<Inner>,
    profile: Profile,
    monitor: Arc<ResourceMonitor>,
    events: EventBus,
    next_page_id: AtomicU64,
}

impl MultiPageManager {
    pub fn new(profile: Profile, monitor: Arc<ResourceMonitor>, events: EventBus) -> Self {
        Self {
            inner: Mutex::new(Inner {
                pages: HashMap::new(),
                active_page_id: None,
                page_hosts: HashMap::new(),
                domains: HashMap::new(),
                active_navigations: 0,
                rate_limit_delays: 0,
                navigations_failed: 0,
                shutdown: false,
            }),
            profile,
            monitor,
            events,
            next_page_id: AtomicU64::new(1),
        }
    }

    pub async fn create_page(
        &self,
        host: Arc<dyn PageHost>,
        metadata: HashMap<String, String>,
    ) -> Result<String> {
        let mut inner = self.inner.lock().await;
        if inner.pages.len() >= self.profile.max_pages {
            return Err(Error::LimitExceeded("maxConcurrentPages".into()));
        }
        if !self.monitor.is_healthy().await {
            return Err(Error::ResourceExhausted("memory or cpu limit exceeded".into()));
        }

        let page_id = format!("page-{}", self.next_page_id.fetch_add(1, Ordering::SeqCst));
        let page = Page {
            page_id: page_id.clone(),
            host_id: host.id().to_string(),
            url: None,
            title: None,
            loading: false,
            created_at_ms: now_ms(),
            metadata,
        };
        let first_page = inner.pages.is_empty();
        inner.page_hosts.insert(page_id.clone(), host);
        inner.pages.insert(page_id.clone(), page);
        if first_page {
            inner.active_page_id = Some(page_id.clone());
        }
        Ok(page_id)
    }

    pub async fn destroy_page(&self, page_id: &str) -> Result<()> {
        let mut inner = self.inner.lock().await;
        inner.pages.remove(page_id).ok_or_else(|| Error::not_found("page", page_id))?;
        inner.page_hosts.remove(page_id);
        if inner.active_page_id.as_deref() == Some(page_id) {
            inner.active_page_id = None;
        }
        // `navigate_page`'s own poll loop and post-load check observe the
        // missing page on their next lock acquisition and resolve with
        // PageGone; nothing further to drain here.
        Ok(())
    }

    pub async fn set_active_page(&self, page_id: &str) -> Result<()> {
        let mut inner = self.inner.lock().await;
        if !inner.pages.contains_key(page_id) {
            return Err(Error::not_found("page", page_id));
        }
        inner.active_page_id = Some(page_id.to_string());
        Ok(())
    }

    pub async fn list_pages(&self) -> Vec<Page> {
        self.inner.lock().await.pages.values().cloned().collect()
    }

    pub async fn get_page(&self, page_id: &str) -> Result<Page> {
        self.inner.lock().await.pages.get(page_id).cloned().ok_or_else(|| Error::not_found("page", page_id))
    }

    pub async fn close_all_pages(&self) -> Result<()> {
        let ids: Vec<String> = self.inner.lock().await.pages.keys().cloned().collect();
        for id in ids {
            self.destroy_page(&id).await?;
        }
        Ok(())
    }

    pub async fn close_other_pages(&self, keep: &[String]) -> Result<()> {
        let ids: Vec<String> = {
            let inner = self.inner.lock().await;
            inner.pages.keys().filter(|id| !keep.contains(id)).cloned().collect()
        };
        for id in ids {
            self.destroy_page(&id).await?;
        }
        Ok(())
    }

    fn domain_of(url: &str) -> String {
        url.split("://").nth(1).and_then(|rest| rest.split('/').next()).unwrap_or(url).to_string()
    }

    /// Navigation runs immediately if under the concurrency cap and the
    /// domain's politeness delay has elapsed; otherwise it polls until
    /// both clear. A page destroyed at any point after this call is
    /// admitted — while still waiting, or while the host call is in
    /// flight — resolves the navigation with `PageGone` rather than
    /// whatever the host call happened to return, since the page it
    /// would have applied the result to no longer exists.
    pub async fn navigate_page(&self, page_id: &str, url: &str) -> Result<()> {
        let domain = Self::domain_of(url);
        {
            let inner = self.inner.lock().await;
            if !inner.pages.contains_key(page_id) {
                return Err(Error::not_found("page", page_id));
            }
        }
        loop {
            {
                let mut inner = self.inner.lock().await;
                if inner.shutdown {
                    return Err(Error::Shutdown);
                }
                if !inner.pages.contains_key(page_id) {
                    return Err(Error::PageGone(page_id.to_string()));
                }
                let can_run = inner.active_navigations < self.profile.max_navs
                    && inner
                        .domains
                        .get(&domain)
                        .and_then(|d| d.last_navigation)
                        .map_or(true, |last| last.elapsed() >= Duration::from_millis(self.profile.domain_delay_ms));

                if can_run {
                    inner.active_navigations += 1;
                    inner.domains.entry(domain.clone()).or_insert(DomainState { last_navigation: None }).last_navigation =
                        Some(Instant::now());
                    break;
                }
            }

            let delay = self.profile.domain_delay_ms;
            self.events.publish(Event::RateLimitDelay { domain: domain.clone(), delay_ms: delay });
            {
                let mut inner = self.inner.lock().await;
                inner.rate_limit_delays += 1;
            }
            time::sleep(Duration::from_millis(delay.max(10))).await;
        }

        let host = {
            let inner = self.inner.lock().await;
            inner.page_hosts.get(page_id).cloned()
        };
        let result = match host {
            Some(host) => host.load_url(url, LoadOptions { wait_for_load: true }).await,
            None => Err(Error::PageGone(page_id.to_string())),
        };

        let mut inner = self.inner.lock().await;
        inner.active_navigations = inner.active_navigations.saturating_sub(1);
        if !inner.pages.contains_key(page_id) {
            return Err(Error::PageGone(page_id.to_string()));
        }
        if let Some(page) = inner.pages.get_mut(page_id) {
            page.url = Some(url.to_string());
            page.loading = false;
        }
        if result.is_err() {
            inner.navigations_failed += 1;
        }
        result
    }

    pub async fn get_host(&self, page_id: &str) -> Result<Arc<dyn PageHost>> {
        let inner = self.inner.lock().await;
        inner.page_hosts.get(page_id).cloned().ok_or_else(|| Error::not_found("page", page_id))
    }

    pub async fn execute_on_page(&self, page_id: &str, code: &str) -> Result<serde_json::Value> {
        let host = {
            let inner = self.inner.lock().await;
            inner.page_hosts.get(page_id).cloned().ok_or_else(|| Error::not_found("page", page_id))?
        };
        host.evaluate(code, serde_json::Value::Null).await
    }

    pub async fn get_page_screenshot(&self, page_id: &str) -> Result<Vec<u8>> {
        let host = {
            let inner = self.inner.lock().await;
            inner.page_hosts.get(page_id).cloned().ok_or_else(|| Error::not_found("page", page_id))?
        };
        host.capture(crate::page_host::CaptureOptions::default()).await
    }

    pub async fn shutdown(&self) {
        let mut inner = self.inner.lock().await;
        inner.shutdown = true;
        inner.queue.clear();
        inner.domains.clear();
    }

    pub async fn navigations_failed(&self) -> u64 {
        self.inner.lock().await.navigations_failed
    }

    pub async fn rate_limit_delays(&self) -> u64 {
        self.inner.lock().await.rate_limit_delays
    }
}

fn now_ms() -> u64 {
    chrono::Utc::now().timestamp_millis() as u64
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::page_host::NullPageHost;

    fn test_monitor(profile: Profile) -> Arc<ResourceMonitor> {
        Arc::new(ResourceMonitor::new(profile, Box::new(ProcSampler), EventBus::new(16)))
    }

    #[tokio::test]
    async fn create_page_enforces_limit_exceeded() {
        let profile = profile_for(ProfileName::Single);
        let manager = MultiPageManager::new(profile, test_monitor(profile), EventBus::new(16));
        manager.create_page(Arc::new(NullPageHost::new("h1")), HashMap::new()).await.unwrap();
        let err = manager.create_page(Arc::new(NullPageHost::new("h2")), HashMap::new()).await;
        assert!(matches!(err, Err(Error::LimitExceeded(_))));
    }

    #[tokio::test]
    async fn first_page_becomes_active() {
        let profile = profile_for(ProfileName::Balanced);
        let manager = MultiPageManager::new(profile, test_monitor(profile), EventBus::new(16));
        let id = manager.create_page(Arc::new(NullPageHost::new("h1")), HashMap::new()).await.unwrap();
        let inner = manager.inner.lock().await;
        assert_eq!(inner.active_page_id.as_deref(), Some(id.as_str()));
    }

    #[tokio::test]
    async fn destroy_page_during_in_flight_navigation_resolves_page_gone() {
        let profile = profile_for(ProfileName::Balanced);
        let manager = Arc::new(MultiPageManager::new(profile, test_monitor(profile), EventBus::new(16)));
        let id = manager.create_page(Arc::new(NullPageHost::new("h1")), HashMap::new()).await.unwrap();
        // Primes the domain's politeness delay so the second navigation
        // below parks in the poll loop instead of running immediately.
        manager.navigate_page(&id, "https://example.com/a").await.unwrap();

        let manager2 = Arc::clone(&manager);
        let id2 = id.clone();
        let parked = tokio::spawn(async move { manager2.navigate_page(&id2, "https://example.com/b").await });

        time::sleep(Duration::from_millis(50)).await;
        manager.destroy_page(&id).await.unwrap();

        let result = parked.await.unwrap();
        assert!(matches!(result, Err(Error::PageGone(_))));
    }

    #[tokio::test]
    async fn navigation_after_shutdown_rejects() {
        let profile = profile_for(ProfileName::Balanced);
        let manager = MultiPageManager::new(profile, test_monitor(profile), EventBus::new(16));
        let id = manager.create_page(Arc::new(NullPageHost::new("h1")), HashMap::new()).await.unwrap();
        manager.shutdown().await;
        let err = manager.navigate_page(&id, "https://example.com").await;
        assert!(matches!(err, Err(Error::Shutdown)));
    }

    #[tokio::test]
    async fn disabled_monitoring_profile_is_always_healthy() {
        let profile = profile_for(ProfileName::Single);
        let monitor = test_monitor(profile);
        monitor.tick().await;
        assert!(monitor.is_healthy().await);
    }
}
