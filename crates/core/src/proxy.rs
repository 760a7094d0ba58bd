use std::collections::{HashMap, VecDeque};
use std::time::{Duration, Instant};

use rand::seq::SliceRandom;
use rand::Rng;
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;

use crate::error::{Error, Result};
use crate::events::{Event, EventBus};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProxyType {
    Http,
    Https,
    Socks4,
    Socks5,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProxyStatus {
    Healthy,
    Degraded,
    Unhealthy,
    Blacklisted,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum RotationStrategy {
    RoundRobin,
    Random,
    LeastUsed,
    Fastest,
    Weighted,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProxyCredentials {
    pub username: String,
    pub password: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProxyConfigEntry {
    pub id: String,
    pub proxy_type: ProxyType,
    pub credentials: Option<ProxyCredentials>,
    pub country: Option<String>,
    pub region: Option<String>,
    pub city: Option<String>,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default = "default_weight")]
    pub weight: u32,
    pub max_requests_per_minute: Option<u32>,
}

fn default_weight() -> u32 {
    1
}

#[derive(Debug, Clone, Serialize)]
pub struct Proxy {
    pub id: String,
    pub proxy_type: ProxyType,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub credentials: Option<ProxyCredentials>,
    pub country: Option<String>,
    pub region: Option<String>,
    pub city: Option<String>,
    pub tags: Vec<String>,
    pub weight: u32,
    pub status: ProxyStatus,
    pub success_count: u64,
    pub failure_count: u64,
    pub consecutive_failures: u32,
    #[serde(skip)]
    pub blacklisted_until: Option<Instant>,
    #[serde(skip)]
    pub response_time_history: VecDeque<u64>,
    pub average_response_time: f64,
    #[serde(skip)]
    pub request_timestamps: VecDeque<Instant>,
    pub max_requests_per_minute: Option<u32>,
}

impl Proxy {
    fn from_config(cfg: ProxyConfigEntry) -> Self {
        Self {
            id: cfg.id,
            proxy_type: cfg.proxy_type,
            credentials: cfg.credentials,
            country: cfg.country,
            region: cfg.region,
            city: cfg.city,
            tags: cfg.tags,
            weight: cfg.weight.max(1),
            status: ProxyStatus::Healthy,
            success_count: 0,
            failure_count: 0,
            consecutive_failures: 0,
            blacklisted_until: None,
            response_time_history: VecDeque::new(),
            average_response_time: 0.0,
            request_timestamps: VecDeque::new(),
            max_requests_per_minute: cfg.max_requests_per_minute,
        }
    }

    pub fn success_rate(&self) -> f64 {
        let total = self.success_count + self.failure_count;
        if total == 0 {
            1.0
        } else {
            self.success_count as f64 / total as f64
        }
    }

    fn is_blacklisted(&self) -> bool {
        matches!(self.status, ProxyStatus::Blacklisted)
            && self.blacklisted_until.map_or(true, |until| Instant::now() < until)
    }

    fn is_rate_limited(&self) -> bool {
        match self.max_requests_per_minute {
            None => false,
            Some(limit) => {
                let window_start = Instant::now() - Duration::from_secs(60);
                self.request_timestamps.iter().filter(|ts| **ts >= window_start).count()
                    >= limit as usize
            }
        }
    }

    pub fn is_available(&self) -> bool {
        matches!(self.status, ProxyStatus::Healthy | ProxyStatus::Degraded)
            && !self.is_blacklisted()
            && !self.is_rate_limited()
    }
}

#[derive(Debug, Default, Clone)]
pub struct ProxyFilter {
    pub country: Option<String>,
    pub proxy_type: Option<ProxyType>,
    pub tags: Vec<String>,
    pub min_success_rate: Option<f64>,
    pub max_response_time: Option<f64>,
}

impl ProxyFilter {
    fn matches(&self, proxy: &Proxy) -> bool {
        if let Some(country) = &self.country {
            if proxy.country.as_deref() != Some(country.as_str()) {
                return false;
            }
        }
        if let Some(t) = self.proxy_type {
            if proxy.proxy_type != t {
                return false;
            }
        }
        if !self.tags.is_empty() && !self.tags.iter().all(|t| proxy.tags.contains(t)) {
            return false;
        }
        if let Some(min) = self.min_success_rate {
            if proxy.success_rate() < min {
                return false;
            }
        }
        if let Some(max) = self.max_response_time {
            if proxy.average_response_time > max {
                return false;
            }
        }
        true
    }
}

struct Inner {
    proxies: HashMap<String, Proxy>,
    order: Vec<String>,
    strategy: RotationStrategy,
    round_robin_cursor: usize,
    auto_blacklist: bool,
    auto_blacklist_threshold: u32,
    auto_blacklist_duration: Duration,
    response_time_history_len: usize,
}

/// Proxy selection by strategy, health scoring, and blacklist lifecycle.
pub struct ProxyPool {
    inner: Mutex<Inner>,
    events: EventBus,
}

impl ProxyPool {
    pub fn new(config: &crate::config::ProxyConfig, events: EventBus) -> Self {
        let strategy = match config.default_strategy.as_str() {
            "random" => RotationStrategy::Random,
            "least-used" => RotationStrategy::LeastUsed,
            "fastest" => RotationStrategy::Fastest,
            "weighted" => RotationStrategy::Weighted,
            _ => RotationStrategy::RoundRobin,
        };
        Self {
            inner: Mutex::new(Inner {
                proxies: HashMap::new(),
                order: Vec::new(),
                strategy,
                round_robin_cursor: 0,
                auto_blacklist: config.auto_blacklist,
                auto_blacklist_threshold: config.auto_blacklist_threshold,
                auto_blacklist_duration: Duration::from_millis(config.auto_blacklist_duration_ms),
                response_time_history_len: config.response_time_history_len,
            }),
            events,
        }
    }

    pub async fn add_proxy(&self, cfg: ProxyConfigEntry) -> Result<Proxy> {
        let mut inner = self.inner.lock().await;
        if inner.proxies.contains_key(&cfg.id) {
            return Err(Error::already_exists("proxy", cfg.id));
        }
        let id = cfg.id.clone();
        let proxy = Proxy::from_config(cfg);
        inner.proxies.insert(id.clone(), proxy.clone());
        inner.order.push(id.clone());
        self.events.publish(Event::ProxyAdded { proxy_id: id });
        Ok(proxy)
    }

    pub async fn remove_proxy(&self, id: &str) -> Result<()> {
        let mut inner = self.inner.lock().await;
        if inner.proxies.remove(id).is_none() {
            return Err(Error::not_found("proxy", id));
        }
        inner.order.retain(|p| p != id);
        self.events.publish(Event::ProxyRemoved { proxy_id: id.to_string() });
        Ok(())
    }

    pub async fn set_rotation_strategy(&self, strategy: RotationStrategy) {
        let mut inner = self.inner.lock().await;
        inner.strategy = strategy;
        self.events.publish(Event::StrategyChanged { strategy: format!("{strategy:?}") });
    }

    pub async fn get_next_proxy(&self, filter: Option<ProxyFilter>) -> Result<Proxy> {
        let mut inner = self.inner.lock().await;
        let filter = filter.unwrap_or_default();
        let candidates: Vec<String> = inner
            .order
            .iter()
            .filter(|id| {
                let proxy = &inner.proxies[*id];
                proxy.is_available() && filter.matches(proxy)
            })
            .cloned()
            .collect();
        if candidates.is_empty() {
            return Err(Error::ProxyUnavailable);
        }

        let chosen = match inner.strategy {
            RotationStrategy::RoundRobin => {
                let idx = inner.round_robin_cursor % candidates.len();
                inner.round_robin_cursor = inner.round_robin_cursor.wrapping_add(1);
                candidates[idx].clone()
            }
            RotationStrategy::Random => {
                let mut rng = rand::thread_rng();
                candidates.choose(&mut rng).unwrap().clone()
            }
            RotationStrategy::LeastUsed => candidates
                .iter()
                .min_by_key(|id| {
                    let p = &inner.proxies[*id];
                    p.success_count + p.failure_count
                })
                .unwrap()
                .clone(),
            RotationStrategy::Fastest => {
                let with_data: Vec<&String> = candidates
                    .iter()
                    .filter(|id| !inner.proxies[*id].response_time_history.is_empty())
                    .collect();
                if with_data.is_empty() {
                    let mut rng = rand::thread_rng();
                    candidates.choose(&mut rng).unwrap().clone()
                } else {
                    with_data
                        .into_iter()
                        .min_by(|a, b| {
                            inner.proxies[*a]
                                .average_response_time
                                .total_cmp(&inner.proxies[*b].average_response_time)
                        })
                        .unwrap()
                        .clone()
                }
            }
            RotationStrategy::Weighted => {
                let total_weight: u32 = candidates.iter().map(|id| inner.proxies[id].weight).sum();
                let mut pick = rand::thread_rng().gen_range(0..total_weight.max(1));
                let mut chosen = candidates[0].clone();
                for id in &candidates {
                    let w = inner.proxies[id].weight;
                    if pick < w {
                        chosen = id.clone();
                        break;
                    }
                    pick -= w;
                }
                chosen
            }
        };

        Ok(inner.proxies[&chosen].clone())
    }

    pub async fn record_success(&self, id: &str, response_ms: u64) -> Result<()> {
        let mut inner = self.inner.lock().await;
        let history_len = inner.response_time_history_len;
        let proxy = inner.proxies.get_mut(id).ok_or_else(|| Error::not_found("proxy", id))?;
        proxy.success_count += 1;
        proxy.consecutive_failures = 0;
        proxy.request_timestamps.push_back(Instant::now());
        proxy.response_time_history.push_back(response_ms);
        if proxy.response_time_history.len() > history_len {
            proxy.response_time_history.pop_front();
        }
        let sum: u64 = proxy.response_time_history.iter().sum();
        proxy.average_response_time = sum as f64 / proxy.response_time_history.len() as f64;

        proxy.status = match proxy.status {
            ProxyStatus::Unhealthy => ProxyStatus::Degraded,
            ProxyStatus::Degraded => ProxyStatus::Healthy,
            other => other,
        };
        self.events.publish(Event::ProxySuccess { proxy_id: id.to_string(), response_ms });
        Ok(())
    }

    pub async fn record_failure(&self, id: &str, reason: &str) -> Result<()> {
        let (auto_blacklist, threshold, duration) = {
            let inner = self.inner.lock().await;
            (inner.auto_blacklist, inner.auto_blacklist_threshold, inner.auto_blacklist_duration)
        };
        let mut inner = self.inner.lock().await;
        let proxy = inner.proxies.get_mut(id).ok_or_else(|| Error::not_found("proxy", id))?;
        proxy.failure_count += 1;
        proxy.consecutive_failures += 1;
        if proxy.consecutive_failures >= 5 {
            proxy.status = ProxyStatus::Unhealthy;
        } else if proxy.consecutive_failures >= 3 {
            proxy.status = ProxyStatus::Degraded;
        }
        self.events.publish(Event::ProxyFailure { proxy_id: id.to_string(), reason: reason.to_string() });

        if auto_blacklist && proxy.consecutive_failures >= threshold {
            proxy.status = ProxyStatus::Blacklisted;
            proxy.blacklisted_until = Some(Instant::now() + duration);
            self.events.publish(Event::ProxyBlacklisted {
                proxy_id: id.to_string(),
                until_ms: duration.as_millis() as u64,
            });
        }
        Ok(())
    }

    pub async fn blacklist_proxy(&self, id: &str, duration_ms: u64, _reason: &str) -> Result<()> {
        let mut inner = self.inner.lock().await;
        let proxy = inner.proxies.get_mut(id).ok_or_else(|| Error::not_found("proxy", id))?;
        proxy.status = ProxyStatus::Blacklisted;
        proxy.blacklisted_until = Some(Instant::now() + Duration::from_millis(duration_ms));
        self.events.publish(Event::ProxyBlacklisted { proxy_id: id.to_string(), until_ms: duration_ms });
        Ok(())
    }

    pub async fn whitelist_proxy(&self, id: &str) -> Result<()> {
        let mut inner = self.inner.lock().await;
        let proxy = inner.proxies.get_mut(id).ok_or_else(|| Error::not_found("proxy", id))?;
        proxy.status = ProxyStatus::Healthy;
        proxy.blacklisted_until = None;
        proxy.consecutive_failures = 0;
        self.events.publish(Event::ProxyWhitelisted { proxy_id: id.to_string() });
        Ok(())
    }

    /// Liveness check routed through the proxy itself, reusing the same
    /// success/failure bookkeeping path as live traffic.
    pub async fn probe(&self, id: &str, target_url: &str) -> Result<()> {
        let proxy = {
            let inner = self.inner.lock().await;
            inner.proxies.get(id).cloned().ok_or_else(|| Error::not_found("proxy", id))?
        };
        let proxy_url = match &proxy.credentials {
            Some(creds) => format!(
                "{}://{}:{}@{}",
                proxy_scheme(proxy.proxy_type),
                creds.username,
                creds.password,
                id
            ),
            None => format!("{}://{}", proxy_scheme(proxy.proxy_type), id),
        };
        let client = match reqwest::Proxy::all(&proxy_url).and_then(|p| {
            reqwest::Client::builder().proxy(p).timeout(Duration::from_secs(10)).build()
        }) {
            Ok(client) => client,
            Err(e) => {
                self.record_failure(id, &e.to_string()).await?;
                return Err(Error::ProxyUnavailable);
            }
        };
        let start = Instant::now();
        match client.get(target_url).send().await {
            Ok(_) => {
                self.record_success(id, start.elapsed().as_millis() as u64).await?;
                Ok(())
            }
            Err(e) => {
                self.record_failure(id, &e.to_string()).await?;
                Err(Error::ProxyUnavailable)
            }
        }
    }

    pub async fn clear(&self) {
        let mut inner = self.inner.lock().await;
        inner.proxies.clear();
        inner.order.clear();
        self.events.publish(Event::PoolCleared);
    }

    pub async fn list(&self) -> Vec<Proxy> {
        let inner = self.inner.lock().await;
        inner.order.iter().filter_map(|id| inner.proxies.get(id)).cloned().collect()
    }
}

fn proxy_scheme(t: ProxyType) -> &'static str {
    match t {
        ProxyType::Http => "http",
        ProxyType::Https => "https",
        ProxyType::Socks4 => "socks4",
        ProxyType::Socks5 => "socks5",
    }
}

impl Clone for Proxy {
    fn clone(&self) -> Self {
        Self {
            id: self.id.clone(),
            proxy_type: self.proxy_type,
            credentials: self.credentials.clone(),
            country: self.country.clone(),
            region: self.region.clone(),
            city: self.city.clone(),
            tags: self.tags.clone(),
            weight: self.weight,
            status: self.status,
            success_count: self.success_count,
            failure_count: self.failure_count,
            consecutive_failures: self.consecutive_failures,
            blacklisted_until: self.blacklisted_until,
            response_time_history: self.response_time_history.clone(),
            average_response_time: self.average_response_time,
            request_timestamps: self.request_timestamps.clone(),
            max_requests_per_minute: self.max_requests_per_minute,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cfg(id: &str) -> ProxyConfigEntry {
        ProxyConfigEntry {
            id: id.to_string(),
            proxy_type: ProxyType::Http,
            credentials: None,
            country: None,
            region: None,
            city: None,
            tags: vec![],
            weight: 1,
            max_requests_per_minute: None,
        }
    }

    #[tokio::test]
    async fn five_consecutive_failures_marks_unhealthy() {
        let pool = ProxyPool::new(&crate::config::ProxyConfig { auto_blacklist: false, ..Default::default() }, EventBus::new(16));
        pool.add_proxy(cfg("p1")).await.unwrap();
        for _ in 0..5 {
            pool.record_failure("p1", "timeout").await.unwrap();
        }
        let proxy = pool.get_next_proxy(None).await;
        assert!(proxy.is_err());
    }

    #[tokio::test]
    async fn duplicate_proxy_id_rejected() {
        let pool = ProxyPool::new(&crate::config::ProxyConfig::default(), EventBus::new(16));
        pool.add_proxy(cfg("p1")).await.unwrap();
        let err = pool.add_proxy(cfg("p1")).await;
        assert!(matches!(err, Err(Error::AlreadyExists { .. })));
    }

    #[tokio::test]
    async fn success_rate_defaults_to_one_when_unused() {
        let pool = ProxyPool::new(&crate::config::ProxyConfig::default(), EventBus::new(16));
        let proxy = pool.add_proxy(cfg("p1")).await.unwrap();
        assert_eq!(proxy.success_rate(), 1.0);
    }

    #[tokio::test]
    async fn get_next_proxy_errors_when_none_available() {
        let pool = ProxyPool::new(&crate::config::ProxyConfig::default(), EventBus::new(16));
        let err = pool.get_next_proxy(None).await;
        assert!(matches!(err, Err(Error::ProxyUnavailable)));
    }
}
