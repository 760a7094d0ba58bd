use std::collections::HashMap;
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;

use crate::error::Result;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SockPuppet {
    pub id: String,
    #[serde(rename = "type")]
    pub entity_type: String,
    pub name: String,
    pub fingerprint_config: Option<serde_json::Value>,
    pub proxy_config: Option<serde_json::Value>,
    pub user_agent: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct PuppetSession {
    pub profile_id: String,
    pub puppet_id: String,
    pub started_at_ms: u64,
    pub ended_at_ms: Option<u64>,
}

impl PuppetSession {
    pub fn duration_ms(&self) -> Option<u64> {
        self.ended_at_ms.map(|end| end.saturating_sub(self.started_at_ms))
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ActivityEntry {
    pub profile_id: String,
    pub activity_type: String,
    pub timestamp_ms: u64,
    pub details: Option<String>,
}

struct CacheEntry {
    puppet: SockPuppet,
    fetched_at: Instant,
}

struct Inner {
    cache: HashMap<String, CacheEntry>,
    profile_links: HashMap<String, (String, String)>,
    sessions: Vec<PuppetSession>,
    activity: Vec<ActivityEntry>,
}

/// Links local browser profiles to an external identity store: caches
/// puppet records, tracks sessions/activity, and flags fingerprint
/// inconsistencies.
pub struct SockPuppetClient {
    http: reqwest::Client,
    base_url: String,
    cache_timeout: Duration,
    inner: Mutex<Inner>,
}

impl SockPuppetClient {
    pub fn new(config: &crate::config::IdentityConfig) -> Self {
        Self {
            http: reqwest::Client::new(),
            base_url: config.base_url.clone(),
            cache_timeout: Duration::from_millis(config.cache_timeout_ms),
            inner: Mutex::new(Inner {
                cache: HashMap::new(),
                profile_links: HashMap::new(),
                sessions: Vec::new(),
                activity: Vec::new(),
            }),
        }
    }

    pub async fn get_entity(&self, id: &str, force_refresh: bool) -> Result<SockPuppet> {
        if !force_refresh {
            let inner = self.inner.lock().await;
            if let Some(entry) = inner.cache.get(id) {
                if entry.fetched_at.elapsed() < self.cache_timeout {
                    return Ok(entry.puppet.clone());
                }
            }
        }

        let url = format!("{}/api/v1/entities/{}", self.base_url, id);
        let puppet: SockPuppet = self.http.get(&url).send().await?.json().await?;

        let mut inner = self.inner.lock().await;
        inner.cache.insert(id.to_string(), CacheEntry { puppet: puppet.clone(), fetched_at: Instant::now() });
        Ok(puppet)
    }

    pub async fn post_credentials(&self, id: &str, fields: Vec<String>) -> Result<()> {
        let url = format!("{}/api/v1/entities/{}/credentials", self.base_url, id);
        self.http.post(&url).json(&serde_json::json!({ "fields": fields })).send().await?;
        Ok(())
    }

    pub async fn search_entities(&self, query: &str) -> Result<Vec<SockPuppet>> {
        let url = format!("{}/api/v1/entities?type=SOCK_PUPPET&search={}", self.base_url, query);
        let puppets: Vec<SockPuppet> = self.http.get(&url).send().await?.json().await?;
        Ok(puppets)
    }

    /// Updates the profile's metadata with `{sockPuppetId, sockPuppetName}`.
    pub async fn link_profile_to_sock_puppet(&self, profile_id: &str, puppet: &SockPuppet) {
        let mut inner = self.inner.lock().await;
        inner.profile_links.insert(profile_id.to_string(), (puppet.id.clone(), puppet.name.clone()));
    }

    pub async fn linked_puppet(&self, profile_id: &str) -> Option<(String, String)> {
        self.inner.lock().await.profile_links.get(profile_id).cloned()
    }

    pub async fn start_session(&self, profile_id: &str, puppet_id: &str) {
        let mut inner = self.inner.lock().await;
        inner.sessions.push(PuppetSession {
            profile_id: profile_id.to_string(),
            puppet_id: puppet_id.to_string(),
            started_at_ms: now_ms(),
            ended_at_ms: None,
        });
    }

    pub async fn end_session(&self, profile_id: &str) {
        let mut inner = self.inner.lock().await;
        if let Some(session) = inner.sessions.iter_mut().rev().find(|s| s.profile_id == profile_id && s.ended_at_ms.is_none()) {
            session.ended_at_ms = Some(now_ms());
        }
    }

    pub async fn record_activity(&self, profile_id: &str, activity_type: &str, details: Option<String>) {
        let mut inner = self.inner.lock().await;
        inner.activity.push(ActivityEntry {
            profile_id: profile_id.to_string(),
            activity_type: activity_type.to_string(),
            timestamp_ms: now_ms(),
            details,
        });
    }

    pub async fn activity(&self, activity_type: Option<&str>) -> Vec<ActivityEntry> {
        let inner = self.inner.lock().await;
        inner
            .activity
            .iter()
            .filter(|a| activity_type.map_or(true, |t| a.activity_type == t))
            .cloned()
            .collect()
    }

    /// Flags a mismatch between the profile's declared platform and the
    /// user-agent string it is actually presenting.
    pub fn fingerprint_consistent(platform: &str, user_agent: &str) -> bool {
        let platform_lower = platform.to_lowercase();
        let ua_lower = user_agent.to_lowercase();
        let token = match platform_lower.as_str() {
            "windows" => "windows",
            "macos" | "mac" => "mac os",
            "linux" => "linux",
            "android" => "android",
            "ios" => "iphone",
            _ => return true,
        };
        ua_lower.contains(token)
    }
}

fn now_ms() -> u64 {
    std::time::SystemTime::now().duration_since(std::time::UNIX_EPOCH).unwrap_or_default().as_millis() as u64
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mismatched_platform_and_user_agent_is_flagged() {
        let consistent = SockPuppetClient::fingerprint_consistent(
            "windows",
            "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7)",
        );
        assert!(!consistent);
    }

    #[test]
    fn matching_platform_and_user_agent_is_consistent() {
        let consistent = SockPuppetClient::fingerprint_consistent(
            "windows",
            "Mozilla/5.0 (Windows NT 10.0; Win64; x64)",
        );
        assert!(consistent);
    }

    #[tokio::test]
    async fn session_duration_is_none_until_ended() {
        let client = SockPuppetClient::new(&crate::config::IdentityConfig::default());
        client.start_session("profile-1", "puppet-1").await;
        let inner = client.inner.lock().await;
        assert!(inner.sessions[0].duration_ms().is_none());
    }
}
