use std::collections::{HashMap, VecDeque};

use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;

use crate::error::{Error, Result};
use crate::events::{Event, EventBus};
use crate::page_host::{CookieDetails, SameSite};

pub const DEFAULT_JAR: &str = "default";

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct JarOptions {
    #[serde(default)]
    pub sync_enabled: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CookieJar {
    pub name: String,
    pub isolated: bool,
    pub sync_enabled: bool,
    pub cookies: Vec<CookieDetails>,
    pub metadata: HashMap<String, String>,
}

impl CookieJar {
    fn new(name: impl Into<String>, opts: JarOptions) -> Self {
        Self {
            name: name.into(),
            isolated: true,
            sync_enabled: opts.sync_enabled,
            cookies: Vec::new(),
            metadata: HashMap::new(),
        }
    }

    pub fn cookie_count(&self) -> usize {
        self.cookies.len()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncMode {
    Merge,
    Replace,
}

#[derive(Debug, Default)]
pub struct SyncResult {
    pub added: usize,
    pub updated: usize,
    pub skipped: usize,
}

#[derive(Debug, Clone, Copy, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CookieCategory {
    Authentication,
    Security,
    Analytics,
    Advertising,
    Preferences,
    Functional,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum IssueSeverity {
    High,
    Medium,
    Low,
}

#[derive(Debug, Clone, Serialize)]
pub struct CookieIssue {
    pub code: &'static str,
    pub severity: IssueSeverity,
}

#[derive(Debug, Clone, Serialize)]
pub struct CookieAnalysis {
    pub category: CookieCategory,
    pub issues: Vec<CookieIssue>,
    pub score: i32,
}

fn classify(name: &str) -> CookieCategory {
    let n = name.to_lowercase();
    if ["session", "sid", "auth", "token", "jwt", "sso"].iter().any(|p| n.contains(p)) {
        CookieCategory::Authentication
    } else if ["csrf", "xsrf"].iter().any(|p| n.contains(p)) {
        CookieCategory::Security
    } else if ["_ga", "_gid", "utm"].iter().any(|p| n.contains(p)) {
        CookieCategory::Analytics
    } else if ["ad", "doubleclick"].iter().any(|p| n.contains(p)) {
        CookieCategory::Advertising
    } else if ["pref", "settings", "lang"].iter().any(|p| n.contains(p)) {
        CookieCategory::Preferences
    } else {
        CookieCategory::Functional
    }
}

fn is_sensitive(category: CookieCategory) -> bool {
    matches!(category, CookieCategory::Authentication | CookieCategory::Security)
}

const ONE_YEAR_SECS: f64 = 365.0 * 24.0 * 3600.0;

pub fn analyze_cookie(cookie: &CookieDetails, now_epoch_secs: f64) -> CookieAnalysis {
    let category = classify(&cookie.name);
    let sensitive = is_sensitive(category);
    let mut issues = Vec::new();

    if !cookie.secure {
        issues.push(CookieIssue {
            code: "missing_secure",
            severity: if sensitive { IssueSeverity::High } else { IssueSeverity::Medium },
        });
    }
    if !cookie.http_only {
        issues.push(CookieIssue {
            code: "missing_httponly",
            severity: if sensitive { IssueSeverity::High } else { IssueSeverity::Medium },
        });
    }
    if cookie.same_site == SameSite::NoRestriction {
        issues.push(CookieIssue { code: "missing_samesite", severity: IssueSeverity::Medium });
    }
    if let Some(expiry) = cookie.expiration_date {
        if expiry - now_epoch_secs > ONE_YEAR_SECS {
            issues.push(CookieIssue { code: "long_expiry", severity: IssueSeverity::Low });
        }
    }

    let penalty: i32 = issues
        .iter()
        .map(|i| match i.severity {
            IssueSeverity::High => 25,
            IssueSeverity::Medium => 10,
            IssueSeverity::Low => 3,
        })
        .sum();
    let score = (100 - penalty).clamp(0, 100);

    CookieAnalysis { category, issues, score }
}

#[derive(Debug, Clone, Copy, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum HistoryAction {
    Created,
    Modified,
    Deleted,
}

#[derive(Debug, Clone, Serialize)]
pub struct HistoryEntry {
    pub action: HistoryAction,
    pub cookie_name: String,
    pub domain: String,
    pub timestamp_ms: u64,
}

struct Inner {
    jars: HashMap<String, CookieJar>,
    active_jar: String,
    live_cookies: Vec<CookieDetails>,
    history: VecDeque<HistoryEntry>,
    max_history: usize,
}

/// Named isolated cookie jars with atomic switch/save/load/sync.
pub struct CookieJarManager {
    inner: Mutex<Inner>,
    events: EventBus,
}

impl CookieJarManager {
    pub fn new(config: &crate::config::CookiesConfig, events: EventBus) -> Self {
        let mut jars = HashMap::new();
        jars.insert(DEFAULT_JAR.to_string(), CookieJar::new(DEFAULT_JAR, JarOptions::default()));
        Self {
            inner: Mutex::new(Inner {
                jars,
                active_jar: DEFAULT_JAR.to_string(),
                live_cookies: Vec::new(),
                history: VecDeque::new(),
                max_history: config.max_history_size,
            }),
            events,
        }
    }

    pub async fn create_jar(&self, name: &str, opts: JarOptions) -> Result<()> {
        let mut inner = self.inner.lock().await;
        if inner.jars.contains_key(name) {
            return Err(Error::already_exists("jar", name));
        }
        inner.jars.insert(name.to_string(), CookieJar::new(name, opts));
        Ok(())
    }

    pub async fn delete_jar(&self, name: &str) -> Result<()> {
        if name == DEFAULT_JAR {
            return Err(Error::IllegalState("cannot delete default jar".into()));
        }
        let mut inner = self.inner.lock().await;
        if inner.jars.remove(name).is_none() {
            return Err(Error::not_found("jar", name));
        }
        Ok(())
    }

    pub async fn list_jars(&self) -> Vec<CookieJar> {
        let inner = self.inner.lock().await;
        inner.jars.values().cloned().collect()
    }

    pub async fn get_jar(&self, name: &str) -> Result<CookieJar> {
        let inner = self.inner.lock().await;
        inner.jars.get(name).cloned().ok_or_else(|| Error::not_found("jar", name))
    }

    /// Atomically: (i) optionally snapshot live cookies into the current
    /// jar; (ii) mark target active; (iii) optionally clear live cookies
    /// and apply target's cookies.
    pub async fn switch_jar(&self, name: &str, save_current: bool, load_target: bool) -> Result<()> {
        let mut inner = self.inner.lock().await;
        if !inner.jars.contains_key(name) {
            return Err(Error::not_found("jar", name));
        }
        let from = inner.active_jar.clone();

        if save_current {
            let live = inner.live_cookies.clone();
            if let Some(jar) = inner.jars.get_mut(&from) {
                jar.cookies = live;
            }
        }

        inner.active_jar = name.to_string();

        if load_target {
            let target_cookies = inner.jars.get(name).unwrap().cookies.clone();
            inner.live_cookies = target_cookies;
        }

        self.events.publish(Event::JarSwitched { from, to: name.to_string() });
        Ok(())
    }

    pub async fn save_to_jar(&self, name: &str) -> Result<()> {
        let mut inner = self.inner.lock().await;
        let live = inner.live_cookies.clone();
        let jar = inner.jars.get_mut(name).ok_or_else(|| Error::not_found("jar", name))?;
        jar.cookies = live;
        Ok(())
    }

    pub async fn load_from_jar(&self, name: &str) -> Result<()> {
        let mut inner = self.inner.lock().await;
        let cookies = inner.jars.get(name).ok_or_else(|| Error::not_found("jar", name))?.cookies.clone();
        inner.live_cookies = cookies;
        Ok(())
    }

    pub async fn sync_jars(
        &self,
        src: &str,
        dst: &str,
        mode: SyncMode,
        filter: Option<impl Fn(&CookieDetails) -> bool>,
    ) -> Result<SyncResult> {
        let mut inner = self.inner.lock().await;
        let src_cookies = inner.jars.get(src).ok_or_else(|| Error::not_found("jar", src))?.cookies.clone();
        if !inner.jars.contains_key(dst) {
            return Err(Error::not_found("jar", dst));
        }

        let filtered: Vec<CookieDetails> = match &filter {
            Some(f) => src_cookies.into_iter().filter(|c| f(c)).collect(),
            None => src_cookies,
        };
        let skipped_by_filter = 0usize; // filter already applied; kept separate from merge-skip counting below

        let mut result = SyncResult { skipped: skipped_by_filter, ..Default::default() };

        match mode {
            SyncMode::Replace => {
                let count = filtered.len();
                inner.jars.get_mut(dst).unwrap().cookies = filtered;
                result.added = count;
            }
            SyncMode::Merge => {
                let jar = inner.jars.get_mut(dst).unwrap();
                for cookie in filtered {
                    let key = (cookie.name.clone(), cookie.domain.clone(), cookie.path.clone());
                    if let Some(existing) = jar
                        .cookies
                        .iter_mut()
                        .find(|c| (c.name.clone(), c.domain.clone(), c.path.clone()) == key)
                    {
                        *existing = cookie;
                        result.updated += 1;
                    } else {
                        jar.cookies.push(cookie);
                        result.added += 1;
                    }
                }
            }
        }
        Ok(result)
    }

    pub async fn live_cookies(&self) -> Vec<CookieDetails> {
        self.inner.lock().await.live_cookies.clone()
    }

    pub async fn record_history(&self, action: HistoryAction, cookie_name: &str, domain: &str) {
        let mut inner = self.inner.lock().await;
        let max = inner.max_history;
        inner.history.push_back(HistoryEntry {
            action,
            cookie_name: cookie_name.to_string(),
            domain: domain.to_string(),
            timestamp_ms: now_ms(),
        });
        while inner.history.len() > max {
            inner.history.pop_front();
        }
    }

    pub async fn history(&self) -> Vec<HistoryEntry> {
        self.inner.lock().await.history.iter().cloned().collect()
    }
}

fn now_ms() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}

/// Pretty JSON export with a top-level cookie count.
pub fn export_json(jar: &CookieJar) -> Result<String> {
    #[derive(Serialize)]
    struct Envelope<'a> {
        count: usize,
        cookies: &'a [CookieDetails],
    }
    Ok(serde_json::to_string_pretty(&Envelope { count: jar.cookies.len(), cookies: &jar.cookies })?)
}

/// Tab-delimited Netscape cookie file.
pub fn export_netscape(jar: &CookieJar) -> String {
    let mut out = String::from("# Netscape HTTP Cookie File\n");
    for c in &jar.cookies {
        let expiry = c.expiration_date.map(|e| e as i64).unwrap_or(0);
        out.push_str(&format!(
            "{}\tTRUE\t{}\t{}\t{}\t{}\t{}\n",
            c.domain,
            c.path,
            if c.secure { "TRUE" } else { "FALSE" },
            expiry,
            c.name,
            c.value
        ));
    }
    out
}

/// Imports cookies from a Netscape file. Leniently skips malformed lines
/// rather than aborting the whole import — see DESIGN.md Open Question 3.
pub fn import_netscape(text: &str) -> Vec<CookieDetails> {
    let mut cookies = Vec::new();
    for line in text.lines() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        let parts: Vec<&str> = line.split('\t').collect();
        if parts.len() < 7 {
            tracing::warn!(line, "skipping malformed netscape cookie line");
            continue;
        }
        let expiry: Option<f64> = parts[4].parse().ok().filter(|v| *v != 0.0);
        cookies.push(CookieDetails {
            domain: parts[0].to_string(),
            path: parts[2].to_string(),
            secure: parts[3].eq_ignore_ascii_case("TRUE"),
            expiration_date: expiry,
            name: parts[5].to_string(),
            value: parts[6].to_string(),
            http_only: false,
            same_site: SameSite::Lax,
        });
    }
    cookies
}

pub fn export_csv(jar: &CookieJar) -> String {
    let mut out = String::from("Name,Value,Domain,Path,Secure,HttpOnly,SameSite\n");
    for c in &jar.cookies {
        out.push_str(&format!(
            "{},{},{},{},{},{},{:?}\n",
            c.name, c.value, c.domain, c.path, c.secure, c.http_only, c.same_site
        ));
    }
    out
}

pub fn export_curl(jar: &CookieJar, url: &str) -> String {
    let pairs: Vec<String> = jar
        .cookies
        .iter()
        .filter(|c| url.contains(&c.domain))
        .map(|c| format!("{}={}", c.name, c.value))
        .collect();
    format!("-H \"Cookie: {}\"", pairs.join("; "))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cookie(name: &str, domain: &str) -> CookieDetails {
        CookieDetails {
            name: name.to_string(),
            value: "v".to_string(),
            domain: domain.to_string(),
            path: "/".to_string(),
            secure: false,
            http_only: false,
            same_site: SameSite::NoRestriction,
            expiration_date: None,
        }
    }

    #[tokio::test]
    async fn default_jar_cannot_be_deleted() {
        let mgr = CookieJarManager::new(&crate::config::CookiesConfig::default(), EventBus::new(16));
        let err = mgr.delete_jar(DEFAULT_JAR).await;
        assert!(matches!(err, Err(Error::IllegalState(_))));
    }

    #[tokio::test]
    async fn deleted_jar_is_not_found() {
        let mgr = CookieJarManager::new(&crate::config::CookiesConfig::default(), EventBus::new(16));
        mgr.create_jar("scratch", JarOptions::default()).await.unwrap();
        mgr.delete_jar("scratch").await.unwrap();
        assert!(mgr.get_jar("scratch").await.is_err());
    }

    #[tokio::test]
    async fn merge_sync_scenario() {
        let mgr = CookieJarManager::new(&crate::config::CookiesConfig::default(), EventBus::new(16));
        mgr.create_jar("src", JarOptions::default()).await.unwrap();
        mgr.create_jar("dst", JarOptions::default()).await.unwrap();
        {
            let mut inner = mgr.inner.lock().await;
            inner.jars.get_mut("src").unwrap().cookies =
                vec![cookie("c1", "ex.com"), cookie("c2", "test.com")];
        }
        let result = mgr
            .sync_jars("src", "dst", SyncMode::Merge, Some(|c: &CookieDetails| c.domain == "ex.com"))
            .await
            .unwrap();
        assert_eq!(result.added, 1);
        let dst = mgr.get_jar("dst").await.unwrap();
        assert_eq!(dst.cookie_count(), 1);
    }

    #[test]
    fn missing_secure_on_session_cookie_is_high_severity() {
        let c = cookie("session_id", "ex.com");
        let analysis = analyze_cookie(&c, 0.0);
        assert!(analysis
            .issues
            .iter()
            .any(|i| i.code == "missing_secure" && i.severity == IssueSeverity::High));
        assert!(analysis.score < 100);
    }

    #[test]
    fn netscape_round_trip_preserves_core_fields() {
        let mut jar = CookieJar::new("t", JarOptions::default());
        jar.cookies.push(cookie("sid", "example.com"));
        let text = export_netscape(&jar);
        let imported = import_netscape(&text);
        assert_eq!(imported.len(), 1);
        assert_eq!(imported[0].name, "sid");
        assert_eq!(imported[0].domain, "example.com");
    }

    #[test]
    fn malformed_netscape_line_is_skipped_not_fatal() {
        let text = "# Netscape HTTP Cookie File\nbroken-line\nexample.com\tTRUE\t/\tFALSE\t0\tsid\tabc\n";
        let imported = import_netscape(text);
        assert_eq!(imported.len(), 1);
    }
}
