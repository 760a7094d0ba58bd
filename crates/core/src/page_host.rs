use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::mpsc;

use crate::error::{Error, Result};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoadOptions {
    #[serde(default = "default_true")]
    pub wait_for_load: bool,
}

fn default_true() -> bool {
    true
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CaptureOptions {
    pub full: bool,
    pub element: Option<String>,
    pub area: Option<(u32, u32, u32, u32)>,
    pub format: Option<String>,
    pub quality: Option<f32>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CookieFilter {
    pub domain: Option<String>,
    pub name: Option<String>,
}

/// A CSS-selector's bounding box, in viewport pixels. Returned by
/// `PageHost::element_rects` for the Screenshot Manager's highlight/blur
/// compositing; the opaque host is responsible for resolving a selector
/// against the live DOM the way `evaluate`'s JS would.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct ElementRect {
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum SameSite {
    Strict,
    Lax,
    NoRestriction,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CookieDetails {
    pub name: String,
    pub value: String,
    pub domain: String,
    pub path: String,
    pub secure: bool,
    pub http_only: bool,
    pub same_site: SameSite,
    pub expiration_date: Option<f64>,
}

/// Events streamed out of a Page Host as the adapter observes them.
#[derive(Debug, Clone)]
pub enum PageHostEvent {
    DidStartLoading,
    DidNavigate { url: String },
    DidFinishLoad,
    DidFailLoad { error: String },
    Paint { dirty_rect: (u32, u32, u32, u32), buffer: Arc<Vec<u8>> },
}

/// Thin capability surface exposed to the rest of the core. Commands on
/// a single host are serialized by the caller (Window Pool / Multi-Page
/// Manager own the per-host queue); the adapter itself only needs to be
/// safe to call repeatedly, including after `close()`.
#[async_trait]
pub trait PageHost: Send + Sync {
    fn id(&self) -> &str;

    async fn load_url(&self, url: &str, options: LoadOptions) -> Result<()>;

    async fn evaluate(&self, code: &str, args: Value) -> Result<Value>;

    async fn capture(&self, options: CaptureOptions) -> Result<Vec<u8>>;

    /// Bounding boxes for each selector, in viewport pixels. Selectors the
    /// host can't resolve come back with all-zero rects rather than
    /// shortening the result, so callers can zip it against their input.
    async fn element_rects(&self, selectors: &[String]) -> Result<Vec<ElementRect>>;

    /// Delegates OCR/text-extraction to the host. No OCR engine is
    /// vendored in this crate; the opaque host owns that capability and
    /// this call is its entire integration surface.
    async fn extract_text(&self, selector: Option<&str>, language: Option<&str>) -> Result<String>;

    /// `(viewport_height, total_scrollable_height)`, used by
    /// `captureScrolling` to compute how many viewport-sized frames to
    /// stitch together.
    async fn scroll_extent(&self) -> Result<(u32, u32)>;

    async fn get_cookies(&self, filter: CookieFilter) -> Result<Vec<CookieDetails>>;

    async fn set_cookie(&self, details: CookieDetails) -> Result<()>;

    async fn remove_cookie(&self, url: &str, name: &str) -> Result<()>;

    /// Must tolerate being called more than once.
    async fn close(&self) -> Result<()>;

    fn is_alive(&self) -> bool;

    fn subscribe(&self) -> mpsc::Receiver<PageHostEvent>;
}

/// In-memory stand-in for the real embedded browser runtime. This is the
/// single test seam for every component above the adapter layer.
pub struct NullPageHost {
    id: String,
    alive: AtomicBool,
    current_url: Mutex<Option<String>>,
    cookies: Mutex<HashMap<(String, String, String), CookieDetails>>,
    events_tx: mpsc::Sender<PageHostEvent>,
    events_rx: Mutex<Option<mpsc::Receiver<PageHostEvent>>>,
    scroll_extent: Mutex<(u32, u32)>,
}

impl NullPageHost {
    pub fn new(id: impl Into<String>) -> Self {
        let (tx, rx) = mpsc::channel(256);
        Self {
            id: id.into(),
            alive: AtomicBool::new(true),
            current_url: Mutex::new(None),
            cookies: Mutex::new(HashMap::new()),
            events_tx: tx,
            events_rx: Mutex::new(Some(rx)),
            scroll_extent: Mutex::new((600, 600)),
        }
    }

    pub fn current_url(&self) -> Option<String> {
        self.current_url.lock().clone()
    }

    /// Lets tests exercise `captureScrolling`'s multi-frame path without a
    /// real renderer to report page height.
    pub fn set_scroll_extent(&self, viewport_height: u32, total_height: u32) {
        *self.scroll_extent.lock() = (viewport_height, total_height);
    }
}

#[async_trait]
impl PageHost for NullPageHost {
    fn id(&self) -> &str {
        &self.id
    }

    async fn load_url(&self, url: &str, _options: LoadOptions) -> Result<()> {
        if !self.is_alive() {
            return Err(Error::PageGone(self.id.clone()));
        }
        let _ = self.events_tx.try_send(PageHostEvent::DidStartLoading);
        *self.current_url.lock() = Some(url.to_string());
        let _ = self.events_tx.try_send(PageHostEvent::DidNavigate { url: url.to_string() });
        let _ = self.events_tx.try_send(PageHostEvent::DidFinishLoad);
        Ok(())
    }

    async fn evaluate(&self, _code: &str, _args: Value) -> Result<Value> {
        if !self.is_alive() {
            return Err(Error::PageGone(self.id.clone()));
        }
        Ok(Value::Null)
    }

    async fn capture(&self, _options: CaptureOptions) -> Result<Vec<u8>> {
        if !self.is_alive() {
            return Err(Error::PageGone(self.id.clone()));
        }
        Ok(vec![0u8; 16])
    }

    async fn element_rects(&self, selectors: &[String]) -> Result<Vec<ElementRect>> {
        if !self.is_alive() {
            return Err(Error::PageGone(self.id.clone()));
        }
        Ok(selectors
            .iter()
            .enumerate()
            .map(|(i, _)| ElementRect { x: (i as u32) * 20, y: (i as u32) * 20, width: 100, height: 20 })
            .collect())
    }

    async fn extract_text(&self, _selector: Option<&str>, _language: Option<&str>) -> Result<String> {
        if !self.is_alive() {
            return Err(Error::PageGone(self.id.clone()));
        }
        Ok(self.current_url.lock().clone().unwrap_or_default())
    }

    async fn scroll_extent(&self) -> Result<(u32, u32)> {
        if !self.is_alive() {
            return Err(Error::PageGone(self.id.clone()));
        }
        Ok(*self.scroll_extent.lock())
    }

    async fn get_cookies(&self, filter: CookieFilter) -> Result<Vec<CookieDetails>> {
        let cookies = self.cookies.lock();
        Ok(cookies
            .values()
            .filter(|c| filter.domain.as_deref().map_or(true, |d| c.domain == d))
            .filter(|c| filter.name.as_deref().map_or(true, |n| c.name == n))
            .cloned()
            .collect())
    }

    async fn set_cookie(&self, details: CookieDetails) -> Result<()> {
        let key = (details.name.clone(), details.domain.clone(), details.path.clone());
        self.cookies.lock().insert(key, details);
        Ok(())
    }

    async fn remove_cookie(&self, url: &str, name: &str) -> Result<()> {
        let mut cookies = self.cookies.lock();
        cookies.retain(|(n, domain, _), _| !(n == name && url.contains(domain.as_str())));
        Ok(())
    }

    async fn close(&self) -> Result<()> {
        self.alive.store(false, Ordering::SeqCst);
        Ok(())
    }

    fn is_alive(&self) -> bool {
        self.alive.load(Ordering::SeqCst)
    }

    fn subscribe(&self) -> mpsc::Receiver<PageHostEvent> {
        self.events_rx
            .lock()
            .take()
            .expect("subscribe called more than once on NullPageHost")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn close_is_idempotent() {
        let host = NullPageHost::new("h1");
        host.close().await.unwrap();
        host.close().await.unwrap();
        assert!(!host.is_alive());
    }

    #[tokio::test]
    async fn load_url_after_close_returns_page_gone() {
        let host = NullPageHost::new("h1");
        host.close().await.unwrap();
        let err = host.load_url("https://example.com", LoadOptions { wait_for_load: true }).await;
        assert!(matches!(err, Err(Error::PageGone(_))));
    }

    #[tokio::test]
    async fn set_and_get_cookie_round_trips() {
        let host = NullPageHost::new("h1");
        host.set_cookie(CookieDetails {
            name: "sid".into(),
            value: "abc".into(),
            domain: "example.com".into(),
            path: "/".into(),
            secure: true,
            http_only: true,
            same_site: SameSite::Lax,
            expiration_date: None,
        })
        .await
        .unwrap();
        let cookies = host.get_cookies(CookieFilter::default()).await.unwrap();
        assert_eq!(cookies.len(), 1);
        assert_eq!(cookies[0].name, "sid");
    }
}
