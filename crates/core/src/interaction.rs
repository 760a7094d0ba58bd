use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tokio::sync::Mutex;

use crate::error::{Error, Result};
use crate::events::{Event, EventBus};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecorderState {
    Idle,
    Recording,
    Paused,
    Stopped,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventType {
    Click,
    MouseDown,
    MouseUp,
    Move,
    Wheel,
    KeyDown,
    KeyUp,
    Input,
    Scroll,
    Navigation,
    Load,
    Resize,
    Visibility,
    Focus,
    Blur,
    Hover,
    Select,
    Change,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ElementRef {
    pub selector: Option<String>,
    pub element_type: Option<String>,
    pub name: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InteractionEvent {
    pub id: u64,
    pub event_type: EventType,
    pub timestamp_ms: u64,
    pub data: serde_json::Value,
    pub element: Option<ElementRef>,
    pub masked: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Checkpoint {
    pub event_index: usize,
    pub relative_time_ms: u64,
    pub name: String,
    pub description: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Annotation {
    pub event_index: usize,
    pub text: String,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct RecorderStats {
    pub events_recorded: u64,
    pub masked_events: u64,
    pub max_events_reached: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecordingOptions {
    #[serde(default = "default_true")]
    pub record_mouse_move: bool,
    #[serde(default = "default_true")]
    pub record_scroll: bool,
    #[serde(default = "default_true")]
    pub mask_sensitive_data: bool,
    #[serde(default = "default_throttle")]
    pub mouse_move_throttle_ms: u64,
    #[serde(default = "default_throttle")]
    pub scroll_throttle_ms: u64,
    #[serde(default = "default_max_events")]
    pub max_events: usize,
    pub auto_checkpoint_interval_ms: Option<u64>,
}

fn default_true() -> bool {
    true
}
fn default_throttle() -> u64 {
    50
}
fn default_max_events() -> usize {
    100_000
}

impl Default for RecordingOptions {
    fn default() -> Self {
        Self {
            record_mouse_move: true,
            record_scroll: true,
            mask_sensitive_data: true,
            mouse_move_throttle_ms: default_throttle(),
            scroll_throttle_ms: default_throttle(),
            max_events: default_max_events(),
            auto_checkpoint_interval_ms: None,
        }
    }
}

const SENSITIVE_NAME_PATTERNS: &[&str] =
    &["password", "email", "creditcard", "cc-", "credit", "ssn", "token", "auth", "key", "secret"];

fn is_sensitive_element(element: Option<&ElementRef>) -> bool {
    let Some(el) = element else { return false };
    if matches!(el.element_type.as_deref(), Some("password") | Some("email")) {
        return true;
    }
    if let Some(name) = &el.name {
        let lower = name.to_lowercase();
        return SENSITIVE_NAME_PATTERNS.iter().any(|p| lower.contains(p));
    }
    false
}

struct ThrottleState {
    last_emit: Option<Instant>,
    pending: Option<serde_json::Value>,
}

impl ThrottleState {
    fn new() -> Self {
        Self { last_emit: None, pending: None }
    }
}

struct Inner {
    state: RecorderState,
    options: RecordingOptions,
    events: Vec<InteractionEvent>,
    checkpoints: Vec<Checkpoint>,
    annotations: Vec<Annotation>,
    next_event_id: u64,
    started_at: Option<Instant>,
    ended_at: Option<Instant>,
    paused_total: Duration,
    pause_started: Option<Instant>,
    mouse_move_throttle: ThrottleState,
    scroll_throttle: ThrottleState,
    stats: RecorderStats,
    hash: Option<String>,
    name: String,
    description: Option<String>,
    start_url: String,
}

/// Throttled, masked event capture with checkpoints and hash sealing.
/// Generalized from the teacher's per-pane terminal frame recorder
/// (`FrameWriter`/`RecordingManager`) to per-recording interaction
/// events.
pub struct InteractionRecorder {
    inner: Mutex<Inner>,
    events_bus: EventBus,
}

impl InteractionRecorder {
    pub fn new(events_bus: EventBus) -> Self {
        Self {
            inner: Mutex::new(Inner {
                state: RecorderState::Idle,
                options: RecordingOptions::default(),
                events: Vec::new(),
                checkpoints: Vec::new(),
                annotations: Vec::new(),
                next_event_id: 1,
                started_at: None,
                ended_at: None,
                paused_total: Duration::ZERO,
                pause_started: None,
                mouse_move_throttle: ThrottleState::new(),
                scroll_throttle: ThrottleState::new(),
                stats: RecorderStats::default(),
                hash: None,
                name: String::new(),
                description: None,
                start_url: String::new(),
            }),
            events_bus,
        }
    }

    /// Starts a recording and, if `options.auto_checkpoint_interval_ms` is
    /// set, spawns a ticker that drops a checkpoint on that cadence until
    /// the recording stops (teacher pattern: `WindowPool::initialize`'s
    /// health-check ticker spawned off an `Arc::clone` of self).
    pub async fn start(
        self: &Arc<Self>,
        name: &str,
        description: Option<&str>,
        start_url: &str,
        options: RecordingOptions,
    ) -> Result<()> {
        let mut inner = self.inner.lock().await;
        if inner.state != RecorderState::Idle {
            return Err(Error::IllegalState("recording already in progress".into()));
        }
        inner.state = RecorderState::Recording;
        let auto_checkpoint_interval_ms = options.auto_checkpoint_interval_ms;
        inner.options = options;
        inner.name = name.to_string();
        inner.description = description.map(str::to_string);
        inner.start_url = start_url.to_string();
        inner.started_at = Some(Instant::now());
        drop(inner);

        if let Some(interval_ms) = auto_checkpoint_interval_ms {
            let recorder = Arc::clone(self);
            tokio::spawn(async move {
                let mut n = 0u64;
                loop {
                    tokio::time::sleep(Duration::from_millis(interval_ms)).await;
                    let state = recorder.inner.lock().await.state;
                    if state == RecorderState::Stopped {
                        break;
                    }
                    if state == RecorderState::Recording {
                        n += 1;
                        let _ = recorder.create_checkpoint(&format!("auto-{n}"), None).await;
                    }
                }
            });
        }
        Ok(())
    }

    pub async fn pause(&self) -> Result<()> {
        let mut inner = self.inner.lock().await;
        if inner.state != RecorderState::Recording {
            return Err(Error::IllegalState("not recording".into()));
        }
        inner.state = RecorderState::Paused;
        inner.pause_started = Some(Instant::now());
        Ok(())
    }

    pub async fn resume(&self) -> Result<()> {
        let mut inner = self.inner.lock().await;
        if inner.state != RecorderState::Paused {
            return Err(Error::IllegalState("not paused".into()));
        }
        if let Some(start) = inner.pause_started.take() {
            inner.paused_total += start.elapsed();
        }
        inner.state = RecorderState::Recording;
        Ok(())
    }

    fn elapsed_ms(inner: &Inner) -> u64 {
        inner.started_at.map(|s| s.elapsed().as_millis() as u64).unwrap_or(0)
    }

    async fn push_event(
        &self,
        inner: &mut Inner,
        event_type: EventType,
        data: serde_json::Value,
        element: Option<ElementRef>,
    ) {
        if inner.state != RecorderState::Recording {
            return;
        }
        if inner.events.len() >= inner.options.max_events {
            if !inner.stats.max_events_reached {
                inner.stats.max_events_reached = true;
                self.events_bus.publish(Event::MaxEventsReached { recording_id: inner.name.clone() });
            }
            return;
        }
        let masked = inner.options.mask_sensitive_data && is_sensitive_element(element.as_ref());
        let data = if masked { serde_json::json!("***") } else { data };
        let id = inner.next_event_id;
        inner.next_event_id += 1;
        let timestamp_ms = Self::elapsed_ms(inner);
        inner.events.push(InteractionEvent { id, event_type, timestamp_ms, data, element, masked });
        inner.stats.events_recorded += 1;
        if masked {
            inner.stats.masked_events += 1;
        }
    }

    /// Records an input event, applying sensitive-field masking.
    pub async fn record_input(&self, element: ElementRef, value: &str) {
        let mut inner = self.inner.lock().await;
        let data = serde_json::json!({ "value": value });
        self.push_event(&mut inner, EventType::Input, data, Some(element)).await;
    }

    pub async fn record_click(&self, x: f64, y: f64, element: Option<ElementRef>) {
        let mut inner = self.inner.lock().await;
        let data = serde_json::json!({ "x": x, "y": y });
        self.push_event(&mut inner, EventType::Click, data, element).await;
    }

    pub async fn record_key(&self, event_type: EventType, key: &str, element: Option<ElementRef>) {
        let mut inner = self.inner.lock().await;
        let data = serde_json::json!({ "key": key });
        self.push_event(&mut inner, event_type, data, element).await;
    }

    /// Coalesces mouse-move events: only the latest position in each
    /// throttle window is retained.
    pub async fn record_mouse_move(&self, x: f64, y: f64) {
        let mut inner = self.inner.lock().await;
        if !inner.options.record_mouse_move {
            return;
        }
        let throttle = Duration::from_millis(inner.options.mouse_move_throttle_ms);
        let now = Instant::now();
        let should_emit = inner
            .mouse_move_throttle
            .last_emit
            .map_or(true, |last| now.duration_since(last) >= throttle);
        inner.mouse_move_throttle.pending = Some(serde_json::json!({ "x": x, "y": y }));
        if should_emit {
            inner.mouse_move_throttle.last_emit = Some(now);
            let data = inner.mouse_move_throttle.pending.take().unwrap();
            self.push_event(&mut inner, EventType::Move, data, None).await;
        }
    }

    pub async fn record_scroll(&self, x: f64, y: f64) {
        let mut inner = self.inner.lock().await;
        if !inner.options.record_scroll {
            return;
        }
        let throttle = Duration::from_millis(inner.options.scroll_throttle_ms);
        let now = Instant::now();
        let should_emit = inner
            .scroll_throttle
            .last_emit
            .map_or(true, |last| now.duration_since(last) >= throttle);
        inner.scroll_throttle.pending = Some(serde_json::json!({ "x": x, "y": y }));
        if should_emit {
            inner.scroll_throttle.last_emit = Some(now);
            let data = inner.scroll_throttle.pending.take().unwrap();
            self.push_event(&mut inner, EventType::Scroll, data, None).await;
        }
    }

    pub async fn create_checkpoint(&self, name: &str, description: Option<&str>) -> Result<()> {
        let mut inner = self.inner.lock().await;
        let event_index = inner.events.len();
        let relative_time_ms = Self::elapsed_ms(&inner) - inner.paused_total.as_millis() as u64;
        inner.checkpoints.push(Checkpoint {
            event_index,
            relative_time_ms,
            name: name.to_string(),
            description: description.map(str::to_string),
        });
        Ok(())
    }

    /// Computes `SHA-256(canonical(events ∥ checkpoints ∥ metadata))` and
    /// freezes the recording.
    pub async fn stop(&self) -> Result<RecordedSession> {
        let mut inner = self.inner.lock().await;
        if !matches!(inner.state, RecorderState::Recording | RecorderState::Paused) {
            return Err(Error::IllegalState("recorder is not active".into()));
        }
        inner.state = RecorderState::Stopped;
        inner.ended_at = Some(Instant::now());
        let hash = compute_hash(&inner.events, &inner.checkpoints, &inner.name, &inner.start_url);
        inner.hash = Some(hash.clone());
        Ok(RecordedSession {
            name: inner.name.clone(),
            description: inner.description.clone(),
            start_url: inner.start_url.clone(),
            events: inner.events.clone(),
            checkpoints: inner.checkpoints.clone(),
            annotations: inner.annotations.clone(),
            stats: inner.stats.clone(),
            hash,
        })
    }

    pub async fn is_recording(&self) -> bool {
        self.inner.lock().await.state == RecorderState::Recording
    }

    pub async fn stats(&self) -> RecorderStats {
        self.inner.lock().await.stats.clone()
    }
}

/// A frozen, hash-sealed recording. Mutating `events` after the fact and
/// recomputing the hash is how tamper detection works in tests: sealed
/// data is handed to evidence as an owned value, so any later edits
/// create a divergent copy, not a mutation of the original.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecordedSession {
    pub name: String,
    pub description: Option<String>,
    pub start_url: String,
    pub events: Vec<InteractionEvent>,
    pub checkpoints: Vec<Checkpoint>,
    pub annotations: Vec<Annotation>,
    pub stats: RecorderStats,
    pub hash: String,
}

impl RecordedSession {
    pub fn verify_hash(&self) -> bool {
        compute_hash(&self.events, &self.checkpoints, &self.name, &self.start_url) == self.hash
    }
}

fn compute_hash(events: &[InteractionEvent], checkpoints: &[Checkpoint], name: &str, start_url: &str) -> String {
    #[derive(Serialize)]
    struct Canonical<'a> {
        events: &'a [InteractionEvent],
        checkpoints: &'a [Checkpoint],
        name: &'a str,
        start_url: &'a str,
    }
    let canonical = Canonical { events, checkpoints, name, start_url };
    let bytes = serde_json::to_vec(&canonical).expect("interaction events are always serializable");
    let mut hasher = Sha256::new();
    hasher.update(&bytes);
    hex::encode(hasher.finalize())
}

/// Export dialect options shared across all four targets.
#[derive(Debug, Clone, Default)]
pub struct ExportOptions {
    pub include_imports: bool,
    pub include_setup: bool,
    pub include_waits: bool,
    pub driver_var: String,
    pub page_var: String,
    pub browser_var: String,
    pub context_var: String,
}

fn escape_for_target(s: &str) -> String {
    s.replace('\\', "\\\\").replace('"', "\\\"").replace('\n', "\\n")
}

pub enum Dialect {
    Json,
    Selenium,
    Puppeteer,
    Playwright,
}

pub fn export_recording(session: &RecordedSession, dialect: Dialect, options: &ExportOptions) -> Result<String> {
    match dialect {
        Dialect::Json => Ok(serde_json::to_string_pretty(session)?),
        Dialect::Selenium => Ok(render_script(session, options, "    # ", |e| match e.event_type {
            EventType::Click => format!(
                "{}.find_element(By.CSS_SELECTOR, \"{}\").click()",
                options.driver_var,
                escape_for_target(selector_of(e))
            ),
            EventType::Input => format!(
                "{}.find_element(By.CSS_SELECTOR, \"{}\").send_keys(\"{}\")",
                options.driver_var,
                escape_for_target(selector_of(e)),
                escape_for_target(&value_of(e))
            ),
            EventType::Navigation => format!("{}.get(\"{}\")", options.driver_var, escape_for_target(&value_of(e))),
            other => format!("# Unsupported action: {other:?}"),
        })),
        Dialect::Puppeteer => Ok(render_script(session, options, "  // ", |e| match e.event_type {
            EventType::Click => format!(
                "await {}.click(\"{}\");",
                options.page_var,
                escape_for_target(selector_of(e))
            ),
            EventType::Input => format!(
                "await {}.type(\"{}\", \"{}\");",
                options.page_var,
                escape_for_target(selector_of(e)),
                escape_for_target(&value_of(e))
            ),
            EventType::Navigation => format!("await {}.goto(\"{}\");", options.page_var, escape_for_target(&value_of(e))),
            other => format!("// Unsupported action: {other:?}"),
        })),
        Dialect::Playwright => Ok(render_script(session, options, "  // ", |e| match e.event_type {
            EventType::Click => format!(
                "await {}.click(\"{}\");",
                options.page_var,
                escape_for_target(selector_of(e))
            ),
            EventType::Input => format!(
                "await {}.fill(\"{}\", \"{}\");",
                options.page_var,
                escape_for_target(selector_of(e)),
                escape_for_target(&value_of(e))
            ),
            EventType::Navigation => format!("await {}.goto(\"{}\");", options.page_var, escape_for_target(&value_of(e))),
            other => format!("// Unsupported action: {other:?}"),
        })),
    }
}

fn selector_of(e: &InteractionEvent) -> String {
    e.element.as_ref().and_then(|el| el.selector.clone()).unwrap_or_default()
}

fn value_of(e: &InteractionEvent) -> String {
    e.data.get("value").and_then(|v| v.as_str()).map(str::to_string).unwrap_or_else(|| e.data.to_string())
}

fn render_script(
    session: &RecordedSession,
    options: &ExportOptions,
    _comment_prefix: &str,
    render_event: impl Fn(&InteractionEvent) -> String,
) -> String {
    let mut out = String::new();
    if options.include_imports {
        out.push_str("# imports\n");
    }
    if options.include_setup {
        out.push_str("# setup\n");
    }
    for event in &session.events {
        out.push_str(&render_event(event));
        out.push('\n');
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn start_outside_idle_is_illegal() {
        let recorder = Arc::new(InteractionRecorder::new(EventBus::new(16)));
        recorder.start("r1", None, "https://example.com", RecordingOptions::default()).await.unwrap();
        let err = recorder.start("r1", None, "https://example.com", RecordingOptions::default()).await;
        assert!(matches!(err, Err(Error::IllegalState(_))));
    }

    #[tokio::test]
    async fn recording_tamper_scenario() {
        let recorder = Arc::new(InteractionRecorder::new(EventBus::new(16)));
        recorder.start("r1", None, "https://example.com", RecordingOptions::default()).await.unwrap();
        recorder.record_click(100.0, 100.0, None).await;
        let mut session = recorder.stop().await.unwrap();
        assert!(session.verify_hash());

        session.events.push(InteractionEvent {
            id: 999,
            event_type: EventType::Click,
            timestamp_ms: 0,
            data: serde_json::json!({}),
            element: None,
            masked: false,
        });
        assert!(!session.verify_hash());
    }

    #[tokio::test]
    async fn password_input_is_masked() {
        let recorder = Arc::new(InteractionRecorder::new(EventBus::new(16)));
        recorder.start("r1", None, "https://example.com", RecordingOptions::default()).await.unwrap();
        let element = ElementRef { selector: Some("#pw".into()), element_type: Some("password".into()), name: None };
        recorder.record_input(element, "hunter2").await;
        let session = recorder.stop().await.unwrap();
        assert_eq!(session.stats.masked_events, 1);
        assert_eq!(session.events[0].data, serde_json::json!("***"));
    }

    #[tokio::test]
    async fn max_events_guard_emits_once() {
        let mut options = RecordingOptions::default();
        options.max_events = 2;
        let recorder = Arc::new(InteractionRecorder::new(EventBus::new(16)));
        recorder.start("r1", None, "https://example.com", options).await.unwrap();
        for _ in 0..5 {
            recorder.record_click(0.0, 0.0, None).await;
        }
        let stats = recorder.stats().await;
        assert_eq!(stats.events_recorded, 2);
        assert!(stats.max_events_reached);
    }

    #[tokio::test]
    async fn stop_outside_recording_or_paused_is_illegal() {
        let recorder = Arc::new(InteractionRecorder::new(EventBus::new(16)));
        let err = recorder.stop().await;
        assert!(matches!(err, Err(Error::IllegalState(_))));
    }

    #[tokio::test]
    async fn auto_checkpoint_ticker_drops_checkpoints_on_interval() {
        let recorder = Arc::new(InteractionRecorder::new(EventBus::new(16)));
        let options = RecordingOptions { auto_checkpoint_interval_ms: Some(20), ..RecordingOptions::default() };
        recorder.start("r1", None, "https://example.com", options).await.unwrap();

        tokio::time::sleep(Duration::from_millis(70)).await;
        let session = recorder.stop().await.unwrap();
        assert!(session.checkpoints.len() >= 2, "expected at least two auto-checkpoints, got {}", session.checkpoints.len());
        assert!(session.checkpoints.iter().all(|c| c.name.starts_with("auto-")));
    }

    #[tokio::test]
    async fn password_field_keydown_is_masked() {
        let recorder = Arc::new(InteractionRecorder::new(EventBus::new(16)));
        recorder.start("r1", None, "https://example.com", RecordingOptions::default()).await.unwrap();
        let element = ElementRef { selector: Some("#pw".into()), element_type: Some("password".into()), name: None };
        recorder.record_key(EventType::KeyDown, "a", Some(element)).await;
        let session = recorder.stop().await.unwrap();
        assert_eq!(session.stats.masked_events, 1);
        assert_eq!(session.events[0].data, serde_json::json!("***"));
    }
}
